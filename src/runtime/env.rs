//! Environment, directory, and host identity operations.

use std::env;
use std::path::PathBuf;

use super::RealRuntime;

/// Host application package id assumed when `QPKG_HOST_PACKAGE` is not set.
pub const DEFAULT_HOST_PACKAGE: &str = "com.beatgames.beatsaber";

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn env_var_impl(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn home_dir_impl(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn data_dir_impl(&self) -> Option<PathBuf> {
        dirs::data_dir()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn host_package_id_impl(&self) -> String {
        env::var("QPKG_HOST_PACKAGE").unwrap_or_else(|_| DEFAULT_HOST_PACKAGE.to_string())
    }
}
