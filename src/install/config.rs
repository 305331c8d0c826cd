//! Install paths and tunables.

use anyhow::{Result, anyhow};
use std::path::PathBuf;
use std::time::Duration;

use crate::http::HttpClient;
use crate::runtime::Runtime;

/// Where the manager keeps bundles, scratch space, and the managed mod/lib
/// folders, plus network tunables. Fields are public so callers can override
/// individual paths after construction.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Data root; everything else defaults to paths under it.
    pub root: PathBuf,
    /// Where installed bundles are stored (shared with the ledger's other
    /// consumers).
    pub storage_dir: PathBuf,
    /// Scratch space for per-operation extraction directories and downloads.
    pub scratch_dir: PathBuf,
    /// Managed folder that mod files are placed into.
    pub mods_dir: PathBuf,
    /// Managed folder that library files are placed into.
    pub libs_dir: PathBuf,
    /// The external installation ledger document.
    pub ledger_path: PathBuf,
    /// Overrides the host package id reported by the runtime.
    pub host_package_id: Option<String>,
    /// Timeout applied to each fetch request.
    pub fetch_timeout: Duration,
}

impl InstallConfig {
    /// Resolve the data root (flag value, `QPKG_ROOT`, platform data dir,
    /// `~/.qpkg`, in that order) and derive the default layout from it.
    pub fn new<R: Runtime>(runtime: &R, root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => default_root(runtime)?,
        };
        Ok(Self::from_root(root))
    }

    /// Default layout under an explicit root.
    pub fn from_root(root: PathBuf) -> Self {
        let storage_dir = root.join("Mods");
        let scratch_dir = storage_dir.join("Temp");
        Self {
            mods_dir: root.join("files").join("mods"),
            libs_dir: root.join("files").join("libs"),
            ledger_path: root.join("config.json"),
            storage_dir,
            scratch_dir,
            root,
            host_package_id: None,
            fetch_timeout: Duration::from_secs(30),
        }
    }

    /// Shared scratch location for fetched bundles.
    pub fn downloads_dir(&self) -> PathBuf {
        self.scratch_dir.join("Downloads")
    }

    /// HTTP client honoring the configured fetch timeout.
    pub fn http_client(&self) -> Result<HttpClient> {
        let client = reqwest::Client::builder()
            .user_agent("qpkg-cli")
            .timeout(self.fetch_timeout)
            .build()?;
        Ok(HttpClient::new(client))
    }
}

fn default_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if let Ok(root) = runtime.env_var("QPKG_ROOT") {
        return Ok(PathBuf::from(root));
    }
    if let Some(data) = runtime.data_dir() {
        return Ok(data.join("qpkg"));
    }
    runtime
        .home_dir()
        .map(|home| home.join(".qpkg"))
        .ok_or_else(|| anyhow!("Could not determine a data directory; pass --root or set QPKG_ROOT"))
}
