//! Bundle manifest model and parsing.
//!
//! Every `.qmod` bundle carries a `mod.json` entry describing the package:
//! identity, target host, version, the files to install, and the packages it
//! depends on. All manifest fields are optional at the syntax level; absent
//! strings default to empty, absent arrays to empty.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::archive::BundleExtractor;
use crate::runtime::Runtime;

/// Name of the manifest entry inside a bundle.
pub const MANIFEST_ENTRY: &str = "mod.json";

/// A dependency declared by a package manifest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Dependency {
    /// Identity of the depended-on package.
    pub id: String,
    /// Version range the dependency must satisfy.
    pub version: String,
    /// Where to fetch the dependency if it is missing or outdated.
    /// Empty means resolution must fail rather than fetch.
    pub download_if_missing: String,
}

/// A bundle entry that is copied to an absolute destination outside the
/// managed mod/lib folders.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct FileCopy {
    /// Entry name inside the bundle.
    pub name: String,
    /// Absolute destination path.
    pub destination: String,
}

/// Parsed contents of a bundle's `mod.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ModManifest {
    pub name: String,
    pub id: String,
    pub description: String,
    pub author: String,
    pub porter: String,
    pub version: String,
    pub cover_image: String,
    /// Package id of the host application this package targets.
    pub package_id: String,
    /// Host application version this package was built against.
    pub package_version: String,
    pub mod_files: Vec<String>,
    pub library_files: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub file_copies: Vec<FileCopy>,
}

/// Errors from turning a bundle into a [`ModManifest`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read bundle {path:?}")]
    Bundle {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("bundle {path:?} has no {MANIFEST_ENTRY} entry")]
    MissingManifest { path: PathBuf },
    #[error("malformed {MANIFEST_ENTRY} in {path:?}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Extract and parse the manifest entry of the bundle at `bundle_path`.
///
/// `scratch_dir` is a caller-provided, operation-unique directory; it is
/// created here and removed again on every return path.
#[tracing::instrument(skip(runtime, extractor, scratch_dir))]
pub fn parse_bundle<R: Runtime + 'static, E: BundleExtractor>(
    runtime: &R,
    extractor: &E,
    bundle_path: &Path,
    scratch_dir: &Path,
) -> Result<ModManifest, ParseError> {
    let result = parse_bundle_inner(runtime, extractor, bundle_path, scratch_dir);

    if runtime.exists(scratch_dir)
        && let Err(e) = runtime.remove_dir_all(scratch_dir)
    {
        log::warn!("Failed to remove scratch dir {:?}: {}", scratch_dir, e);
    }

    result
}

fn parse_bundle_inner<R: Runtime + 'static, E: BundleExtractor>(
    runtime: &R,
    extractor: &E,
    bundle_path: &Path,
    scratch_dir: &Path,
) -> Result<ModManifest, ParseError> {
    let bundle_err = |source: anyhow::Error| ParseError::Bundle {
        path: bundle_path.to_path_buf(),
        source: source.into(),
    };

    runtime
        .create_dir_all(scratch_dir)
        .with_context(|| format!("Failed to create scratch dir {:?}", scratch_dir))
        .map_err(bundle_err)?;

    let found = extractor
        .try_extract_entry(runtime, bundle_path, MANIFEST_ENTRY, scratch_dir)
        .map_err(bundle_err)?;
    if !found {
        return Err(ParseError::MissingManifest {
            path: bundle_path.to_path_buf(),
        });
    }

    let raw = runtime
        .read_to_string(&scratch_dir.join(MANIFEST_ENTRY))
        .map_err(bundle_err)?;

    serde_json::from_str(&raw).map_err(|source| ParseError::Malformed {
        path: bundle_path.to_path_buf(),
        source,
    })
}
