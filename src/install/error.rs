//! Failure taxonomy for the install pipeline.

use thiserror::Error;

use crate::manifest::ParseError;

/// Why an install attempt failed.
///
/// Dependency resolution failures unwind the tentatively-installed state of
/// the package whose resolution failed. Failures from extraction onward do
/// not roll back already-placed files; callers get the error and the package
/// stays marked installed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("package \"{id}\" is built for \"{target}\", not the current host \"{host}\"")]
    WrongTarget {
        id: String,
        target: String,
        host: String,
    },

    #[error("circular dependency chain: {}", .chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("dependency \"{dep_id}\" is not satisfied and declares no download url")]
    UnsatisfiableNoSource { dep_id: String },

    #[error("failed to download \"{dep_id}\"")]
    DownloadFailed {
        dep_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to parse downloaded dependency \"{dep_id}\"")]
    DependencyParse {
        dep_id: String,
        #[source]
        source: ParseError,
    },

    #[error("downloaded dependency has id \"{got}\", expected \"{expected}\"")]
    FetchedIdentityMismatch { expected: String, got: String },

    #[error("downloaded dependency \"{dep_id}\" v{got} does not satisfy range \"{wanted}\"")]
    FetchedVersionMismatch {
        dep_id: String,
        got: String,
        wanted: String,
    },

    #[error("failed to install \"{id}\": dependency \"{dep_id}\" failed")]
    DependencyFailed {
        id: String,
        dep_id: String,
        #[source]
        source: Box<InstallError>,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
