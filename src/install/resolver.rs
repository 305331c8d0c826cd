//! Dependency resolution for package installs.
//!
//! For each dependency of a package, in manifest order, decide whether it is
//! already satisfied, needs an upgrade, or must be fetched, and recursively
//! install whatever is missing. The `branch` holds the chain of package ids
//! currently being installed in this call tree; a dependency already on the
//! branch is a cycle, not work.

use log::{debug, error, info};
use std::sync::Arc;

use crate::archive::BundleExtractor;
use crate::download::Fetcher;
use crate::manifest::Dependency;
use crate::package::version;
use crate::runtime::Runtime;

use super::{InstallError, PackageManager};

impl<R, E, F> PackageManager<R, E, F>
where
    R: Runtime + 'static,
    E: BundleExtractor,
    F: Fetcher,
{
    /// Make one dependency installable: accept it, install a known
    /// candidate, or fetch and install a new one. Fails the whole branch on
    /// the first dependency that cannot be satisfied.
    pub(super) async fn prepare_dependency(
        &self,
        dependency: &Dependency,
        branch: &mut Vec<String>,
    ) -> Result<(), InstallError> {
        info!(
            "Preparing dependency \"{}\" (range \"{}\")",
            dependency.id, dependency.version
        );

        if branch.iter().any(|id| id == &dependency.id) {
            let mut chain = branch.clone();
            chain.push(dependency.id.clone());
            error!("Circular dependency chain: {}", chain.join(" -> "));
            return Err(InstallError::CycleDetected { chain });
        }

        if let Some(existing) = self.registry().find(&dependency.id) {
            if version::satisfies(existing.version(), &dependency.version) {
                debug!(
                    "Dependency \"{}\" v{} already known and satisfies \"{}\"",
                    dependency.id,
                    existing.version(),
                    dependency.version
                );

                if !existing.installed() {
                    self.install_branch(Arc::clone(&existing), branch).await?;
                }
                return Ok(());
            }

            if dependency.download_if_missing.is_empty() {
                error!(
                    "Dependency \"{}\" is present at v{} which does not satisfy \"{}\", and no download url was provided",
                    dependency.id,
                    existing.version(),
                    dependency.version
                );
                return Err(InstallError::UnsatisfiableNoSource {
                    dep_id: dependency.id.clone(),
                });
            }
        } else if dependency.download_if_missing.is_empty() {
            error!(
                "Dependency \"{}\" is not present, and no download url was provided",
                dependency.id
            );
            return Err(InstallError::UnsatisfiableNoSource {
                dep_id: dependency.id.clone(),
            });
        }

        // The right version is not available locally and we have a url, so
        // fetch it now
        self.fetch_dependency(dependency, branch).await
    }

    async fn fetch_dependency(
        &self,
        dependency: &Dependency,
        branch: &mut Vec<String>,
    ) -> Result<(), InstallError> {
        let downloads = self.config().downloads_dir();
        self.runtime()
            .create_dir_all(&downloads)
            .map_err(InstallError::Other)?;
        let download_path = downloads.join(format!("{}.qmod", dependency.id));
        self.track_download(&download_path);

        if let Err(source) = self
            .fetcher()
            .fetch(&dependency.download_if_missing, &download_path)
            .await
        {
            self.cleanup_download(&download_path);
            return Err(InstallError::DownloadFailed {
                dep_id: dependency.id.clone(),
                source: source.into(),
            });
        }

        // Parse without restoring ledger state: a fetched bundle is a fresh
        // candidate even when an older version of the same id is recorded as
        // installed, otherwise upgrades would be skipped.
        let fetched = match self.parse_package(&download_path) {
            Ok(fetched) => fetched,
            Err(source) => {
                self.cleanup_download(&download_path);
                return Err(InstallError::DependencyParse {
                    dep_id: dependency.id.clone(),
                    source,
                });
            }
        };

        // Sanity checks that the download url actually pointed at the
        // declared dependency
        if fetched.id() != dependency.id {
            error!(
                "Downloaded dependency has id \"{}\", expected \"{}\"",
                fetched.id(),
                dependency.id
            );
            self.cleanup_download(&download_path);
            return Err(InstallError::FetchedIdentityMismatch {
                expected: dependency.id.clone(),
                got: fetched.id().to_string(),
            });
        }

        if !version::satisfies(fetched.version(), &dependency.version) {
            error!(
                "Downloaded dependency \"{}\" v{} is outside the declared range \"{}\"",
                fetched.id(),
                fetched.version(),
                dependency.version
            );
            self.cleanup_download(&download_path);
            return Err(InstallError::FetchedVersionMismatch {
                dep_id: dependency.id.clone(),
                got: fetched.version().to_string(),
                wanted: dependency.version.clone(),
            });
        }

        // The downloaded file itself is cleaned up by the install, which
        // relocates it into ledger storage
        let fetched = self.registry().register(fetched);
        let result = self.install_branch(fetched, branch).await;
        self.untrack_download(&download_path);
        result
    }
}
