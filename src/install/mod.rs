//! The install pipeline.
//!
//! `PackageManager` owns every piece of shared state the pipeline needs: the
//! package registry, the ledger handle, the per-package install locks, the
//! set of ids installed this session, and the cached host identity. One
//! manager per process; top-level installs may run on separate tasks.

pub mod config;
mod error;
mod resolver;

pub use config::InstallConfig;
pub use error::InstallError;

use anyhow::{Context, Result, anyhow};
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::archive::{BundleExtractor, ZipBundleExtractor};
use crate::cleanup::{self, SharedCleanupContext};
use crate::download::{Fetcher, HttpFetcher};
use crate::ledger::{Ledger, LedgerMod};
use crate::manifest::{self, ParseError};
use crate::package::{ModPackage, PackageRegistry, display_name_of};
use crate::runtime::{RealRuntime, Runtime};

pub struct PackageManager<R, E, F>
where
    R: Runtime + 'static,
    E: BundleExtractor,
    F: Fetcher,
{
    runtime: Arc<R>,
    extractor: Arc<E>,
    fetcher: Arc<F>,
    config: InstallConfig,
    registry: PackageRegistry,
    ledger: Ledger<R>,
    host_package_id: OnceLock<String>,
    install_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    session_installed: Mutex<HashSet<String>>,
    scratch_seq: AtomicU64,
    cleanup: SharedCleanupContext,
}

impl PackageManager<RealRuntime, ZipBundleExtractor, HttpFetcher<RealRuntime>> {
    /// Manager over the real file system, zip bundles, and HTTP fetching.
    pub fn with_defaults(config: InstallConfig) -> Result<Self> {
        let runtime = Arc::new(RealRuntime);
        let fetcher = HttpFetcher::new(Arc::clone(&runtime), config.http_client()?);
        Ok(Self::new(
            runtime,
            Arc::new(ZipBundleExtractor),
            Arc::new(fetcher),
            config,
        ))
    }
}

impl<R, E, F> PackageManager<R, E, F>
where
    R: Runtime + 'static,
    E: BundleExtractor,
    F: Fetcher,
{
    pub fn new(runtime: Arc<R>, extractor: Arc<E>, fetcher: Arc<F>, config: InstallConfig) -> Self {
        let ledger = Ledger::new(Arc::clone(&runtime), config.ledger_path.clone());
        Self {
            runtime,
            extractor,
            fetcher,
            config,
            registry: PackageRegistry::new(),
            ledger,
            host_package_id: OnceLock::new(),
            install_locks: Mutex::new(HashMap::new()),
            session_installed: Mutex::new(HashSet::new()),
            scratch_seq: AtomicU64::new(0),
            cleanup: cleanup::new_shared(),
        }
    }

    /// Scratch paths currently at risk; on interruption the caller should
    /// run [`CleanupContext::cleanup`](crate::cleanup::CleanupContext::cleanup)
    /// on it before exiting.
    pub fn cleanup_context(&self) -> SharedCleanupContext {
        Arc::clone(&self.cleanup)
    }

    pub fn registry(&self) -> &PackageRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger<R> {
        &self.ledger
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    pub(crate) fn runtime(&self) -> &R {
        self.runtime.as_ref()
    }

    pub(crate) fn fetcher(&self) -> &F {
        self.fetcher.as_ref()
    }

    /// The host application package id, resolved once per process.
    pub fn host_package_id(&self) -> &str {
        self.host_package_id.get_or_init(|| {
            self.config
                .host_package_id
                .clone()
                .unwrap_or_else(|| self.runtime.host_package_id())
        })
    }

    /// Parse the bundle at `bundle_path`, restore any persisted install
    /// state for it, and register it. A colliding id refreshes the existing
    /// registry entry.
    #[tracing::instrument(skip(self))]
    pub fn load_package(&self, bundle_path: &Path) -> Result<Arc<ModPackage>, ParseError> {
        let package = self.parse_package(bundle_path)?;

        if package.target_package_id() == self.host_package_id() {
            self.restore_from_ledger(&package);
        } else {
            debug!(
                "Package \"{}\" targets \"{}\", not \"{}\"; skipping ledger state",
                package.id(),
                package.target_package_id(),
                self.host_package_id()
            );
        }

        Ok(self.registry.register(package))
    }

    /// Load every bundle found in the storage directory into the registry,
    /// so resolution sees already-downloaded candidates. Unparsable bundles
    /// are skipped with a warning.
    pub fn scan_packages(&self) -> Vec<Arc<ModPackage>> {
        let mut found = Vec::new();
        if !self.runtime.exists(&self.config.storage_dir) {
            return found;
        }

        let entries = match self.runtime.read_dir(&self.config.storage_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Failed to list storage dir {:?}: {}",
                    self.config.storage_dir, e
                );
                return found;
            }
        };

        for path in entries {
            if path.extension().is_some_and(|ext| ext == "qmod") {
                match self.load_package(&path) {
                    Ok(package) => found.push(package),
                    Err(e) => warn!("Skipping bundle {:?}: {}", path, e),
                }
            }
        }

        found
    }

    /// Install a package: resolve its dependencies (fetching missing ones),
    /// place its files, and record it in the ledger. Idempotent per package
    /// identity; concurrent requests for the same identity serialize and the
    /// second observes "already installed".
    #[tracing::instrument(skip(self, package), fields(id = package.id()))]
    pub async fn install(&self, package: &Arc<ModPackage>) -> Result<(), InstallError> {
        let mut branch = Vec::new();
        self.install_branch(Arc::clone(package), &mut branch).await
    }

    /// Fetch a bundle from `url`, parse it, and install it.
    #[tracing::instrument(skip(self, url))]
    pub async fn install_from_url(
        &self,
        file_name: &str,
        url: &str,
    ) -> Result<Arc<ModPackage>, InstallError> {
        let downloads = self.config.downloads_dir();
        self.runtime
            .create_dir_all(&downloads)
            .map_err(InstallError::Other)?;
        let download_path = downloads.join(file_name);
        self.cleanup.lock().unwrap().add(download_path.clone());

        if let Err(source) = self.fetcher.fetch(url, &download_path).await {
            self.cleanup_download(&download_path);
            return Err(InstallError::DownloadFailed {
                dep_id: file_name.to_string(),
                source: source.into(),
            });
        }

        let package = match self.load_package(&download_path) {
            Ok(package) => package,
            Err(e) => {
                self.cleanup_download(&download_path);
                return Err(InstallError::Parse(e));
            }
        };

        if let Err(e) = self.install(&package).await {
            self.cleanup_download(&download_path);
            return Err(e);
        }

        // the install relocated the bundle into storage
        self.cleanup.lock().unwrap().remove(&download_path);
        self.prune_scratch_roots();
        Ok(package)
    }

    /// One node of the install walk. `branch` is the chain of ids being
    /// installed in this call tree; recursion flows through
    /// [`prepare_dependency`](Self::prepare_dependency).
    fn install_branch<'a>(
        &'a self,
        package: Arc<ModPackage>,
        branch: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<(), InstallError>> {
        Box::pin(async move {
            let id = package.id().to_string();

            // Fast path without taking the lock
            if package.installed() || self.installed_this_session(&id) {
                info!("Package \"{}\" already installed", id);
                return Ok(());
            }

            let host = self.host_package_id().to_string();
            if package.target_package_id() != host {
                return Err(InstallError::WrongTarget {
                    target: package.target_package_id().to_string(),
                    id,
                    host,
                });
            }

            // Serialize concurrent installs of the same identity
            let lock = self.install_lock(&id);
            let _guard = lock.lock_owned().await;

            if package.installed() || self.installed_this_session(&id) {
                info!("Package \"{}\" already installed", id);
                return Ok(());
            }

            info!("Installing package \"{}\"", id);
            branch.push(id.clone());

            // Mark installed before resolution so a dependency cycle back to
            // this package trips the branch guard instead of re-entering
            package.set_installed(true);
            self.session_installed.lock().unwrap().insert(id.clone());

            for dependency in package.dependencies() {
                if let Err(e) = self.prepare_dependency(dependency, branch).await {
                    log::error!(
                        "Failed to install \"{}\": dependency \"{}\" failed",
                        id,
                        dependency.id
                    );
                    package.set_installed(false);
                    self.session_installed.lock().unwrap().remove(&id);
                    return Err(InstallError::DependencyFailed {
                        id,
                        dep_id: dependency.id.clone(),
                        source: Box::new(e),
                    });
                }
            }

            // From here on failures leave the package marked installed;
            // files may be partially placed and are not rolled back
            let scratch = self.next_scratch_dir(&package.display_name());
            self.cleanup.lock().unwrap().add(scratch.clone());
            let placed = self
                .extract_payload(&package, &scratch)
                .and_then(|()| self.place_payload(&package, &scratch));
            self.cleanup_scratch(&scratch);
            placed?;

            branch.retain(|b| b != &id);

            if package.target_package_id() == host {
                self.sync_ledger(&package).await?;
            }

            info!("Successfully installed \"{}\"", id);
            Ok(())
        })
    }

    /// Extract every declared mod file, library file, and file-copy entry
    /// into package-scoped scratch subdirectories.
    fn extract_payload(&self, package: &ModPackage, scratch: &Path) -> Result<(), InstallError> {
        let bundle = package.source_path();
        let mods_scratch = scratch.join("Mods");
        let libs_scratch = scratch.join("Libs");
        let copies_scratch = scratch.join("FileCopies");

        self.runtime.create_dir_all(&mods_scratch)?;
        self.runtime.create_dir_all(&libs_scratch)?;
        self.runtime.create_dir_all(&copies_scratch)?;

        if !package.mod_files().is_empty() {
            self.extractor.extract_entries(
                self.runtime.as_ref(),
                &bundle,
                package.mod_files(),
                &mods_scratch,
            )?;
        }

        if !package.library_files().is_empty() {
            self.extractor.extract_entries(
                self.runtime.as_ref(),
                &bundle,
                package.library_files(),
                &libs_scratch,
            )?;
        }

        let copy_entries: Vec<String> = package
            .file_copies()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        if !copy_entries.is_empty() {
            self.extractor.extract_entries(
                self.runtime.as_ref(),
                &bundle,
                &copy_entries,
                &copies_scratch,
            )?;
        }

        Ok(())
    }

    /// Move extracted entries into the managed folders and file-copy
    /// destinations.
    fn place_payload(&self, package: &ModPackage, scratch: &Path) -> Result<(), InstallError> {
        self.runtime.create_dir_all(&self.config.mods_dir)?;
        self.runtime.create_dir_all(&self.config.libs_dir)?;

        for entry in package.mod_files() {
            self.move_entry(&scratch.join("Mods"), entry, &self.config.mods_dir)?;
        }

        for entry in package.library_files() {
            self.move_entry(&scratch.join("Libs"), entry, &self.config.libs_dir)?;
        }

        for copy in package.file_copies() {
            let destination = Path::new(&copy.destination);
            if let Some(parent) = destination.parent() {
                self.runtime.create_dir_all(parent)?;
            }
            if self.runtime.exists(destination) {
                self.runtime.remove_file(destination)?;
            }
            self.runtime
                .rename(&scratch.join("FileCopies").join(&copy.name), destination)
                .with_context(|| format!("Failed to place file copy {:?}", copy.name))?;
        }

        Ok(())
    }

    fn move_entry(&self, from_dir: &Path, entry: &str, dest_dir: &Path) -> Result<()> {
        let file_name = Path::new(entry)
            .file_name()
            .ok_or_else(|| anyhow!("Entry {:?} has no file name", entry))?;
        self.runtime
            .rename(&from_dir.join(entry), &dest_dir.join(file_name))
            .with_context(|| format!("Failed to place entry {:?}", entry))
    }

    /// Record the installed package in the ledger: relocate the bundle into
    /// storage, install its cover image, and upsert its entry. The whole
    /// read-modify-write span holds the ledger lock.
    async fn sync_ledger(&self, package: &ModPackage) -> Result<(), InstallError> {
        info!("Updating ledger for \"{}\"", package.id());
        let _guard = self.ledger.lock().await;
        let mut doc = self.ledger.read();

        self.runtime.create_dir_all(&self.config.storage_dir)?;
        let current = package.source_path();
        let stored = self.config.storage_dir.join(package.storage_file_name());
        if current != stored {
            self.runtime
                .rename(&current, &stored)
                .with_context(|| format!("Failed to move bundle into storage: {:?}", current))?;
            package.set_source_path(stored.clone());
        }

        if !package.cover_image().is_empty() {
            self.install_cover_image(package, &stored);
        }

        doc.upsert(LedgerMod::from_package(package));
        self.ledger.write(&doc)?;
        info!("Ledger updated for \"{}\"", package.id());
        Ok(())
    }

    /// Best effort: a package with a broken cover declaration still installs.
    fn install_cover_image(&self, package: &ModPackage, bundle: &Path) {
        let cover = package.cover_image().to_string();
        let scratch = self.next_scratch_dir(&package.display_name());

        let result = (|| -> Result<bool> {
            self.runtime.create_dir_all(&scratch)?;
            if !self
                .extractor
                .try_extract_entry(self.runtime.as_ref(), bundle, &cover, &scratch)?
            {
                return Ok(false);
            }

            let cover_file = Path::new(&cover)
                .file_name()
                .ok_or_else(|| anyhow!("Cover entry {:?} has no file name", cover))?;
            let installed_name =
                format!("{}_{}", package.display_name(), cover_file.to_string_lossy());
            let dest = self.config.storage_dir.join(&installed_name);

            if self.runtime.exists(&dest) {
                self.runtime.remove_file(&dest)?;
            }
            self.runtime.rename(&scratch.join(&cover), &dest)?;
            package.set_cover_image_installed_name(installed_name);
            Ok(true)
        })();

        match result {
            Ok(true) => {}
            Ok(false) => warn!(
                "Bundle for \"{}\" declares cover image {:?} but has no such entry",
                package.id(),
                cover
            ),
            Err(e) => warn!("Failed to install cover image for \"{}\": {}", package.id(), e),
        }

        self.cleanup_scratch(&scratch);
    }

    fn parse_package(&self, bundle_path: &Path) -> Result<ModPackage, ParseError> {
        let scratch = self.next_scratch_dir(&display_name_of(bundle_path));
        let manifest = manifest::parse_bundle(
            self.runtime.as_ref(),
            self.extractor.as_ref(),
            bundle_path,
            &scratch,
        )?;
        Ok(ModPackage::new(manifest, bundle_path.to_path_buf()))
    }

    fn restore_from_ledger(&self, package: &ModPackage) {
        let doc = self.ledger.read();
        if let Some(entry) = doc.find(package.id()) {
            debug!("Restoring persisted state for \"{}\"", package.id());
            package.restore_state(
                PathBuf::from(entry.path.clone().unwrap_or_default()),
                entry.cover_image_filename.clone().unwrap_or_default(),
                entry.installed,
                entry.uninstallable,
            );
        }
        // No entry: the descriptor keeps its defaults (not installed,
        // uninstallable)
    }

    fn installed_this_session(&self, id: &str) -> bool {
        self.session_installed.lock().unwrap().contains(id)
    }

    fn install_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.install_locks.lock().unwrap();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Scratch directories are unique per operation: the bundle's display
    /// name alone would collide when two bundles share a file name or when
    /// the same bundle is processed twice concurrently.
    fn next_scratch_dir(&self, stem: &str) -> PathBuf {
        let seq = self.scratch_seq.fetch_add(1, Ordering::Relaxed);
        self.config.scratch_dir.join(format!("{}-{}", stem, seq))
    }

    fn cleanup_scratch(&self, path: &Path) {
        self.cleanup.lock().unwrap().remove(path);
        if self.runtime.exists(path)
            && let Err(e) = self.runtime.remove_dir_all(path)
        {
            warn!("Failed to remove scratch dir {:?}: {}", path, e);
        }
        self.prune_scratch_roots();
    }

    fn track_download(&self, path: &Path) {
        self.cleanup.lock().unwrap().add(path.to_path_buf());
    }

    fn untrack_download(&self, path: &Path) {
        self.cleanup.lock().unwrap().remove(path);
        self.prune_scratch_roots();
    }

    fn cleanup_download(&self, path: &Path) {
        self.cleanup.lock().unwrap().remove(path);
        if self.runtime.exists(path)
            && let Err(e) = self.runtime.remove_file(path)
        {
            warn!("Failed to remove downloaded file {:?}: {}", path, e);
        }
        self.prune_scratch_roots();
    }

    /// Remove the shared scratch directories when they are empty; failures
    /// just mean they are still in use.
    fn prune_scratch_roots(&self) {
        let _ = self.runtime.remove_dir(&self.config.downloads_dir());
        let _ = self.runtime.remove_dir(&self.config.scratch_dir);
    }
}
