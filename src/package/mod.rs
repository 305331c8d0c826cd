//! Package descriptors and the process-wide registry.

mod registry;
pub mod version;

pub use registry::PackageRegistry;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::manifest::{Dependency, FileCopy, ModManifest};

/// Mutable installation state of a package.
///
/// Everything else on a [`ModPackage`] is immutable once parsed; this part is
/// updated by ledger synchronization and by the install pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallState {
    /// Current location of the bundle on disk.
    pub source_path: PathBuf,
    /// Name the cover image was installed under, empty if none.
    pub cover_image_installed_name: String,
    pub installed: bool,
    pub uninstallable: bool,
}

impl InstallState {
    fn new(source_path: PathBuf) -> Self {
        Self {
            source_path,
            cover_image_installed_name: String::new(),
            installed: false,
            uninstallable: true,
        }
    }
}

/// A known package: parsed manifest data plus installation state.
///
/// Descriptors are shared via `Arc` out of the [`PackageRegistry`]; the
/// mutable state sits behind a mutex so concurrent installers observe it
/// consistently.
#[derive(Debug)]
pub struct ModPackage {
    manifest: ModManifest,
    state: Mutex<InstallState>,
}

impl ModPackage {
    pub fn new(manifest: ModManifest, source_path: PathBuf) -> Self {
        Self {
            manifest,
            state: Mutex::new(InstallState::new(source_path)),
        }
    }

    pub fn manifest(&self) -> &ModManifest {
        &self.manifest
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Package id of the host application this package targets.
    pub fn target_package_id(&self) -> &str {
        &self.manifest.package_id
    }

    pub fn cover_image(&self) -> &str {
        &self.manifest.cover_image
    }

    pub fn mod_files(&self) -> &[String] {
        &self.manifest.mod_files
    }

    pub fn library_files(&self) -> &[String] {
        &self.manifest.library_files
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.manifest.dependencies
    }

    pub fn file_copies(&self) -> &[FileCopy] {
        &self.manifest.file_copies
    }

    pub fn installed(&self) -> bool {
        self.state.lock().unwrap().installed
    }

    pub fn set_installed(&self, installed: bool) {
        self.state.lock().unwrap().installed = installed;
    }

    pub fn source_path(&self) -> PathBuf {
        self.state.lock().unwrap().source_path.clone()
    }

    pub fn set_source_path(&self, path: PathBuf) {
        self.state.lock().unwrap().source_path = path;
    }

    pub fn set_cover_image_installed_name(&self, name: String) {
        self.state.lock().unwrap().cover_image_installed_name = name;
    }

    /// Snapshot of the mutable state, taken under the state lock.
    pub fn state(&self) -> InstallState {
        self.state.lock().unwrap().clone()
    }

    /// Initialize mutable state from a previously persisted record.
    pub fn restore_state(
        &self,
        source_path: PathBuf,
        cover_image_installed_name: String,
        installed: bool,
        uninstallable: bool,
    ) {
        let mut state = self.state.lock().unwrap();
        if !source_path.as_os_str().is_empty() {
            state.source_path = source_path;
        }
        state.cover_image_installed_name = cover_image_installed_name;
        state.installed = installed;
        state.uninstallable = uninstallable;
    }

    /// Human-facing name derived from the bundle's file name: the file stem
    /// with spaces replaced by underscores. Used for scratch directories and
    /// installed cover image names.
    pub fn display_name(&self) -> String {
        display_name_of(&self.state.lock().unwrap().source_path)
    }

    /// File name the bundle is stored under once moved into ledger storage.
    pub fn storage_file_name(&self) -> String {
        format!("{}.qmod", self.display_name())
    }
}

/// File stem of `path` with spaces replaced by underscores.
pub fn display_name_of(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.replace(' ', "_")
}
