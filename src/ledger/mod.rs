//! The external installation ledger.
//!
//! The ledger is a JSON document shared with other tooling: an object with a
//! `Mods` array, one entry per installed package identity. This process is
//! not its only writer, so every read-modify-write span runs under the
//! ledger mutex and writes the whole document back.

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::package::ModPackage;
use crate::runtime::Runtime;

/// One persisted record per installed package identity.
///
/// Field names and the null-for-empty-string convention match the external
/// consumers of the document; reordering or renaming breaks them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LedgerMod {
    #[serde(rename = "Id")]
    pub id: Option<String>,
    #[serde(rename = "Path")]
    pub path: Option<String>,
    #[serde(rename = "Installed")]
    pub installed: bool,
    #[serde(rename = "TogglingOnSync")]
    pub toggling_on_sync: bool,
    #[serde(rename = "RemovingOnSync")]
    pub removing_on_sync: bool,
    #[serde(rename = "Version")]
    pub version: Option<String>,
    #[serde(rename = "Uninstallable")]
    pub uninstallable: bool,
    #[serde(rename = "CoverImageFilename")]
    pub cover_image_filename: Option<String>,
    #[serde(rename = "TargetBeatsaberVersion")]
    pub target_beatsaber_version: Option<String>,
    #[serde(rename = "Author")]
    pub author: Option<String>,
    #[serde(rename = "Porter")]
    pub porter: Option<String>,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Description")]
    pub description: Option<String>,
}

impl LedgerMod {
    /// Build the ledger record for a package from its current state.
    /// Sync flags are always written `false`; sync scheduling belongs to the
    /// document's other consumers.
    pub fn from_package(package: &ModPackage) -> Self {
        let state = package.state();
        LedgerMod {
            id: opt(package.id()),
            path: opt(&state.source_path.to_string_lossy()),
            installed: state.installed,
            toggling_on_sync: false,
            removing_on_sync: false,
            version: opt(package.version()),
            uninstallable: state.uninstallable,
            cover_image_filename: opt(&state.cover_image_installed_name),
            target_beatsaber_version: opt(&package.manifest().package_version),
            author: opt(&package.manifest().author),
            porter: opt(&package.manifest().porter),
            name: opt(package.name()),
            description: opt(&package.manifest().description),
        }
    }
}

/// Empty strings persist as JSON null.
fn opt(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// The whole ledger document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LedgerDoc {
    #[serde(rename = "Mods")]
    pub mods: Vec<LedgerMod>,
}

impl LedgerDoc {
    pub fn find(&self, id: &str) -> Option<&LedgerMod> {
        self.mods.iter().find(|m| m.id.as_deref() == Some(id))
    }

    /// Replace the entry with the same id in place, or append a new one.
    pub fn upsert(&mut self, entry: LedgerMod) {
        match self
            .mods
            .iter_mut()
            .find(|m| m.id.is_some() && m.id == entry.id)
        {
            Some(existing) => *existing = entry,
            None => self.mods.push(entry),
        }
    }
}

/// Handle on the persisted ledger document.
pub struct Ledger<R: Runtime> {
    runtime: Arc<R>,
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl<R: Runtime> Ledger<R> {
    pub fn new(runtime: Arc<R>, path: PathBuf) -> Self {
        Self {
            runtime,
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize access for a full read-modify-write span. Concurrent
    /// installers must hold this across [`read`](Self::read) and
    /// [`write`](Self::write) or updates get lost.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Load the document. An absent or unreadable ledger is an empty
    /// document, not an error: this layer treats it as "no prior state".
    #[tracing::instrument(skip(self))]
    pub fn read(&self) -> LedgerDoc {
        if !self.runtime.exists(&self.path) {
            return LedgerDoc::default();
        }

        let raw = match self.runtime.read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Ledger at {:?} is unreadable ({}), starting empty", self.path, e);
                return LedgerDoc::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Ledger at {:?} is malformed ({}), starting empty", self.path, e);
                LedgerDoc::default()
            }
        }
    }

    /// Serialize the whole document back to the external store.
    #[tracing::instrument(skip(self, doc))]
    pub fn write(&self, doc: &LedgerDoc) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !self.runtime.exists(parent)
        {
            self.runtime.create_dir_all(parent)?;
        }

        let content = serde_json::to_string(doc)?;
        self.runtime
            .write(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write ledger to {:?}", self.path))
    }
}
