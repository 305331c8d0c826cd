//! Process-wide set of known packages, indexed by identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::ModPackage;

/// All packages known to this process — installed or merely discovered or
/// downloaded — indexed by package id.
///
/// The registry never holds two descriptors with the same id: registering a
/// newly parsed descriptor with a colliding id refreshes the slot instead of
/// creating a duplicate.
#[derive(Default)]
pub struct PackageRegistry {
    packages: Mutex<HashMap<String, Arc<ModPackage>>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any existing descriptor with the same
    /// id. Returns the shared handle now held by the registry.
    pub fn register(&self, package: ModPackage) -> Arc<ModPackage> {
        let package = Arc::new(package);
        self.packages
            .lock()
            .unwrap()
            .insert(package.id().to_string(), Arc::clone(&package));
        package
    }

    /// Look up a descriptor by package id.
    pub fn find(&self, id: &str) -> Option<Arc<ModPackage>> {
        self.packages.lock().unwrap().get(id).cloned()
    }

    /// All registered descriptors, in no particular order.
    pub fn all(&self) -> Vec<Arc<ModPackage>> {
        self.packages.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.lock().unwrap().is_empty()
    }
}
