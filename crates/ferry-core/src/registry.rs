//! Name-keyed adapter registries.
//!
//! Torrents hold client and manager names only; every live adapter is owned
//! here and resolved by name on demand. Iteration follows registration order,
//! which is configuration order.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::MediaManagerKind;
use crate::service::{DownloadClientAdapter, MediaManagerAdapter};

/// Anything addressable by a configured name.
pub trait Named {
    /// Configured name.
    fn name(&self) -> &str;
}

impl Named for dyn DownloadClientAdapter {
    fn name(&self) -> &str {
        DownloadClientAdapter::name(self)
    }
}

impl Named for dyn MediaManagerAdapter {
    fn name(&self) -> &str {
        MediaManagerAdapter::name(self)
    }
}

/// Ordered registry of shared adapters.
pub struct Registry<A: ?Sized + Named> {
    entries: RwLock<Vec<Arc<A>>>,
}

/// Registry of download clients.
pub type ClientRegistry = Registry<dyn DownloadClientAdapter>;

/// Registry of media managers.
pub type ManagerRegistry = Registry<dyn MediaManagerAdapter>;

impl<A: ?Sized + Named> Registry<A> {
    /// Empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Registry seeded with adapters in the given order.
    #[must_use]
    pub const fn from_entries(entries: Vec<Arc<A>>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Insert an adapter, replacing an existing one with the same name in place.
    ///
    /// Returns the replaced adapter.
    pub fn register(&self, adapter: Arc<A>) -> Option<Arc<A>> {
        let mut entries = self.write();
        if let Some(slot) = entries
            .iter_mut()
            .find(|existing| existing.name() == adapter.name())
        {
            return Some(std::mem::replace(slot, adapter));
        }
        entries.push(adapter);
        None
    }

    /// Remove an adapter by name.
    pub fn remove(&self, name: &str) -> Option<Arc<A>> {
        let mut entries = self.write();
        let index = entries.iter().position(|entry| entry.name() == name)?;
        Some(entries.remove(index))
    }

    /// Resolve an adapter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<A>> {
        self.read()
            .iter()
            .find(|entry| entry.name() == name)
            .cloned()
    }

    /// Whether an adapter with the name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|entry| entry.name() == name)
    }

    /// All adapters in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<A>> {
        self.read().clone()
    }

    /// All names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|entry| entry.name().to_owned())
            .collect()
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<A>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("adapter registry lock poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<A>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("adapter registry lock poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }
}

impl<A: ?Sized + Named> Default for Registry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerRegistry {
    /// First manager whose type tag matches.
    #[must_use]
    pub fn first_of_kind(&self, kind: MediaManagerKind) -> Option<Arc<dyn MediaManagerAdapter>> {
        self.read()
            .iter()
            .find(|entry| entry.kind() == kind)
            .cloned()
    }
}
