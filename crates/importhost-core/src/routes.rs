//! Package path → handle routing table shared with the HTTP server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::error::{HarnessError, Result};
use crate::vcs::VcsHandle;

type Table = HashMap<String, Arc<dyn VcsHandle>>;

/// Registered handles, keyed by package path.
///
/// Cheap to clone; clones share the table. Every lookup reads the live
/// table, so handles added or removed mid-test are seen by the next request.
#[derive(Clone, Default)]
pub struct RouteTable {
    inner: Arc<RwLock<Table>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its package path.
    ///
    /// Fails with [`HarnessError::DuplicatePackage`] if the path is taken.
    pub fn insert(&self, handle: Arc<dyn VcsHandle>) -> Result<()> {
        let key = handle.package_path().to_owned();
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if table.contains_key(&key) {
            return Err(HarnessError::DuplicatePackage(key));
        }
        tracing::debug!(package = %key, "registered handle");
        table.insert(key, handle);
        Ok(())
    }

    /// Remove `package` only if it is still registered to `handle`.
    ///
    /// Returns whether an entry was removed. A handle that lost its slot to
    /// a newer registration leaves that registration in place.
    pub fn remove_handle(&self, handle: &dyn VcsHandle) -> bool {
        let package = handle.package_path();
        let mut table = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let owned = table.get(package).is_some_and(|entry| {
            std::ptr::addr_eq(Arc::as_ptr(entry), std::ptr::from_ref(handle))
        });
        if owned {
            table.remove(package);
            tracing::debug!(package, "removed handle");
        }
        owned
    }

    /// Find the handle whose package path is the longest prefix of `path`.
    ///
    /// `path` must already have its leading `/` stripped. Choosing the
    /// longest match keeps routing deterministic when one registered path
    /// is a prefix of another.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn VcsHandle>> {
        let table = self.inner.read().unwrap_or_else(|e| e.into_inner());
        table
            .iter()
            .filter(|(pkg, _)| path.starts_with(pkg.as_str()))
            .max_by_key(|(pkg, _)| pkg.len())
            .map(|(_, handle)| Arc::clone(handle))
    }

    pub fn packages(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-owning reference for handles, which are themselves in the table.
    pub fn downgrade(&self) -> WeakRouteTable {
        WeakRouteTable {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("packages", &self.packages())
            .finish()
    }
}

/// A [`RouteTable`] reference that does not keep the table alive.
#[derive(Clone, Default)]
pub struct WeakRouteTable {
    inner: Weak<RwLock<Table>>,
}

impl WeakRouteTable {
    /// [`RouteTable::remove_handle`] if the table still exists.
    pub fn remove_handle(&self, handle: &dyn VcsHandle) {
        if let Some(inner) = self.inner.upgrade() {
            RouteTable { inner }.remove_handle(handle);
        }
    }
}

impl std::fmt::Debug for WeakRouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRouteTable")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
