//! Registries authorizing what LOCAL INFILE may stream.
//!
//! One `InfileRegistry` is shared (via `Arc`) by every connection that
//! should see the same whitelist and reader handlers. Lookups take a read
//! lock, so concurrent requests never block each other; registration takes
//! the write lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::source::ReaderHandler;

/// Whitelisted file paths and named reader handlers.
#[derive(Default)]
pub struct InfileRegistry {
    files: RwLock<HashSet<String>>,
    readers: RwLock<HashMap<String, Arc<dyn ReaderHandler>>>,
}

/// Strip the quote characters the server may echo around a file name.
pub(crate) fn normalize_path(path: &str) -> &str {
    path.trim_matches('"')
}

impl InfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry ready to hand to connections.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Allow `LOAD DATA LOCAL INFILE '<path>'` for this file.
    ///
    /// ```
    /// use qail_infile::InfileRegistry;
    ///
    /// let registry = InfileRegistry::new();
    /// registry.register_file("/home/gopher/data.csv");
    /// assert!(registry.is_file_allowed("/home/gopher/data.csv", false));
    /// ```
    pub fn register_file(&self, path: &str) {
        let path = normalize_path(path).to_string();
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path);
    }

    /// Remove a file from the whitelist. Removing an absent path is a no-op.
    pub fn deregister_file(&self, path: &str) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(normalize_path(path));
    }

    /// Whether `path` may be streamed.
    pub fn is_file_allowed(&self, path: &str, allow_all_files: bool) -> bool {
        allow_all_files
            || self
                .files
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(path)
    }

    /// Register a reader for `LOAD DATA LOCAL INFILE 'Reader::<name>'`.
    /// Replaces any handler already registered under `name`.
    pub fn register_reader<H>(&self, name: &str, handler: H)
    where
        H: ReaderHandler + 'static,
    {
        self.readers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(handler));
    }

    pub fn deregister_reader(&self, name: &str) {
        self.readers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Handler registered under `name`. The lock is released before the
    /// caller opens the reader.
    pub fn lookup_reader(&self, name: &str) -> Option<Arc<dyn ReaderHandler>> {
        self.readers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Currently whitelisted paths, sorted.
    pub fn registered_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        files.sort();
        files
    }
}

impl std::fmt::Debug for InfileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let readers = self
            .readers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("InfileRegistry")
            .field("files", &self.registered_files())
            .field("readers", &readers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LocalStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_file_round_trip() {
        let registry = InfileRegistry::new();
        assert!(!registry.is_file_allowed("/data/a.csv", false));

        registry.register_file("\"/data/a.csv\"");
        assert!(registry.is_file_allowed("/data/a.csv", false));
        assert_eq!(registry.registered_files(), vec!["/data/a.csv".to_string()]);

        registry.deregister_file("/data/a.csv");
        assert!(!registry.is_file_allowed("/data/a.csv", false));

        // idempotent
        registry.deregister_file("/data/a.csv");
        registry.deregister_file("/never/added");
    }

    #[test]
    fn test_allow_all_override() {
        let registry = InfileRegistry::new();
        assert!(registry.is_file_allowed("/etc/anything", true));
        assert!(!registry.is_file_allowed("/etc/anything", false));
    }

    #[test]
    fn test_reader_round_trip() {
        let registry = InfileRegistry::new();
        assert!(registry.lookup_reader("data").is_none());

        registry.register_reader("data", || Some(LocalStream::from_bytes("1\n")));
        assert!(registry.lookup_reader("data").is_some());

        registry.deregister_reader("data");
        assert!(registry.lookup_reader("data").is_none());
        registry.deregister_reader("data");
    }

    #[test]
    fn test_factory_not_invoked_on_register() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = InfileRegistry::new();

        let counter = calls.clone();
        registry.register_reader("data", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(LocalStream::from_bytes(""))
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let handler = registry.lookup_reader("data").unwrap();
        assert!(handler.open().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = InfileRegistry::new();
        let b = InfileRegistry::new();
        a.register_file("/data/a.csv");
        assert!(!b.is_file_allowed("/data/a.csv", false));
    }

    #[test]
    fn test_concurrent_access() {
        let registry = InfileRegistry::shared();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let path = format!("/data/{}.csv", i);
                    for _ in 0..100 {
                        registry.register_file(&path);
                        assert!(registry.is_file_allowed(&path, false));
                        registry.deregister_file(&path);
                    }
                    registry.register_file(&path);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.registered_files().len(), 8);
    }
}
