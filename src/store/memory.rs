use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{SecureKeyStore, StoreError, not_found};

/// Volatile store for tests and embedders that bring their own persistence.
#[derive(Default)]
pub struct MemoryKeyStore {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything stored under `namespace`.
    pub fn snapshot(&self, namespace: &str) -> BTreeMap<String, Vec<u8>> {
        self.namespaces
            .lock()
            .map(|guard| guard.get(namespace).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn with_namespaces<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, BTreeMap<String, Vec<u8>>>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .namespaces
            .lock()
            .map_err(|_| StoreError::Other("store mutex poisoned".into()))?;
        f(&mut guard)
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.with_namespaces(|namespaces| {
            namespaces
                .get(namespace)
                .and_then(|entries| entries.get(key))
                .cloned()
                .ok_or_else(|| not_found(namespace, key))
        })
    }

    fn read_batch(
        &self,
        namespace: &str,
        keys: &[&str],
    ) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        self.with_namespaces(|namespaces| {
            let entries = namespaces.get(namespace);
            Ok(keys
                .iter()
                .map(|key| entries.and_then(|e| e.get(*key)).cloned())
                .collect())
        })
    }

    fn write_batch(&self, namespace: &str, entries: &[(&str, &[u8])]) -> Result<(), StoreError> {
        self.with_namespaces(|namespaces| {
            let current = namespaces.entry(namespace.to_string()).or_default();
            for (key, bytes) in entries {
                current.insert(key.to_string(), bytes.to_vec());
            }
            Ok(())
        })
    }

    fn delete_batch(&self, namespace: &str, keys: &[&str]) -> Result<(), StoreError> {
        self.with_namespaces(|namespaces| {
            if let Some(current) = namespaces.get_mut(namespace) {
                for key in keys {
                    current.remove(*key);
                }
                if current.is_empty() {
                    namespaces.remove(namespace);
                }
            }
            Ok(())
        })
    }
}
