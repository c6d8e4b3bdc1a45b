pub mod disk;
pub mod keyfile;
pub mod memory;

pub use disk::DiskKeyStore;
pub use memory::MemoryKeyStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize: {0}")]
    Serialization(String),
    #[error("Encrypt: {0}")]
    Encryption(String),
    #[error("Corrupt: {0}")]
    Corrupt(String),
    #[error("Invalid name: {0:?}")]
    InvalidName(String),
    #[error("Not found: {namespace}/{key}")]
    NotFound { namespace: String, key: String },
    #[error("{0}")]
    Other(String),
}

/// Durable, namespaced key-value persistence for key material.
///
/// Implementations must make writes durable before returning, return exactly
/// the last written bytes on read, and apply each batch all-or-nothing: a
/// concurrent reader sees the namespace either before or after a batch,
/// never in between.
pub trait SecureKeyStore: Send + Sync {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Read `keys` from one consistent view of the namespace. Absent keys
    /// come back as `None`, in the order requested.
    fn read_batch(&self, namespace: &str, keys: &[&str])
    -> Result<Vec<Option<Vec<u8>>>, StoreError>;

    fn write_batch(&self, namespace: &str, entries: &[(&str, &[u8])]) -> Result<(), StoreError>;

    /// Remove `keys` together. Keys that are already absent are ignored.
    fn delete_batch(&self, namespace: &str, keys: &[&str]) -> Result<(), StoreError>;

    fn write(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.write_batch(namespace, &[(key, bytes)])
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.delete_batch(namespace, &[key])
    }
}

/// Namespaces and keys double as file names, so keep them to a safe charset.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

pub(crate) fn not_found(namespace: &str, key: &str) -> StoreError {
    StoreError::NotFound {
        namespace: namespace.to_string(),
        key: key.to_string(),
    }
}
