use rand::RngCore;
use rand::rngs::OsRng;
use std::io::Write;
use std::path::Path;
use zeroize::Zeroizing;

use super::StoreError;

/// Load the 32-byte store encryption key, creating it on first use.
///
/// The file is created exclusively with owner-only permissions; a file of
/// any other length is treated as corrupt rather than silently replaced.
pub fn load_or_create(path: &Path) -> Result<Zeroizing<[u8; 32]>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                StoreError::Corrupt(format!(
                    "{} must hold 32 bytes, found {}",
                    path.display(),
                    bytes.len()
                ))
            })?;
            return Ok(Zeroizing::new(key));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut key = Zeroizing::new([0u8; 32]);
    OsRng
        .try_fill_bytes(&mut key[..])
        .map_err(|e| StoreError::Encryption(format!("key generation: {e}")))?;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(&key[..])?;
    file.sync_all()?;
    tracing::info!(path = %path.display(), "Created store key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.key");
        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_truncated_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.key");
        std::fs::write(&path, [1u8; 16]).unwrap();
        assert!(matches!(load_or_create(&path), Err(StoreError::Corrupt(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.key");
        load_or_create(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
