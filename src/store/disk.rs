use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use ciborium::value::Value;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroizing;

use super::{SecureKeyStore, StoreError, not_found, validate_name};

const NONCE_LEN: usize = 12;
const RECORD_VERSION: u64 = 1;

type Entries = BTreeMap<String, Vec<u8>>;

/// One AES-256-GCM encrypted file per namespace: `dir/{namespace}.bin`,
/// holding `nonce || ciphertext` of a CBOR map from key to bytes.
///
/// The namespace name is bound in as associated data, so a file renamed to
/// another namespace fails to decrypt. Every mutation rewrites the whole file
/// through a synced temp file and a rename.
pub struct DiskKeyStore {
    aes_key: Zeroizing<[u8; 32]>,
    dir: PathBuf,
    lock: Mutex<()>,
}

impl DiskKeyStore {
    pub fn open(aes_key: [u8; 32], dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            aes_key: Zeroizing::new(aes_key),
            dir,
            lock: Mutex::new(()),
        })
    }

    /// Namespaces that currently have a file on disk.
    pub fn namespaces(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.bin"))
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Other("store mutex poisoned".into()))?;
        f()
    }

    fn load(&self, namespace: &str) -> Result<Entries, StoreError> {
        let path = self.path_for(namespace);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < NONCE_LEN {
            return Err(StoreError::Corrupt(format!("{} too short", path.display())));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new_from_slice(self.aes_key.as_slice())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: namespace.as_bytes(),
                },
            )
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        decode_entries(&plaintext)
    }

    fn save(&self, namespace: &str, entries: &Entries) -> Result<(), StoreError> {
        let path = self.path_for(namespace);
        if entries.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            return sync_dir(&self.dir);
        }

        let plaintext = Zeroizing::new(encode_entries(entries)?);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| StoreError::Encryption(format!("nonce: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(self.aes_key.as_slice())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: namespace.as_bytes(),
                },
            )
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let mut file_bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        file_bytes.extend_from_slice(&nonce_bytes);
        file_bytes.extend_from_slice(&ciphertext);

        let tmp = self.dir.join(format!("{namespace}.bin.tmp"));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&file_bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        sync_dir(&self.dir)
    }
}

impl SecureKeyStore for DiskKeyStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_name(namespace)?;
        self.with_lock(|| {
            self.load(namespace)?
                .remove(key)
                .ok_or_else(|| not_found(namespace, key))
        })
    }

    fn read_batch(
        &self,
        namespace: &str,
        keys: &[&str],
    ) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        validate_name(namespace)?;
        self.with_lock(|| {
            let mut current = self.load(namespace)?;
            Ok(keys.iter().map(|key| current.remove(*key)).collect())
        })
    }

    fn write_batch(&self, namespace: &str, entries: &[(&str, &[u8])]) -> Result<(), StoreError> {
        validate_name(namespace)?;
        for (key, _) in entries {
            validate_name(key)?;
        }
        self.with_lock(|| {
            let mut current = self.load(namespace)?;
            for (key, bytes) in entries {
                current.insert(key.to_string(), bytes.to_vec());
            }
            self.save(namespace, &current)
        })
    }

    fn delete_batch(&self, namespace: &str, keys: &[&str]) -> Result<(), StoreError> {
        validate_name(namespace)?;
        self.with_lock(|| {
            let mut current = self.load(namespace)?;
            let before = current.len();
            for key in keys {
                current.remove(*key);
            }
            if current.len() == before {
                return Ok(());
            }
            self.save(namespace, &current)
        })
    }
}

fn encode_entries(entries: &Entries) -> Result<Vec<u8>, StoreError> {
    let map = Value::Map(
        entries
            .iter()
            .map(|(k, v)| (Value::Text(k.clone()), Value::Bytes(v.clone())))
            .collect(),
    );
    let record = Value::Map(vec![
        (Value::Integer(1u64.into()), Value::Integer(RECORD_VERSION.into())),
        (Value::Integer(2u64.into()), map),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&record, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_entries(bytes: &[u8]) -> Result<Entries, StoreError> {
    let record: Value =
        ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let Value::Map(fields) = record else {
        return Err(StoreError::Corrupt("record is not a map".into()));
    };
    let field = |key: u64| {
        let target = Value::Integer(key.into());
        fields.iter().find(|(k, _)| k == &target).map(|(_, v)| v)
    };

    match field(1) {
        Some(Value::Integer(v)) if u64::try_from(*v).ok() == Some(RECORD_VERSION) => {}
        other => {
            return Err(StoreError::Corrupt(format!(
                "unsupported record version: {other:?}"
            )));
        }
    }
    let Some(Value::Map(pairs)) = field(2) else {
        return Err(StoreError::Corrupt("missing entries".into()));
    };

    let mut entries = Entries::new();
    for (k, v) in pairs {
        match (k, v) {
            (Value::Text(k), Value::Bytes(v)) => {
                entries.insert(k.clone(), v.clone());
            }
            _ => return Err(StoreError::Corrupt("entry is not text -> bytes".into())),
        }
    }
    Ok(entries)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}
