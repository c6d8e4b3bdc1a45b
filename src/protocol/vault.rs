use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, Weak};
use tokio::sync::{Mutex, MutexGuard};
use zeroize::Zeroizing;

use super::LinkError;
use crate::crypto::{KeyPair, PrivateScalar, PublicPoint};
use crate::store::{SecureKeyStore, StoreError};
use crate::webauthn::types::{b64url_decode, b64url_encode};

pub const KEY_PRIVATE_SCALAR: &str = "private_scalar";
pub const KEY_PUBLIC_POINT: &str = "public_point";
pub const KEY_CREDENTIAL_ID: &str = "credential_id";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_SIGN_COUNT: &str = "sign_count";
pub const KEY_REMOTE_COMMITTED: &str = "remote_committed";

/// Every entry belonging to one identity. Written together on registration,
/// deleted together on reset.
pub const IDENTITY_KEYS: [&str; 6] = [
    KEY_PRIVATE_SCALAR,
    KEY_PUBLIC_POINT,
    KEY_CREDENTIAL_ID,
    KEY_USER_ID,
    KEY_SIGN_COUNT,
    KEY_REMOTE_COMMITTED,
];

pub struct StoredIdentity {
    pub keypair: KeyPair,
    pub credential_id: Vec<u8>,
    pub user_id: String,
    pub sign_count: u32,
    /// Whether the relying party has acknowledged the registration.
    pub remote_committed: bool,
}

/// Identity locks keyed by store instance and namespace, so every vault
/// opened on the same identity shares one lock.
type LockKey = (usize, String);

static IDENTITY_LOCKS: LazyLock<std::sync::Mutex<HashMap<LockKey, Weak<Mutex<()>>>>> =
    LazyLock::new(Default::default);

fn identity_lock(store: &Arc<dyn SecureKeyStore>, namespace: &str) -> Arc<Mutex<()>> {
    // A live vault keeps its store alive, so the address is unique among
    // entries that can still be upgraded.
    let key = (Arc::as_ptr(store) as *const () as usize, namespace.to_string());
    let mut locks = IDENTITY_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
        return lock;
    }
    locks.retain(|_, lock| lock.strong_count() > 0);
    let lock = Arc::new(Mutex::new(()));
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

/// One identity mapped onto a store namespace, with the per-identity lock
/// that serializes load, sign, counter update and reset. Vaults created
/// separately over the same store and namespace share that lock.
#[derive(Clone)]
pub struct IdentityVault {
    store: Arc<dyn SecureKeyStore>,
    namespace: String,
    lock: Arc<Mutex<()>>,
}

/// Exclusive access to the identity. All reads and writes go through this.
pub struct VaultGuard<'a> {
    vault: &'a IdentityVault,
    _guard: MutexGuard<'a, ()>,
}

impl IdentityVault {
    pub fn new(store: Arc<dyn SecureKeyStore>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let lock = identity_lock(&store, &namespace);
        Self {
            store,
            namespace,
            lock,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn lock(&self) -> VaultGuard<'_> {
        VaultGuard {
            vault: self,
            _guard: self.lock.lock().await,
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SecureKeyStore, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref(), &namespace))
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?
    }
}

impl VaultGuard<'_> {
    /// Load the identity, failing with `KeyNotFound` if none is stored.
    pub async fn load(&self) -> Result<StoredIdentity, LinkError> {
        self.try_load().await?.ok_or(LinkError::KeyNotFound)
    }

    pub async fn try_load(&self) -> Result<Option<StoredIdentity>, LinkError> {
        let raw = self
            .vault
            .blocking(|store, namespace| store.read_batch(namespace, &IDENTITY_KEYS))
            .await?;

        if raw.iter().all(Option::is_none) {
            return Ok(None);
        }
        let Some(values) = raw.into_iter().collect::<Option<Vec<_>>>() else {
            return Err(StoreError::Corrupt(format!(
                "identity {} is partially stored",
                self.vault.namespace
            ))
            .into());
        };
        let [private, public, credential_id, user_id, sign_count, remote_committed]: [Vec<u8>;
            6] = values
            .try_into()
            .map_err(|_| StoreError::Corrupt("identity entry count".into()))?;

        let private = Zeroizing::new(private);
        let private = PrivateScalar::import(&Zeroizing::new(decode_entry(
            KEY_PRIVATE_SCALAR,
            &private,
        )?))?;
        let public = PublicPoint::import(&decode_entry(KEY_PUBLIC_POINT, &public)?)?;
        let keypair = KeyPair::from_parts(private, public)?;
        let credential_id = decode_entry(KEY_CREDENTIAL_ID, &credential_id)?;
        let user_id = String::from_utf8(decode_entry(KEY_USER_ID, &user_id)?)
            .map_err(|_| StoreError::Corrupt("user_id is not UTF-8".into()))?;
        let sign_count = decode_counter(&decode_entry(KEY_SIGN_COUNT, &sign_count)?)?;
        let remote_committed = decode_entry(KEY_REMOTE_COMMITTED, &remote_committed)? == [1];

        Ok(Some(StoredIdentity {
            keypair,
            credential_id,
            user_id,
            sign_count,
            remote_committed,
        }))
    }

    /// Durably store a freshly generated identity in one batch.
    pub async fn commit_local(
        &self,
        keypair: &KeyPair,
        credential_id: &[u8],
        user_id: &str,
    ) -> Result<(), LinkError> {
        let private = Zeroizing::new(b64url_encode(keypair.export_private_scalar().as_slice()));
        let public = b64url_encode(keypair.export_public_point());
        let credential_id = b64url_encode(credential_id);
        let user_id = b64url_encode(user_id.as_bytes());
        let sign_count = b64url_encode(0u32.to_be_bytes());
        let remote_committed = b64url_encode([0u8]);

        self.vault
            .blocking(move |store, namespace| {
                store.write_batch(
                    namespace,
                    &[
                        (KEY_PRIVATE_SCALAR, private.as_bytes()),
                        (KEY_PUBLIC_POINT, public.as_bytes()),
                        (KEY_CREDENTIAL_ID, credential_id.as_bytes()),
                        (KEY_USER_ID, user_id.as_bytes()),
                        (KEY_SIGN_COUNT, sign_count.as_bytes()),
                        (KEY_REMOTE_COMMITTED, remote_committed.as_bytes()),
                    ],
                )
            })
            .await?;
        Ok(())
    }

    pub async fn mark_remote_committed(&self) -> Result<(), LinkError> {
        let flag = b64url_encode([1u8]);
        self.vault
            .blocking(move |store, namespace| {
                store.read(namespace, KEY_PRIVATE_SCALAR)?;
                store.write(namespace, KEY_REMOTE_COMMITTED, flag.as_bytes())
            })
            .await?;
        Ok(())
    }

    /// Increment and persist the signature counter, returning the new value.
    pub async fn next_counter(&self) -> Result<u32, LinkError> {
        let current = self
            .vault
            .blocking(|store, namespace| store.read(namespace, KEY_SIGN_COUNT))
            .await?;
        let current = decode_counter(&decode_entry(KEY_SIGN_COUNT, &current)?)?;
        let next = u64::from(current) + 1;
        let next = u32::try_from(next).map_err(|_| LinkError::InvalidCounter(next))?;

        let encoded = b64url_encode(next.to_be_bytes());
        self.vault
            .blocking(move |store, namespace| {
                store.write(namespace, KEY_SIGN_COUNT, encoded.as_bytes())
            })
            .await?;
        Ok(next)
    }

    /// Remove every entry of the identity in one batch.
    pub async fn reset(&self) -> Result<(), LinkError> {
        self.vault
            .blocking(|store, namespace| store.delete_batch(namespace, &IDENTITY_KEYS))
            .await?;
        Ok(())
    }
}

fn decode_entry(key: &str, stored: &[u8]) -> Result<Vec<u8>, StoreError> {
    b64url_decode(stored).map_err(|e| StoreError::Corrupt(format!("{key}: {e}")))
}

fn decode_counter(bytes: &[u8]) -> Result<u32, StoreError> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("sign_count must be 4 bytes".into()))?;
    Ok(u32::from_be_bytes(bytes))
}
