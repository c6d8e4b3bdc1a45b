pub mod config;
pub mod crypto;
pub mod diagnostics;
pub mod error;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod up;
pub mod webauthn;

pub use error::{Error, Result};
pub use up::UserPresenceProof;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use config::{Command, Config};
use crypto::{HighSPolicy, PublicPoint};
use protocol::{IdentityVault, LinkError, LinkSession, LinkState, Remediation};
use store::{DiskKeyStore, SecureKeyStore};
use transport::{ChallengeSource, SpoolRelyingParty};
use up::PinentryPresence;
use webauthn::AssertionPayload;
use webauthn::types::b64url_decode;

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();

    let data_dir = match &cfg.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };
    diagnostics::check(&cfg, &data_dir)?;

    if let Command::Verify {
        assertion,
        rp_id,
        public_key,
        challenge,
        reject_high_s,
    } = &cfg.command
    {
        let policy = if *reject_high_s {
            HighSPolicy::Reject
        } else {
            HighSPolicy::Accept
        };
        return verify(assertion, rp_id, public_key, challenge.as_deref(), policy);
    }

    // Single-instance lock
    let lock_path = data_dir.join(config::LOCK_FILE);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock.try_write().map_err(|_| {
        anyhow::anyhow!(
            "another keylink process holds {}",
            lock_path.display()
        )
    })?;

    let store = open_store(&data_dir)?;
    tracing::debug!(dir = %data_dir.display(), identity = %cfg.identity, "Store opened");
    let vault = IdentityVault::new(store, cfg.identity.clone());

    match cfg.command {
        Command::Register { user_id } => {
            let timeout = Duration::from_secs(config::PRESENCE_TIMEOUT_SECS);
            let mut session = open_session(&cfg.pinentry, &data_dir, vault, None, timeout).await?;
            let pending_user = match session.state() {
                LinkState::Unregistered => None,
                LinkState::LocallyCommitted { payload } => Some(payload.user_id.clone()),
                _ => anyhow::bail!(
                    "identity '{}' is already registered; run `keylink reset` first",
                    cfg.identity
                ),
            };
            let payload = match pending_user {
                None => session.register(&user_id).await,
                Some(pending) if pending == user_id => {
                    tracing::info!("Retrying registration upload");
                    session.submit_registration().await
                }
                Some(pending) => anyhow::bail!(
                    "identity '{}' is pending registration for user '{pending}'; run `keylink reset` to start over",
                    cfg.identity
                ),
            }
            .map_err(with_hint)?;
            eprintln!(
                "Registered {} with credential {}",
                payload.user_id, payload.credential_id
            );
        }
        Command::Link {
            challenge,
            origin,
            timeout,
        } => {
            let source = ChallengeSource::from_arg(&challenge);
            let timeout = Duration::from_secs(timeout);
            let mut session =
                open_session(&cfg.pinentry, &data_dir, vault, Some(source), timeout).await?;
            match session.state() {
                LinkState::Unregistered => return Err(with_hint(LinkError::KeyNotFound)),
                LinkState::LocallyCommitted { .. } => anyhow::bail!(
                    "registration of '{}' was never acknowledged; re-run `keylink register`",
                    cfg.identity
                ),
                _ => {}
            }

            let cancel = Arc::new(AtomicBool::new(false));
            let result = tokio::select! {
                result = session.link(&origin, &cancel) => result,
                _ = tokio::signal::ctrl_c() => {
                    cancel.store(true, Ordering::Relaxed);
                    Err(LinkError::BiometricCancelled)
                }
            };
            let payload = result.map_err(|e| link_failure(e, session.state()))?;
            eprintln!("Linked session {}", payload.session_id);
        }
        Command::Show => {
            let guard = vault.lock().await;
            let identity = guard.load().await.map_err(with_hint)?;
            let payload = protocol::registration_payload(&identity);
            println!("{}", serde_json::to_string_pretty(&payload)?);
            eprintln!(
                "sign count {}, {}",
                identity.sign_count,
                if identity.remote_committed {
                    "registered"
                } else {
                    "upload pending"
                }
            );
        }
        Command::Reset => {
            vault.lock().await.reset().await.map_err(with_hint)?;
            eprintln!("Identity '{}' deleted", cfg.identity);
        }
        Command::Verify { .. } => anyhow::bail!("verify does not use the store"),
    }

    Ok(())
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    Ok(directories::ProjectDirs::from("", "", config::APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine XDG data dir"))?
        .data_dir()
        .to_path_buf())
}

/// Open the encrypted store under `data_dir`, creating its key on first use.
pub fn open_store(data_dir: &Path) -> Result<Arc<dyn SecureKeyStore>> {
    std::fs::create_dir_all(data_dir)?;
    let key = store::keyfile::load_or_create(&data_dir.join(config::STORE_KEY_FILE))?;
    let store = DiskKeyStore::open(*key, data_dir.join(config::KEYS_DIR))?;
    Ok(Arc::new(store))
}

async fn open_session(
    pinentry: &str,
    data_dir: &Path,
    vault: IdentityVault,
    challenges: Option<ChallengeSource>,
    prompt_timeout: Duration,
) -> anyhow::Result<LinkSession> {
    let presence = Arc::new(PinentryPresence::new(pinentry, prompt_timeout));
    let relying_party = Arc::new(SpoolRelyingParty::new(
        data_dir.join(config::OUTBOX_DIR),
        challenges,
    ));
    LinkSession::open(vault, presence, relying_party)
        .await
        .map_err(with_hint)
}

fn verify(
    assertion: &Path,
    rp_id: &str,
    public_key: &str,
    challenge: Option<&str>,
    policy: HighSPolicy,
) -> anyhow::Result<()> {
    let payload: AssertionPayload = serde_json::from_slice(&std::fs::read(assertion)?)?;
    let public_key = b64url_decode(public_key)
        .map_err(|e| anyhow::anyhow!("--public-key is not base64url: {e}"))?;
    let public_key = PublicPoint::import(&public_key)?;

    if protocol::verify_assertion(&payload, rp_id, challenge, &public_key, policy)? {
        println!("valid");
        Ok(())
    } else {
        anyhow::bail!("assertion for session {} does not verify", payload.session_id)
    }
}

/// The signed payload only lives in this process, so an undelivered
/// assertion cannot be retried by a later invocation.
fn link_failure(e: LinkError, state: &LinkState) -> anyhow::Error {
    match state {
        LinkState::Signed { payload } => anyhow::anyhow!(
            "{e} (assertion for session {} was signed but not delivered; \
             request a new challenge from the relying party)",
            payload.session_id
        ),
        _ => with_hint(e),
    }
}

fn with_hint(e: LinkError) -> anyhow::Error {
    let hint = match e.remediation() {
        Remediation::Retry => "safe to retry",
        Remediation::Reregister => "run `keylink reset` and register again",
        Remediation::UserDeclined => "declined",
        Remediation::Abort => "request rejected",
    };
    anyhow::anyhow!("{e} ({hint})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_undelivered_assertion_asks_for_new_challenge() {
        let state = LinkState::Signed {
            payload: AssertionPayload {
                session_id: "s-9".into(),
                credential_id: "c".into(),
                client_data_json: "cd".into(),
                authenticator_data: "ad".into(),
                signature: "sig".into(),
            },
        };
        let err = link_failure(
            LinkError::TransportFailure(TransportError::Rejected("disk full".into())),
            &state,
        );
        let message = err.to_string();
        assert!(message.contains("s-9"), "{message}");
        assert!(message.contains("new challenge"), "{message}");
        assert!(!message.contains("safe to retry"), "{message}");
    }

    #[test]
    fn test_other_link_failures_keep_remediation_hint() {
        let err = link_failure(LinkError::BiometricDenied, &LinkState::Registered);
        assert!(err.to_string().contains("declined"));
        let err = link_failure(
            LinkError::TransportFailure(TransportError::Rejected("503".into())),
            &LinkState::Registered,
        );
        assert!(err.to_string().contains("safe to retry"));
    }

    #[test]
    fn test_open_store_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("fresh");
        let store = open_store(&data_dir).unwrap();
        store.write("default", "user_id", b"alice").unwrap();
        drop(store);

        let reopened = open_store(&data_dir).unwrap();
        assert_eq!(reopened.read("default", "user_id").unwrap(), b"alice");
        assert!(data_dir.join(config::STORE_KEY_FILE).is_file());
    }
}
