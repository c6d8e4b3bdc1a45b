use async_trait::async_trait;
use keylink::crypto::{HighSPolicy, KeyPair, PublicPoint};
use keylink::protocol::vault::IDENTITY_KEYS;
use keylink::protocol::{
    IdentityVault, LinkError, LinkSession, LinkState, Remediation, verify_assertion,
};
use keylink::store::{DiskKeyStore, MemoryKeyStore, SecureKeyStore};
use keylink::transport::{RelyingParty, TransportError};
use keylink::up::{PresenceOutcome, PresencePrompt, UserPresence};
use keylink::webauthn::types::b64url_decode;
use keylink::webauthn::{AssertionPayload, RegistrationPayload};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const ORIGIN: &str = "http://localhost:8889";

/// Answers prompts from a script; grants once the script runs out.
#[derive(Default)]
struct ScriptedPresence {
    script: Mutex<VecDeque<PresenceOutcome>>,
    prompts: AtomicUsize,
}

impl ScriptedPresence {
    fn with(outcomes: impl IntoIterator<Item = PresenceOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            prompts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UserPresence for ScriptedPresence {
    async fn request_user_presence(
        &self,
        prompt: &PresencePrompt,
        _cancel: &Arc<AtomicBool>,
    ) -> PresenceOutcome {
        assert!(prompt.description.contains("example.com"));
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PresenceOutcome::Granted {
                user_verified: true,
            })
    }
}

#[derive(Default)]
struct MockRelyingParty {
    challenges_issued: AtomicUsize,
    fail_registrations: AtomicUsize,
    fail_assertions: AtomicUsize,
    registrations: Mutex<Vec<RegistrationPayload>>,
    assertions: Mutex<Vec<AssertionPayload>>,
}

impl MockRelyingParty {
    fn failing(registrations: usize, assertions: usize) -> Arc<Self> {
        let rp = Self::default();
        rp.fail_registrations.store(registrations, Ordering::SeqCst);
        rp.fail_assertions.store(assertions, Ordering::SeqCst);
        Arc::new(rp)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RelyingParty for MockRelyingParty {
    async fn submit_registration(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<(), TransportError> {
        if Self::take_failure(&self.fail_registrations) {
            return Err(TransportError::Rejected("503".into()));
        }
        self.registrations.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn fetch_challenge(&self) -> Result<Vec<u8>, TransportError> {
        let n = self.challenges_issued.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            r#"{{"challenge":"Y2hhbGxlbmdl","rpId":"example.com","sessionId":"session-{n}"}}"#
        )
        .into_bytes())
    }

    async fn submit_assertion(&self, payload: &AssertionPayload) -> Result<(), TransportError> {
        if Self::take_failure(&self.fail_assertions) {
            return Err(TransportError::Rejected("503".into()));
        }
        self.assertions.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct Fixture {
    store: Arc<MemoryKeyStore>,
    vault: IdentityVault,
    presence: Arc<ScriptedPresence>,
    rp: Arc<MockRelyingParty>,
}

impl Fixture {
    fn new(presence: Arc<ScriptedPresence>, rp: Arc<MockRelyingParty>) -> Self {
        let store = Arc::new(MemoryKeyStore::new());
        let vault = IdentityVault::new(store.clone(), "default");
        Self {
            store,
            vault,
            presence,
            rp,
        }
    }

    async fn session(&self) -> LinkSession {
        LinkSession::open(self.vault.clone(), self.presence.clone(), self.rp.clone())
            .await
            .unwrap()
    }

    async fn registered(&self) -> (LinkSession, PublicPoint) {
        let mut session = self.session().await;
        let payload = session.register("alice").await.unwrap();
        let public = PublicPoint::import(&b64url_decode(&payload.public_key).unwrap()).unwrap();
        (session, public)
    }
}

fn cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn counter_of(payload: &AssertionPayload) -> u32 {
    let data = b64url_decode(&payload.authenticator_data).unwrap();
    u32::from_be_bytes(data[1..5].try_into().unwrap())
}

#[tokio::test]
async fn test_register_and_link() {
    let fx = Fixture::new(ScriptedPresence::with([]), Arc::new(MockRelyingParty::default()));
    let (mut session, public) = fx.registered().await;
    assert_eq!(session.state(), &LinkState::Registered);

    let registration = fx.rp.registrations.lock().unwrap()[0].clone();
    assert_eq!(registration.user_id, "alice");
    assert_eq!(registration.public_key_format, "rawP256");
    assert_eq!(b64url_decode(&registration.credential_id).unwrap().len(), 32);

    let first = session.link(ORIGIN, &cancel()).await.unwrap();
    assert_eq!(
        session.state(),
        &LinkState::Submitted {
            session_id: "session-0".into()
        }
    );
    assert_eq!(first.credential_id, registration.credential_id);
    assert_eq!(
        b64url_decode(&first.authenticator_data).unwrap(),
        [0x05, 0, 0, 0, 1]
    );
    assert!(
        verify_assertion(
            &first,
            "example.com",
            Some("Y2hhbGxlbmdl"),
            &public,
            HighSPolicy::Reject
        )
        .unwrap()
    );

    // A second assertion from Submitted, with a fresh counter
    let second = session.link(ORIGIN, &cancel()).await.unwrap();
    assert_eq!(second.session_id, "session-1");
    assert_eq!(counter_of(&second), 2);
    assert_ne!(first.signature, second.signature);
    assert_eq!(fx.rp.assertions.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_presence_without_verification_sets_up_only() {
    let fx = Fixture::new(
        ScriptedPresence::with([PresenceOutcome::Granted {
            user_verified: false,
        }]),
        Arc::new(MockRelyingParty::default()),
    );
    let (mut session, public) = fx.registered().await;
    let payload = session.link(ORIGIN, &cancel()).await.unwrap();
    assert_eq!(
        b64url_decode(&payload.authenticator_data).unwrap(),
        [0x01, 0, 0, 0, 1]
    );
    assert!(verify_assertion(&payload, "example.com", None, &public, HighSPolicy::Accept).unwrap());
}

#[tokio::test]
async fn test_denial_leaves_store_untouched() {
    let fx = Fixture::new(
        ScriptedPresence::with([
            PresenceOutcome::Denied,
            PresenceOutcome::Error("sensor offline".into()),
            PresenceOutcome::Cancelled,
        ]),
        Arc::new(MockRelyingParty::default()),
    );
    let (mut session, _) = fx.registered().await;
    let before = fx.store.snapshot("default");

    let denied = session.link(ORIGIN, &cancel()).await.unwrap_err();
    assert!(matches!(denied, LinkError::BiometricDenied));
    assert_eq!(denied.remediation(), Remediation::UserDeclined);
    assert_eq!(session.state(), &LinkState::Registered);

    let failed = session.link(ORIGIN, &cancel()).await.unwrap_err();
    assert!(matches!(failed, LinkError::BiometricError(_)));
    assert_eq!(failed.remediation(), Remediation::Retry);

    let cancelled = session.link(ORIGIN, &cancel()).await.unwrap_err();
    assert!(matches!(cancelled, LinkError::BiometricCancelled));

    assert_eq!(session.state(), &LinkState::Registered);
    assert_eq!(fx.store.snapshot("default"), before);
    assert!(fx.rp.assertions.lock().unwrap().is_empty());
    assert_eq!(fx.presence.prompts.load(Ordering::SeqCst), 3);

    // The next grant still starts from counter 1
    let payload = session.link(ORIGIN, &cancel()).await.unwrap();
    assert_eq!(counter_of(&payload), 1);
}

#[tokio::test]
async fn test_cancel_flag_raised_during_prompt() {
    struct CancelsWhileAsking;

    #[async_trait]
    impl UserPresence for CancelsWhileAsking {
        async fn request_user_presence(
            &self,
            _prompt: &PresencePrompt,
            cancel: &Arc<AtomicBool>,
        ) -> PresenceOutcome {
            cancel.store(true, Ordering::SeqCst);
            PresenceOutcome::Granted {
                user_verified: true,
            }
        }
    }

    let store = Arc::new(MemoryKeyStore::new());
    let vault = IdentityVault::new(store.clone(), "default");
    let rp = Arc::new(MockRelyingParty::default());
    let mut session = LinkSession::open(vault, Arc::new(CancelsWhileAsking), rp.clone())
        .await
        .unwrap();
    session.register("alice").await.unwrap();
    let before = store.snapshot("default");

    let err = session.link(ORIGIN, &cancel()).await.unwrap_err();
    assert!(matches!(err, LinkError::BiometricCancelled));
    assert_eq!(session.state(), &LinkState::Registered);
    assert_eq!(store.snapshot("default"), before);
}

#[tokio::test]
async fn test_registration_upload_retry_keeps_keys() {
    let fx = Fixture::new(ScriptedPresence::with([]), MockRelyingParty::failing(1, 0));
    let mut session = fx.session().await;

    let err = session.register("alice").await.unwrap_err();
    assert!(matches!(err, LinkError::TransportFailure(_)));
    assert_eq!(err.remediation(), Remediation::Retry);
    let LinkState::LocallyCommitted { payload: pending } = session.state().clone() else {
        panic!("expected LocallyCommitted, got {:?}", session.state());
    };
    assert!(!fx.store.snapshot("default").is_empty());

    // A fresh process resumes the pending upload with the same keys.
    let mut resumed = fx.session().await;
    assert_eq!(
        resumed.state(),
        &LinkState::LocallyCommitted {
            payload: pending.clone()
        }
    );
    let sent = resumed.submit_registration().await.unwrap();
    assert_eq!(sent, pending);
    assert_eq!(resumed.state(), &LinkState::Registered);
    assert_eq!(fx.rp.registrations.lock().unwrap().as_slice(), [pending]);

    // Once acknowledged, reopening lands in Registered.
    assert_eq!(fx.session().await.state(), &LinkState::Registered);
}

#[tokio::test]
async fn test_assertion_upload_retry_does_not_resign() {
    let fx = Fixture::new(ScriptedPresence::with([]), MockRelyingParty::failing(0, 1));
    let (mut session, _) = fx.registered().await;

    let err = session.link(ORIGIN, &cancel()).await.unwrap_err();
    assert!(matches!(err, LinkError::TransportFailure(_)));
    let LinkState::Signed { payload: signed } = session.state().clone() else {
        panic!("expected Signed, got {:?}", session.state());
    };
    let snapshot = fx.store.snapshot("default");

    let session_id = session.submit().await.unwrap();
    assert_eq!(session_id, signed.session_id);
    assert_eq!(fx.rp.assertions.lock().unwrap().as_slice(), [signed]);
    assert_eq!(fx.presence.prompts.load(Ordering::SeqCst), 1);
    // Retrying the upload neither signs nor bumps the counter again
    assert_eq!(fx.store.snapshot("default"), snapshot);
}

#[tokio::test]
async fn test_reset_requires_reregistration() {
    let fx = Fixture::new(ScriptedPresence::with([]), Arc::new(MockRelyingParty::default()));
    let (mut session, _) = fx.registered().await;

    // Another handle on the same identity resets it while a challenge is pending.
    session.receive_challenge().await.unwrap();
    fx.vault.lock().await.reset().await.unwrap();
    assert!(fx.store.snapshot("default").is_empty());

    let err = session.authorize(ORIGIN, &cancel()).await.unwrap_err();
    assert!(matches!(err, LinkError::KeyNotFound));
    assert_eq!(err.remediation(), Remediation::Reregister);
    assert_eq!(session.state(), &LinkState::Registered);

    session.reset().await.unwrap();
    assert_eq!(session.state(), &LinkState::Unregistered);
    session.register("alice").await.unwrap();
    assert_eq!(fx.rp.registrations.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_parallel_sessions_get_distinct_counters() {
    let fx = Fixture::new(ScriptedPresence::with([]), Arc::new(MockRelyingParty::default()));
    let (mut first, _) = fx.registered().await;
    let mut second = fx.session().await;
    assert_eq!(second.state(), &LinkState::Registered);

    let (cancel_a, cancel_b) = (cancel(), cancel());
    let (a, b) = tokio::join!(
        first.link(ORIGIN, &cancel_a),
        second.link(ORIGIN, &cancel_b)
    );
    let mut counters = [counter_of(&a.unwrap()), counter_of(&b.unwrap())];
    counters.sort();
    assert_eq!(counters, [1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_during_reset_sees_whole_identity_or_none() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SecureKeyStore> =
        Arc::new(DiskKeyStore::open([0x42; 32], dir.path().to_path_buf()).unwrap());
    let vault = IdentityVault::new(store.clone(), "default");
    let pair = KeyPair::generate().unwrap();
    vault
        .lock()
        .await
        .commit_local(&pair, &[7u8; 32], "alice")
        .await
        .unwrap();

    // Reset and re-commit straight through the store, outside any vault lock.
    let stored: Vec<Vec<u8>> = store
        .read_batch("default", &IDENTITY_KEYS)
        .unwrap()
        .into_iter()
        .map(Option::unwrap)
        .collect();
    let writer = {
        let store = store.clone();
        std::thread::spawn(move || {
            let entries: Vec<(&str, &[u8])> = IDENTITY_KEYS
                .iter()
                .zip(&stored)
                .map(|(key, value)| (*key, value.as_slice()))
                .collect();
            for _ in 0..50 {
                store.delete_batch("default", &IDENTITY_KEYS).unwrap();
                store.write_batch("default", &entries).unwrap();
            }
        })
    };

    let reader = IdentityVault::new(store, "default");
    let mut loads = 0usize;
    while !writer.is_finished() || loads == 0 {
        match reader.lock().await.try_load().await {
            Ok(Some(identity)) => assert_eq!(identity.keypair.public(), pair.public()),
            Ok(None) => {}
            Err(e) => panic!("load saw a half-reset identity: {e}"),
        }
        loads += 1;
    }
    writer.join().unwrap();
    assert!(reader.lock().await.try_load().await.unwrap().is_some());
}
