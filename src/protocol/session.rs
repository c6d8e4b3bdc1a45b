use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::registration::{new_credential_id, registration_payload};
use super::{IdentityVault, LinkError, LinkState, build_assertion};
use crate::crypto::{KeyPair, SoftwareSigner};
use crate::transport::RelyingParty;
use crate::up::prompt::link_prompt;
use crate::up::{PresenceOutcome, UserPresence, UserPresenceProof};
use crate::webauthn::{AssertionPayload, ChallengeBundle, RegistrationPayload};

/// Drives one identity through registration and any number of assertions.
///
/// Every transition either completes or leaves the state where a retry makes
/// sense: a failed registration upload stays `LocallyCommitted`, a failed
/// assertion upload stays `Signed`, and anything that goes wrong between
/// challenge and signature falls back to `Registered`.
pub struct LinkSession {
    vault: IdentityVault,
    presence: Arc<dyn UserPresence>,
    relying_party: Arc<dyn RelyingParty>,
    state: LinkState,
}

impl LinkSession {
    /// Resume from whatever the vault holds.
    pub async fn open(
        vault: IdentityVault,
        presence: Arc<dyn UserPresence>,
        relying_party: Arc<dyn RelyingParty>,
    ) -> Result<Self, LinkError> {
        let state = {
            let guard = vault.lock().await;
            match guard.try_load().await? {
                None => LinkState::Unregistered,
                Some(identity) if !identity.remote_committed => LinkState::LocallyCommitted {
                    payload: registration_payload(&identity),
                },
                Some(_) => LinkState::Registered,
            }
        };
        tracing::debug!(identity = vault.namespace(), state = state.name(), "Session opened");
        Ok(Self {
            vault,
            presence,
            relying_party,
            state,
        })
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// Generate and durably store a new identity, then upload it.
    ///
    /// If the upload fails the keys stay on disk and the session stays
    /// `LocallyCommitted`; call [`Self::submit_registration`] to retry.
    pub async fn register(&mut self, user_id: &str) -> Result<RegistrationPayload, LinkError> {
        if !matches!(self.state, LinkState::Unregistered) {
            return Err(invalid("Unregistered", &self.state));
        }

        let keypair = KeyPair::generate()?;
        let credential_id = new_credential_id()?;
        let payload = {
            let guard = self.vault.lock().await;
            guard.commit_local(&keypair, &credential_id, user_id).await?;
            registration_payload(&guard.load().await?)
        };
        let cred_id_hex: String = credential_id.iter().map(|b| format!("{b:02x}")).collect();
        tracing::info!(
            identity = self.vault.namespace(),
            cred_id = cred_id_hex,
            "Identity committed locally"
        );

        self.state = LinkState::LocallyCommitted { payload };
        self.submit_registration().await
    }

    /// Upload the stored registration. Never regenerates keys.
    pub async fn submit_registration(&mut self) -> Result<RegistrationPayload, LinkError> {
        let LinkState::LocallyCommitted { payload } = &self.state else {
            return Err(invalid("LocallyCommitted", &self.state));
        };
        let payload = payload.clone();

        if let Err(e) = self.relying_party.submit_registration(&payload).await {
            tracing::warn!(error = %e, "Registration upload failed; keys kept for retry");
            return Err(e.into());
        }
        self.vault.lock().await.mark_remote_committed().await?;

        tracing::info!(identity = self.vault.namespace(), "Registered");
        self.state = LinkState::Registered;
        Ok(payload)
    }

    /// Pull the next challenge from the relying party.
    pub async fn receive_challenge(&mut self) -> Result<ChallengeBundle, LinkError> {
        if !self.state.is_idle_registered() {
            return Err(invalid("Registered", &self.state));
        }
        let bytes = self.relying_party.fetch_challenge().await?;
        self.accept_challenge(&bytes)
    }

    /// Accept a challenge bundle delivered out of band.
    pub fn accept_challenge(&mut self, bytes: &[u8]) -> Result<ChallengeBundle, LinkError> {
        if !self.state.is_idle_registered() {
            return Err(invalid("Registered", &self.state));
        }
        let bundle = ChallengeBundle::from_json(bytes)?;
        tracing::debug!(
            rp_id = %bundle.rp_id,
            session_id = %bundle.session_id,
            "Challenge received"
        );
        self.state = LinkState::ChallengeReceived {
            bundle: bundle.clone(),
        };
        Ok(bundle)
    }

    /// Ask for presence and, if granted, sign the pending challenge.
    ///
    /// A refusal, a cancellation or a presence backend failure returns the
    /// session to `Registered` without touching the store. Dropping the
    /// returned future also returns to `Registered`; see `PendingGuard` for
    /// a drop that lands during the counter update.
    pub async fn authorize(
        &mut self,
        origin: &str,
        cancel: &Arc<AtomicBool>,
    ) -> Result<AssertionPayload, LinkError> {
        let LinkState::ChallengeReceived { bundle } = &self.state else {
            return Err(invalid("ChallengeReceived", &self.state));
        };
        let bundle = bundle.clone();

        let Self {
            vault,
            presence,
            state,
            ..
        } = self;
        *state = LinkState::BiometricPending {
            bundle: bundle.clone(),
        };
        let pending = PendingGuard::new(state);

        if cancel.load(Ordering::Relaxed) {
            return Err(LinkError::BiometricCancelled);
        }
        let prompt = link_prompt(&bundle.rp_id, &bundle.session_id);
        let outcome = presence.request_user_presence(&prompt, cancel).await;
        if cancel.load(Ordering::Relaxed) {
            return Err(LinkError::BiometricCancelled);
        }

        let proof = match UserPresenceProof::from_outcome(&outcome) {
            Some(proof) => proof,
            None => {
                return Err(match outcome {
                    PresenceOutcome::Denied => LinkError::BiometricDenied,
                    PresenceOutcome::Cancelled => LinkError::BiometricCancelled,
                    PresenceOutcome::Error(message) => {
                        tracing::warn!(error = %message, "Presence backend failed");
                        LinkError::BiometricError(message)
                    }
                    PresenceOutcome::Granted { .. } => {
                        LinkError::BiometricError("grant did not yield a proof".into())
                    }
                });
            }
        };

        let payload = {
            let guard = vault.lock().await;
            let identity = guard.load().await?;
            let counter = guard.next_counter().await?;
            let signer = SoftwareSigner::new(identity.keypair);
            build_assertion(
                &bundle,
                origin,
                &identity.credential_id,
                counter,
                &signer,
                &proof,
            )?
        };
        tracing::info!(session_id = %bundle.session_id, "Assertion signed");

        pending.finish(LinkState::Signed {
            payload: payload.clone(),
        });
        Ok(payload)
    }

    /// Upload the signed assertion. On failure the session stays `Signed`.
    pub async fn submit(&mut self) -> Result<String, LinkError> {
        let LinkState::Signed { payload } = &self.state else {
            return Err(invalid("Signed", &self.state));
        };

        if let Err(e) = self.relying_party.submit_assertion(payload).await {
            tracing::warn!(error = %e, "Assertion upload failed; signature kept for retry");
            return Err(e.into());
        }
        let session_id = payload.session_id.clone();
        tracing::info!(session_id = %session_id, "Assertion submitted");
        self.state = LinkState::Submitted {
            session_id: session_id.clone(),
        };
        Ok(session_id)
    }

    /// Fetch, authorize and submit in one go.
    pub async fn link(
        &mut self,
        origin: &str,
        cancel: &Arc<AtomicBool>,
    ) -> Result<AssertionPayload, LinkError> {
        self.receive_challenge().await?;
        let payload = self.authorize(origin, cancel).await?;
        self.submit().await?;
        Ok(payload)
    }

    /// Drop any in-flight challenge or unsent assertion.
    pub fn abandon(&mut self) {
        if matches!(
            self.state,
            LinkState::ChallengeReceived { .. }
                | LinkState::BiometricPending { .. }
                | LinkState::Signed { .. }
        ) {
            tracing::debug!(state = self.state.name(), "Abandoned");
            self.state = LinkState::Registered;
        }
    }

    /// Delete the identity. Afterwards the session is `Unregistered`.
    pub async fn reset(&mut self) -> Result<(), LinkError> {
        self.vault.lock().await.reset().await?;
        tracing::info!(identity = self.vault.namespace(), "Identity reset");
        self.state = LinkState::Unregistered;
        Ok(())
    }
}

fn invalid(expected: &'static str, actual: &LinkState) -> LinkError {
    LinkError::InvalidState {
        expected,
        actual: actual.name(),
    }
}

/// Puts the session back to `Registered` unless the presence step finishes.
///
/// A drop after the grant can race the counter write, which runs on the
/// blocking pool and completes on its own. The counter then moves past a value
/// no signature was issued for.
struct PendingGuard<'a> {
    state: &'a mut LinkState,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(state: &'a mut LinkState) -> Self {
        Self { state, armed: true }
    }

    fn finish(mut self, next: LinkState) {
        *self.state = next;
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state = LinkState::Registered;
        }
    }
}
