pub(crate) mod pinentry;
pub(crate) mod prompt;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub use pinentry::PinentryPresence;
pub use prompt::PresencePrompt;

/// Result of asking the user to confirm presence (and, where the backend can,
/// verify identity, e.g. with a biometric).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOutcome {
    Granted { user_verified: bool },
    /// The user declined. A normal outcome, not a failure.
    Denied,
    /// The request was cancelled before the user answered.
    Cancelled,
    /// The presence backend itself failed.
    Error(String),
}

/// Liveness/possession check capability.
#[async_trait]
pub trait UserPresence: Send + Sync {
    async fn request_user_presence(
        &self,
        prompt: &PresencePrompt,
        cancel: &Arc<AtomicBool>,
    ) -> PresenceOutcome;
}

/// Token minted only from a granted presence check. Signing requires one.
pub struct UserPresenceProof {
    pub(crate) _private: (),
    user_verified: bool,
}

impl UserPresenceProof {
    pub(crate) fn from_outcome(outcome: &PresenceOutcome) -> Option<Self> {
        match outcome {
            PresenceOutcome::Granted { user_verified } => Some(Self {
                _private: (),
                user_verified: *user_verified,
            }),
            _ => None,
        }
    }

    pub fn user_verified(&self) -> bool {
        self.user_verified
    }

    /// Construct a proof for use in tests only.
    /// Do not use in production code: this bypasses user presence verification.
    #[doc(hidden)]
    pub fn test_only() -> Self {
        Self {
            _private: (),
            user_verified: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_only_from_grant() {
        assert!(UserPresenceProof::from_outcome(&PresenceOutcome::Denied).is_none());
        assert!(UserPresenceProof::from_outcome(&PresenceOutcome::Cancelled).is_none());
        assert!(UserPresenceProof::from_outcome(&PresenceOutcome::Error("x".into())).is_none());
        let proof =
            UserPresenceProof::from_outcome(&PresenceOutcome::Granted { user_verified: false })
                .unwrap();
        assert!(!proof.user_verified());
    }
}
