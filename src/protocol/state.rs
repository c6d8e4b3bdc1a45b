use crate::webauthn::{AssertionPayload, ChallengeBundle, RegistrationPayload};

/// Where a device-linking session stands.
///
/// `LocallyCommitted` sits between `Unregistered` and `Registered`: the keys
/// are durable on this device but the relying party has not acknowledged
/// them yet, so only the transmission is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Unregistered,
    LocallyCommitted { payload: RegistrationPayload },
    Registered,
    ChallengeReceived { bundle: ChallengeBundle },
    BiometricPending { bundle: ChallengeBundle },
    Signed { payload: AssertionPayload },
    Submitted { session_id: String },
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unregistered => "Unregistered",
            Self::LocallyCommitted { .. } => "LocallyCommitted",
            Self::Registered => "Registered",
            Self::ChallengeReceived { .. } => "ChallengeReceived",
            Self::BiometricPending { .. } => "BiometricPending",
            Self::Signed { .. } => "Signed",
            Self::Submitted { .. } => "Submitted",
        }
    }

    /// Registered with the relying party and not mid-assertion.
    pub fn is_idle_registered(&self) -> bool {
        matches!(self, Self::Registered | Self::Submitted { .. })
    }
}
