pub mod assertion;
pub mod registration;
pub mod session;
pub mod state;
pub mod vault;

pub use assertion::{build_assertion, verify_assertion};
pub use registration::{new_credential_id, registration_payload};
pub use session::LinkSession;
pub use state::LinkState;
pub use vault::{IdentityVault, StoredIdentity};

use crate::crypto::{KeyError, SignatureError};
use crate::store::StoreError;
use crate::transport::TransportError;
use crate::webauthn::ChallengeError;

/// What a caller should do about a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Try again; stored key material is intact.
    Retry,
    /// Stored identity is missing or unusable; register again.
    Reregister,
    /// The user said no. Nothing to repair.
    UserDeclined,
    /// The request itself was invalid; retrying it unchanged will not help.
    Abort,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(String),
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("no identity stored; registration required")]
    KeyNotFound,
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signing failed: {0}")]
    SigningFailure(String),
    #[error("signature counter {0} does not fit in 4 bytes")]
    InvalidCounter(u64),
    #[error("user denied the presence check")]
    BiometricDenied,
    #[error("presence check cancelled")]
    BiometricCancelled,
    #[error("presence check failed: {0}")]
    BiometricError(String),
    #[error("transport: {0}")]
    TransportFailure(#[from] TransportError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("operation not allowed in state {actual} (expected {expected})")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("store: {0}")]
    Store(StoreError),
}

impl LinkError {
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::EntropyUnavailable(_)
            | Self::SigningFailure(_)
            | Self::BiometricError(_)
            | Self::TransportFailure(_) => Remediation::Retry,
            Self::KeyNotFound | Self::InvalidKeyEncoding(_) | Self::InvalidCounter(_) => {
                Remediation::Reregister
            }
            Self::BiometricDenied | Self::BiometricCancelled => Remediation::UserDeclined,
            Self::MalformedSignature(_)
            | Self::ProtocolViolation(_)
            | Self::InvalidState { .. } => Remediation::Abort,
            Self::Store(StoreError::Io(_) | StoreError::Other(_)) => Remediation::Retry,
            Self::Store(_) => Remediation::Reregister,
        }
    }
}

impl From<KeyError> for LinkError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::EntropyUnavailable(m) => Self::EntropyUnavailable(m),
            KeyError::InvalidKeyEncoding(m) => Self::InvalidKeyEncoding(m),
        }
    }
}

impl From<SignatureError> for LinkError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::MalformedSignature(m) => Self::MalformedSignature(m),
            SignatureError::SigningFailure(m) => Self::SigningFailure(m),
        }
    }
}

impl From<ChallengeError> for LinkError {
    fn from(e: ChallengeError) -> Self {
        match e {
            ChallengeError::InvalidCounter(c) => Self::InvalidCounter(c),
            ChallengeError::ClientData(m) | ChallengeError::Bundle(m) => {
                Self::ProtocolViolation(m)
            }
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::KeyNotFound,
            other => Self::Store(other),
        }
    }
}
