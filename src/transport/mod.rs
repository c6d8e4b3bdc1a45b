pub mod spool;

use async_trait::async_trait;

use crate::webauthn::{AssertionPayload, RegistrationPayload};

pub use spool::{ChallengeSource, SpoolRelyingParty};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialization(String),
    #[error("relying party rejected request: {0}")]
    Rejected(String),
}

/// Channel to the relying party. Every call may block or fail; failures are
/// retryable and never require new key material.
#[async_trait]
pub trait RelyingParty: Send + Sync {
    async fn submit_registration(&self, payload: &RegistrationPayload)
    -> Result<(), TransportError>;

    /// Raw challenge bundle JSON; parsing and validation are the caller's job.
    async fn fetch_challenge(&self) -> Result<Vec<u8>, TransportError>;

    async fn submit_assertion(&self, payload: &AssertionPayload) -> Result<(), TransportError>;
}
