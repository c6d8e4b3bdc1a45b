pub mod der;
pub mod ecdsa;
pub mod keys;
pub mod signer;

pub use ecdsa::{DerSignature, HighSPolicy};
pub use keys::{KeyPair, PrivateScalar, PublicPoint};
pub use signer::{CredentialSigner, SoftwareSigner};

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(String),
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signing failed: {0}")]
    SigningFailure(String),
}
