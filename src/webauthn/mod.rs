pub mod authenticator_data;
pub mod client_data;
pub mod types;

pub use authenticator_data::{build_authenticator_data, build_signed_message};
pub use client_data::{ClientData, build_client_data};
pub use types::{AssertionPayload, ChallengeBundle, RegistrationPayload};

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("signature counter {0} does not fit in 4 bytes")]
    InvalidCounter(u64),
    #[error("client data: {0}")]
    ClientData(String),
    #[error("challenge bundle: {0}")]
    Bundle(String),
}
