//! ES256: ECDSA over P-256 with SHA-256.
//!
//! The p256 signer hashes its input with SHA-256, so callers pass the raw
//! message and nothing here hashes it a second time.

use p256::ecdsa::signature::{RandomizedSigner, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use zeroize::Zeroizing;

use super::{PrivateScalar, PublicPoint, SignatureError, der};

/// Whether verification accepts signatures whose `s` lies above `n/2`.
///
/// Signing always emits low-S; this only governs what a verifier tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HighSPolicy {
    #[default]
    Accept,
    Reject,
}

/// A DER-encoded ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerSignature(Vec<u8>);

impl DerSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for DerSignature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Sign `message` with a fresh hedged nonce and return a low-S DER signature.
pub fn sign(message: &[u8], private: &PrivateScalar) -> Result<DerSignature, SignatureError> {
    let mut seed = Zeroizing::new([0u8; 32]);
    OsRng
        .try_fill_bytes(&mut seed[..])
        .map_err(|e| SignatureError::SigningFailure(format!("entropy: {e}")))?;
    let mut rng = StdRng::from_seed(*seed);

    let signing_key = SigningKey::from(private.secret_key());
    let signature: Signature = signing_key
        .try_sign_with_rng(&mut rng, message)
        .map_err(|e| SignatureError::SigningFailure(e.to_string()))?;
    let signature = signature.normalize_s().unwrap_or(signature);

    let (r, s) = signature.split_bytes();
    let (r, s): ([u8; 32], [u8; 32]) = (r.into(), s.into());
    Ok(DerSignature(der::encode(&r, &s)))
}

/// Verify with the default policy (high-S accepted).
pub fn verify(
    message: &[u8],
    signature: &[u8],
    public: &PublicPoint,
) -> Result<bool, SignatureError> {
    verify_with_policy(message, signature, public, HighSPolicy::default())
}

/// Verify a DER signature over `message`.
///
/// Structural problems with the encoding are errors; a well-formed signature
/// that does not verify is `Ok(false)`.
pub fn verify_with_policy(
    message: &[u8],
    signature: &[u8],
    public: &PublicPoint,
    policy: HighSPolicy,
) -> Result<bool, SignatureError> {
    let signature = decode(signature)?;
    if policy == HighSPolicy::Reject && !is_low_s(&signature) {
        tracing::debug!("Rejecting high-S signature");
        return Ok(false);
    }
    let verifying_key = VerifyingKey::from(public.public_key());
    Ok(verifying_key.verify(message, &signature).is_ok())
}

/// Decode DER into a signature whose scalars are both in `[1, n)`.
pub fn decode(der_bytes: &[u8]) -> Result<Signature, SignatureError> {
    let (r, s) = der::decode(der_bytes)?;
    Signature::from_scalars(r, s).map_err(|_| {
        SignatureError::MalformedSignature("r or s is zero or not below the group order".into())
    })
}

pub fn is_low_s(signature: &Signature) -> bool {
    signature.normalize_s().is_none()
}
