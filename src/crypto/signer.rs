use super::{DerSignature, KeyPair, PublicPoint, SignatureError, ecdsa};
use crate::up::UserPresenceProof;

/// Signing capability for one credential.
///
/// Hardware-backed implementations keep the scalar out of reach and only
/// expose this interface. The proof argument makes it impossible to call
/// without a granted presence check in hand.
pub trait CredentialSigner: Send + Sync {
    fn public_point(&self) -> &PublicPoint;

    fn sign(
        &self,
        message: &[u8],
        proof: &UserPresenceProof,
    ) -> Result<DerSignature, SignatureError>;
}

/// Demo-mode signer over an exportable software keypair.
pub struct SoftwareSigner {
    keypair: KeyPair,
}

impl SoftwareSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }
}

impl CredentialSigner for SoftwareSigner {
    fn public_point(&self) -> &PublicPoint {
        self.keypair.public()
    }

    fn sign(
        &self,
        message: &[u8],
        _proof: &UserPresenceProof,
    ) -> Result<DerSignature, SignatureError> {
        ecdsa::sign(message, self.keypair.private())
    }
}
