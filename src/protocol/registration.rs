use rand::RngCore;
use rand::rngs::OsRng;

use super::StoredIdentity;
use crate::config::CREDENTIAL_ID_LEN;
use crate::crypto::KeyError;
use crate::webauthn::RegistrationPayload;
use crate::webauthn::types::{PUBLIC_KEY_FORMAT_RAW_P256, b64url_encode};

/// Random credential identifier.
pub fn new_credential_id() -> Result<[u8; CREDENTIAL_ID_LEN], KeyError> {
    let mut id = [0u8; CREDENTIAL_ID_LEN];
    OsRng
        .try_fill_bytes(&mut id)
        .map_err(|e| KeyError::EntropyUnavailable(e.to_string()))?;
    Ok(id)
}

pub fn registration_payload(identity: &StoredIdentity) -> RegistrationPayload {
    RegistrationPayload {
        user_id: identity.user_id.clone(),
        credential_id: b64url_encode(&identity.credential_id),
        public_key_format: PUBLIC_KEY_FORMAT_RAW_P256.to_string(),
        public_key: b64url_encode(identity.keypair.export_public_point()),
    }
}
