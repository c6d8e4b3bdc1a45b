use super::LinkError;
use crate::crypto::{CredentialSigner, HighSPolicy, PublicPoint, ecdsa};
use crate::up::UserPresenceProof;
use crate::webauthn::authenticator_data::{AUTHENTICATOR_DATA_LEN, FLAG_USER_PRESENT};
use crate::webauthn::client_data::CLIENT_DATA_TYPE_GET;
use crate::webauthn::types::{b64url_decode, b64url_encode};
use crate::webauthn::{
    AssertionPayload, ChallengeBundle, ClientData, build_authenticator_data, build_client_data,
    build_signed_message,
};

/// Answer one challenge bundle.
///
/// The counter must already be persisted by the caller; this only assembles
/// and signs, and it has no side effects.
pub fn build_assertion(
    bundle: &ChallengeBundle,
    origin: &str,
    credential_id: &[u8],
    counter: u32,
    signer: &dyn CredentialSigner,
    proof: &UserPresenceProof,
) -> Result<AssertionPayload, LinkError> {
    let client_data = build_client_data(&bundle.challenge, origin)?;
    let authenticator_data =
        build_authenticator_data(true, proof.user_verified(), u64::from(counter))?;
    let message = build_signed_message(&bundle.rp_id, &authenticator_data, &client_data);
    let signature = signer.sign(&message, proof)?;

    Ok(AssertionPayload {
        session_id: bundle.session_id.clone(),
        credential_id: b64url_encode(credential_id),
        client_data_json: b64url_encode(&client_data),
        authenticator_data: b64url_encode(authenticator_data),
        signature: b64url_encode(signature.as_bytes()),
    })
}

/// Check an assertion payload the way a relying party would.
///
/// Encoding problems are errors. A well-formed assertion that fails a check
/// (wrong challenge, missing presence flag, bad signature) is `Ok(false)`.
pub fn verify_assertion(
    payload: &AssertionPayload,
    rp_id: &str,
    expected_challenge: Option<&str>,
    public: &PublicPoint,
    policy: HighSPolicy,
) -> Result<bool, LinkError> {
    let client_data = b64url_decode(&payload.client_data_json)
        .map_err(|e| LinkError::ProtocolViolation(format!("clientDataJSON: {e}")))?;
    let parsed = ClientData::from_bytes(&client_data)?;
    if parsed.kind != CLIENT_DATA_TYPE_GET {
        return Err(LinkError::ProtocolViolation(format!(
            "unexpected client data type {:?}",
            parsed.kind
        )));
    }

    let authenticator_data = b64url_decode(&payload.authenticator_data)
        .map_err(|e| LinkError::ProtocolViolation(format!("authenticatorData: {e}")))?;
    let authenticator_data: [u8; AUTHENTICATOR_DATA_LEN] =
        authenticator_data.as_slice().try_into().map_err(|_| {
            LinkError::ProtocolViolation(format!(
                "authenticatorData must be {AUTHENTICATOR_DATA_LEN} bytes, got {}",
                authenticator_data.len()
            ))
        })?;

    let signature = b64url_decode(&payload.signature)
        .map_err(|e| LinkError::MalformedSignature(format!("base64: {e}")))?;

    if let Some(expected) = expected_challenge {
        if parsed.challenge != expected {
            tracing::debug!("Assertion answers a different challenge");
            return Ok(false);
        }
    }
    if authenticator_data[0] & FLAG_USER_PRESENT == 0 {
        tracing::debug!("Assertion lacks the user-present flag");
        return Ok(false);
    }

    let message = build_signed_message(rp_id, &authenticator_data, &client_data);
    Ok(ecdsa::verify_with_policy(
        &message, &signature, public, policy,
    )?)
}
