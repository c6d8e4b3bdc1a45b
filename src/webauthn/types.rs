use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};

use super::ChallengeError;

pub const PUBLIC_KEY_FORMAT_RAW_P256: &str = "rawP256";

/// URL-safe alphabet; encodes unpadded, decodes with or without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn b64url_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

pub fn b64url_decode(text: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_LENIENT.decode(text)
}

/// Relying parties send challenges in either base64 alphabet.
fn decode_any_base64(text: &str) -> Option<Vec<u8>> {
    URL_SAFE_LENIENT
        .decode(text)
        .or_else(|_| STANDARD_LENIENT.decode(text))
        .ok()
}

/// Sent to the relying party once the keypair is committed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub user_id: String,
    pub credential_id: String,
    pub public_key_format: String,
    pub public_key: String,
}

/// Issued by the relying party for a single assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeBundle {
    pub challenge: String,
    pub rp_id: String,
    pub session_id: String,
}

impl ChallengeBundle {
    /// Parse and validate a bundle received from the relying party.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ChallengeError> {
        let bundle: Self =
            serde_json::from_slice(bytes).map_err(|e| ChallengeError::Bundle(e.to_string()))?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn validate(&self) -> Result<(), ChallengeError> {
        if self.rp_id.is_empty() {
            return Err(ChallengeError::Bundle("empty rpId".into()));
        }
        if self.session_id.is_empty() {
            return Err(ChallengeError::Bundle("empty sessionId".into()));
        }
        match decode_any_base64(&self.challenge) {
            Some(raw) if !raw.is_empty() => Ok(()),
            Some(_) => Err(ChallengeError::Bundle("empty challenge".into())),
            None => Err(ChallengeError::Bundle("challenge is not base64".into())),
        }
    }
}

/// Assertion result handed back to the relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionPayload {
    pub session_id: String,
    pub credential_id: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64url_unpadded_and_tolerant() {
        let encoded = b64url_encode([0xfb, 0xff]);
        assert_eq!(encoded, "-_8");
        assert_eq!(b64url_decode("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(b64url_decode("-_8=").unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_bundle_wire_names() {
        let json = br#"{"challenge":"Y2hhbGxlbmdl","rpId":"example.com","sessionId":"s-1"}"#;
        let bundle = ChallengeBundle::from_json(json).unwrap();
        assert_eq!(bundle.rp_id, "example.com");
        assert_eq!(bundle.session_id, "s-1");
    }

    #[test]
    fn test_bundle_accepts_standard_alphabet() {
        let bundle = ChallengeBundle {
            challenge: "+/+/".into(),
            rp_id: "rp".into(),
            session_id: "s".into(),
        };
        assert!(bundle.validate().is_ok());
    }

    #[test]
    fn test_bundle_rejects_bad_shapes() {
        for json in [
            &br#"{"challenge":"Y2hh","rpId":"example.com"}"#[..],
            br#"{"challenge":"","rpId":"example.com","sessionId":"s"}"#,
            br#"{"challenge":"not base64!","rpId":"example.com","sessionId":"s"}"#,
            br#"{"challenge":"Y2hh","rpId":"","sessionId":"s"}"#,
            br#"[1,2,3]"#,
        ] {
            assert!(
                ChallengeBundle::from_json(json).is_err(),
                "{}",
                String::from_utf8_lossy(json)
            );
        }
    }

    #[test]
    fn test_assertion_payload_field_names() {
        let payload = AssertionPayload {
            session_id: "s".into(),
            credential_id: "c".into(),
            client_data_json: "cd".into(),
            authenticator_data: "ad".into(),
            signature: "sig".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"sessionId":"s","credentialId":"c","clientDataJSON":"cd","authenticatorData":"ad","signature":"sig"}"#
        );
    }

    #[test]
    fn test_registration_payload_field_names() {
        let payload = RegistrationPayload {
            user_id: "u".into(),
            credential_id: "c".into(),
            public_key_format: PUBLIC_KEY_FORMAT_RAW_P256.into(),
            public_key: "pk".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"userId":"u","credentialId":"c","publicKeyFormat":"rawP256","publicKey":"pk"}"#
        );
    }
}
