use serde::{Deserialize, Serialize};

use super::ChallengeError;

pub const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";

/// Collected client data. Field declaration order is the serialized key
/// order, and the serialized bytes are what gets hashed and transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub origin: String,
    #[serde(rename = "crossOrigin")]
    pub cross_origin: bool,
}

impl ClientData {
    pub fn get(challenge: &str, origin: &str) -> Self {
        Self {
            kind: CLIENT_DATA_TYPE_GET.to_string(),
            challenge: challenge.to_string(),
            origin: origin.to_string(),
            cross_origin: false,
        }
    }

    /// Compact JSON with no insignificant whitespace.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChallengeError> {
        serde_json::to_vec(self).map_err(|e| ChallengeError::ClientData(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChallengeError> {
        serde_json::from_slice(bytes).map_err(|e| ChallengeError::ClientData(e.to_string()))
    }
}

/// Canonical `webauthn.get` client data bytes for `challenge` and `origin`.
pub fn build_client_data(challenge: &str, origin: &str) -> Result<Vec<u8>, ChallengeError> {
    ClientData::get(challenge, origin).to_bytes()
}
