use sha2::{Digest, Sha256};

use super::ChallengeError;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;

/// `flags || signCount`.
pub const AUTHENTICATOR_DATA_LEN: usize = 5;
/// `SHA-256(rpId) || authenticatorData || SHA-256(clientData)`.
pub const SIGNED_MESSAGE_LEN: usize = 32 + AUTHENTICATOR_DATA_LEN + 32;

/// Build the 5-byte authenticator data: flags, then a big-endian counter.
pub fn build_authenticator_data(
    user_present: bool,
    user_verified: bool,
    counter: u64,
) -> Result<[u8; AUTHENTICATOR_DATA_LEN], ChallengeError> {
    let counter = u32::try_from(counter).map_err(|_| ChallengeError::InvalidCounter(counter))?;
    let mut flags = 0u8;
    if user_present {
        flags |= FLAG_USER_PRESENT;
    }
    if user_verified {
        flags |= FLAG_USER_VERIFIED;
    }
    let mut data = [0u8; AUTHENTICATOR_DATA_LEN];
    data[0] = flags;
    data[1..].copy_from_slice(&counter.to_be_bytes());
    Ok(data)
}

/// Build the exact byte sequence an assertion signature covers.
pub fn build_signed_message(
    rp_id: &str,
    authenticator_data: &[u8; AUTHENTICATOR_DATA_LEN],
    client_data: &[u8],
) -> [u8; SIGNED_MESSAGE_LEN] {
    let rp_id_hash = Sha256::digest(rp_id.as_bytes());
    let client_data_hash = Sha256::digest(client_data);
    let mut message = [0u8; SIGNED_MESSAGE_LEN];
    message[..32].copy_from_slice(&rp_id_hash);
    message[32..32 + AUTHENTICATOR_DATA_LEN].copy_from_slice(authenticator_data);
    message[32 + AUTHENTICATOR_DATA_LEN..].copy_from_slice(&client_data_hash);
    message
}
