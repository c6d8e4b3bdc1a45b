use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::KeyError;

pub const PRIVATE_SCALAR_LEN: usize = 32;
pub const PUBLIC_POINT_LEN: usize = 65;

/// Attempts before giving up on drawing a scalar in `[1, n)`. A single draw
/// falls outside the range with probability below 2^-32.
const MAX_SCALAR_DRAWS: usize = 8;

/// P-256 private scalar, `1 <= d < n`.
#[derive(Clone)]
pub struct PrivateScalar(SecretKey);

/// Uncompressed P-256 point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicPoint(PublicKey);

/// A private scalar together with the point it generates.
///
/// The only constructors derive the point from the scalar or check that a
/// supplied point matches, so a `KeyPair` can never hold a mismatched pair.
#[derive(Clone)]
pub struct KeyPair {
    private: PrivateScalar,
    public: PublicPoint,
}

impl std::fmt::Debug for PrivateScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateScalar(..)")
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl PrivateScalar {
    /// Parse a 32-byte big-endian scalar. Zero and values `>= n` are rejected.
    pub fn import(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: &[u8; PRIVATE_SCALAR_LEN] = bytes.try_into().map_err(|_| {
            KeyError::InvalidKeyEncoding(format!(
                "private scalar must be {PRIVATE_SCALAR_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        SecretKey::from_bytes(bytes.into())
            .map(Self)
            .map_err(|_| KeyError::InvalidKeyEncoding("private scalar out of range".into()))
    }

    /// Fixed-width big-endian encoding, left zero-padded.
    pub fn export(&self) -> Zeroizing<[u8; PRIVATE_SCALAR_LEN]> {
        Zeroizing::new(self.0.to_bytes().into())
    }

    pub fn public_point(&self) -> PublicPoint {
        PublicPoint(self.0.public_key())
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.0
    }
}

impl PublicPoint {
    /// Parse `0x04 || X || Y`. Rejects other lengths, compressed or identity
    /// encodings, and points that do not satisfy the curve equation.
    pub fn import(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PUBLIC_POINT_LEN {
            return Err(KeyError::InvalidKeyEncoding(format!(
                "public point must be {PUBLIC_POINT_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != 0x04 {
            return Err(KeyError::InvalidKeyEncoding(format!(
                "public point must be uncompressed (0x04), got {:#04x}",
                bytes[0]
            )));
        }
        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidKeyEncoding("point is not on P-256".into()))
    }

    pub fn export(&self) -> [u8; PUBLIC_POINT_LEN] {
        let encoded = self.0.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_POINT_LEN];
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    pub(crate) fn public_key(&self) -> &PublicKey {
        &self.0
    }
}

impl KeyPair {
    /// Generate a fresh keypair from the operating system's CSPRNG.
    pub fn generate() -> Result<Self, KeyError> {
        for _ in 0..MAX_SCALAR_DRAWS {
            let mut candidate = Zeroizing::new([0u8; PRIVATE_SCALAR_LEN]);
            OsRng
                .try_fill_bytes(&mut candidate[..])
                .map_err(|e| KeyError::EntropyUnavailable(e.to_string()))?;
            if let Ok(private) = PrivateScalar::import(&candidate[..]) {
                return Ok(Self::from_private(private));
            }
        }
        Err(KeyError::EntropyUnavailable(
            "random source kept producing out-of-range scalars".into(),
        ))
    }

    pub fn from_private(private: PrivateScalar) -> Self {
        let public = private.public_point();
        Self { private, public }
    }

    /// Rebuild a pair from stored parts, rejecting a point that is not `d·G`.
    pub fn from_parts(private: PrivateScalar, public: PublicPoint) -> Result<Self, KeyError> {
        if private.public_point() != public {
            return Err(KeyError::InvalidKeyEncoding(
                "public point does not match private scalar".into(),
            ));
        }
        Ok(Self { private, public })
    }

    pub fn private(&self) -> &PrivateScalar {
        &self.private
    }

    pub fn public(&self) -> &PublicPoint {
        &self.public
    }

    pub fn export_private_scalar(&self) -> Zeroizing<[u8; PRIVATE_SCALAR_LEN]> {
        self.private.export()
    }

    pub fn export_public_point(&self) -> [u8; PUBLIC_POINT_LEN] {
        self.public.export()
    }
}
