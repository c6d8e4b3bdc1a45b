//! DER encoding of ECDSA `(r, s)` pairs:
//! `SEQUENCE { INTEGER r, INTEGER s }`.
//!
//! For P-256 every content length fits below 128, so only the short length
//! form is valid; a long-form length is always non-minimal.

use super::SignatureError;

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;
const SCALAR_LEN: usize = 32;

/// DER-encode a signature given as two 32-byte big-endian scalars.
pub fn encode(r: &[u8; SCALAR_LEN], s: &[u8; SCALAR_LEN]) -> Vec<u8> {
    let r_der = der_integer(r);
    let s_der = der_integer(s);
    let inner_len = (r_der.len() + s_der.len()) as u8;
    let mut out = Vec::with_capacity(2 + inner_len as usize);
    out.push(TAG_SEQUENCE);
    out.push(inner_len);
    out.extend_from_slice(&r_der);
    out.extend_from_slice(&s_der);
    out
}

/// Strictly decode a DER signature into 32-byte big-endian `(r, s)`.
///
/// Range checks against the curve order happen in the signature engine.
pub fn decode(der: &[u8]) -> Result<([u8; SCALAR_LEN], [u8; SCALAR_LEN]), SignatureError> {
    let (&tag, rest) = der.split_first().ok_or_else(|| malformed("empty input"))?;
    if tag != TAG_SEQUENCE {
        return Err(malformed(format!("expected SEQUENCE tag, got {tag:#04x}")));
    }
    let (len, body) = read_length(rest)?;
    if body.len() != len {
        return Err(malformed(if body.len() > len {
            "trailing bytes after SEQUENCE"
        } else {
            "SEQUENCE truncated"
        }));
    }
    let (r, body) = read_integer(body)?;
    let (s, body) = read_integer(body)?;
    if !body.is_empty() {
        return Err(malformed("trailing bytes inside SEQUENCE"));
    }
    Ok((r, s))
}

fn der_integer(n: &[u8]) -> Vec<u8> {
    let n: Vec<u8> = n.iter().skip_while(|&&b| b == 0).copied().collect();
    let n = if n.is_empty() { vec![0u8] } else { n };
    let pad = n[0] & 0x80 != 0;
    let mut out = vec![TAG_INTEGER, n.len() as u8 + pad as u8];
    if pad {
        out.push(0);
    }
    out.extend_from_slice(&n);
    out
}

fn read_length(data: &[u8]) -> Result<(usize, &[u8]), SignatureError> {
    let (&len, rest) = data.split_first().ok_or_else(|| malformed("missing length"))?;
    if len & 0x80 != 0 {
        return Err(malformed("non-minimal length encoding"));
    }
    Ok((len as usize, rest))
}

fn read_integer(data: &[u8]) -> Result<([u8; SCALAR_LEN], &[u8]), SignatureError> {
    let (&tag, rest) = data.split_first().ok_or_else(|| malformed("missing INTEGER"))?;
    if tag != TAG_INTEGER {
        return Err(malformed(format!("expected INTEGER tag, got {tag:#04x}")));
    }
    let (len, rest) = read_length(rest)?;
    if len == 0 {
        return Err(malformed("empty INTEGER"));
    }
    if rest.len() < len {
        return Err(malformed("INTEGER truncated"));
    }
    let (value, rest) = rest.split_at(len);
    if value[0] & 0x80 != 0 {
        return Err(malformed("negative INTEGER"));
    }
    if value.len() > 1 && value[0] == 0 && value[1] & 0x80 == 0 {
        return Err(malformed("non-minimal INTEGER padding"));
    }
    let value = if value[0] == 0 && value.len() > 1 {
        &value[1..]
    } else {
        value
    };
    if value.len() > SCALAR_LEN {
        return Err(malformed("INTEGER wider than 256 bits"));
    }
    let mut out = [0u8; SCALAR_LEN];
    out[SCALAR_LEN - value.len()..].copy_from_slice(value);
    Ok((out, rest))
}

fn malformed(reason: impl Into<String>) -> SignatureError {
    SignatureError::MalformedSignature(reason.into())
}
