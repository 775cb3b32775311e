//! 48-byte signed, timestamped, single-use authentication tokens.
//!
//! Wire layout: 8-byte little-endian millisecond timestamp, 8 random
//! bytes, 32-byte HMAC-SHA-256 tag over the first 16 bytes, all encoded
//! as 64 characters of unpadded URL-safe base64.

mod error;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

pub use error::TokenError;

const TOKEN_BYTES: usize = 48;
const ENCODED_LEN: usize = 64;
const SIGNED_PREFIX: usize = 16;
/// Tokens outside this window (either direction) are rejected as expired.
const EXPIRY_WINDOW_MS: i64 = 10_000;

type HmacSha256 = Hmac<Sha256>;

/// Generates a fresh token for `secret`, stamped with `now_ms`.
pub fn generate(secret: &[u8], now_ms: i64) -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut buf);
    buf[0..8].copy_from_slice(&now_ms.to_le_bytes());

    let tag = sign(secret, &buf[0..SIGNED_PREFIX]);
    buf[SIGNED_PREFIX..TOKEN_BYTES].copy_from_slice(&tag);

    URL_SAFE_NO_PAD.encode(buf)
}

/// Verifies `token` against `secret` at `now_ms`, returning the token's
/// identity string (lowercase hex of its first 16 bytes) on success.
///
/// Does not check for replay; callers that need single-use semantics
/// track the returned identity themselves (see the proxy server's
/// replay map).
pub fn verify(token: &str, secret: &[u8], now_ms: i64) -> Result<String, TokenError> {
    if token.len() != ENCODED_LEN {
        return Err(TokenError::Malformed);
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| TokenError::Malformed)?;
    if bytes.len() != TOKEN_BYTES {
        return Err(TokenError::Malformed);
    }

    let timestamp = i64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let delta = timestamp - now_ms;
    if delta.unsigned_abs() >= EXPIRY_WINDOW_MS as u64 {
        return Err(TokenError::Expired);
    }

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(&bytes[0..SIGNED_PREFIX]);
    mac.verify_slice(&bytes[SIGNED_PREFIX..TOKEN_BYTES])
        .map_err(|_| TokenError::BadSignature)?;

    Ok(identity(&bytes))
}

fn sign(secret: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

fn identity(bytes: &[u8]) -> String {
    bytes[0..SIGNED_PREFIX]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn round_trips() {
        let now = 1_700_000_000_000i64;
        let token = generate(SECRET, now);
        let id = verify(&token, SECRET, now).expect("fresh token must verify");
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(verify("short", SECRET, 0), Err(TokenError::Malformed));
    }

    #[test]
    fn rejects_timestamp_outside_window() {
        let now = 1_700_000_000_000i64;
        let token = generate(SECRET, now - 10_000);
        assert_eq!(verify(&token, SECRET, now), Err(TokenError::Expired));
    }

    #[test]
    fn accepts_timestamp_just_inside_window() {
        let now = 1_700_000_000_000i64;
        let token = generate(SECRET, now - 9_999);
        assert!(verify(&token, SECRET, now).is_ok());
    }

    #[test]
    fn rejects_single_bit_signature_flip() {
        let now = 1_700_000_000_000i64;
        let token = generate(SECRET, now);
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[20] ^= 0x01;
        let flipped = URL_SAFE_NO_PAD.encode(bytes);
        assert_eq!(verify(&flipped, SECRET, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = 1_700_000_000_000i64;
        let token = generate(SECRET, now);
        assert_eq!(
            verify(&token, b"different-secret", now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn identity_is_stable_for_same_token() {
        let now = 1_700_000_000_000i64;
        let token = generate(SECRET, now);
        let id1 = verify(&token, SECRET, now).unwrap();
        let id2 = verify(&token, SECRET, now).unwrap();
        assert_eq!(id1, id2);
    }
}
