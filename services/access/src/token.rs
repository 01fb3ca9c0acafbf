//! Access token codec
//!
//! A token is `v<version>.<body>` where `body` is unpadded URL-safe base64 of
//! a 12 byte nonce followed by the AES-256-GCM ciphertext of a compact JSON
//! payload. The `v<version>` header names the key that sealed the token and
//! is bound as associated data, so it cannot be swapped without breaking
//! authentication.
//!
//! Decoding treats its input as hostile: every failure is a typed
//! [`DecodeError`], never a panic, and nothing from a token is trusted until
//! the tag verifies.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{keys::KeyMaterial, models::UserId, validation::validate_user_id};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// QR payloads are small; anything longer is not ours
pub const MAX_TOKEN_LEN: usize = 1024;

/// Payload carried inside an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub user_id: UserId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Unique per issuance; a granted scan consumes it
    pub nonce: Uuid,
}

impl AccessToken {
    /// Issue a fresh token for `user_id` valid for `validity` from `now`
    ///
    /// Timestamps are truncated to milliseconds, the precision of the wire
    /// format, so an issued token compares equal to its decoded form.
    pub fn issue(user_id: UserId, now: DateTime<Utc>, validity: TimeDelta) -> Self {
        let issued_at = now.trunc_subsecs(3);
        Self {
            user_id,
            issued_at,
            expires_at: issued_at + validity,
            nonce: Uuid::new_v4(),
        }
    }
}

/// Opaque string form of an [`AccessToken`]
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedToken(String);

impl EncodedToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for EncodedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncodedToken(..)")
    }
}

/// Failure to produce a token
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("payload violates token invariants: {0}")]
    InvalidPayload(&'static str),

    #[error("encryption failed")]
    Encryption,
}

/// Failure to open a token
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not shaped like a token, or authenticated content that makes no sense
    #[error("malformed token: {0}")]
    Malformed(&'static str),

    /// Wrong key, unknown key version, or tampered ciphertext
    #[error("token authentication failed")]
    AuthenticationFailed,
}

#[derive(Serialize, Deserialize)]
struct WirePayload {
    #[serde(rename = "u")]
    user_id: String,
    #[serde(rename = "i")]
    issued_at_ms: i64,
    #[serde(rename = "e")]
    expires_at_ms: i64,
    #[serde(rename = "n")]
    nonce: Uuid,
}

fn header_for(version: u32) -> String {
    format!("v{}", version)
}

fn split_token(token: &str) -> Result<(&str, u32, &str), DecodeError> {
    if token.len() > MAX_TOKEN_LEN {
        return Err(DecodeError::Malformed("token too long"));
    }

    let (header, body) = token
        .split_once('.')
        .ok_or(DecodeError::Malformed("missing version separator"))?;

    let digits = header
        .strip_prefix('v')
        .ok_or(DecodeError::Malformed("missing version tag"))?;

    // Canonical decimal only, so each version has exactly one header
    let canonical = !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'));
    if !canonical {
        return Err(DecodeError::Malformed("invalid version tag"));
    }

    let version = digits
        .parse::<u32>()
        .map_err(|_| DecodeError::Malformed("version out of range"))?;

    Ok((header, version, body))
}

/// Read the key version a token claims without authenticating it
///
/// Used only to pick a key; the header is authenticated during [`decode`].
pub fn peek_version(token: &str) -> Result<u32, DecodeError> {
    split_token(token).map(|(_, version, _)| version)
}

/// Seal `payload` under `key`
pub fn encode(payload: &AccessToken, key: &KeyMaterial) -> Result<EncodedToken, EncodeError> {
    if payload.expires_at <= payload.issued_at {
        return Err(EncodeError::InvalidPayload("expiry must follow issuance"));
    }

    let wire = WirePayload {
        user_id: payload.user_id.as_str().to_string(),
        issued_at_ms: payload.issued_at.timestamp_millis(),
        expires_at_ms: payload.expires_at.timestamp_millis(),
        nonce: payload.nonce,
    };
    let plaintext = serde_json::to_vec(&wire)?;

    let header = header_for(key.version());
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &plaintext,
                aad: header.as_bytes(),
            },
        )
        .map_err(|_| EncodeError::Encryption)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);

    Ok(EncodedToken(format!(
        "{}.{}",
        header,
        URL_SAFE_NO_PAD.encode(sealed)
    )))
}

/// Open a token sealed under `key`
pub fn decode(token: &str, key: &KeyMaterial) -> Result<AccessToken, DecodeError> {
    let (header, version, body) = split_token(token)?;
    if version != key.version() {
        return Err(DecodeError::AuthenticationFailed);
    }

    let sealed = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| DecodeError::Malformed("body is not base64url"))?;
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(DecodeError::Malformed("body too short"));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: header.as_bytes(),
            },
        )
        .map_err(|_| DecodeError::AuthenticationFailed)?;

    let wire: WirePayload = serde_json::from_slice(&plaintext)
        .map_err(|_| DecodeError::Malformed("payload is not valid JSON"))?;

    validate_user_id(&wire.user_id).map_err(|_| DecodeError::Malformed("invalid user id"))?;
    let issued_at = DateTime::from_timestamp_millis(wire.issued_at_ms)
        .ok_or(DecodeError::Malformed("issuance time out of range"))?;
    let expires_at = DateTime::from_timestamp_millis(wire.expires_at_ms)
        .ok_or(DecodeError::Malformed("expiry time out of range"))?;
    if expires_at <= issued_at {
        return Err(DecodeError::Malformed("expiry does not follow issuance"));
    }

    Ok(AccessToken {
        user_id: UserId::from_trusted(wire.user_id),
        issued_at,
        expires_at,
        nonce: wire.nonce,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LEN;

    fn key(version: u32, fill: u8) -> KeyMaterial {
        KeyMaterial::new(version, [fill; KEY_LEN])
    }

    fn sample(user: &str) -> AccessToken {
        AccessToken::issue(
            UserId::parse(user).unwrap(),
            Utc::now(),
            TimeDelta::minutes(5),
        )
    }

    #[test]
    fn test_round_trip() {
        let key = key(1, 42);
        for user in ["U1", "a", "kX9_qP2-77", &"z".repeat(128)] {
            let payload = sample(user);
            let token = encode(&payload, &key).unwrap();
            assert_eq!(decode(token.as_str(), &key), Ok(payload));
        }
    }

    #[test]
    fn test_token_carries_version_tag() {
        let token = encode(&sample("U1"), &key(17, 1)).unwrap();
        assert!(token.as_str().starts_with("v17."));
        assert_eq!(peek_version(token.as_str()), Ok(17));
    }

    #[test]
    fn test_each_issuance_is_unique() {
        let key = key(1, 42);
        let payload = sample("U1");
        let first = encode(&payload, &key).unwrap();
        let second = encode(&payload, &key).unwrap();
        assert_ne!(first, second);
        assert_ne!(sample("U1").nonce, payload.nonce);
    }

    #[test]
    fn test_single_byte_flip_is_rejected() {
        let key = key(1, 42);
        let token = encode(&sample("U1"), &key).unwrap().into_string();

        for index in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[index] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();
            assert!(
                decode(&tampered, &key).is_err(),
                "flip at byte {} was accepted",
                index
            );
        }
    }

    #[test]
    fn test_truncation_is_rejected() {
        let key = key(1, 42);
        let token = encode(&sample("U1"), &key).unwrap().into_string();
        for len in 0..token.len() {
            assert!(decode(&token[..len], &key).is_err());
        }
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let token = encode(&sample("U1"), &key(1, 42)).unwrap();
        assert_eq!(
            decode(token.as_str(), &key(1, 43)),
            Err(DecodeError::AuthenticationFailed)
        );
        assert_eq!(
            decode(token.as_str(), &key(2, 42)),
            Err(DecodeError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_header_swap_fails_authentication() {
        let sealed_v1 = encode(&sample("U1"), &key(1, 42)).unwrap().into_string();
        let body = sealed_v1.split_once('.').unwrap().1;
        let forged = format!("v2.{}", body);
        assert_eq!(
            decode(&forged, &key(2, 42)),
            Err(DecodeError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        let key = key(1, 42);
        for input in [
            "",
            "v1",
            "1.abc",
            "v.abc",
            "v01.abc",
            "v+1.abc",
            "v99999999999.abc",
            "v1.!!!",
            "v1.AAAA",
            "https://library.example/checkin",
        ] {
            assert!(
                matches!(decode(input, &key), Err(DecodeError::Malformed(_))),
                "{:?} was not reported as malformed",
                input
            );
        }
        assert!(matches!(
            decode(&"v1.".repeat(400), &key),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_rejects_non_increasing_expiry() {
        let mut payload = sample("U1");
        payload.expires_at = payload.issued_at;
        assert!(matches!(
            encode(&payload, &key(1, 1)),
            Err(EncodeError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = encode(&sample("U1"), &key(1, 1)).unwrap();
        assert_eq!(format!("{:?}", token), "EncodedToken(..)");
    }
}
