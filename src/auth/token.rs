//! Signed, expiring tokens.
//!
//! Wire form: `base64url(claims_json).base64url(hmac_sha256(claims_json))`,
//! unpadded. Claims carry the user id, a purpose, and an absolute expiry in
//! Unix seconds. The same signer issues password-reset links and session
//! cookies; the purpose keeps one from being replayed as the other.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use ring::hmac;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    PasswordReset,
    Session,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token was issued for another purpose")]
    WrongPurpose,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    purpose: TokenPurpose,
    exp: u64,
}

pub struct TokenSigner {
    key: hmac::Key,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn sign(&self, user_id: i64, purpose: TokenPurpose, ttl: Duration) -> String {
        self.sign_at(user_id, purpose, ttl, unix_now())
    }

    pub fn sign_at(&self, user_id: i64, purpose: TokenPurpose, ttl: Duration, now: u64) -> String {
        let claims = Claims {
            sub: user_id,
            purpose,
            exp: now.saturating_add(ttl.as_secs()),
        };
        // Serializing a struct of integers and a unit enum cannot fail.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let tag = hmac::sign(&self.key, &payload);
        format!("{}.{}", B64.encode(&payload), B64.encode(tag.as_ref()))
    }

    /// Resolve `token` to the user id it was issued for.
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<i64, TokenError> {
        self.verify_at(token, purpose, unix_now())
    }

    pub fn verify_at(&self, token: &str, purpose: TokenPurpose, now: u64) -> Result<i64, TokenError> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let payload = B64.decode(payload_b64).map_err(|_| TokenError::Malformed)?;
        let sig = B64.decode(sig_b64).map_err(|_| TokenError::Malformed)?;
        hmac::verify(&self.key, &payload, &sig).map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if claims.purpose != purpose {
            return Err(TokenError::WrongPurpose);
        }
        if now > claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims.sub)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenSigner(..)")
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
