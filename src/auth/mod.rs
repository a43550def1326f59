//! Authentication — single shared admin credential and stateless
//! HMAC-signed session tokens carried in a cookie.
//!
//! The credential store is one username + SHA-256(salt + password) hash.
//! There is deliberately no per-user salt or KDF iteration count: this
//! guards one shared admin login on a LAN box, not tenant accounts.
//! Tokens are `base64url(claims).base64url(hmac)` with a 24 hour expiry,
//! signed with a per-install secret generated on first start.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

/// Admin credential file.
pub const CREDENTIALS_FILE: &str = "/etc/darkflows/admin.json";
/// Per-install token signing secret (hex).
pub const SECRET_FILE: &str = "/etc/darkflows/session_secret";
/// Session cookie name.
pub const SESSION_COOKIE: &str = "darkflows_session";
/// Session lifetime: 24 hours.
pub const SESSION_LIFETIME_SECS: i64 = 24 * 3600;

/// Server-side salt mixed into every password hash. Static across
/// installs; the per-install session secret is what varies.
const PASSWORD_SALT: &str = "darkflows:credential:v1";

type HmacSha256 = Hmac<Sha256>;

/// The one admin login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password_hash: String,
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(PASSWORD_SALT.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Load the stored credential; `Ok(None)` before first-run setup.
pub fn load_credentials() -> Result<Option<Credentials>, String> {
    let text = match std::fs::read_to_string(CREDENTIALS_FILE) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("cannot read {}: {}", CREDENTIALS_FILE, e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| format!("cannot parse {}: {}", CREDENTIALS_FILE, e))
}

pub fn save_credentials(creds: &Credentials) -> Result<(), String> {
    let _ = std::fs::create_dir_all("/etc/darkflows");
    let text = serde_json::to_string_pretty(creds)
        .map_err(|e| format!("cannot serialize credentials: {}", e))?;
    crate::fslock::write_atomic(CREDENTIALS_FILE, &text)?;
    info!("admin credentials written to {}", CREDENTIALS_FILE);
    Ok(())
}

pub fn verify_login(creds: &Credentials, username: &str, password: &str) -> bool {
    if username.is_empty() || password.is_empty() {
        return false;
    }
    creds.username == username && constant_time_eq(&hash_password(password), &creds.password_hash)
}

/// Load the signing secret, generating one on first start.
pub fn load_or_create_secret() -> Result<Vec<u8>, String> {
    match std::fs::read_to_string(SECRET_FILE) {
        Ok(text) => hex::decode(text.trim())
            .map_err(|e| format!("corrupt session secret in {}: {}", SECRET_FILE, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let secret: [u8; 32] = rand::random();
            let _ = std::fs::create_dir_all("/etc/darkflows");
            crate::fslock::write_atomic(SECRET_FILE, &hex::encode(secret))?;
            info!("generated new session secret at {}", SECRET_FILE);
            Ok(secret.to_vec())
        }
        Err(e) => Err(format!("cannot read {}: {}", SECRET_FILE, e)),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    jti: String,
}

fn sign(secret: &[u8], payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Issue a signed session token for `username`, expiring 24h after `now`.
pub fn issue_token(secret: &[u8], username: &str, now: i64) -> String {
    let claims = Claims {
        sub: username.to_string(),
        exp: now + SESSION_LIFETIME_SECS,
        jti: uuid::Uuid::new_v4().to_string(),
    };
    let payload =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
    let sig = sign(secret, &payload);
    format!("{}.{}", payload, sig)
}

/// Verify signature and expiry; returns the username on success.
pub fn verify_token(secret: &[u8], token: &str, now: i64) -> Option<String> {
    let (payload, sig) = token.split_once('.')?;
    if !constant_time_eq(sig, &sign(secret, payload)) {
        return None;
    }
    let claims: Claims =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;
    if claims.exp <= now {
        return None;
    }
    Some(claims.sub)
}

/// Constant-time comparison to keep signature checks timing-neutral.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_deterministic_and_distinct() {
        assert_eq!(hash_password("hunter2"), hash_password("hunter2"));
        assert_ne!(hash_password("hunter2"), hash_password("hunter3"));
        assert_eq!(hash_password("hunter2").len(), 64);
    }

    #[test]
    fn login_verification() {
        let creds = Credentials {
            username: "admin".into(),
            password_hash: hash_password("hunter2"),
        };
        assert!(verify_login(&creds, "admin", "hunter2"));
        assert!(!verify_login(&creds, "admin", "wrong"));
        assert!(!verify_login(&creds, "root", "hunter2"));
        assert!(!verify_login(&creds, "admin", ""));
    }

    #[test]
    fn token_round_trip() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_token(secret, "admin", 1_000_000);
        assert_eq!(
            verify_token(secret, &token, 1_000_000 + 60).as_deref(),
            Some("admin")
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_token(secret, "admin", 1_000_000);
        assert!(verify_token(secret, &token, 1_000_000 + SESSION_LIFETIME_SECS).is_none());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_token(secret, "admin", 1_000_000);
        let (payload, sig) = token.split_once('.').unwrap();

        // forged payload, original signature
        let other = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: "root".into(),
                exp: i64::MAX,
                jti: "x".into(),
            })
            .unwrap(),
        );
        assert!(verify_token(secret, &format!("{}.{}", other, sig), 1_000_000).is_none());

        // original payload, broken signature
        assert!(verify_token(secret, &format!("{}.{}", payload, "AAAA"), 1_000_000).is_none());

        // wrong secret
        assert!(verify_token(b"another-secret-another-secret!!!", &token, 1_000_000).is_none());

        // not even token shaped
        assert!(verify_token(secret, "garbage", 1_000_000).is_none());
    }
}
