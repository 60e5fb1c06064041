//! Password hashing and signed bearer tokens.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

pub const TOKEN_LIFETIME_DAYS: i64 = 7;

pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).context("Failed to hash password")
}

/// Constant-time check of `password` against a stored bcrypt hash. A
/// malformed hash never matches.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User email.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issues and checks HS256 tokens with a fixed seven-day lifetime.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(&self, email: &str, now: DateTime<Utc>) -> Result<String> {
        let expires = now + Duration::days(TOKEN_LIFETIME_DAYS);
        let claims = Claims {
            sub: email.to_string(),
            iat: u64::try_from(now.timestamp()).context("Token issued before 1970")?,
            exp: u64::try_from(expires.timestamp()).context("Token expiry before 1970")?,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign token")
    }

    /// Claims of a valid, unexpired token. Anything else yields `None`.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "rejected bearer token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("hunter22", 4).unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_token_round_trip() {
        let issuer = TokenIssuer::new(b"test-secret");
        let now = Utc::now();
        let token = issuer.issue("runner@example.com", now).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "runner@example.com");
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = TokenIssuer::new(b"test-secret");
        let issued = Utc::now() - Duration::days(8);
        let token = issuer.issue("runner@example.com", issued).unwrap();
        assert!(issuer.verify(&token).is_none());
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let token = TokenIssuer::new(b"secret-a")
            .issue("runner@example.com", Utc::now())
            .unwrap();
        assert!(TokenIssuer::new(b"secret-b").verify(&token).is_none());
    }

    #[test]
    fn test_tampered_and_malformed_tokens_rejected() {
        let issuer = TokenIssuer::new(b"test-secret");
        let token = issuer.issue("runner@example.com", Utc::now()).unwrap();
        let sig_start = token.rfind('.').unwrap() + 1;
        let replacement = if token[sig_start..].starts_with('A') { "B" } else { "A" };
        let mut tampered = token.clone();
        tampered.replace_range(sig_start..=sig_start, replacement);
        assert!(issuer.verify(&tampered).is_none());
        assert!(issuer.verify("not.a.token").is_none());
        assert!(issuer.verify("").is_none());
    }
}
