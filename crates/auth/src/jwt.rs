use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use thiserror::Error;

use creditgate_core::AccountId;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature mismatch")]
    InvalidSignature,

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Verifies a raw bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError>;
}

/// Shared-secret HS256 validator.
///
/// Registered `exp`/`iat` claims are not used; the time window is checked by
/// [`validate_claims`] against the RFC 3339 fields in [`JwtClaims`].
#[derive(Clone)]
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::Malformed(e.to_string()),
            }
        })?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

/// Mints tokens with the same secret (used by account provisioning).
#[derive(Clone)]
pub struct Hs256JwtIssuer {
    key: EncodingKey,
}

impl Hs256JwtIssuer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn issue(&self, sub: AccountId, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<String, JwtError> {
        let claims = JwtClaims::new(sub, now, ttl);
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| JwtError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn issued_tokens_validate() {
        let now = Utc::now();
        let sub = AccountId::new();
        let token = Hs256JwtIssuer::new("secret").issue(sub, now, Duration::minutes(10)).unwrap();

        let claims = Hs256JwtValidator::new("secret").validate(&token, now).unwrap();
        assert_eq!(claims.sub, sub);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let token = Hs256JwtIssuer::new("secret")
            .issue(AccountId::new(), now, Duration::minutes(10))
            .unwrap();

        assert_eq!(
            Hs256JwtValidator::new("other").validate(&token, now),
            Err(JwtError::InvalidSignature)
        );
    }

    #[test]
    fn expired_and_garbage_tokens_are_rejected() {
        let now = Utc::now();
        let token = Hs256JwtIssuer::new("secret")
            .issue(AccountId::new(), now, Duration::minutes(1))
            .unwrap();
        let validator = Hs256JwtValidator::new("secret");

        assert_eq!(
            validator.validate(&token, now + Duration::minutes(2)),
            Err(JwtError::Claims(TokenValidationError::Expired))
        );
        assert!(matches!(validator.validate("not-a-jwt", now), Err(JwtError::Malformed(_))));
    }
}
