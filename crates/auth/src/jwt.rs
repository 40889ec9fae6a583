//! Bearer token validation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Validates an encoded token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 validator over a shared secret.
///
/// Expiry is checked against the `issued_at`/`expires_at` claims rather than
/// the registered `exp` claim.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};
    use shopdesk_core::UserId;

    use crate::Role;

    fn mint(secret: &str, issued_at: DateTime<Utc>) -> String {
        let claims = JwtClaims {
            sub: UserId::new(),
            roles: vec![Role::CASHIER],
            issued_at,
            expires_at: issued_at + Duration::minutes(10),
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn round_trips_claims_signed_with_the_same_secret() {
        let v = Hs256JwtValidator::new("s3cret");
        let claims = v.validate(&mint("s3cret", Utc::now()), Utc::now()).unwrap();
        assert_eq!(claims.roles, vec![Role::CASHIER]);
    }

    #[test]
    fn rejects_foreign_signature() {
        let v = Hs256JwtValidator::new("s3cret");
        let err = v.validate(&mint("other", Utc::now()), Utc::now()).unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[test]
    fn rejects_expired_token() {
        let v = Hs256JwtValidator::new("s3cret");
        let token = mint("s3cret", Utc::now() - Duration::hours(1));
        assert_eq!(v.validate(&token, Utc::now()), Err(TokenValidationError::Expired));
    }
}
