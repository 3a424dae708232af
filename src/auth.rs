//! Bearer-token verification for the socket handshake.
//!
//! Tokens are issued by the external account service; this side only
//! verifies the HS256 signature and expiry and extracts the user id.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id as issued by the account service.
    pub sub: String,
    pub exp: usize,
}

/// Verify a bearer token and return the authenticated user id.
pub fn verify_token(token: &str, secret: &str) -> Result<i64, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ServiceError::NotAuthenticated)?;

    data.claims
        .sub
        .parse::<i64>()
        .map_err(|_| ServiceError::NotAuthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_token(sub: &str, secret: &str, lifetime_secs: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let claims = Claims {
            sub: sub.to_owned(),
            exp: (now + lifetime_secs).max(0) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_user_id() {
        let token = make_token("42", "secret", 3600);
        assert_eq!(verify_token(&token, "secret").unwrap(), 42);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = make_token("42", "secret", 3600);
        assert!(matches!(
            verify_token(&token, "other"),
            Err(ServiceError::NotAuthenticated)
        ));
    }

    #[test]
    fn non_numeric_subject_is_rejected() {
        let token = make_token("alice", "secret", 3600);
        assert!(matches!(
            verify_token(&token, "secret"),
            Err(ServiceError::NotAuthenticated)
        ));
    }
}
