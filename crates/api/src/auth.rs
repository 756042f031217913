//! Caller identification for billing routes.
//!
//! Routes never reject requests for auth problems themselves. They pass
//! the (possibly absent) caller id down to the billing layer, which owns
//! the authorization decision and the error taxonomy.

use std::convert::Infallible;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Uuid,
    #[allow(dead_code)]
    exp: usize,
}

/// Verifies bearer tokens issued by the identity service.
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Returns the caller's user id, or None for a missing or bad token.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Some(data.claims.sub),
            Err(e) => {
                tracing::debug!(error = %e, "token verification failed");
                None
            }
        }
    }
}

/// Extractor yielding `Some(user_id)` for a valid bearer token and
/// `None` otherwise. Never rejects; unauthenticated callers are refused
/// by the billing layer with the proper error code.
pub struct MaybeCaller(pub Option<Uuid>);

impl<S> FromRequestParts<S> for MaybeCaller
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);

        let caller = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|token| app.jwt.verify(token));

        Ok(MaybeCaller(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: Uuid,
        exp: usize,
    }

    fn issue(secret: &str, sub: Uuid, exp: usize) -> String {
        encode(
            &Header::default(),
            &TestClaims { sub, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_caller_id() {
        let manager = JwtManager::new("test-secret");
        let user = Uuid::new_v4();
        let token = issue("test-secret", user, usize::MAX / 2);
        assert_eq!(manager.verify(&token), Some(user));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let manager = JwtManager::new("test-secret");
        let token = issue("other-secret", Uuid::new_v4(), usize::MAX / 2);
        assert_eq!(manager.verify(&token), None);
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = JwtManager::new("test-secret");
        let token = issue("test-secret", Uuid::new_v4(), 1_000);
        assert_eq!(manager.verify(&token), None);
    }

    #[test]
    fn garbage_token_is_rejected() {
        let manager = JwtManager::new("test-secret");
        assert_eq!(manager.verify("not-a-jwt"), None);
    }
}
