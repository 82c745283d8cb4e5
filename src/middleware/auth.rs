//! The three ways a caller proves who it is: a session JWT from the identity
//! provider (paying users), the internal service token, and the admin key.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::signature::{tokens_match, INTERNAL_TOKEN_HEADER};
use crate::AppState;

/// Session token claims issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Authenticated paying user. Extracting it verifies the bearer JWT's
/// HS256 signature and expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser(pub String);

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let secret = state
            .config
            .secrets
            .session_jwt_secret
            .as_deref()
            .ok_or_else(|| AppError::Misconfigured("session secret is not configured".to_string()))?;

        let token = bearer(parts).ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "session token rejected");
            AppError::Unauthorized("invalid session token".to_string())
        })?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(AppError::Unauthorized("invalid session token".to_string()));
        }

        Ok(SessionUser(token_data.claims.sub))
    }
}

/// Guards service-to-service routes with the `x-internal-token` header.
pub async fn internal_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());

    state.verifier.verify_internal_token(presented)?;
    Ok(next.run(req).await)
}

/// Guards admin routes with `Authorization: Bearer <ADMIN_API_KEY>`.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let admin_api_key = state
        .config
        .secrets
        .admin_api_key
        .as_deref()
        .ok_or_else(|| AppError::Misconfigured("admin key is not configured".to_string()))?;

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match auth_header {
        Some(presented) if tokens_match(admin_api_key, presented) => Ok(next.run(req).await),
        _ => Err(AppError::Unauthorized("invalid admin credentials".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/coins");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer(&parts_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer(&parts_with(None)), None);
    }

    #[test]
    fn test_claims_round_trip_through_hs256() {
        let claims = Claims {
            sub: "user-1".to_string(),
            exp: (chrono::Utc::now().timestamp() + 60) as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"k")).unwrap();

        let decoded = decode::<Claims>(&token, &DecodingKey::from_secret(b"k"), &Validation::new(Algorithm::HS256));
        assert_eq!(decoded.unwrap().claims.sub, "user-1");

        let forged = decode::<Claims>(&token, &DecodingKey::from_secret(b"other"), &Validation::new(Algorithm::HS256));
        assert!(forged.is_err());
    }
}
