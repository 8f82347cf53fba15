use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing;

use crate::state::ApiState;

/// Reachable without a token.
const PUBLIC_PATHS: &[&str] = &["/health"];

/// Operator-only routes, e.g. historical imports.
const OPERATOR_PREFIX: &str = "/api/v1/admin/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    /// Storefront and fulfilment services.
    #[default]
    Service,
    /// Staff running migrations and imports.
    Operator,
}

/// `sub` names the calling service or operator.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: CallerRole,
    pub iat: i64,
    pub exp: i64,
}

/// Who made the request. Set by [`auth_middleware`] on every authenticated route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    pub subject: String,
    pub role: CallerRole,
}

fn extract_token(auth_header: Option<&str>) -> Option<&str> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Issues a token for `subject` valid for `ttl`.
pub fn generate_token(
    subject: &str,
    role: CallerRole,
    secret: &str,
    ttl: Duration,
) -> Result<String, StatusCode> {
    let now = Utc::now();
    let claims = Claims {
        sub: subject.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref())).map_err(|e| {
        tracing::error!("Failed to sign caller token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<AuthenticatedCaller, StatusCode> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());

    match decode::<Claims>(token, &decoding_key, &Validation::default()) {
        Ok(data) => Ok(AuthenticatedCaller {
            subject: data.claims.sub,
            role: data.claims.role,
        }),
        Err(e) => {
            tracing::debug!("Caller token rejected: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Requires a bearer token outside [`PUBLIC_PATHS`] and the operator role
/// under the admin prefix.
pub async fn auth_middleware(
    mut req: Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if PUBLIC_PATHS.contains(&path) {
        return Ok(next.run(req).await);
    }
    let operator_only = path.starts_with(OPERATOR_PREFIX);

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    let Some(token) = extract_token(auth_header) else {
        tracing::debug!("Missing bearer token for {}", path);
        return Err(StatusCode::UNAUTHORIZED);
    };

    let state = req
        .extensions()
        .get::<Arc<ApiState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let caller = verify_token(token, &state.jwt_secret)?;
    if operator_only && caller.role != CallerRole::Operator {
        tracing::warn!("{} denied operator route {}", caller.subject, path);
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
