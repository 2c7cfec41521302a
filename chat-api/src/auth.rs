use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_core::{ChatContext, Identity, Role};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing;

/// Identity substituted when a presented token fails verification.
pub const DEMO_USER_ID: &str = "demo-user";
pub const DEMO_USER_NAME: &str = "Demo User";

/// JWT Claims structure. Issuers put the user id under either `id` or `userId`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Too many connections")]
    TooManyConnections,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingToken | AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AuthError::TooManyConnections => StatusCode::TOO_MANY_REQUESTS,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn demo_identity() -> Identity {
    Identity {
        user_id: DEMO_USER_ID.to_string(),
        role: Role::Buyer,
        name: DEMO_USER_NAME.to_string(),
    }
}

/// Extract JWT token from Authorization header
fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The handshake credential: the `token` query parameter wins over the header.
pub fn credential(query_token: Option<&str>, auth_header: Option<&str>) -> Option<String> {
    query_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| extract_token(auth_header))
}

/// Generate JWT token for an identity
pub fn generate_token(
    identity: &Identity,
    secret: &str,
    expires_in_days: u64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default() as usize;

    let claims = Claims {
        id: Some(Value::String(identity.user_id.clone())),
        user_id: None,
        role: Some(identity.role.to_string()),
        name: Some(identity.name.clone()),
        exp: Some(now + (expires_in_days * 24 * 60 * 60) as usize),
    };

    let encoding_key = EncodingKey::from_secret(secret.as_ref());
    encode(&Header::default(), &claims, &encoding_key)
}

/// Verify JWT token and decode the identity it carries
pub fn verify_token(token: &str, secret: &str) -> Result<Identity, AuthError> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());
    let mut validation = Validation::new(Algorithm::HS256);
    // `exp` is honoured when present but not required.
    validation.required_spec_claims.clear();

    let claims = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?
        .claims;

    let user_id = claims
        .id
        .as_ref()
        .or(claims.user_id.as_ref())
        .and_then(claim_to_string)
        .ok_or_else(|| AuthError::InvalidToken("token carries no user id".to_string()))?;

    let role = match claims.role.as_deref() {
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::debug!("Defaulting role for {}: {}", user_id, e);
            Role::default()
        }),
        None => Role::default(),
    };

    let name = claims
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("User {}", user_id));

    Ok(Identity { user_id, role, name })
}

fn claim_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Connection handshake.
///
/// A missing credential is refused. A credential that fails verification is
/// NOT refused: the caller is admitted as the demo identity. Production
/// deployments holding real data must turn that fallback into a rejection.
pub fn authenticate(
    ctx: &ChatContext,
    query_token: Option<&str>,
    auth_header: Option<&str>,
) -> Result<Identity, AuthError> {
    let token = credential(query_token, auth_header).ok_or(AuthError::MissingToken)?;

    let identity = match verify_token(&token, &ctx.config.server.jwt_secret) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("Token verification failed, using demo identity: {}", e);
            demo_identity()
        }
    };

    if !ctx.state().registry.has_capacity(&identity.user_id) {
        tracing::warn!(user_id = %identity.user_id, "Connection cap reached");
        return Err(AuthError::TooManyConnections);
    }

    Ok(identity)
}
