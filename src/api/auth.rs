use crate::api::AppState;
use crate::error::{DispatchError, DispatchResult};
use crate::models::user::Role;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Access token claims issued by the account service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require_role(&self, allowed: &[Role]) -> DispatchResult<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(DispatchError::Forbidden(format!(
                "Role '{}' is not allowed to perform this action",
                self.role
            )))
        }
    }
}

fn unauthorized(message: &str) -> DispatchError {
    DispatchError::Unauthorized(message.to_string())
}

pub fn decode_token(token: &str, secret: &str) -> DispatchResult<AuthUser> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
        debug!("Rejected access token: {}", e);
        unauthorized("Invalid or expired token")
    })?;
    let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| unauthorized("Invalid token subject"))?;

    Ok(AuthUser {
        user_id,
        role: data.claims.role,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = DispatchError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing authorization token"))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| unauthorized("Missing authorization token"))?;

        decode_token(token, &state.jwt_secret)
    }
}
