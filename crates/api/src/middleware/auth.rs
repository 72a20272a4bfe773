//! Authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use solvergate_core::roles::ROLE_ADMIN;

use crate::error::AppError;
use crate::state::AppState;

/// Authenticated caller.
///
/// Extracted from a Bearer token in the `Authorization` header, or from the
/// `token` query parameter (browsers cannot set headers on WebSocket upgrades).
///
/// ```ignore
/// async fn my_handler(user: AuthUser) -> AppResult<Json<()>> {
///     tracing::info!(user = %user.user, role = %user.role, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// User name (from `claims.sub`).
    pub user: String,
    /// Role name (`"admin"`, `"user"`, `"read_only"`).
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

/// The bearer token of a request: the `Authorization` header wins over the
/// `token` query parameter.
pub fn request_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(query_token)
        .map(str::to_string)
}

fn query_token(parts: &Parts) -> Option<&str> {
    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = request_token(&parts.headers, query_token(parts));
        Ok(state.auth.authenticate(token.as_deref()).await?)
    }
}
