use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::warn;

use super::{
    cookie::{strip_bearer, token_from_cookie_header},
    errors::AuthError,
    tokens::SessionClaims,
};
use crate::state::AppState;

/// Verified session claims, taken from `Authorization: Bearer` or the
/// session cookie.
pub struct AuthSession(pub SessionClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(strip_bearer);
        let from_cookie = || {
            parts
                .headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|h| h.to_str().ok())
                .find_map(token_from_cookie_header)
        };

        let Some(token) = from_header.or_else(from_cookie) else {
            warn!("missing session credential");
            return Err(AuthError::InvalidSession);
        };

        let claims = state.identity.authenticate(token).map_err(|e| {
            warn!("invalid or expired session token");
            e
        })?;
        Ok(AuthSession(claims))
    }
}
