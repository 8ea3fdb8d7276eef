use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue};

use crate::auth::{errors::AuthError, services::SessionInstruction};

pub const SESSION_COOKIE: &str = "Authorization";

/// `Set-Cookie` value carrying (or clearing) the bearer session.
pub fn session_cookie(
    instruction: &SessionInstruction,
    max_age: Duration,
    production: bool,
) -> String {
    let (value, max_age) = match instruction {
        SessionInstruction::Set(token) => (format!("Bearer%20{token}"), max_age.as_secs()),
        SessionInstruction::Clear => (String::new(), 0),
    };
    let mut cookie =
        format!("{SESSION_COOKIE}={value}; Path=/; Max-Age={max_age}; SameSite=Strict");
    if production {
        cookie.push_str("; HttpOnly; Secure");
    }
    cookie
}

pub fn session_header(
    instruction: &SessionInstruction,
    max_age: Duration,
    production: bool,
) -> Result<[(HeaderName, HeaderValue); 1], AuthError> {
    let value = HeaderValue::from_str(&session_cookie(instruction, max_age, production))
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("invalid cookie header: {e}")))?;
    Ok([(header::SET_COOKIE, value)])
}

/// Bearer token from a `Cookie` header, if the session cookie is present.
pub fn token_from_cookie_header(cookies: &str) -> Option<&str> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| strip_bearer(value))
}

pub fn strip_bearer(value: &str) -> Option<&str> {
    value
        .strip_prefix("Bearer%20")
        .or_else(|| value.strip_prefix("Bearer "))
        .or_else(|| value.strip_prefix("bearer "))
        .filter(|t| !t.is_empty())
}
