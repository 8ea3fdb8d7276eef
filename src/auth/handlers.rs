use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        cookie::session_header,
        dto::{
            ApiResponse, Empty, ForgotPasswordRequest, ResetPasswordRequest, SignInRequest,
            SignUpRequest, VerifyEmailRequest,
        },
        errors::AuthError,
        extractors::AuthSession,
        services::SessionInstruction,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/signout", post(sign_out))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", post(reset_password))
        .route("/auth/check-auth", get(check_auth))
}

fn session(
    state: &AppState,
    instruction: &SessionInstruction,
) -> Result<[(HeaderName, HeaderValue); 1], AuthError> {
    session_header(
        instruction,
        state.identity.keys().ttl(),
        state.config.production,
    )
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<Response, AuthError> {
    let input = payload.validate()?;
    let out = state.identity.sign_up(input).await?;
    let body = Json(ApiResponse::ok("User created successfully!", out.user));

    Ok(match out.session {
        Some(token) => (
            StatusCode::CREATED,
            session(&state, &SessionInstruction::Set(token))?,
            body,
        )
            .into_response(),
        None => (StatusCode::CREATED, body).into_response(),
    })
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Response, AuthError> {
    let code = payload.validate()?;
    let user = state.identity.verify_email(&code).await?;
    Ok(Json(ApiResponse::ok("Email verified successfully!", user)).into_response())
}

#[instrument(skip(state, payload))]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Response, AuthError> {
    let creds = payload.validate()?;
    let out = state.identity.sign_in(creds).await?;
    Ok((
        session(&state, &SessionInstruction::Set(out.session))?,
        Json(ApiResponse::ok("User logged in successfully!", out.user)),
    )
        .into_response())
}

#[instrument(skip(state))]
pub async fn sign_out(State(state): State<AppState>) -> Result<Response, AuthError> {
    let instruction = state.identity.sign_out();
    Ok((
        session(&state, &instruction)?,
        Json(ApiResponse::ok("User logged out successfully!", Empty::default())),
    )
        .into_response())
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Response, AuthError> {
    let email = payload.validate()?;
    state.identity.forgot_password(&email).await?;
    Ok(Json(ApiResponse::ok(
        "Password reset email sent successfully!",
        Empty::default(),
    ))
    .into_response())
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Response, AuthError> {
    let new_password = payload.validate()?;
    state.identity.reset_password(&token, new_password).await?;
    Ok(Json(ApiResponse::ok("Password reset successfully!", Empty::default())).into_response())
}

#[instrument(skip(state, claims))]
pub async fn check_auth(
    State(state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Result<Response, AuthError> {
    let user = state.identity.check_auth(&claims).await?;
    Ok(Json(ApiResponse::ok("User authenticated successfully!", user)).into_response())
}
