//! services/api/src/web/auth.rs
//!
//! Sign-in endpoints for the local mode. In production the hosted identity
//! provider owns sign-in and these routes answer 501.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use edulab_core::domain::Role;
use edulab_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::adapters::local_identity::{LocalSession, Registration};
use crate::web::middleware::SESSION_COOKIE;
use crate::web::state::{AppState, LocalMode};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// One of `student`, `teacher`, `admin`. Defaults to `student`.
    #[schema(value_type = Option<String>)]
    pub role: Option<Role>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    #[schema(value_type = String)]
    pub role: Role,
}

type HandlerError = (StatusCode, String);

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/register - Create a local account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Invalid request"),
        (status = 501, description = "Sign-in is handled by the identity provider")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let local = local_mode(&state)?;
    let session = local
        .identity
        .register(Registration {
            name: req.name,
            email: req.email,
            password: req.password,
            role: req.role.unwrap_or_default(),
        })
        .await
        .map_err(|e| port_failure("register", e))?;

    signed_in(local, session, StatusCode::CREATED).await
}

/// POST /auth/login - Sign in locally; any credentials are accepted
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Missing email or password"),
        (status = 501, description = "Sign-in is handled by the identity provider")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let local = local_mode(&state)?;
    let session = local
        .identity
        .login(&req.email, &req.password)
        .await
        .map_err(|e| port_failure("login", e))?;

    signed_in(local, session, StatusCode::OK).await
}

/// POST /auth/google - Mock Google sign-in as the demo student
#[utoipa::path(
    post,
    path = "/auth/google",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 501, description = "Sign-in is handled by the identity provider")
    )
)]
pub async fn google_login_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HandlerError> {
    let local = local_mode(&state)?;
    let session = local
        .identity
        .google_sign_in()
        .await
        .map_err(|e| port_failure("sign in with Google", e))?;

    signed_in(local, session, StatusCode::OK).await
}

/// POST /auth/logout - Sign out and clear the session cookie
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 501, description = "Sign-in is handled by the identity provider")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HandlerError> {
    let local = local_mode(&state)?;
    local
        .identity
        .logout()
        .await
        .map_err(|e| port_failure("logout", e))?;

    let cookie = format!(
        "{}=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0",
        SESSION_COOKIE
    );
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]))
}

//=========================================================================================
// Helpers
//=========================================================================================

fn local_mode(state: &AppState) -> Result<&LocalMode, HandlerError> {
    state.local.as_ref().ok_or((
        StatusCode::NOT_IMPLEMENTED,
        "Sign-in is handled by the identity provider".to_string(),
    ))
}

fn port_failure(action: &str, e: PortError) -> HandlerError {
    match e {
        PortError::Validation(message) => (StatusCode::BAD_REQUEST, message),
        other => {
            error!("Local {} failed: {:?}", action, other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to {}", action),
            )
        }
    }
}

async fn signed_in(
    local: &LocalMode,
    session: LocalSession,
    status: StatusCode,
) -> Result<impl IntoResponse, HandlerError> {
    // A fresh local account starts with the demo enrollments.
    local
        .backend
        .seed_demo_progress(session.identity.user_id, Utc::now())
        .await
        .map_err(|e| port_failure("seed demo progress", e))?;

    let max_age = Duration::days(30).num_seconds();
    let cookie = format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, session.token, max_age
    );
    let response = AuthResponse {
        user_id: session.identity.user_id,
        name: session.user.name,
        email: session.user.email,
        role: session.user.role,
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(response)))
}
