//! services/api/src/web/middleware.rs
//!
//! Session gate for protected routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use edulab_core::shell::ShellOutcome;
use std::sync::Arc;
use tracing::debug;

use crate::web::state::AppState;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Middleware that resolves the session and loads the viewer's profile.
///
/// On success the `SessionContext` is inserted into the request extensions for
/// handlers to use. Otherwise the client is redirected to the login route.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = session_token(req.headers());

    match state.shell.load_profile(token.as_deref()).await {
        ShellOutcome::Authenticated(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        ShellOutcome::Unauthenticated => {
            debug!("Redirecting unauthenticated request for {}", req.uri().path());
            Redirect::to(&state.config.login_path).into_response()
        }
    }
}

/// Reads the session token from the `session` cookie, falling back to a
/// bearer `Authorization` header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            c.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
