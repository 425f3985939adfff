//! services/api/src/web/router.rs
//!
//! Assembles the HTTP application. The binary and the integration tests build
//! the same router.

use crate::error::ApiError;
use crate::web::{
    auth::{google_login_handler, login_handler, logout_handler, register_handler},
    middleware::require_session,
    rest::{dashboard_handler, health_handler, progression_handler, unread_count_handler, ApiDoc},
    state::AppState,
    ws_handler::ws_handler,
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn build_router(app_state: Arc<AppState>) -> Result<Router, ApiError> {
    let origin = app_state
        .config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| {
            ApiError::Internal(format!(
                "Invalid CORS origin '{}': {}",
                app_state.config.cors_origin, e
            ))
        })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/progression/{xp}", get(progression_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/google", post(google_login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (session required)
    let protected_routes = Router::new()
        .route("/dashboard", get(dashboard_handler))
        .route("/notifications/unread-count", get(unread_count_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_session,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    Ok(Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())))
}
