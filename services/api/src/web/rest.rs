//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::auth::{AuthResponse, LoginRequest, RegisterRequest};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use edulab_core::domain::{Profile, SessionContext};
use edulab_core::ports::PortResult;
use edulab_core::presentation::DashboardState;
use edulab_core::progression::Progression;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        dashboard_handler,
        unread_count_handler,
        progression_handler,
        crate::web::auth::register_handler,
        crate::web::auth::login_handler,
        crate::web::auth::google_login_handler,
        crate::web::auth::logout_handler,
    ),
    components(
        schemas(
            ProgressionResponse,
            UnreadCountResponse,
            AuthResponse,
            LoginRequest,
            RegisterRequest
        )
    ),
    tags(
        (name = "EduLab API", description = "Student dashboard, progression and realtime updates.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ProgressionResponse {
    pub xp: u32,
    pub level: u32,
    pub xp_in_level: u32,
    pub xp_percent: u8,
    pub xp_to_next: u32,
    pub badge: String,
    pub badge_label_vi: String,
}

impl From<Progression> for ProgressionResponse {
    fn from(p: Progression) -> Self {
        Self {
            xp: p.xp,
            level: p.level,
            xp_in_level: p.xp_in_level,
            xp_percent: p.xp_percent,
            xp_to_next: p.xp_to_next,
            badge: p.badge.label().to_string(),
            badge_label_vi: p.badge.label_vi().to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct UnreadCountResponse {
    pub unread: u64,
}

//=========================================================================================
// Dashboard Loading
//=========================================================================================

/// Fetches everything the dashboard shows besides the profile.
///
/// A failed fetch renders as an empty widget rather than failing the page.
pub async fn load_dashboard(app_state: &AppState, profile: Profile) -> DashboardState {
    let user_id = profile.id;
    let recent = app_state
        .db
        .recent_experiments(user_id, app_state.config.recent_experiments_limit)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to load recent experiments for {}: {:?}", user_id, e);
            Vec::new()
        });
    let unread = app_state
        .db
        .unread_notification_count(user_id)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to count notifications for {}: {:?}", user_id, e);
            0
        });
    DashboardState::new(profile, recent, unread)
}

/// Like `load_dashboard`, but re-reads the profile first.
pub async fn reload_dashboard(app_state: &AppState, user_id: Uuid) -> PortResult<DashboardState> {
    let profile = app_state.db.get_profile(user_id).await?;
    Ok(load_dashboard(app_state, profile).await)
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// The signed-in student's dashboard.
///
/// Requires a session cookie; unauthenticated requests are redirected to the
/// login route.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Dashboard view model"),
        (status = 303, description = "No session, redirected to login")
    )
)]
pub async fn dashboard_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> impl IntoResponse {
    let dashboard = load_dashboard(&app_state, ctx.profile).await;
    Json(dashboard.view(Utc::now()))
}

#[utoipa::path(
    get,
    path = "/notifications/unread-count",
    responses(
        (status = 200, description = "Unread notification count", body = UnreadCountResponse),
        (status = 303, description = "No session, redirected to login"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn unread_count_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let unread = app_state
        .db
        .unread_notification_count(ctx.profile.id)
        .await
        .map_err(|e| {
            error!("Failed to count notifications: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to count notifications".to_string(),
            )
        })?;
    Ok(Json(UnreadCountResponse { unread }))
}

/// Level, in-level progress and badge for a cumulative XP value.
#[utoipa::path(
    get,
    path = "/progression/{xp}",
    params(
        ("xp" = u32, Path, description = "Cumulative experience points.")
    ),
    responses(
        (status = 200, description = "Derived progression", body = ProgressionResponse),
        (status = 400, description = "XP is not a non-negative integer")
    )
)]
pub async fn progression_handler(Path(xp): Path<u32>) -> Json<ProgressionResponse> {
    Json(Progression::from_xp(xp).into())
}

pub async fn health_handler() -> &'static str {
    "ok"
}
