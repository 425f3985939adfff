pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod router;
pub mod state;
pub mod ws_handler;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::require_session;
pub use rest::{dashboard_handler, progression_handler, unread_count_handler};
pub use router::build_router;
pub use ws_handler::ws_handler;
