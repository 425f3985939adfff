//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::{DbAdapter, LocalIdentityStore, MemoryBackend, PgChangeFeed};
use crate::config::Config;
use edulab_core::ports::DatabaseService;
use edulab_core::shell::SessionShell;
use sqlx::PgPool;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub shell: SessionShell,
    pub config: Arc<Config>,
    /// Present only when running against the in-process backend.
    pub local: Option<LocalMode>,
}

/// The pieces the local-mode auth endpoints need.
#[derive(Clone)]
pub struct LocalMode {
    pub identity: Arc<LocalIdentityStore>,
    pub backend: Arc<MemoryBackend>,
}

impl AppState {
    /// State backed by the hosted Postgres database and its shared listener.
    pub fn postgres(pool: PgPool, feed: PgChangeFeed, config: Arc<Config>) -> Self {
        let db = Arc::new(DbAdapter::new(pool));
        let feed = Arc::new(feed);
        Self {
            shell: SessionShell::new(db.clone(), db.clone(), feed),
            db,
            config,
            local: None,
        }
    }

    /// State backed by in-process tables and the file-backed mock identity.
    pub fn local(
        identity: Arc<LocalIdentityStore>,
        backend: Arc<MemoryBackend>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            shell: SessionShell::new(identity.clone(), backend.clone(), backend.clone()),
            db: backend.clone(),
            config,
            local: Some(LocalMode { identity, backend }),
        }
    }
}
