//! crates/edulab_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the hosted backend it talks to.

use crate::domain::{
    ChangeEvent, NewProfile, Profile, RecentExperiment, Resource, RowFilter, SessionIdentity,
};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// A row came back from the backend that violates the data model.
    #[error("Invalid row in {resource}: {reason}")]
    InvalidRow { resource: &'static str, reason: String },
    /// User input was rejected before reaching the backend.
    #[error("{0}")]
    Validation(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A live feed of change events for one subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = PortResult<ChangeEvent>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Resolves session tokens issued by the external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the identity behind `token`, or `None` when no session is active.
    async fn current_session(&self, token: &str) -> PortResult<Option<SessionIdentity>>;
}

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Profiles ---
    /// Fails with `PortError::NotFound` when no row exists for `user_id`.
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile>;

    /// Inserts `profile` unless a row with the same id already exists, then
    /// returns the stored row. Fails with `PortError::NotFound` if nothing
    /// could be read back.
    async fn upsert_profile(&self, profile: NewProfile) -> PortResult<Profile>;

    // --- Enrollments ---
    /// Most recently accessed first, at most `limit` entries.
    async fn recent_experiments(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> PortResult<Vec<RecentExperiment>>;

    // --- Notifications ---
    async fn unread_notification_count(&self, user_id: Uuid) -> PortResult<u64>;
}

#[async_trait]
pub trait ChangeFeedService: Send + Sync {
    /// Opens a subscription to row changes on `resource` matching `filter`.
    ///
    /// The subscription stays open until the returned stream is dropped.
    async fn subscribe(&self, resource: Resource, filter: RowFilter) -> PortResult<ChangeStream>;
}
