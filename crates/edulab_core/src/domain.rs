//! crates/edulab_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or storage backend; adapters
//! validate raw rows into these types at the fetch boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The role a user registered with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Per-user progression state, keyed by the identity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub xp: u32,
    pub streak: u32,
    /// Denormalized cache of the level. Recompute from `xp` before display.
    pub level: u32,
    pub last_active_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The values written when a profile is provisioned on first login.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub xp: u32,
    pub streak: u32,
    pub level: u32,
}

/// A catalog experiment. Never written by this system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experiment {
    pub id: Uuid,
    pub title: String,
    pub subject: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub difficulty: String,
    pub created_at: DateTime<Utc>,
}

/// A user's enrollment in, and progress through, one experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserExperiment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub experiment_id: Uuid,
    /// Always within `0..=100`.
    pub progress: u8,
    pub completed: bool,
    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// An enrollment joined with its catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentExperiment {
    pub enrollment: UserExperiment,
    pub experiment: Experiment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// The identity behind an active session, as issued by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub user_id: Uuid,
    pub email: String,
    /// Best-effort display name from the provider's user metadata.
    pub display_name: Option<String>,
}

/// The viewer of a gated page: who they are and their loaded profile.
///
/// Built once per request (or per WebSocket connection) by the shell and
/// passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub identity: SessionIdentity,
    pub profile: Profile,
}

// Change feed

/// The resources the change feed can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Profiles,
    UserExperiments,
    Notifications,
}

impl Resource {
    /// The backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            Resource::Profiles => "profiles",
            Resource::UserExperiments => "user_experiments",
            Resource::Notifications => "notifications",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "profiles" => Some(Resource::Profiles),
            "user_experiments" => Some(Resource::UserExperiments),
            "notifications" => Some(Resource::Notifications),
            _ => None,
        }
    }
}

/// Restricts a subscription to the rows owned by one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFilter {
    pub user_id: Uuid,
}

impl RowFilter {
    pub fn user(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level mutation delivered by the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub resource: Resource,
    pub kind: ChangeKind,
    pub user_id: Uuid,
    /// The new profile row, only present for profile inserts and updates.
    pub profile: Option<Profile>,
}

/// What the shell tells its subscriber after a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardChange {
    /// Use the pushed row directly.
    ProfileUpdated(Profile),
    ProfileDeleted,
    RefetchEnrollments,
    RefetchNotifications,
    /// The feed may have dropped events; reload everything.
    Resync,
}
