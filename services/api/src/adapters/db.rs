//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` and `IdentityProvider` ports from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edulab_core::domain::{
    Experiment, NewProfile, Profile, RecentExperiment, Role, SessionIdentity, UserExperiment,
};
use edulab_core::ports::{DatabaseService, IdentityProvider, PortError, PortResult};
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

/// A `profiles` row as stored. Also decoded from change-feed payloads.
#[derive(FromRow, Deserialize)]
pub(crate) struct ProfileRecord {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    avatar_url: Option<String>,
    xp: i32,
    streak: i32,
    level: i32,
    last_active_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}
impl ProfileRecord {
    pub(crate) fn to_domain(self) -> PortResult<Profile> {
        let invalid = |reason: String| PortError::InvalidRow {
            resource: "profiles",
            reason,
        };
        let role = self.role.parse::<Role>().map_err(invalid)?;
        let xp = u32::try_from(self.xp)
            .map_err(|_| invalid(format!("negative xp {} for {}", self.xp, self.id)))?;
        let streak = u32::try_from(self.streak)
            .map_err(|_| invalid(format!("negative streak {} for {}", self.streak, self.id)))?;
        Ok(Profile {
            id: self.id,
            name: self.name,
            email: self.email,
            role,
            avatar_url: self.avatar_url,
            xp,
            streak,
            level: u32::try_from(self.level).unwrap_or(0),
            last_active_at: self.last_active_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct RecentExperimentRecord {
    enrollment_id: Uuid,
    user_id: Uuid,
    experiment_id: Uuid,
    progress: i32,
    completed: bool,
    last_accessed_at: DateTime<Utc>,
    enrolled_at: DateTime<Utc>,
    title: String,
    subject: String,
    description: Option<String>,
    icon: Option<String>,
    difficulty: String,
    experiment_created_at: DateTime<Utc>,
}
impl RecentExperimentRecord {
    fn to_domain(self) -> PortResult<RecentExperiment> {
        let progress = u8::try_from(self.progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| PortError::InvalidRow {
                resource: "user_experiments",
                reason: format!(
                    "progress {} out of range for {}",
                    self.progress, self.enrollment_id
                ),
            })?;
        Ok(RecentExperiment {
            enrollment: UserExperiment {
                id: self.enrollment_id,
                user_id: self.user_id,
                experiment_id: self.experiment_id,
                progress,
                completed: self.completed,
                last_accessed_at: self.last_accessed_at,
                created_at: self.enrolled_at,
            },
            experiment: Experiment {
                id: self.experiment_id,
                title: self.title,
                subject: self.subject,
                description: self.description,
                icon: self.icon,
                difficulty: self.difficulty,
                created_at: self.experiment_created_at,
            },
        })
    }
}

#[derive(FromRow)]
struct SessionRecord {
    user_id: Uuid,
    email: String,
    display_name: Option<String>,
}
impl SessionRecord {
    fn to_domain(self) -> SessionIdentity {
        SessionIdentity {
            user_id: self.user_id,
            email: self.email,
            display_name: self.display_name,
        }
    }
}

/// Converts a counter to its `INTEGER` column, rejecting values that do not fit.
fn column_int(column: &str, value: u32) -> PortResult<i32> {
    i32::try_from(value)
        .map_err(|_| PortError::Validation(format!("{} {} does not fit the column", column, value)))
}

const PROFILE_COLUMNS: &str =
    "id, name, email, role, avatar_url, xp, streak, level, last_active_at, created_at";

//=========================================================================================
// Port Implementations
//=========================================================================================

#[async_trait]
impl IdentityProvider for DbAdapter {
    async fn current_session(&self, token: &str) -> PortResult<Option<SessionIdentity>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT u.id AS user_id, u.email, \
                    COALESCE(u.raw_user_meta_data ->> 'full_name', \
                             u.raw_user_meta_data ->> 'name') AS display_name \
             FROM auth_sessions s JOIN auth_users u ON u.id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(record.map(SessionRecord::to_domain))
    }
}

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "SELECT {} FROM profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Profile {} not found", user_id))
            }
            _ => PortError::Unexpected(e.to_string()),
        })?;
        record.to_domain()
    }

    async fn upsert_profile(&self, profile: NewProfile) -> PortResult<Profile> {
        let xp = column_int("xp", profile.xp)?;
        let streak = column_int("streak", profile.streak)?;
        let level = column_int("level", profile.level)?;
        sqlx::query(
            "INSERT INTO profiles (id, name, email, role, xp, streak, level) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
        )
        .bind(profile.id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(profile.role.as_str())
        .bind(xp)
        .bind(streak)
        .bind(level)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let record = sqlx::query_as::<_, ProfileRecord>(&format!(
            "SELECT {} FROM profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(profile.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .ok_or_else(|| {
            PortError::NotFound(format!("Profile {} not found after upsert", profile.id))
        })?;
        record.to_domain()
    }

    async fn recent_experiments(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> PortResult<Vec<RecentExperiment>> {
        let records = sqlx::query_as::<_, RecentExperimentRecord>(
            "SELECT ue.id AS enrollment_id, ue.user_id, ue.experiment_id, \
                    ue.progress, ue.completed, \
                    ue.last_accessed_at, ue.created_at AS enrolled_at, \
                    e.title, e.subject, e.description, e.icon, e.difficulty, \
                    e.created_at AS experiment_created_at \
             FROM user_experiments ue JOIN experiments e ON e.id = ue.experiment_id \
             WHERE ue.user_id = $1 \
             ORDER BY ue.last_accessed_at DESC \
             LIMIT $2",
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn unread_notification_count(&self, user_id: Uuid) -> PortResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT read",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(role: &str, xp: i32) -> ProfileRecord {
        ProfileRecord {
            id: Uuid::new_v4(),
            name: "Nguyễn Văn A".to_string(),
            email: "a@example.com".to_string(),
            role: role.to_string(),
            avatar_url: None,
            xp,
            streak: 2,
            level: 1,
            last_active_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn profile_rows_are_validated() {
        assert_eq!(record("teacher", 10).to_domain().unwrap().role, Role::Teacher);
        assert!(matches!(
            record("student", -5).to_domain(),
            Err(PortError::InvalidRow { resource: "profiles", .. })
        ));
        assert!(matches!(
            record("principal", 0).to_domain(),
            Err(PortError::InvalidRow { .. })
        ));
    }

    #[test]
    fn oversized_counters_are_rejected() {
        assert_eq!(column_int("xp", 2450).unwrap(), 2450);
        assert_eq!(column_int("xp", i32::MAX as u32).unwrap(), i32::MAX);
        assert!(matches!(
            column_int("xp", u32::MAX),
            Err(PortError::Validation(m)) if m.contains("xp")
        ));
    }

    #[test]
    fn enrollment_progress_is_bounded() {
        let now = Utc::now();
        let row = RecentExperimentRecord {
            enrollment_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            experiment_id: Uuid::new_v4(),
            progress: 140,
            completed: false,
            last_accessed_at: now,
            enrolled_at: now,
            title: "Phản ứng oxi hóa khử".to_string(),
            subject: "Hóa Học".to_string(),
            description: None,
            icon: None,
            difficulty: "hard".to_string(),
            experiment_created_at: now,
        };
        assert!(row.to_domain().is_err());
    }
}
