//! services/api/src/adapters/memory.rs
//!
//! In-process tables and change feed. Backs the `local` mode of the service
//! and the integration tests. Every mutation is broadcast to subscribers the
//! same way the Postgres triggers publish them.
//!
//! Mutators marked "test support" have no route in local mode; tests use them
//! to stand in for writes made elsewhere on the platform.

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use edulab_core::domain::{
    ChangeEvent, ChangeKind, Experiment, NewProfile, Notification, Profile, RecentExperiment,
    Resource, RowFilter, UserExperiment,
};
use edulab_core::ports::{ChangeFeedService, ChangeStream, DatabaseService, PortError, PortResult};
use edulab_core::progression;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

const CHANGE_BUFFER: usize = 256;

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    experiments: HashMap<Uuid, Experiment>,
    enrollments: HashMap<Uuid, UserExperiment>,
    notifications: HashMap<Uuid, Notification>,
}

pub struct MemoryBackend {
    tables: RwLock<Tables>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            tables: RwLock::new(Tables::default()),
            changes,
        }
    }

    /// Number of open change-feed subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    fn publish(
        &self,
        resource: Resource,
        kind: ChangeKind,
        user_id: Uuid,
        profile: Option<Profile>,
    ) {
        // No receivers is fine: nobody is watching this user.
        let _ = self.changes.send(ChangeEvent {
            resource,
            kind,
            user_id,
            profile,
        });
    }

    pub async fn add_experiment(
        &self,
        title: &str,
        subject: &str,
        icon: Option<&str>,
    ) -> Experiment {
        let experiment = Experiment {
            id: Uuid::new_v4(),
            title: title.to_string(),
            subject: subject.to_string(),
            description: None,
            icon: icon.map(str::to_string),
            difficulty: "medium".to_string(),
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .experiments
            .insert(experiment.id, experiment.clone());
        experiment
    }

    /// Adds `amount` XP to a profile, keeping the level cache in step.
    /// Test support.
    pub async fn award_xp(&self, user_id: Uuid, amount: u32) -> PortResult<Profile> {
        let profile = {
            let mut tables = self.tables.write().await;
            let profile = tables
                .profiles
                .get_mut(&user_id)
                .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
            profile.xp = profile.xp.saturating_add(amount);
            profile.level = progression::level(profile.xp);
            profile.last_active_at = Utc::now();
            profile.clone()
        };
        self.publish(Resource::Profiles, ChangeKind::Update, user_id, Some(profile.clone()));
        Ok(profile)
    }

    /// Test support.
    pub async fn set_streak(&self, user_id: Uuid, streak: u32) -> PortResult<Profile> {
        let profile = {
            let mut tables = self.tables.write().await;
            let profile = tables
                .profiles
                .get_mut(&user_id)
                .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
            profile.streak = streak;
            profile.clone()
        };
        self.publish(Resource::Profiles, ChangeKind::Update, user_id, Some(profile.clone()));
        Ok(profile)
    }

    /// Creates or updates the enrollment of `user_id` in `experiment_id`.
    ///
    /// Reaching 100 marks the enrollment completed; `completed` is never set
    /// with lower progress.
    pub async fn record_progress(
        &self,
        user_id: Uuid,
        experiment_id: Uuid,
        progress: u8,
        accessed_at: DateTime<Utc>,
    ) -> PortResult<UserExperiment> {
        if progress > 100 {
            return Err(PortError::Validation(format!(
                "progress {} is above 100",
                progress
            )));
        }
        let (enrollment, kind) = {
            let mut tables = self.tables.write().await;
            if !tables.experiments.contains_key(&experiment_id) {
                return Err(PortError::NotFound(format!(
                    "Experiment {} not found",
                    experiment_id
                )));
            }
            let existing = tables
                .enrollments
                .values_mut()
                .find(|e| e.user_id == user_id && e.experiment_id == experiment_id);
            match existing {
                Some(enrollment) => {
                    enrollment.progress = progress;
                    enrollment.completed = progress == 100;
                    enrollment.last_accessed_at = accessed_at;
                    (enrollment.clone(), ChangeKind::Update)
                }
                None => {
                    let enrollment = UserExperiment {
                        id: Uuid::new_v4(),
                        user_id,
                        experiment_id,
                        progress,
                        completed: progress == 100,
                        last_accessed_at: accessed_at,
                        created_at: accessed_at,
                    };
                    tables.enrollments.insert(enrollment.id, enrollment.clone());
                    (enrollment, ChangeKind::Insert)
                }
            }
        };
        self.publish(Resource::UserExperiments, kind, user_id, None);
        Ok(enrollment)
    }

    /// Test support.
    pub async fn push_notification(
        &self,
        user_id: Uuid,
        title: &str,
        message: Option<&str>,
    ) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            message: message.map(str::to_string),
            read: false,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .notifications
            .insert(notification.id, notification.clone());
        self.publish(Resource::Notifications, ChangeKind::Insert, user_id, None);
        notification
    }

    /// Test support.
    pub async fn mark_notification_read(&self, notification_id: Uuid) -> PortResult<()> {
        let user_id = {
            let mut tables = self.tables.write().await;
            let notification = tables.notifications.get_mut(&notification_id).ok_or_else(|| {
                PortError::NotFound(format!("Notification {} not found", notification_id))
            })?;
            notification.read = true;
            notification.user_id
        };
        self.publish(Resource::Notifications, ChangeKind::Update, user_id, None);
        Ok(())
    }

    /// Enrolls `user_id` in a starter set of experiments, unless they already
    /// have enrollments. Used by the local mode so a fresh dashboard is not empty.
    pub async fn seed_demo_progress(&self, user_id: Uuid, now: DateTime<Utc>) -> PortResult<()> {
        let already_enrolled = self
            .tables
            .read()
            .await
            .enrollments
            .values()
            .any(|e| e.user_id == user_id);
        if already_enrolled {
            return Ok(());
        }

        let demo = [
            ("Chuyển động ném xiên", "Vật Lý", None, 85, Duration::hours(2)),
            ("Phản ứng oxi hóa khử", "Hóa Học", None, 60, Duration::hours(5)),
            ("Quan sát tế bào thực vật", "Sinh Học", None, 100, Duration::days(1)),
            (
                "Cân bằng phương trình hóa học",
                "Hóa Học",
                Some("flask-conical"),
                40,
                Duration::days(2),
            ),
        ];
        for (title, subject, icon, progress, ago) in demo {
            let experiment = self.find_or_add_experiment(title, subject, icon).await;
            self.record_progress(user_id, experiment.id, progress, now - ago)
                .await?;
        }
        debug!("Seeded demo enrollments for {}.", user_id);
        Ok(())
    }

    async fn find_or_add_experiment(
        &self,
        title: &str,
        subject: &str,
        icon: Option<&str>,
    ) -> Experiment {
        let existing = self
            .tables
            .read()
            .await
            .experiments
            .values()
            .find(|e| e.title == title)
            .cloned();
        match existing {
            Some(experiment) => experiment,
            None => self.add_experiment(title, subject, icon).await,
        }
    }
}

#[async_trait]
impl DatabaseService for MemoryBackend {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        self.tables
            .read()
            .await
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
    }

    async fn upsert_profile(&self, new: NewProfile) -> PortResult<Profile> {
        let (profile, inserted) = {
            let mut tables = self.tables.write().await;
            match tables.profiles.get(&new.id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let now = Utc::now();
                    let profile = Profile {
                        id: new.id,
                        name: new.name,
                        email: new.email,
                        role: new.role,
                        avatar_url: None,
                        xp: new.xp,
                        streak: new.streak,
                        level: new.level,
                        last_active_at: now,
                        created_at: now,
                    };
                    tables.profiles.insert(profile.id, profile.clone());
                    (profile, true)
                }
            }
        };
        if inserted {
            self.publish(Resource::Profiles, ChangeKind::Insert, profile.id, Some(profile.clone()));
        }
        Ok(profile)
    }

    async fn recent_experiments(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> PortResult<Vec<RecentExperiment>> {
        let tables = self.tables.read().await;
        let mut enrollments: Vec<&UserExperiment> = tables
            .enrollments
            .values()
            .filter(|e| e.user_id == user_id)
            .collect();
        enrollments.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));

        let mut recent = Vec::with_capacity(limit.min(enrollments.len()));
        for enrollment in enrollments.into_iter().take(limit) {
            let experiment = tables
                .experiments
                .get(&enrollment.experiment_id)
                .cloned()
                .ok_or_else(|| PortError::InvalidRow {
                    resource: "user_experiments",
                    reason: format!(
                        "enrollment {} references missing experiment {}",
                        enrollment.id, enrollment.experiment_id
                    ),
                })?;
            recent.push(RecentExperiment {
                enrollment: enrollment.clone(),
                experiment,
            });
        }
        Ok(recent)
    }

    async fn unread_notification_count(&self, user_id: Uuid) -> PortResult<u64> {
        Ok(self
            .tables
            .read()
            .await
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.read)
            .count() as u64)
    }
}

#[async_trait]
impl ChangeFeedService for MemoryBackend {
    async fn subscribe(&self, resource: Resource, filter: RowFilter) -> PortResult<ChangeStream> {
        let mut rx = self.changes.subscribe();
        let events = stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.resource == resource && event.user_id == filter.user_id {
                            yield Ok(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Change subscriber lagged, skipped {} events.", n);
                        yield Err(PortError::Unexpected(format!("skipped {} change events", n)));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edulab_core::domain::Role;
    use futures::StreamExt;

    fn new_profile(id: Uuid) -> NewProfile {
        NewProfile {
            id,
            name: "Nguyễn Văn A".to_string(),
            email: "a@example.com".to_string(),
            role: Role::Student,
            xp: 0,
            streak: 0,
            level: 1,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let backend = MemoryBackend::new();
        let id = Uuid::new_v4();
        backend.upsert_profile(new_profile(id)).await.unwrap();
        backend.award_xp(id, 600).await.unwrap();

        let again = backend.upsert_profile(new_profile(id)).await.unwrap();
        assert_eq!(again.xp, 600);
        assert_eq!(again.level, 2);
    }

    #[tokio::test]
    async fn recent_experiments_are_ordered_and_bounded() {
        let backend = MemoryBackend::new();
        let user = Uuid::new_v4();
        backend.seed_demo_progress(user, Utc::now()).await.unwrap();
        let extra = backend.add_experiment("Định luật Ohm", "Vật Lý", None).await;
        backend
            .record_progress(user, extra.id, 10, Utc::now() - Duration::days(9))
            .await
            .unwrap();

        let recent = backend.recent_experiments(user, 4).await.unwrap();
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].experiment.title, "Chuyển động ném xiên");
        assert!(recent.iter().all(|r| r.experiment.title != "Định luật Ohm"));
        assert!(recent
            .windows(2)
            .all(|w| w[0].enrollment.last_accessed_at >= w[1].enrollment.last_accessed_at));
    }

    #[tokio::test]
    async fn completion_follows_progress() {
        let backend = MemoryBackend::new();
        let user = Uuid::new_v4();
        let exp = backend.add_experiment("Quan sát tế bào", "Sinh Học", None).await;
        let done = backend.record_progress(user, exp.id, 100, Utc::now()).await.unwrap();
        assert!(done.completed);
        let redo = backend.record_progress(user, exp.id, 30, Utc::now()).await.unwrap();
        assert!(!redo.completed);
        assert_eq!(redo.id, done.id);
        assert!(backend.record_progress(user, exp.id, 101, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn unread_count_ignores_read_and_foreign() {
        let backend = MemoryBackend::new();
        let user = Uuid::new_v4();
        let first = backend.push_notification(user, "Bài học mới", None).await;
        backend.push_notification(user, "Huy hiệu mới", Some("Lv.2")).await;
        backend.push_notification(Uuid::new_v4(), "Khác", None).await;
        backend.mark_notification_read(first.id).await.unwrap();
        assert_eq!(backend.unread_notification_count(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn subscription_is_filtered_and_released() {
        let backend = MemoryBackend::new();
        let user = Uuid::new_v4();
        backend.upsert_profile(new_profile(user)).await.unwrap();

        let mut events = backend
            .subscribe(Resource::Profiles, RowFilter::user(user))
            .await
            .unwrap();
        assert_eq!(backend.subscriber_count(), 1);

        backend.push_notification(user, "Bỏ qua", None).await;
        backend.award_xp(user, 50).await.unwrap();
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.resource, Resource::Profiles);
        assert_eq!(event.profile.unwrap().xp, 50);

        drop(events);
        assert_eq!(backend.subscriber_count(), 0);
    }
}
