//! crates/edulab_core/src/shell.rs
//!
//! The session-gated shell: resolves the viewer's session, loads (or
//! provisions) their profile, and owns the change-feed subscription that keeps
//! a dashboard current.
//!
//! Every failure on the load path collapses to `ShellOutcome::Unauthenticated`;
//! callers redirect to the login route.

use crate::domain::{
    ChangeEvent, ChangeKind, DashboardChange, NewProfile, Resource, RowFilter, SessionContext,
    SessionIdentity,
};
use crate::ports::{ChangeFeedService, DatabaseService, IdentityProvider, PortError, PortResult};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name used when neither the provider metadata nor the email yields one.
pub const FALLBACK_DISPLAY_NAME: &str = "Học sinh EduLab";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellOutcome {
    Authenticated(SessionContext),
    Unauthenticated,
}

#[derive(Clone)]
pub struct SessionShell {
    identity: Arc<dyn IdentityProvider>,
    db: Arc<dyn DatabaseService>,
    feed: Arc<dyn ChangeFeedService>,
}

impl SessionShell {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        db: Arc<dyn DatabaseService>,
        feed: Arc<dyn ChangeFeedService>,
    ) -> Self {
        Self { identity, db, feed }
    }

    /// Resolves the session behind `token` and loads its profile.
    ///
    /// No token means no fetch at all. A missing profile triggers exactly one
    /// upsert of the default profile.
    pub async fn load_profile(&self, token: Option<&str>) -> ShellOutcome {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            debug!("No session token presented.");
            return ShellOutcome::Unauthenticated;
        };

        let identity = match self.identity.current_session(token).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!("No active session for presented token.");
                return ShellOutcome::Unauthenticated;
            }
            Err(e) => {
                warn!("Session lookup failed: {:?}", e);
                return ShellOutcome::Unauthenticated;
            }
        };

        let profile = match self.db.get_profile(identity.user_id).await {
            Ok(profile) => profile,
            Err(PortError::NotFound(_)) => {
                info!("No profile for user {}, provisioning defaults.", identity.user_id);
                match self.db.upsert_profile(default_profile(&identity)).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        warn!("Default profile provisioning failed: {:?}", e);
                        return ShellOutcome::Unauthenticated;
                    }
                }
            }
            Err(e) => {
                warn!("Profile fetch failed for user {}: {:?}", identity.user_id, e);
                return ShellOutcome::Unauthenticated;
            }
        };

        ShellOutcome::Authenticated(SessionContext { identity, profile })
    }

    /// Subscribes to profile, enrollment and notification changes for
    /// `user_id`, calling `on_change` for each relevant event. A feed error
    /// is reported as `DashboardChange::Resync`.
    ///
    /// The returned handle must be kept alive for as long as updates are
    /// wanted; dropping it releases every channel.
    pub async fn subscribe_to_changes<F>(
        &self,
        user_id: Uuid,
        mut on_change: F,
    ) -> PortResult<SubscriptionHandle>
    where
        F: FnMut(DashboardChange) + Send + 'static,
    {
        let filter = RowFilter::user(user_id);
        let mut streams = Vec::with_capacity(3);
        for resource in [
            Resource::Profiles,
            Resource::UserExperiments,
            Resource::Notifications,
        ] {
            streams.push(self.feed.subscribe(resource, filter).await?);
        }
        let mut merged = stream::select_all(streams);

        let token = CancellationToken::new();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    next = merged.next() => match next {
                        Some(Ok(event)) => {
                            if let Some(change) = dashboard_change(user_id, event) {
                                on_change(change);
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Change feed error for user {}: {:?}", user_id, e);
                            on_change(DashboardChange::Resync);
                        }
                        None => {
                            debug!("Change feed closed for user {}.", user_id);
                            break;
                        }
                    }
                }
            }
        });
        info!("Subscribed to changes for user {}.", user_id);

        Ok(SubscriptionHandle {
            token,
            task: Some(task),
        })
    }
}

/// Owns a live change-feed subscription. Dropping it cancels the pump task.
pub struct SubscriptionHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Cancels the subscription and waits until its channels are released.
    pub async fn unsubscribe(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Maps a raw change event to what the dashboard should do about it.
fn dashboard_change(user_id: Uuid, event: ChangeEvent) -> Option<DashboardChange> {
    if event.user_id != user_id {
        return None;
    }
    match (event.resource, event.kind) {
        (Resource::Profiles, ChangeKind::Delete) => Some(DashboardChange::ProfileDeleted),
        (Resource::Profiles, _) => match event.profile {
            Some(profile) => Some(DashboardChange::ProfileUpdated(profile)),
            None => {
                warn!("Profile change for user {} arrived without a row.", user_id);
                None
            }
        },
        (Resource::UserExperiments, _) => Some(DashboardChange::RefetchEnrollments),
        (Resource::Notifications, _) => Some(DashboardChange::RefetchNotifications),
    }
}

/// The profile written on first login.
pub fn default_profile(identity: &SessionIdentity) -> NewProfile {
    NewProfile {
        id: identity.user_id,
        name: display_name(identity),
        email: identity.email.clone(),
        role: Default::default(),
        xp: 0,
        streak: 0,
        level: 1,
    }
}

fn display_name(identity: &SessionIdentity) -> String {
    if let Some(name) = identity
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        return name.to_string();
    }
    identity
        .email
        .split('@')
        .next()
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Profile, RecentExperiment, Role};
    use crate::ports::ChangeStream;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Fake {
        session: Option<SessionIdentity>,
        profile: Mutex<Option<Profile>>,
        upsert_yields_nothing: bool,
        profile_error: bool,
        session_calls: AtomicUsize,
        profile_calls: AtomicUsize,
        upsert_calls: AtomicUsize,
        feeds: Mutex<Vec<(Resource, mpsc::UnboundedSender<PortResult<ChangeEvent>>)>>,
    }

    fn sample_profile(id: Uuid, xp: u32) -> Profile {
        Profile {
            id,
            name: "Nguyễn Văn A".to_string(),
            email: "a@example.com".to_string(),
            role: Role::Student,
            avatar_url: None,
            xp,
            streak: 3,
            level: 1,
            last_active_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    fn identity(id: Uuid) -> SessionIdentity {
        SessionIdentity {
            user_id: id,
            email: "an.nguyen@example.com".to_string(),
            display_name: None,
        }
    }

    #[async_trait]
    impl IdentityProvider for Fake {
        async fn current_session(&self, _token: &str) -> PortResult<Option<SessionIdentity>> {
            self.session_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.session.clone())
        }
    }

    #[async_trait]
    impl DatabaseService for Fake {
        async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if self.profile_error {
                return Err(PortError::Unexpected("connection reset".to_string()));
            }
            self.profile
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
        }

        async fn upsert_profile(&self, new: NewProfile) -> PortResult<Profile> {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            if self.upsert_yields_nothing {
                return Err(PortError::NotFound("upsert returned no row".to_string()));
            }
            let mut profile = sample_profile(new.id, new.xp);
            profile.name = new.name;
            profile.email = new.email;
            profile.streak = new.streak;
            profile.level = new.level;
            *self.profile.lock().unwrap() = Some(profile.clone());
            Ok(profile)
        }

        async fn recent_experiments(
            &self,
            _user_id: Uuid,
            _limit: usize,
        ) -> PortResult<Vec<RecentExperiment>> {
            Ok(Vec::new())
        }

        async fn unread_notification_count(&self, _user_id: Uuid) -> PortResult<u64> {
            Ok(0)
        }
    }

    #[async_trait]
    impl ChangeFeedService for Fake {
        async fn subscribe(
            &self,
            resource: Resource,
            _filter: RowFilter,
        ) -> PortResult<ChangeStream> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.feeds.lock().unwrap().push((resource, tx));
            let stream = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            });
            Ok(Box::pin(stream))
        }
    }

    fn shell(fake: Arc<Fake>) -> SessionShell {
        SessionShell::new(fake.clone(), fake.clone(), fake)
    }

    fn sender(fake: &Fake, resource: Resource) -> mpsc::UnboundedSender<PortResult<ChangeEvent>> {
        fake.feeds
            .lock()
            .unwrap()
            .iter()
            .find(|(r, _)| *r == resource)
            .map(|(_, tx)| tx.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn missing_token_fetches_nothing() {
        let fake = Arc::new(Fake::default());
        let outcome = shell(fake.clone()).load_profile(None).await;
        assert_eq!(outcome, ShellOutcome::Unauthenticated);
        assert_eq!(fake.session_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fake.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_session_is_unauthenticated() {
        let fake = Arc::new(Fake::default());
        let outcome = shell(fake.clone()).load_profile(Some("stale")).await;
        assert_eq!(outcome, ShellOutcome::Unauthenticated);
        assert_eq!(fake.session_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.profile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn existing_profile_is_returned() {
        let id = Uuid::new_v4();
        let fake = Arc::new(Fake {
            session: Some(identity(id)),
            profile: Mutex::new(Some(sample_profile(id, 2450))),
            ..Default::default()
        });
        match shell(fake.clone()).load_profile(Some("token")).await {
            ShellOutcome::Authenticated(ctx) => assert_eq!(ctx.profile.xp, 2450),
            other => panic!("expected authenticated, got {:?}", other),
        }
        assert_eq!(fake.upsert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_profile_is_provisioned_once() {
        let id = Uuid::new_v4();
        let fake = Arc::new(Fake {
            session: Some(identity(id)),
            ..Default::default()
        });
        match shell(fake.clone()).load_profile(Some("token")).await {
            ShellOutcome::Authenticated(ctx) => {
                assert_eq!(ctx.profile.name, "an.nguyen");
                assert_eq!(ctx.profile.xp, 0);
                assert_eq!(ctx.profile.level, 1);
            }
            other => panic!("expected authenticated, got {:?}", other),
        }
        assert_eq!(fake.upsert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_upsert_fails_closed() {
        let id = Uuid::new_v4();
        let fake = Arc::new(Fake {
            session: Some(identity(id)),
            upsert_yields_nothing: true,
            ..Default::default()
        });
        let outcome = shell(fake.clone()).load_profile(Some("token")).await;
        assert_eq!(outcome, ShellOutcome::Unauthenticated);
        assert_eq!(fake.upsert_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_error_fails_closed_without_upsert() {
        let id = Uuid::new_v4();
        let fake = Arc::new(Fake {
            session: Some(identity(id)),
            profile_error: true,
            ..Default::default()
        });
        let outcome = shell(fake.clone()).load_profile(Some("token")).await;
        assert_eq!(outcome, ShellOutcome::Unauthenticated);
        assert_eq!(fake.upsert_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_name_prefers_metadata() {
        let mut who = identity(Uuid::new_v4());
        who.display_name = Some("  Trần Thị B ".to_string());
        assert_eq!(default_profile(&who).name, "Trần Thị B");

        who.display_name = None;
        who.email = String::new();
        let new = default_profile(&who);
        assert_eq!(new.name, FALLBACK_DISPLAY_NAME);
        assert_eq!(new.role, Role::Student);
    }

    #[tokio::test]
    async fn subscription_delivers_rows_and_refetch_signals() {
        let id = Uuid::new_v4();
        let fake = Arc::new(Fake::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = shell(fake.clone())
            .subscribe_to_changes(id, move |change| {
                let _ = tx.send(change);
            })
            .await
            .unwrap();
        assert!(handle.is_active());

        let pushed = sample_profile(id, 900);
        sender(&fake, Resource::Profiles)
            .send(Ok(ChangeEvent {
                resource: Resource::Profiles,
                kind: ChangeKind::Update,
                user_id: id,
                profile: Some(pushed.clone()),
            }))
            .unwrap();
        assert_eq!(rx.recv().await, Some(DashboardChange::ProfileUpdated(pushed)));

        // Someone else's row is ignored.
        sender(&fake, Resource::Notifications)
            .send(Ok(ChangeEvent {
                resource: Resource::Notifications,
                kind: ChangeKind::Insert,
                user_id: Uuid::new_v4(),
                profile: None,
            }))
            .unwrap();
        sender(&fake, Resource::UserExperiments)
            .send(Ok(ChangeEvent {
                resource: Resource::UserExperiments,
                kind: ChangeKind::Update,
                user_id: id,
                profile: None,
            }))
            .unwrap();
        assert_eq!(rx.recv().await, Some(DashboardChange::RefetchEnrollments));

        handle.unsubscribe().await;
        for (_, tx) in fake.feeds.lock().unwrap().iter() {
            assert!(tx.is_closed());
        }
    }

    #[tokio::test]
    async fn feed_errors_ask_for_a_resync() {
        let id = Uuid::new_v4();
        let fake = Arc::new(Fake::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = shell(fake.clone())
            .subscribe_to_changes(id, move |change| {
                let _ = tx.send(change);
            })
            .await
            .unwrap();

        sender(&fake, Resource::Notifications)
            .send(Err(PortError::Unexpected("skipped 3 change events".to_string())))
            .unwrap();
        assert_eq!(rx.recv().await, Some(DashboardChange::Resync));
        handle.unsubscribe().await;
    }
}
