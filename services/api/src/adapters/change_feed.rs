//! services/api/src/adapters/change_feed.rs
//!
//! The Postgres implementation of the `ChangeFeedService` port. Row triggers
//! publish every change on the `edulab_changes` channel. One `LISTEN`
//! connection per process receives them and fans the payloads out to every
//! subscription, which filters by table and user.

use crate::adapters::db::ProfileRecord;
use async_stream::stream;
use async_trait::async_trait;
use edulab_core::domain::{ChangeEvent, ChangeKind, Resource, RowFilter};
use edulab_core::ports::{ChangeFeedService, ChangeStream, PortError, PortResult};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The channel the triggers in the initial migration notify on.
pub const CHANGE_CHANNEL: &str = "edulab_changes";

const FEED_CAPACITY: usize = 1024;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
enum FeedSignal {
    Payload(Arc<str>),
    /// The listener lost its connection; notifications may have been missed.
    Interrupted,
}

#[derive(Clone)]
pub struct PgChangeFeed {
    signals: broadcast::Sender<FeedSignal>,
}

impl PgChangeFeed {
    /// Opens the shared `LISTEN` connection and starts the fan-out task.
    ///
    /// The listener holds a single connection taken from `pool` for the life
    /// of the process, however many dashboards subscribe.
    pub async fn start(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        info!("Listening for changes on {}.", CHANGE_CHANNEL);

        let feed = Self::unconnected();
        tokio::spawn(forward_notifications(listener, feed.signals.clone()));
        Ok(feed)
    }

    fn unconnected() -> Self {
        let (signals, _) = broadcast::channel(FEED_CAPACITY);
        Self { signals }
    }
}

async fn forward_notifications(mut listener: PgListener, signals: broadcast::Sender<FeedSignal>) {
    loop {
        match listener.try_recv().await {
            Ok(Some(notification)) => {
                // No receivers just means no dashboard is open.
                let _ = signals.send(FeedSignal::Payload(Arc::from(notification.payload())));
            }
            Ok(None) => {
                // The next call reconnects and re-issues LISTEN.
                warn!("Change listener connection lost, reconnecting.");
                let _ = signals.send(FeedSignal::Interrupted);
            }
            Err(e) => {
                error!("Change listener failed: {}", e);
                let _ = signals.send(FeedSignal::Interrupted);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// The JSON published by `edulab_notify_change()`.
#[derive(Deserialize)]
struct ChangePayload {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    user_id: Uuid,
    record: serde_json::Value,
}

/// Decodes one notification payload.
///
/// Returns `None` for payloads that belong to another table or user.
pub fn decode_notification(
    payload: &str,
    resource: Resource,
    filter: RowFilter,
) -> Option<PortResult<ChangeEvent>> {
    let parsed: ChangePayload = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            return Some(Err(PortError::Unexpected(format!(
                "Malformed change payload: {}",
                e
            ))))
        }
    };
    if Resource::from_table(&parsed.table) != Some(resource) || parsed.user_id != filter.user_id {
        return None;
    }

    let profile = match (resource, parsed.kind) {
        (Resource::Profiles, ChangeKind::Insert | ChangeKind::Update) => {
            let record: ProfileRecord = match serde_json::from_value(parsed.record) {
                Ok(record) => record,
                Err(e) => {
                    return Some(Err(PortError::InvalidRow {
                        resource: "profiles",
                        reason: e.to_string(),
                    }))
                }
            };
            match record.to_domain() {
                Ok(profile) => Some(profile),
                Err(e) => return Some(Err(e)),
            }
        }
        _ => None,
    };

    Some(Ok(ChangeEvent {
        resource,
        kind: parsed.kind,
        user_id: parsed.user_id,
        profile,
    }))
}

#[async_trait]
impl ChangeFeedService for PgChangeFeed {
    async fn subscribe(&self, resource: Resource, filter: RowFilter) -> PortResult<ChangeStream> {
        let mut signals = self.signals.subscribe();
        debug!(
            "Subscribed to {} changes of user {}.",
            resource.table(),
            filter.user_id
        );

        let events = stream! {
            loop {
                match signals.recv().await {
                    Ok(FeedSignal::Payload(payload)) => {
                        if let Some(event) = decode_notification(&payload, resource, filter) {
                            yield event;
                        }
                    }
                    Ok(FeedSignal::Interrupted) => {
                        yield Err(PortError::Unexpected("change listener reconnected".to_string()));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Change subscriber lagged, skipped {} notifications.", n);
                        yield Err(PortError::Unexpected(format!("skipped {} notifications", n)));
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
    use serde_json::json;

    fn profile_payload(user_id: Uuid, kind: &str, xp: i64) -> String {
        json!({
            "table": "profiles",
            "type": kind,
            "user_id": user_id,
            "record": {
                "id": user_id,
                "name": "Nguyễn Văn A",
                "email": "a@example.com",
                "role": "student",
                "avatar_url": null,
                "xp": xp,
                "streak": 4,
                "level": 2,
                "last_active_at": "2024-06-01T10:00:00.123456+00:00",
                "created_at": "2024-05-01T08:00:00+00:00"
            }
        })
        .to_string()
    }

    #[test]
    fn profile_updates_carry_the_row() {
        let user = Uuid::new_v4();
        let event = decode_notification(
            &profile_payload(user, "UPDATE", 750),
            Resource::Profiles,
            RowFilter::user(user),
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.profile.unwrap().xp, 750);
    }

    #[test]
    fn other_tables_and_users_are_skipped() {
        let user = Uuid::new_v4();
        let payload = profile_payload(user, "UPDATE", 10);
        let stranger = RowFilter::user(Uuid::new_v4());
        let own = RowFilter::user(user);
        assert!(decode_notification(&payload, Resource::Notifications, own).is_none());
        assert!(decode_notification(&payload, Resource::Profiles, stranger).is_none());
    }

    #[test]
    fn enrollment_events_have_no_row() {
        let user = Uuid::new_v4();
        let payload = json!({
            "table": "user_experiments",
            "type": "INSERT",
            "user_id": user,
            "record": { "progress": 10 }
        })
        .to_string();
        let event = decode_notification(&payload, Resource::UserExperiments, RowFilter::user(user))
            .unwrap()
            .unwrap();
        assert!(event.profile.is_none());
    }

    #[test]
    fn invalid_rows_surface_as_errors() {
        let user = Uuid::new_v4();
        let payload = profile_payload(user, "INSERT", -1);
        assert!(matches!(
            decode_notification(&payload, Resource::Profiles, RowFilter::user(user)),
            Some(Err(PortError::InvalidRow { .. }))
        ));
        assert!(decode_notification("not json", Resource::Profiles, RowFilter::user(user))
            .unwrap()
            .is_err());
    }

    #[tokio::test]
    async fn concurrent_subscriptions_share_one_listener() {
        use futures::StreamExt;

        let feed = PgChangeFeed::unconnected();
        let first_user = Uuid::new_v4();
        let second_user = Uuid::new_v4();
        let mut first = feed
            .subscribe(Resource::Profiles, RowFilter::user(first_user))
            .await
            .unwrap();
        let mut second = feed
            .subscribe(Resource::Profiles, RowFilter::user(second_user))
            .await
            .unwrap();
        assert_eq!(feed.signals.receiver_count(), 2);

        for (user, xp) in [(first_user, 100), (second_user, 200)] {
            let payload = profile_payload(user, "UPDATE", xp);
            feed.signals
                .send(FeedSignal::Payload(Arc::from(payload.as_str())))
                .unwrap();
        }
        // Each viewer sees only their own row.
        let event = first.next().await.unwrap().unwrap();
        assert_eq!(event.profile.unwrap().xp, 100);
        let event = second.next().await.unwrap().unwrap();
        assert_eq!(event.profile.unwrap().xp, 200);

        feed.signals.send(FeedSignal::Interrupted).unwrap();
        assert!(first.next().await.unwrap().is_err());
        assert!(second.next().await.unwrap().is_err());

        drop(first);
        drop(second);
        assert_eq!(feed.signals.receiver_count(), 0);
    }
}
