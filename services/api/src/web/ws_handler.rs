//! services/api/src/web/ws_handler.rs
//!
//! The live dashboard connection. Subscribes to the viewer's change feed,
//! sends a snapshot, and pushes each affected widget as changes arrive.
//! The subscription lives exactly as long as the socket.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    rest::{load_dashboard, reload_dashboard},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use chrono::Utc;
use edulab_core::domain::{DashboardChange, SessionContext};
use edulab_core::ports::PortError;
use edulab_core::presentation::DashboardState;
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

type WsSender = SplitSink<WebSocket, Message>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>, // from the session middleware
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, ctx))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, ctx: SessionContext) {
    let user_id = ctx.profile.id;
    info!("New dashboard connection for user: {}", user_id);

    let (mut sender, mut receiver) = socket.split();

    // --- 1. Subscribe To Changes ---
    // Changes committed while the snapshot loads wait in the channel.
    let (change_tx, mut change_rx) = mpsc::unbounded_channel();
    let subscription = match app_state
        .shell
        .subscribe_to_changes(user_id, move |change| {
            // The receiver only goes away once the socket loop has ended.
            let _ = change_tx.send(change);
        })
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to subscribe to changes for {}: {:?}", user_id, e);
            let err_msg = ServerMessage::Error {
                message: "Live updates are unavailable.".to_string(),
            };
            send_message(&mut sender, &err_msg).await;
            return;
        }
    };

    // --- 2. Initial Snapshot ---
    // The profile in `ctx` predates the upgrade, so read it again.
    let mut dashboard = match reload_dashboard(&app_state, user_id).await {
        Ok(dashboard) => dashboard,
        Err(PortError::NotFound(_)) => {
            let ended = ServerMessage::SessionEnded {
                redirect: app_state.config.login_path.clone(),
            };
            send_message(&mut sender, &ended).await;
            subscription.unsubscribe().await;
            return;
        }
        Err(e) => {
            warn!("Profile re-read failed for {}, using session copy: {:?}", user_id, e);
            load_dashboard(&app_state, ctx.profile).await
        }
    };
    let snapshot = ServerMessage::Snapshot {
        dashboard: dashboard.view(Utc::now()),
    };

    // --- 3. Main Loop ---
    if send_message(&mut sender, &snapshot).await {
        loop {
            let change = tokio::select! {
                change = change_rx.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Refresh) => DashboardChange::Resync,
                            Err(e) => {
                                warn!("Failed to deserialize client message: {}", e);
                                continue;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client disconnected.");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            };
            match message_for_change(&app_state, &mut dashboard, change).await {
                ChangeOutcome::Send(message) => {
                    if !send_message(&mut sender, &message).await {
                        break;
                    }
                }
                ChangeOutcome::End(message) => {
                    send_message(&mut sender, &message).await;
                    break;
                }
                ChangeOutcome::Skip => {}
            }
        }
    }

    // --- 4. Cleanup ---
    subscription.unsubscribe().await;
    info!("Dashboard connection closed for user: {}", user_id);
}

/// What the socket loop should do after a change.
#[derive(Debug)]
pub(crate) enum ChangeOutcome {
    Send(ServerMessage),
    /// Send the message, then close the connection.
    End(ServerMessage),
    Skip,
}

/// Updates the dashboard for one change and picks the widget to push.
pub(crate) async fn message_for_change(
    app_state: &AppState,
    dashboard: &mut DashboardState,
    change: DashboardChange,
) -> ChangeOutcome {
    let user_id = dashboard.profile().id;
    match change {
        DashboardChange::ProfileUpdated(profile) => {
            ChangeOutcome::Send(ServerMessage::StatsUpdated {
                stats: dashboard.apply_profile(profile).clone(),
            })
        }
        DashboardChange::ProfileDeleted => ChangeOutcome::End(ServerMessage::SessionEnded {
            redirect: app_state.config.login_path.clone(),
        }),
        DashboardChange::RefetchEnrollments => {
            match app_state
                .db
                .recent_experiments(user_id, app_state.config.recent_experiments_limit)
                .await
            {
                Ok(recent) => {
                    dashboard.set_recent(recent);
                    ChangeOutcome::Send(ServerMessage::RecentExperimentsUpdated {
                        cards: dashboard.cards(Utc::now()),
                    })
                }
                Err(e) => {
                    error!("Failed to re-fetch recent experiments for {}: {:?}", user_id, e);
                    ChangeOutcome::Skip
                }
            }
        }
        DashboardChange::RefetchNotifications => {
            match app_state.db.unread_notification_count(user_id).await {
                Ok(unread) => {
                    dashboard.set_unread(unread);
                    ChangeOutcome::Send(ServerMessage::UnreadCountUpdated { unread })
                }
                Err(e) => {
                    error!("Failed to re-count notifications for {}: {:?}", user_id, e);
                    ChangeOutcome::Skip
                }
            }
        }
        DashboardChange::Resync => match reload_dashboard(app_state, user_id).await {
            Ok(fresh) => {
                *dashboard = fresh;
                ChangeOutcome::Send(ServerMessage::Snapshot {
                    dashboard: dashboard.view(Utc::now()),
                })
            }
            Err(PortError::NotFound(_)) => ChangeOutcome::End(ServerMessage::SessionEnded {
                redirect: app_state.config.login_path.clone(),
            }),
            Err(e) => {
                error!("Failed to reload the dashboard for {}: {:?}", user_id, e);
                ChangeOutcome::Skip
            }
        },
    }
}

async fn send_message(sender: &mut WsSender, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return true;
        }
    };
    if sender.send(Message::Text(json.into())).await.is_err() {
        error!("Failed to send message, closing connection.");
        return false;
    }
    true
}
