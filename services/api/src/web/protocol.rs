//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the dashboard and the API
//! server. The server pushes widget updates as the change feed reports them.

use edulab_core::presentation::{DashboardView, ExperimentCard, StatsView};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Asks for a fresh full snapshot of the dashboard.
    Refresh,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The whole dashboard. Sent on connect, on `refresh`, and after the
    /// change feed reports a gap.
    Snapshot { dashboard: DashboardView },

    /// The profile changed; streak, XP and level widgets should re-render.
    StatsUpdated { stats: StatsView },

    /// The recent-experiments grid was re-fetched.
    RecentExperimentsUpdated { cards: Vec<ExperimentCard> },

    UnreadCountUpdated { unread: u64 },

    /// The viewer's profile is gone; the client should navigate to `redirect`.
    SessionEnded { redirect: String },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}
