//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the app and the API server.
//! The socket is the push channel that replaces client-side document listeners.

use chrono::{DateTime, Utc};
use clipfeed_core::domain::{ChangeEvent, SavedKind};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (App) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The user finished watching a video in the feed.
    VideoWatched { video_id: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (App)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The user's watch counter changed.
    WatchCountsUpdated {
        videos_watched_since_last_profile: u32,
        last_profile_update: Option<DateTime<Utc>>,
    },

    /// The user's likes or bookmarks changed, possibly from another device.
    /// The client should reload that collection.
    SavedVideosChanged { kind: SavedKind },

    /// Reports an error to the client.
    Error { message: String },
}

impl From<ChangeEvent> for ServerMessage {
    fn from(event: ChangeEvent) -> Self {
        match event {
            ChangeEvent::WatchCounts(counts) => ServerMessage::WatchCountsUpdated {
                videos_watched_since_last_profile: counts.videos_watched_since_last_profile,
                last_profile_update: counts.last_profile_update,
            },
            ChangeEvent::SavedVideos { kind, .. } => ServerMessage::SavedVideosChanged { kind },
        }
    }
}
