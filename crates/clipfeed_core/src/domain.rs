//! crates/clipfeed_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database; serde derives exist only
//! where a type travels over the HTTP or WebSocket surface unchanged.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ports::{PortError, PortResult};
use crate::schema::GenerationMode;

//=========================================================================================
// Watch Counting
//=========================================================================================

/// Per-user counter of videos watched since the last taste-profile build.
///
/// The counter only grows, except when the watch-count monitor claims a
/// profile trigger and resets it to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchCounts {
    pub user_id: Uuid,
    pub videos_watched_since_last_profile: u32,
    pub last_profile_update: Option<DateTime<Utc>>,
}

impl WatchCounts {
    /// A freshly created record: nothing watched, no profile yet.
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            videos_watched_since_last_profile: 0,
            last_profile_update: None,
        }
    }
}

//=========================================================================================
// Saved Videos (Likes / Bookmarks)
//=========================================================================================

/// Which saved-video collection an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SavedKind {
    #[serde(rename = "likes")]
    Liked,
    #[serde(rename = "bookmarks")]
    Bookmarked,
}

impl SavedKind {
    /// The stable storage name of the collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            SavedKind::Liked => "likes",
            SavedKind::Bookmarked => "bookmarks",
        }
    }

    pub fn parse(value: &str) -> PortResult<Self> {
        match value {
            "likes" => Ok(SavedKind::Liked),
            "bookmarks" => Ok(SavedKind::Bookmarked),
            other => Err(PortError::InvalidInput(format!(
                "unknown saved-video collection '{}'",
                other
            ))),
        }
    }
}

/// A video reference in a user's liked or bookmarked set.
///
/// Two entries are the same entry when they point at the same video,
/// regardless of when they were saved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedVideo {
    pub video_id: String,
    pub saved_at: DateTime<Utc>,
}

impl SavedVideo {
    pub fn new(video_id: impl Into<String>, saved_at: DateTime<Utc>) -> Self {
        Self {
            video_id: video_id.into(),
            saved_at,
        }
    }
}

impl PartialEq for SavedVideo {
    fn eq(&self, other: &Self) -> bool {
        self.video_id == other.video_id
    }
}

impl Eq for SavedVideo {}

impl Hash for SavedVideo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.video_id.hash(state);
    }
}

//=========================================================================================
// Prompt Generation
//=========================================================================================

/// A prompt produced by the LLM, together with its lineage.
///
/// The variants are mutually exclusive: a prompt is either fresh (profile or
/// random exploration), a mutation of exactly one parent, or a crossover of
/// two or more parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptGeneration {
    Fresh {
        prompt: String,
    },
    Mutation {
        prompt: String,
        parent_id: String,
    },
    Crossover {
        prompt: String,
        parent_ids: Vec<String>,
    },
}

impl PromptGeneration {
    pub fn new(prompt: impl Into<String>) -> Self {
        PromptGeneration::Fresh {
            prompt: prompt.into(),
        }
    }

    pub fn mutation(prompt: impl Into<String>, parent_id: impl Into<String>) -> Self {
        PromptGeneration::Mutation {
            prompt: prompt.into(),
            parent_id: parent_id.into(),
        }
    }

    /// Builds a crossover prompt. Fewer than two distinct parents is not a crossover.
    pub fn crossover(prompt: impl Into<String>, parent_ids: Vec<String>) -> PortResult<Self> {
        let distinct = parent_ids.iter().collect::<HashSet<_>>().len();
        if distinct < 2 {
            return Err(PortError::InvalidInput(format!(
                "a crossover needs at least two distinct parents, got {}",
                distinct
            )));
        }
        Ok(PromptGeneration::Crossover {
            prompt: prompt.into(),
            parent_ids,
        })
    }

    pub fn prompt(&self) -> &str {
        match self {
            PromptGeneration::Fresh { prompt }
            | PromptGeneration::Mutation { prompt, .. }
            | PromptGeneration::Crossover { prompt, .. } => prompt,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            PromptGeneration::Mutation { parent_id, .. } => Some(parent_id),
            _ => None,
        }
    }

    pub fn parent_ids(&self) -> Option<&[String]> {
        match self {
            PromptGeneration::Crossover { parent_ids, .. } => Some(parent_ids),
            _ => None,
        }
    }
}

/// A generation that has been persisted for a user.
///
/// Its `id` is what later mutation and crossover requests refer to as a parent.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPrompt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub mode: GenerationMode,
    pub generation: PromptGeneration,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Sharing
//=========================================================================================

/// A record of one user sharing one video.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub id: Uuid,
    pub video_id: String,
    pub shared_by: Uuid,
    pub user_name: String,
    pub shared_at: DateTime<Utc>,
}

//=========================================================================================
// Change Feed
//=========================================================================================

/// A push notification emitted by the store whenever a watched record changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    WatchCounts(WatchCounts),
    SavedVideos { user_id: Uuid, kind: SavedKind },
}

impl ChangeEvent {
    pub fn user_id(&self) -> Uuid {
        match self {
            ChangeEvent::WatchCounts(counts) => counts.user_id,
            ChangeEvent::SavedVideos { user_id, .. } => *user_id,
        }
    }
}
