//! crates/clipfeed_core/src/saved.rs
//!
//! Likes and bookmarks: a per-user, toggleable set of video references kept as
//! a local snapshot of the store. Membership queries read the snapshot only;
//! convergence between devices is left to the store.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{SavedKind, SavedVideo};
use crate::ports::{PortResult, SavedVideoStore};

pub struct SavedVideoService {
    store: Arc<dyn SavedVideoStore>,
    user_id: Uuid,
    kind: SavedKind,
    /// Most recently saved first.
    snapshot: Mutex<Vec<SavedVideo>>,
    /// Serializes toggles so a read-then-write on the snapshot is never interleaved.
    toggle_lock: tokio::sync::Mutex<()>,
}

impl SavedVideoService {
    pub fn new(store: Arc<dyn SavedVideoStore>, user_id: Uuid, kind: SavedKind) -> Self {
        Self {
            store,
            user_id,
            kind,
            snapshot: Mutex::new(Vec::new()),
            toggle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn kind(&self) -> SavedKind {
        self.kind
    }

    /// Replaces the local snapshot with the store's current list.
    pub async fn load_videos(&self) -> PortResult<Vec<SavedVideo>> {
        let videos = self.store.list_saved(self.user_id, self.kind).await?;
        debug!(user_id = %self.user_id, kind = self.kind.as_str(), count = videos.len(), "Loaded saved videos");
        *self.lock_snapshot() = videos.clone();
        Ok(videos)
    }

    /// Flips membership of `video_id` and returns whether it is saved afterwards.
    ///
    /// The store is written first; the snapshot only changes once the write succeeded.
    pub async fn toggle(&self, video_id: &str) -> PortResult<bool> {
        let _guard = self.toggle_lock.lock().await;

        if self.is_saved(video_id) {
            self.store
                .remove_saved(self.user_id, self.kind, video_id)
                .await?;
            self.lock_snapshot().retain(|v| v.video_id != video_id);
            info!(user_id = %self.user_id, kind = self.kind.as_str(), video_id, "Removed saved video");
            Ok(false)
        } else {
            let video = SavedVideo::new(video_id, Utc::now());
            self.store.add_saved(self.user_id, self.kind, &video).await?;
            self.lock_snapshot().insert(0, video);
            info!(user_id = %self.user_id, kind = self.kind.as_str(), video_id, "Saved video");
            Ok(true)
        }
    }

    /// Membership against the last-synced snapshot. Never touches the store.
    pub fn is_saved(&self, video_id: &str) -> bool {
        self.lock_snapshot().iter().any(|v| v.video_id == video_id)
    }

    pub fn videos(&self) -> Vec<SavedVideo> {
        self.lock_snapshot().clone()
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, Vec<SavedVideo>> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
