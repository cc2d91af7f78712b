//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-user saved-video cache.

use std::sync::Arc;

use clipfeed_core::domain::SavedKind;
use clipfeed_core::ports::{
    ChangeFeed, IdentityService, PortError, PortResult, PromptStore, SavedVideoStore,
    WatchCountStore,
};
use clipfeed_core::profile::ProfileService;
use clipfeed_core::prompts::PromptGenerator;
use clipfeed_core::saved::SavedVideoService;
use clipfeed_core::share::ShareService;
use clipfeed_core::watch_monitor::WatchCountMonitor;
use moka::future::Cache;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
///
/// Every coordinating service exists exactly once and is reached through here.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityService>,
    pub watch_counts: Arc<dyn WatchCountStore>,
    pub prompts: Arc<dyn PromptStore>,
    pub changes: Arc<dyn ChangeFeed>,
    pub monitor: Arc<WatchCountMonitor>,
    pub generator: Arc<PromptGenerator>,
    pub profiles: Arc<ProfileService>,
    pub shares: Arc<ShareService>,
    pub saved: SavedServices,
}

//=========================================================================================
// SavedServices (one SavedVideoService per user and collection)
//=========================================================================================

/// A bounded cache of loaded saved-video services keyed by user and collection.
#[derive(Clone)]
pub struct SavedServices {
    store: Arc<dyn SavedVideoStore>,
    cache: Cache<(Uuid, SavedKind), Arc<SavedVideoService>>,
}

impl SavedServices {
    pub fn new(store: Arc<dyn SavedVideoStore>, capacity: u64) -> Self {
        Self {
            store,
            cache: Cache::new(capacity),
        }
    }

    /// Returns the user's service, loading its snapshot from the store on first use.
    ///
    /// A failed load is not cached and keeps its original error kind.
    pub async fn get(&self, user_id: Uuid, kind: SavedKind) -> PortResult<Arc<SavedVideoService>> {
        let store = self.store.clone();
        self.cache
            .try_get_with((user_id, kind), async move {
                let service = SavedVideoService::new(store, user_id, kind);
                service.load_videos().await?;
                Ok::<_, PortError>(Arc::new(service))
            })
            .await
            .map_err(|e| (*e).clone())
    }
}
