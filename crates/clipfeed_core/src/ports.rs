//! crates/clipfeed_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use uuid::Uuid;

use crate::domain::{
    ChangeEvent, GeneratedPrompt, PromptGeneration, SavedKind, SavedVideo, Share, WatchCounts,
};
use crate::llm::{LlmConfig, LlmError, LlmRequest, LlmResult};
use crate::schema::GenerationMode;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A live stream of snapshots for one user's watch counts.
pub type WatchCountStream = Pin<Box<dyn Stream<Item = WatchCounts> + Send>>;

/// A live stream of every change that concerns one user.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

//=========================================================================================
// Store Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait WatchCountStore: Send + Sync {
    /// Returns the user's record, creating it with zero counters if absent.
    async fn ensure_watch_counts(&self, user_id: Uuid) -> PortResult<WatchCounts>;

    /// Adds one watched video and returns the updated record.
    async fn record_watch(&self, user_id: Uuid) -> PortResult<WatchCounts>;

    /// Atomically claims the initial-profile trigger.
    ///
    /// Resets the counter to zero and sets `last_profile_update` to `at`, but only
    /// if the stored counter still equals `observed_count` and no profile update
    /// has been recorded yet. Returns `false` when the condition did not hold.
    async fn claim_initial_profile(
        &self,
        user_id: Uuid,
        observed_count: u32,
        at: DateTime<Utc>,
    ) -> PortResult<bool>;

    /// Subscribes to every later change of the user's record.
    async fn watch_counts(&self, user_id: Uuid) -> PortResult<WatchCountStream>;
}

#[async_trait]
pub trait SavedVideoStore: Send + Sync {
    /// Lists the user's saved videos, most recently saved first.
    async fn list_saved(&self, user_id: Uuid, kind: SavedKind) -> PortResult<Vec<SavedVideo>>;

    async fn add_saved(&self, user_id: Uuid, kind: SavedKind, video: &SavedVideo)
        -> PortResult<()>;

    async fn remove_saved(&self, user_id: Uuid, kind: SavedKind, video_id: &str)
        -> PortResult<()>;
}

#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Returns the prompts the given videos were generated from, skipping unknown videos.
    async fn prompts_for_videos(&self, video_ids: &[String]) -> PortResult<Vec<String>>;

    async fn save_generated(
        &self,
        user_id: Uuid,
        mode: GenerationMode,
        generations: &[PromptGeneration],
    ) -> PortResult<Vec<GeneratedPrompt>>;

    /// Loads the user's generated prompts with the given ids.
    async fn get_generated(&self, user_id: Uuid, ids: &[Uuid]) -> PortResult<Vec<GeneratedPrompt>>;

    async fn list_generated(&self, user_id: Uuid, limit: u32) -> PortResult<Vec<GeneratedPrompt>>;
}

#[async_trait]
pub trait ShareStore: Send + Sync {
    async fn create_share(&self, share: &Share) -> PortResult<()>;

    async fn get_share(&self, share_id: Uuid) -> PortResult<Share>;
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolves a credential token from the identity-provider exchange to a user.
    async fn validate_token(&self, token: &str) -> PortResult<Uuid>;
}

/// Push-style listener over every record of one user.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, user_id: Uuid) -> ChangeStream;
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait LanguageModelService: Send + Sync {
    /// Sends one schema-constrained completion request and returns the raw text payload.
    async fn complete(&self, config: &LlmConfig, request: &LlmRequest) -> LlmResult<String>;
}

#[async_trait]
pub trait ProfileBuilder: Send + Sync {
    /// Builds the user's first taste profile and the prompts derived from it.
    async fn build_initial_profile(&self, user_id: Uuid) -> PortResult<()>;
}
