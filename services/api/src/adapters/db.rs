//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the store ports from the `core` crate. It handles all interactions with the
//! PostgreSQL database using `sqlx`, and publishes every change it writes on an
//! in-process broadcast channel that backs the push-style listeners.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clipfeed_core::domain::{
    ChangeEvent, GeneratedPrompt, PromptGeneration, SavedKind, SavedVideo, Share, WatchCounts,
};
use clipfeed_core::ports::{
    ChangeFeed, ChangeStream, IdentityService, PortError, PortResult, PromptStore,
    SavedVideoStore, ShareStore, WatchCountStore, WatchCountStream,
};
use clipfeed_core::schema::GenerationMode;
use sqlx::{FromRow, PgPool};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffer for the change feed. Slow listeners skip ahead and only see later snapshots.
const CHANGE_FEED_CAPACITY: usize = 1024;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every store port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    fn publish(&self, event: ChangeEvent) {
        // A send error only means nobody is listening.
        let _ = self.changes.send(event);
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct WatchCountsRecord {
    user_id: Uuid,
    videos_watched_since_last_profile: i64,
    last_profile_update: Option<DateTime<Utc>>,
}
impl WatchCountsRecord {
    fn to_domain(self) -> PortResult<WatchCounts> {
        let watched = u32::try_from(self.videos_watched_since_last_profile).map_err(|_| {
            PortError::Unexpected(format!(
                "watch counter out of range for user {}: {}",
                self.user_id, self.videos_watched_since_last_profile
            ))
        })?;
        Ok(WatchCounts {
            user_id: self.user_id,
            videos_watched_since_last_profile: watched,
            last_profile_update: self.last_profile_update,
        })
    }
}

#[derive(FromRow)]
struct SavedVideoRecord {
    video_id: String,
    saved_at: DateTime<Utc>,
}
impl SavedVideoRecord {
    fn to_domain(self) -> SavedVideo {
        SavedVideo::new(self.video_id, self.saved_at)
    }
}

#[derive(FromRow)]
struct ShareRecord {
    id: Uuid,
    video_id: String,
    shared_by: Uuid,
    user_name: String,
    shared_at: DateTime<Utc>,
}
impl ShareRecord {
    fn to_domain(self) -> Share {
        Share {
            id: self.id,
            video_id: self.video_id,
            shared_by: self.shared_by,
            user_name: self.user_name,
            shared_at: self.shared_at,
        }
    }
}

#[derive(FromRow)]
struct GeneratedPromptRecord {
    id: Uuid,
    user_id: Uuid,
    mode: String,
    prompt_text: String,
    parent_ids: Vec<String>,
    created_at: DateTime<Utc>,
}
impl GeneratedPromptRecord {
    fn to_domain(self) -> PortResult<GeneratedPrompt> {
        let mode = GenerationMode::parse(&self.mode).ok_or_else(|| {
            PortError::Unexpected(format!("prompt {} has unknown mode '{}'", self.id, self.mode))
        })?;
        let generation = match mode {
            GenerationMode::Profile | GenerationMode::Random => {
                PromptGeneration::new(self.prompt_text)
            }
            GenerationMode::Mutation => {
                let parent_id = self.parent_ids.into_iter().next().ok_or_else(|| {
                    PortError::Unexpected(format!("mutation prompt {} has no parent", self.id))
                })?;
                PromptGeneration::mutation(self.prompt_text, parent_id)
            }
            GenerationMode::Crossover => {
                PromptGeneration::crossover(self.prompt_text, self.parent_ids).map_err(|e| {
                    PortError::Unexpected(format!("crossover prompt {}: {}", self.id, e))
                })?
            }
        };
        Ok(GeneratedPrompt {
            id: self.id,
            user_id: self.user_id,
            mode,
            generation,
            created_at: self.created_at,
        })
    }
}

fn parents_of(generation: &PromptGeneration) -> Vec<String> {
    match generation {
        PromptGeneration::Fresh { .. } => Vec::new(),
        PromptGeneration::Mutation { parent_id, .. } => vec![parent_id.clone()],
        PromptGeneration::Crossover { parent_ids, .. } => parent_ids.clone(),
    }
}

//=========================================================================================
// `WatchCountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl WatchCountStore for DbAdapter {
    async fn ensure_watch_counts(&self, user_id: Uuid) -> PortResult<WatchCounts> {
        sqlx::query("INSERT INTO watch_counts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, WatchCountsRecord>(
            "SELECT user_id, videos_watched_since_last_profile, last_profile_update \
             FROM watch_counts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Watch counts for user {} not found", user_id))
            }
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    async fn record_watch(&self, user_id: Uuid) -> PortResult<WatchCounts> {
        let record = sqlx::query_as::<_, WatchCountsRecord>(
            "INSERT INTO watch_counts (user_id, videos_watched_since_last_profile) VALUES ($1, 1) \
             ON CONFLICT (user_id) DO UPDATE \
             SET videos_watched_since_last_profile = watch_counts.videos_watched_since_last_profile + 1 \
             RETURNING user_id, videos_watched_since_last_profile, last_profile_update",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let counts = record.to_domain()?;
        self.publish(ChangeEvent::WatchCounts(counts.clone()));
        Ok(counts)
    }

    async fn claim_initial_profile(
        &self,
        user_id: Uuid,
        observed_count: u32,
        at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let record = sqlx::query_as::<_, WatchCountsRecord>(
            "UPDATE watch_counts \
             SET videos_watched_since_last_profile = 0, last_profile_update = $3 \
             WHERE user_id = $1 \
               AND videos_watched_since_last_profile = $2 \
               AND last_profile_update IS NULL \
             RETURNING user_id, videos_watched_since_last_profile, last_profile_update",
        )
        .bind(user_id)
        .bind(i64::from(observed_count))
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match record {
            Some(record) => {
                self.publish(ChangeEvent::WatchCounts(record.to_domain()?));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn watch_counts(&self, user_id: Uuid) -> PortResult<WatchCountStream> {
        let mut rx = self.changes.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(ChangeEvent::WatchCounts(counts)) if counts.user_id == user_id => yield counts,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%user_id, skipped, "Watch-count listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

//=========================================================================================
// `SavedVideoStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SavedVideoStore for DbAdapter {
    async fn list_saved(&self, user_id: Uuid, kind: SavedKind) -> PortResult<Vec<SavedVideo>> {
        let records = sqlx::query_as::<_, SavedVideoRecord>(
            "SELECT video_id, saved_at FROM saved_videos \
             WHERE user_id = $1 AND kind = $2 ORDER BY saved_at DESC",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn add_saved(
        &self,
        user_id: Uuid,
        kind: SavedKind,
        video: &SavedVideo,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO saved_videos (user_id, kind, video_id, saved_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, kind, video_id) DO UPDATE SET saved_at = EXCLUDED.saved_at",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(&video.video_id)
        .bind(video.saved_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        self.publish(ChangeEvent::SavedVideos { user_id, kind });
        Ok(())
    }

    async fn remove_saved(&self, user_id: Uuid, kind: SavedKind, video_id: &str) -> PortResult<()> {
        let result = sqlx::query(
            "DELETE FROM saved_videos WHERE user_id = $1 AND kind = $2 AND video_id = $3",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(video_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            debug!(%user_id, kind = kind.as_str(), video_id, "Removed a video that was not saved");
        }
        self.publish(ChangeEvent::SavedVideos { user_id, kind });
        Ok(())
    }
}

//=========================================================================================
// `PromptStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl PromptStore for DbAdapter {
    async fn prompts_for_videos(&self, video_ids: &[String]) -> PortResult<Vec<String>> {
        let prompts: Vec<(String,)> = sqlx::query_as(
            "SELECT prompt_text FROM video_prompts WHERE video_id = ANY($1)",
        )
        .bind(video_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(prompts.into_iter().map(|(p,)| p).collect())
    }

    async fn save_generated(
        &self,
        user_id: Uuid,
        mode: GenerationMode,
        generations: &[PromptGeneration],
    ) -> PortResult<Vec<GeneratedPrompt>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let mut saved = Vec::with_capacity(generations.len());
        for generation in generations {
            let record = sqlx::query_as::<_, GeneratedPromptRecord>(
                "INSERT INTO generated_prompts (id, user_id, mode, prompt_text, parent_ids, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING id, user_id, mode, prompt_text, parent_ids, created_at",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(mode.as_str())
            .bind(generation.prompt())
            .bind(parents_of(generation))
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(unexpected)?;
            saved.push(record.to_domain()?);
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(saved)
    }

    async fn get_generated(&self, user_id: Uuid, ids: &[Uuid]) -> PortResult<Vec<GeneratedPrompt>> {
        let records = sqlx::query_as::<_, GeneratedPromptRecord>(
            "SELECT id, user_id, mode, prompt_text, parent_ids, created_at \
             FROM generated_prompts WHERE user_id = $1 AND id = ANY($2)",
        )
        .bind(user_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_generated(&self, user_id: Uuid, limit: u32) -> PortResult<Vec<GeneratedPrompt>> {
        let records = sqlx::query_as::<_, GeneratedPromptRecord>(
            "SELECT id, user_id, mode, prompt_text, parent_ids, created_at \
             FROM generated_prompts WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }
}

//=========================================================================================
// `ShareStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ShareStore for DbAdapter {
    async fn create_share(&self, share: &Share) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO shares (id, video_id, shared_by, user_name, shared_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(share.id)
        .bind(&share.video_id)
        .bind(share.shared_by)
        .bind(&share.user_name)
        .bind(share.shared_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_share(&self, share_id: Uuid) -> PortResult<Share> {
        let record = sqlx::query_as::<_, ShareRecord>(
            "SELECT id, video_id, shared_by, user_name, shared_at FROM shares WHERE id = $1",
        )
        .bind(share_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Share {} not found", share_id)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }
}

//=========================================================================================
// `IdentityService` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityService for DbAdapter {
    async fn validate_token(&self, token: &str) -> PortResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        row.map(|(user_id,)| user_id).ok_or(PortError::Unauthorized)
    }
}

//=========================================================================================
// `ChangeFeed` Trait Implementation
//=========================================================================================

impl ChangeFeed for DbAdapter {
    fn subscribe(&self, user_id: Uuid) -> ChangeStream {
        let mut rx = self.changes.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) if event.user_id() == user_id => yield event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%user_id, skipped, "Change listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
