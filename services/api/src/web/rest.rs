//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use clipfeed_core::domain::{GeneratedPrompt, SavedKind, SavedVideo, Share, WatchCounts};
use clipfeed_core::ports::PortError;
use clipfeed_core::prompts::ParentPrompt;
use clipfeed_core::schema::GenerationMode;
use clipfeed_core::share::ShareLink;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::port_error_response;
use crate::web::state::AppState;

/// Prompts produced per request when the caller does not ask for a count.
const DEFAULT_PROMPT_COUNT: usize = 5;
const MAX_PROMPT_COUNT: usize = 20;
const PROMPT_LIST_LIMIT: u32 = 50;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        start_monitoring_handler,
        stop_monitoring_handler,
        record_watch_handler,
        list_saved_handler,
        saved_status_handler,
        toggle_saved_handler,
        generate_prompts_handler,
        list_prompts_handler,
        create_share_handler,
        get_share_handler,
    ),
    components(
        schemas(
            HealthResponse,
            MonitoringResponse,
            WatchCountsResponse,
            SavedVideoResponse,
            SavedStatusResponse,
            GeneratePromptsRequest,
            GeneratedPromptResponse,
            CreateShareRequest,
            ShareResponse,
        )
    ),
    tags(
        (name = "Clipfeed API", description = "Likes, bookmarks, watch counting, prompt generation and sharing.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize, ToSchema)]
pub struct MonitoringResponse {
    user_id: Uuid,
    monitoring: bool,
}

#[derive(Serialize, ToSchema)]
pub struct WatchCountsResponse {
    videos_watched_since_last_profile: u32,
    last_profile_update: Option<DateTime<Utc>>,
}

impl From<WatchCounts> for WatchCountsResponse {
    fn from(counts: WatchCounts) -> Self {
        Self {
            videos_watched_since_last_profile: counts.videos_watched_since_last_profile,
            last_profile_update: counts.last_profile_update,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SavedVideoResponse {
    video_id: String,
    saved_at: DateTime<Utc>,
}

impl From<SavedVideo> for SavedVideoResponse {
    fn from(video: SavedVideo) -> Self {
        Self {
            video_id: video.video_id,
            saved_at: video.saved_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SavedStatusResponse {
    video_id: String,
    saved: bool,
}

/// Asks for a batch of new prompts.
///
/// `parent_ids` are ids of the caller's earlier generated prompts and are
/// required for `mutation` (one or more) and `crossover` (two or more).
#[derive(Deserialize, ToSchema)]
pub struct GeneratePromptsRequest {
    #[schema(value_type = String, example = "crossover")]
    mode: GenerationMode,
    #[serde(default)]
    parent_ids: Vec<Uuid>,
    count: Option<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct GeneratedPromptResponse {
    id: Uuid,
    mode: String,
    prompt: String,
    parent_ids: Vec<String>,
    created_at: DateTime<Utc>,
}

impl From<GeneratedPrompt> for GeneratedPromptResponse {
    fn from(generated: GeneratedPrompt) -> Self {
        let parent_ids = match (generated.generation.parent_id(), generated.generation.parent_ids()) {
            (Some(parent), _) => vec![parent.to_string()],
            (None, Some(parents)) => parents.to_vec(),
            (None, None) => Vec::new(),
        };
        Self {
            id: generated.id,
            mode: generated.mode.as_str().to_string(),
            prompt: generated.generation.prompt().to_string(),
            parent_ids,
            created_at: generated.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateShareRequest {
    video_id: String,
    user_name: String,
}

#[derive(Serialize, ToSchema)]
pub struct ShareResponse {
    share_id: Uuid,
    video_id: String,
    shared_by: Uuid,
    user_name: String,
    shared_at: DateTime<Utc>,
    link: String,
}

impl ShareResponse {
    fn new(share: Share, link: ShareLink) -> Self {
        Self {
            share_id: share.id,
            video_id: share.video_id,
            shared_by: share.shared_by,
            user_name: share.user_name,
            shared_at: share.shared_at,
            link: link.to_string(),
        }
    }
}

/// Logs a port error and turns it into the handler's rejection.
fn reject(context: &str, e: PortError) -> (StatusCode, String) {
    error!("{}: {:?}", context, e);
    port_error_response(&e)
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Start watch-count monitoring for the signed-in user. Idempotent.
#[utoipa::path(
    post,
    path = "/monitoring",
    responses(
        (status = 200, description = "Monitoring is active", body = MonitoringResponse),
        (status = 401, description = "Missing or invalid credential"),
        (status = 500, description = "Watch counts could not be initialized")
    )
)]
pub async fn start_monitoring_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .monitor
        .start_monitoring(user_id)
        .await
        .map_err(|e| reject("Failed to start monitoring", e))?;
    Ok(Json(MonitoringResponse {
        user_id,
        monitoring: true,
    }))
}

/// Stop watch-count monitoring for the signed-in user, even if sockets are open.
#[utoipa::path(
    delete,
    path = "/monitoring",
    responses(
        (status = 200, description = "Monitoring is stopped", body = MonitoringResponse),
        (status = 401, description = "Missing or invalid credential")
    )
)]
pub async fn stop_monitoring_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Json<MonitoringResponse> {
    app_state.monitor.stop_monitoring(user_id);
    Json(MonitoringResponse {
        user_id,
        monitoring: false,
    })
}

/// Record that the signed-in user watched a video.
#[utoipa::path(
    post,
    path = "/videos/{video_id}/watched",
    params(("video_id" = String, Path, description = "The watched video.")),
    responses(
        (status = 200, description = "Updated watch counts", body = WatchCountsResponse),
        (status = 401, description = "Missing or invalid credential")
    )
)]
pub async fn record_watch_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(video_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let counts = app_state
        .watch_counts
        .record_watch(user_id)
        .await
        .map_err(|e| reject("Failed to record watch", e))?;
    info!(%user_id, video_id, count = counts.videos_watched_since_last_profile, "Recorded watch");
    Ok(Json(WatchCountsResponse::from(counts)))
}

/// Reload and list the user's likes or bookmarks, most recent first.
#[utoipa::path(
    get,
    path = "/saved/{kind}",
    params(("kind" = String, Path, description = "`likes` or `bookmarks`.")),
    responses(
        (status = 200, description = "Saved videos", body = [SavedVideoResponse]),
        (status = 400, description = "Unknown collection")
    )
)]
pub async fn list_saved_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(kind): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let kind = SavedKind::parse(&kind).map_err(|e| port_error_response(&e))?;
    let service = app_state
        .saved
        .get(user_id, kind)
        .await
        .map_err(|e| reject("Failed to open saved videos", e))?;
    let videos = service
        .load_videos()
        .await
        .map_err(|e| reject("Failed to load saved videos", e))?;
    Ok(Json(
        videos
            .into_iter()
            .map(SavedVideoResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Whether a video is in the user's likes or bookmarks.
#[utoipa::path(
    get,
    path = "/saved/{kind}/{video_id}",
    params(
        ("kind" = String, Path, description = "`likes` or `bookmarks`."),
        ("video_id" = String, Path, description = "The video to look up.")
    ),
    responses((status = 200, description = "Membership", body = SavedStatusResponse))
)]
pub async fn saved_status_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((kind, video_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let kind = SavedKind::parse(&kind).map_err(|e| port_error_response(&e))?;
    let service = app_state
        .saved
        .get(user_id, kind)
        .await
        .map_err(|e| reject("Failed to open saved videos", e))?;
    let saved = service.is_saved(&video_id);
    Ok(Json(SavedStatusResponse { video_id, saved }))
}

/// Like/unlike or bookmark/unbookmark a video.
#[utoipa::path(
    post,
    path = "/saved/{kind}/{video_id}/toggle",
    params(
        ("kind" = String, Path, description = "`likes` or `bookmarks`."),
        ("video_id" = String, Path, description = "The video to toggle.")
    ),
    responses((status = 200, description = "Membership after the toggle", body = SavedStatusResponse))
)]
pub async fn toggle_saved_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((kind, video_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let kind = SavedKind::parse(&kind).map_err(|e| port_error_response(&e))?;
    let service = app_state
        .saved
        .get(user_id, kind)
        .await
        .map_err(|e| reject("Failed to open saved videos", e))?;
    let saved = service
        .toggle(&video_id)
        .await
        .map_err(|e| reject("Failed to toggle saved video", e))?;
    Ok(Json(SavedStatusResponse { video_id, saved }))
}

/// Generate new prompts for the signed-in user.
#[utoipa::path(
    post,
    path = "/prompts/generate",
    request_body = GeneratePromptsRequest,
    responses(
        (status = 201, description = "Generated and stored prompts", body = [GeneratedPromptResponse]),
        (status = 400, description = "Invalid mode or parents"),
        (status = 404, description = "A parent prompt does not exist"),
        (status = 502, description = "The language model failed")
    )
)]
pub async fn generate_prompts_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<GeneratePromptsRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let count = req
        .count
        .unwrap_or(DEFAULT_PROMPT_COUNT)
        .clamp(1, MAX_PROMPT_COUNT);

    let result = generate(&app_state, user_id, &req, count).await;

    let generated = result.map_err(|e| reject("Failed to generate prompts", e))?;
    info!(%user_id, mode = req.mode.as_str(), count = generated.len(), "Generated prompts");
    Ok((
        StatusCode::CREATED,
        Json(
            generated
                .into_iter()
                .map(GeneratedPromptResponse::from)
                .collect::<Vec<_>>(),
        ),
    ))
}

/// Runs one generation in the requested mode and stores the results.
async fn generate(
    app_state: &AppState,
    user_id: Uuid,
    req: &GeneratePromptsRequest,
    count: usize,
) -> Result<Vec<GeneratedPrompt>, PortError> {
    let generations = match req.mode {
        GenerationMode::Profile => {
            return app_state.profiles.generate_for_user(user_id, count).await
        }
        GenerationMode::Random => app_state.generator.random(count).await?,
        GenerationMode::Mutation => {
            let parents = load_parents(app_state, user_id, &req.parent_ids).await?;
            app_state.generator.mutate(&parents).await?
        }
        GenerationMode::Crossover => {
            let parents = load_parents(app_state, user_id, &req.parent_ids).await?;
            app_state.generator.crossover(&parents, count).await?
        }
    };
    app_state
        .prompts
        .save_generated(user_id, req.mode, &generations.value)
        .await
}

/// Loads the caller's own prompts to use as parents; every id must resolve.
async fn load_parents(
    app_state: &AppState,
    user_id: Uuid,
    parent_ids: &[Uuid],
) -> Result<Vec<ParentPrompt>, PortError> {
    if parent_ids.is_empty() {
        return Err(PortError::InvalidInput(
            "parent_ids is required for this mode".to_string(),
        ));
    }
    let found = app_state.prompts.get_generated(user_id, parent_ids).await?;
    if let Some(missing) = parent_ids
        .iter()
        .find(|id| !found.iter().any(|p| p.id == **id))
    {
        return Err(PortError::NotFound(format!("Prompt {} not found", missing)));
    }
    Ok(found.iter().map(ParentPrompt::from).collect())
}

/// List the signed-in user's most recent generated prompts.
#[utoipa::path(
    get,
    path = "/prompts",
    responses((status = 200, description = "Generated prompts, newest first", body = [GeneratedPromptResponse]))
)]
pub async fn list_prompts_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let generated = app_state
        .prompts
        .list_generated(user_id, PROMPT_LIST_LIMIT)
        .await
        .map_err(|e| reject("Failed to list prompts", e))?;
    Ok(Json(
        generated
            .into_iter()
            .map(GeneratedPromptResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Share a video and get its deep link.
#[utoipa::path(
    post,
    path = "/shares",
    request_body = CreateShareRequest,
    responses(
        (status = 201, description = "Share created", body = ShareResponse),
        (status = 400, description = "Invalid video id")
    )
)]
pub async fn create_share_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateShareRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (share, link) = app_state
        .shares
        .create_share(&req.video_id, user_id, &req.user_name)
        .await
        .map_err(|e| reject("Failed to create share", e))?;
    Ok((StatusCode::CREATED, Json(ShareResponse::new(share, link))))
}

/// Resolve a share id from an inbound deep link.
#[utoipa::path(
    get,
    path = "/shares/{share_id}",
    params(("share_id" = Uuid, Path, description = "The share to resolve.")),
    responses(
        (status = 200, description = "The share", body = ShareResponse),
        (status = 404, description = "Unknown share")
    )
)]
pub async fn get_share_handler(
    State(app_state): State<Arc<AppState>>,
    Path(share_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let share = app_state
        .shares
        .resolve(share_id)
        .await
        .map_err(|e| reject("Failed to resolve share", e))?;
    let link = ShareLink::for_share(&share);
    Ok(Json(ShareResponse::new(share, link)))
}
