//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiPromptAdapter},
    config::Config,
    error::ApiError,
    web::{
        require_auth,
        rest::{
            create_share_handler, generate_prompts_handler, get_share_handler, health_handler,
            list_prompts_handler, list_saved_handler, record_watch_handler, saved_status_handler,
            start_monitoring_handler, stop_monitoring_handler, toggle_saved_handler, ApiDoc,
        },
        state::{AppState, SavedServices},
        ws_handler,
    },
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use clipfeed_core::{
    profile::ProfileService, prompts::PromptGenerator, share::ShareService,
    watch_monitor::WatchCountMonitor,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Services ---
    let llm_adapter = Arc::new(OpenAiPromptAdapter::new(&config.llm));
    let generator = Arc::new(PromptGenerator::new(llm_adapter, config.llm.clone()));
    let profiles = Arc::new(ProfileService::new(
        db_adapter.clone(),
        db_adapter.clone(),
        generator.clone(),
    ));
    let monitor = Arc::new(WatchCountMonitor::new(db_adapter.clone(), profiles.clone()));
    let shares = Arc::new(ShareService::new(db_adapter.clone()));
    let saved = SavedServices::new(db_adapter.clone(), config.saved_cache_capacity);

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        identity: db_adapter.clone(),
        watch_counts: db_adapter.clone(),
        prompts: db_adapter.clone(),
        changes: db_adapter,
        monitor,
        generator,
        profiles,
        shares,
        saved,
    });

    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(health_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/monitoring",
            post(start_monitoring_handler).delete(stop_monitoring_handler),
        )
        .route("/videos/{video_id}/watched", post(record_watch_handler))
        .route("/saved/{kind}", get(list_saved_handler))
        .route("/saved/{kind}/{video_id}", get(saved_status_handler))
        .route("/saved/{kind}/{video_id}/toggle", post(toggle_saved_handler))
        .route("/prompts", get(list_prompts_handler))
        .route("/prompts/generate", post(generate_prompts_handler))
        .route("/shares", post(create_share_handler))
        .route("/shares/{share_id}", get(get_share_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
