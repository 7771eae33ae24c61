use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

mod config;
mod download;
mod extract;
mod llm;
mod models;
mod settings;

use config::AppConfig;
use extract::ExtractionError;
use llm::{CompletionClient, UpstreamError};
use models::{
    AudioResponse, ExtractAudioRequest, ExtractImageRequest, GenerateRequest, ImageResponse,
    SaveRequest, SaveResponse,
};
use settings::{HistoryEntry, JsonFileStore, MediaKind, Settings, SettingsStore, StoreError};

struct AppState {
    config: AppConfig,
    store: SettingsStore,
    llm: CompletionClient,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();

    let store = if config.ephemeral {
        tracing::warn!("ephemeral mode: settings and history are kept in memory only");
        SettingsStore::in_memory()
    } else {
        let kv = JsonFileStore::open(config.state_file()).map_err(std::io::Error::other)?;
        tracing::info!(path = %kv.path().display(), "loaded state store");
        SettingsStore::new(Arc::new(kv))
    };
    let llm = CompletionClient::new(&config).map_err(std::io::Error::other)?;

    let state = Arc::new(AppState {
        store,
        llm,
        config,
    });

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract/image", post(extract_image_endpoint))
        .route("/extract/audio", post(extract_audio_endpoint))
        .route("/generate/image", post(generate_image_endpoint))
        .route("/generate/audio", post(generate_audio_endpoint))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/history", get(get_history))
        .route("/save", post(save_endpoint))
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────────────────────────

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Extraction(ExtractionError),
    Upstream(UpstreamError),
    Store(StoreError),
    Download(download::DownloadError),
}

impl From<ExtractionError> for ApiError {
    fn from(e: ExtractionError) -> Self {
        ApiError::Extraction(e)
    }
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        ApiError::Upstream(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<download::DownloadError> for ApiError {
    fn from(e: download::DownloadError) -> Self {
        ApiError::Download(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use download::DownloadError;
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Extraction(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            ApiError::Upstream(e) => {
                tracing::error!(error = %e, "completion request failed");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            ApiError::Store(StoreError::Invalid(msg)) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "state store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Download(e) => match e {
                DownloadError::InvalidUrl(_) | DownloadError::InvalidFileName(_) => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                DownloadError::Upstream(_) | DownloadError::Request(_) => {
                    (StatusCode::BAD_GATEWAY, e.to_string())
                }
                DownloadError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            },
        };
        (status, Json(json!({"detail": detail}))).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn extract_image_endpoint(
    Json(req): Json<ExtractImageRequest>,
) -> Result<Json<ImageResponse>, ApiError> {
    let m = extract::extract_image(&req.response_text, &req.query_params)?;
    Ok(Json(ImageResponse {
        image_url: m.url,
        tier: m.tier,
    }))
}

async fn extract_audio_endpoint(
    Json(req): Json<ExtractAudioRequest>,
) -> Result<Json<AudioResponse>, ApiError> {
    let m = extract::extract_audio(&req.response_text)?;
    Ok(Json(AudioResponse {
        audio_url: m.audio_url,
        audio_text: m.audio_text,
    }))
}

async fn generate_image_endpoint(
    State(state): State<SharedState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<ImageResponse>, ApiError> {
    let idea = require_prompt(&req.prompt)?;
    let settings = with_store(&state, |store| store.load_settings()).await?;
    let query = settings.image_params.to_query();

    let text = state
        .llm
        .complete(&settings, &llm::image_prompt(idea, &query))
        .await?;
    let m = extract::extract_image(&text, &query)?;

    let entry = HistoryEntry::new(MediaKind::Image, idea, &m.url, None);
    with_store(&state, move |store| store.push_history(entry)).await?;
    tracing::info!(tier = ?m.tier, url = %m.url, "image generated");

    Ok(Json(ImageResponse {
        image_url: m.url,
        tier: m.tier,
    }))
}

async fn generate_audio_endpoint(
    State(state): State<SharedState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<AudioResponse>, ApiError> {
    let idea = require_prompt(&req.prompt)?;
    let settings = with_store(&state, |store| store.load_settings()).await?;
    let query = settings.audio_params.to_query();

    let text = state
        .llm
        .complete(&settings, &llm::audio_prompt(idea, &query))
        .await?;
    let m = extract::extract_audio(&text)?;

    let entry = HistoryEntry::new(
        MediaKind::Audio,
        idea,
        &m.audio_url,
        Some(m.audio_text.clone()),
    );
    with_store(&state, move |store| store.push_history(entry)).await?;
    tracing::info!(url = %m.audio_url, "audio generated");

    Ok(Json(AudioResponse {
        audio_url: m.audio_url,
        audio_text: m.audio_text,
    }))
}

async fn get_settings(State(state): State<SharedState>) -> Result<Json<Settings>, ApiError> {
    let settings = with_store(&state, |store| store.load_settings()).await?;
    Ok(Json(settings))
}

async fn put_settings(
    State(state): State<SharedState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    let to_save = settings.clone();
    with_store(&state, move |store| store.save_settings(&to_save)).await?;
    tracing::info!(service = ?settings.selected_service, "settings updated");
    Ok(Json(settings))
}

async fn get_history(
    State(state): State<SharedState>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let history = with_store(&state, |store| store.history()).await?;
    Ok(Json(history))
}

async fn save_endpoint(
    State(state): State<SharedState>,
    Json(req): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, ApiError> {
    let path = download::save_image(
        state.llm.http(),
        &req.image_url,
        &state.config.download_dir,
        req.file_name.as_deref(),
    )
    .await?;
    Ok(Json(SaveResponse {
        file_path: path.display().to_string(),
    }))
}

/// Run a store call on the blocking pool; the file-backed store does
/// synchronous I/O under a lock.
async fn with_store<T, F>(state: &SharedState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SettingsStore) -> Result<T, StoreError> + Send + 'static,
{
    let state = Arc::clone(state);
    let result = tokio::task::spawn_blocking(move || f(&state.store))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
    Ok(result?)
}

fn require_prompt(prompt: &str) -> Result<&str, ApiError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("Prompt must not be empty".to_string()));
    }
    Ok(trimmed)
}
