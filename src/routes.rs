use crate::config::{ApiKeys, Config, KeyStatus};
use crate::error::{SessionError, SessionResult};
use crate::models::{GenerationSettings, Outline};
use crate::services::llm::HttpProviders;
use crate::services::session::{GenerationReport, Session, UploadOutcome};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post, put},
};
use http::header::{self, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

type SessionHandle = Arc<Mutex<Session>>;

struct SessionSlot {
    session: SessionHandle,
    last_used: Instant,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        SessionSlot {
            session: Arc::new(Mutex::new(session)),
            last_used: Instant::now(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    providers: HttpProviders,
    sessions: Arc<RwLock<HashMap<Uuid, SessionSlot>>>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        AppState {
            providers: HttpProviders::new(config.clone()),
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn session(&self, id: Uuid) -> SessionResult<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(&id)
            .ok_or(SessionError::SessionNotFound(id))?;
        slot.last_used = Instant::now();
        Ok(slot.session.clone())
    }

    /// Drops sessions untouched for `ttl` that no request is holding.
    /// Dropping a session removes its work directory.
    pub async fn reap_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, slot| {
            let idle = slot.last_used.elapsed() >= ttl && Arc::strong_count(&slot.session) == 1;
            if idle {
                info!("Session {} expired", id);
            }
            !idle
        });
        before - sessions.len()
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(view_session).delete(delete_session))
        .route("/sessions/:id/keys", put(set_keys))
        .route("/sessions/:id/keys/file", post(load_keys_file))
        .route("/sessions/:id/settings", put(set_settings))
        .route("/sessions/:id/upload", post(upload_file))
        .route("/sessions/:id/outline", post(process_outline))
        .route("/sessions/:id/selection", put(select_chapters))
        .route("/sessions/:id/generate", post(generate))
        .route("/sessions/:id/documents/:chapter", get(download_document))
        .route("/sessions/:id/outline.json", get(download_outline))
        .route("/sessions/:id/materials.json", get(download_materials))
        .route("/sessions/:id/image-prompts.txt", get(download_image_prompts))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::AllowMethods::any())
                .allow_headers(tower_http::cors::AllowHeaders::any()),
        )
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Course Material Generator</title>
    <meta charset="utf-8">
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        .info-box { background-color: #f0f8ff; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { background-color: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 4px; font-family: monospace; }
    </style>
</head>
<body>
    <h1>Course Material Generator</h1>

    <div class="info-box">
        <p>Upload a course outline, pick chapters, and download one Word document of reading material per chapter.</p>
    </div>

    <h2>Workflow:</h2>
    <div class="endpoint">POST /sessions - Start a session</div>
    <div class="endpoint">PUT /sessions/{id}/keys - Gemini and DeepSeek API keys (or POST /sessions/{id}/keys/file)</div>
    <div class="endpoint">PUT /sessions/{id}/settings - Temperature, images, locality</div>
    <div class="endpoint">POST /sessions/{id}/upload - Multipart 'file': .docx or .txt outline, or saved .json</div>
    <div class="endpoint">POST /sessions/{id}/outline - Extract chapters and topics</div>
    <div class="endpoint">PUT /sessions/{id}/selection - {"chapters": [0, 1]}</div>
    <div class="endpoint">POST /sessions/{id}/generate - Write materials for the selected chapters</div>
    <div class="endpoint">GET /sessions/{id} - Current state</div>
    <div class="endpoint">GET /sessions/{id}/documents/{chapter} - Download a chapter document</div>
    <div class="endpoint">GET /sessions/{id}/outline.json, /materials.json, /image-prompts.txt - Exports</div>
</body>
</html>
"#,
    )
}

async fn health_check() -> &'static str {
    "OK"
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let id = Uuid::new_v4();
    let session = Session::new(
        id,
        state.config.output_dir.join(id.to_string()),
        state.config.default_keys.clone(),
    );
    state
        .sessions
        .write()
        .await
        .insert(id, SessionSlot::new(session));
    info!("Session {} created", id);
    (StatusCode::CREATED, Json(json!({ "id": id })))
}

async fn view_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResult<Json<serde_json::Value>> {
    let handle = state.session(id).await?;
    let session = handle.lock().await;
    Ok(Json(serde_json::to_value(session.view())?))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResult<StatusCode> {
    let slot = state
        .sessions
        .write()
        .await
        .remove(&id)
        .ok_or(SessionError::SessionNotFound(id))?;
    slot.session.lock().await.invalidate();
    info!("Session {} closed", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn set_keys(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(keys): Json<ApiKeys>,
) -> SessionResult<Json<KeyStatus>> {
    let handle = state.session(id).await?;
    let status = handle.lock().await.set_keys(keys);
    Ok(Json(status))
}

async fn load_keys_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> SessionResult<Json<KeyStatus>> {
    let (_, bytes) = multipart_field(multipart, "keys_file").await?;
    let handle = state.session(id).await?;
    let status = handle.lock().await.load_keys_file(&bytes)?;
    Ok(Json(status))
}

async fn set_settings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(settings): Json<GenerationSettings>,
) -> SessionResult<Json<GenerationSettings>> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    Ok(Json(session.set_settings(settings).clone()))
}

async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> SessionResult<Json<UploadOutcome>> {
    let (file_name, bytes) = multipart_field(multipart, "file").await?;
    let handle = state.session(id).await?;
    let outcome = handle.lock().await.upload(&file_name, &bytes)?;
    Ok(Json(outcome))
}

async fn process_outline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResult<Json<Outline>> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    let outline = session.process_outline(&state.providers).await?;
    Ok(Json(outline.clone()))
}

#[derive(Deserialize)]
struct Selection {
    chapters: Vec<usize>,
}

async fn select_chapters(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(selection): Json<Selection>,
) -> SessionResult<Json<serde_json::Value>> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    let selected = session.select(&selection.chapters)?;
    Ok(Json(json!({ "chapters": selected })))
}

async fn generate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResult<Json<GenerationReport>> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    let report = session.generate(&state.providers).await?;
    Ok(Json(report))
}

async fn download_document(
    State(state): State<AppState>,
    Path((id, chapter)): Path<(Uuid, String)>,
) -> SessionResult<Response> {
    let handle = state.session(id).await?;
    let (file_name, bytes) = handle.lock().await.document(&chapter)?;
    Ok(attachment(&file_name, DOCX_MIME, bytes))
}

async fn download_outline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResult<Response> {
    let handle = state.session(id).await?;
    let bytes = handle.lock().await.outline_json()?;
    Ok(attachment("course_outline.json", "application/json", bytes))
}

async fn download_materials(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResult<Response> {
    let handle = state.session(id).await?;
    let bytes = handle.lock().await.materials_json()?;
    Ok(attachment("course_materials.json", "application/json", bytes))
}

async fn download_image_prompts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResult<Response> {
    let handle = state.session(id).await?;
    let text = handle.lock().await.image_prompts_text()?;
    Ok(attachment(
        "image_prompts.txt",
        "text/plain; charset=utf-8",
        text.into_bytes(),
    ))
}

/// First field called `name`, with its file name.
async fn multipart_field(
    mut multipart: Multipart,
    name: &str,
) -> SessionResult<(String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SessionError::Upload(e.to_string()))?
    {
        if field.name() != Some(name) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| SessionError::Upload(e.to_string()))?;
        return Ok((file_name, data.to_vec()));
    }
    Err(SessionError::Upload(format!("missing multipart field '{}'", name)))
}

fn attachment(file_name: &str, content_type: &'static str, body: Vec<u8>) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}
