use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use pdfchat_rag::{Answer, Document, IngestReport, Pipeline, RagError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Upload size limit for `POST /api/documents`.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceView {
    pub source: String,
    pub index: usize,
    pub start: usize,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
    pub model: String,
    pub lexical_support: f32,
    pub sources: Vec<SourceView>,
}

impl From<Answer> for AskResponse {
    fn from(answer: Answer) -> Self {
        let lexical_support = answer.lexical_support();
        Self {
            question: answer.question,
            answer: answer.text,
            model: answer.model,
            lexical_support,
            sources: answer
                .sources
                .into_iter()
                .map(|r| SourceView {
                    source: r.chunk.source,
                    index: r.chunk.index,
                    start: r.chunk.start,
                    score: r.score,
                    text: r.chunk.text,
                })
                .collect(),
        }
    }
}

/// Errors rendered as `{"error": message}` with a status matching the cause.
#[derive(Debug)]
pub enum ApiError {
    Rag(RagError),
    BadRequest(String),
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self::Rag(err)
    }
}

/// HTTP status for a pipeline error.
pub fn status_for(err: &RagError) -> StatusCode {
    match err {
        RagError::ConfigError(_) | RagError::EmptyCorpus(_) | RagError::ExtractionError { .. } => {
            StatusCode::BAD_REQUEST
        }
        RagError::IndexNotFound { .. } => StatusCode::NOT_FOUND,
        RagError::IndexFormatMismatch(_) => StatusCode::CONFLICT,
        RagError::EmbeddingError { .. } | RagError::GenerationError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        RagError::StorageError { .. } | RagError::PipelineError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Rag(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!(error = %err, "request failed");
                } else {
                    warn!(error = %err, "request rejected");
                }
                (status, err.user_message())
            }
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/documents", post(upload_documents))
        .route("/api/ask", post(ask))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let app = app_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for pdfchat server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("pdfchat listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let indexed = state.pipeline.has_index().await;
    Json(json!({ "status": "ok", "service": "pdfchat", "indexed": indexed }))
}

/// Every multipart field carrying a file name becomes one document.
async fn upload_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, ApiError> {
    let mut documents = Vec::new();
    while let Some(field) =
        multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
        documents.push(Document::new(name, bytes.to_vec()));
    }

    let report = state.pipeline.ingest(&documents).await?;
    Ok(Json(report))
}

async fn ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let top_k = request.top_k.unwrap_or(state.pipeline.config().top_k);
    let answer = state.pipeline.ask_with_top_k(&request.question, top_k).await?;
    Ok(Json(answer.into()))
}
