//! HTTP server for browsing drives and asking questions about files.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/files/by-path?folder_path=…` | List a drive path, share link or site URL |
//! | `GET`  | `/files/children?drive_id=…&item_id=…` | List a folder by id |
//! | `POST` | `/chat/query` | Answer `{question, selected_files}` from the files' text |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! The files and chat routes require an `Authorization` header; its token is
//! forwarded to the storage provider.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "access_denied", "message": "Invalid or expired token" } }
//! ```
//!
//! | Code | HTTP |
//! |------|------|
//! | `missing_token` | 401 |
//! | `malformed_input`, `invalid_selection`, `bad_request` | 400 |
//! | `access_denied` | 401 (rejected token) or 403 (no access) |
//! | `not_found` | 404 |
//! | `remote_fetch`, `model_error` | 502 |
//!
//! # CORS
//!
//! Origins come from `[server].allowed_origins`; an empty list allows any
//! origin.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::assemble::ContextAssembler;
use crate::chat::QuestionAnswerer;
use crate::config::Config;
use crate::credential::Credential;
use crate::endpoints::Endpoints;
use crate::error::{DenialReason, DriveError};
use crate::extract::Extractor;
use crate::llm::{create_model, ChatModel};
use crate::models::{ListingResponse, SelectedFile};
use crate::remote::{GraphClient, RemoteResourceClient};
use crate::resolver::ResourceResolver;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    endpoints: Arc<Endpoints>,
    client: Arc<dyn RemoteResourceClient>,
    model: Arc<dyn ChatModel>,
    extractor: Arc<Extractor>,
}

impl AppState {
    pub fn new(
        config: Config,
        client: Arc<dyn RemoteResourceClient>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            endpoints: Arc::new(Endpoints::new(&config.graph.base_url)),
            extractor: Arc::new(Extractor::from_config(&config.extract)),
            config: Arc::new(config),
            client,
            model,
        }
    }

    fn resolver(&self) -> ResourceResolver<'_> {
        ResourceResolver::new(self.client.as_ref(), &self.endpoints, &self.config)
    }

    fn answerer(&self) -> QuestionAnswerer<'_> {
        let assembler = ContextAssembler::new(
            self.client.as_ref(),
            &self.endpoints,
            Arc::clone(&self.extractor),
            self.config.assemble.concurrency,
        );
        QuestionAnswerer::new(
            assembler,
            self.model.as_ref(),
            &self.config.llm.system_prompt,
            self.config.context.max_chars,
        )
    }
}

/// Builds the router with CORS applied.
pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.server.allowed_origins)?;
    Ok(Router::new()
        .route("/files/by-path", get(handle_by_path))
        .route("/files/children", get(handle_children))
        .route("/chat/query", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let values = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| anyhow::anyhow!("Invalid CORS origin in server.allowed_origins: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(values)))
}

/// Starts the server on `[server].bind` with the Graph client and the
/// configured model. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let client: Arc<dyn RemoteResourceClient> = Arc::new(GraphClient::new(&config.graph)?);
    let model = create_model(&config.llm)?;
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), client, model))?;

    println!("drive-qa listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn missing_token() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "missing_token".to_string(),
        message: "Missing access token".to_string(),
    }
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        let status = match &err {
            DriveError::MalformedInput(_) | DriveError::InvalidSelection(_) => {
                StatusCode::BAD_REQUEST
            }
            DriveError::AccessDenied {
                reason: DenialReason::InvalidToken,
                ..
            } => StatusCode::UNAUTHORIZED,
            DriveError::AccessDenied {
                reason: DenialReason::NoAccess,
                ..
            } => StatusCode::FORBIDDEN,
            DriveError::NotFound(_) => StatusCode::NOT_FOUND,
            DriveError::RemoteFetch { .. } | DriveError::Model(_) => StatusCode::BAD_GATEWAY,
        };
        if status == StatusCode::BAD_GATEWAY {
            tracing::error!(code = err.kind(), error = %err, "upstream failure");
        }
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

fn credential(headers: &HeaderMap) -> Result<Credential, AppError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credential::parse)
        .ok_or_else(missing_token)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /files/by-path ============

#[derive(Deserialize)]
struct ByPathQuery {
    #[serde(default)]
    folder_path: String,
}

async fn handle_by_path(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ByPathQuery>,
) -> Result<Json<ListingResponse>, AppError> {
    let cred = credential(&headers)?;
    let listing = state.resolver().resolve(&query.folder_path, &cred).await?;
    Ok(Json(listing.into()))
}

// ============ GET /files/children ============

#[derive(Deserialize)]
struct ChildrenQuery {
    drive_id: Option<String>,
    item_id: Option<String>,
}

async fn handle_children(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ChildrenQuery>,
) -> Result<Json<ListingResponse>, AppError> {
    let cred = credential(&headers)?;
    let (Some(drive_id), Some(item_id)) = (
        query.drive_id.filter(|s| !s.trim().is_empty()),
        query.item_id.filter(|s| !s.trim().is_empty()),
    ) else {
        return Err(DriveError::MalformedInput(
            "drive_id and item_id are required".to_string(),
        )
        .into());
    };
    let listing = state
        .resolver()
        .list_children(&drive_id, &item_id, &cred)
        .await?;
    Ok(Json(listing.into()))
}

// ============ POST /chat/query ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    question: String,
    #[serde(default)]
    selected_files: Vec<SelectedFile>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let cred = credential(&headers)?;
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let answer = state
        .answerer()
        .answer(&request.question, &request.selected_files, &cred)
        .await?;
    Ok(Json(ChatResponse { answer }))
}
