//! HTTP front end for select requests.
//!
//! - `GET /api/health`: table summary
//! - `POST /api/select`: JSON request, JSON reply
//! - `POST /api/select/dis`: DIS-encoded request, DIS-encoded reply

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{BatchError, ErrorKind, Result};
use crate::select::{Criterion, QueryKind, Reply, Requester, Role, SelectEngine, SelectRequest};
use crate::wire;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<SelectEngine>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server: String,
    jobs: usize,
    queues: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectBody {
    pub user: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub kind: QueryKind,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub exec_queue_only: bool,
    #[serde(default)]
    pub summarize_arrays: bool,
}

impl From<SelectBody> for SelectRequest {
    fn from(body: SelectBody) -> Self {
        SelectRequest {
            requester: Requester::new(body.user, body.host, body.role.permission()),
            kind: body.kind,
            criteria: body.criteria,
            exec_queue_only: body.exec_queue_only,
            summarize_arrays: body.summarize_arrays,
        }
    }
}

#[derive(Serialize)]
struct SelectResponse {
    count: usize,
    #[serde(flatten)]
    reply: Reply,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
}

struct ApiError(BatchError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::JobNotFound => StatusCode::NOT_FOUND,
            ErrorKind::OutOfMemory => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code(),
            index: self.0.criterion_index(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/select", post(select_handler))
        .route("/api/select/dis", post(select_dis_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` fires.
pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            return Err(e.into());
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("API server stopped");
    Ok(())
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let table = state.engine.table();
    Json(HealthResponse {
        status: "ok",
        server: table.server_name().to_string(),
        jobs: table.len(),
        queues: table.queue_names(),
    })
}

async fn select_handler(
    State(state): State<ApiState>,
    Json(body): Json<SelectBody>,
) -> std::result::Result<Json<SelectResponse>, ApiError> {
    let request = SelectRequest::from(body);
    let reply = state.engine.handle_select(&request).await.map_err(ApiError)?;
    Ok(Json(SelectResponse {
        count: reply.len(),
        reply,
    }))
}

async fn select_dis_handler(State(state): State<ApiState>, body: Bytes) -> Response {
    let bytes = match wire::decode_select_request(&body) {
        Ok(request) => match state.engine.handle_select(&request).await {
            Ok(reply) => wire::encode_reply(&reply),
            Err(e) => wire::encode_error(&e),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Malformed DIS select request");
            wire::encode_error(&e)
        }
    };
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}
