use crate::config::Listener as ListenerConfig;
use crate::errors::{IngestError, StartupError};
use crate::pipeline::Pipeline;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/ingest", post(ingest))
        .with_state(pipeline)
}

pub async fn serve(listener: &ListenerConfig, pipeline: Arc<Pipeline>) -> Result<(), StartupError> {
    let addr = format!("{}:{}", listener.host, listener.port);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    ok: bool,
    session_id: Option<String>,
}

impl IntoResponse for IngestResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: String,
}

async fn ingest(
    State(pipeline): State<Arc<Pipeline>>,
    body: Bytes,
) -> Result<IngestResponse, IngestError> {
    let session_id = pipeline.handle(&body).await?;
    Ok(IngestResponse {
        ok: true,
        session_id,
    })
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Only caller errors are echoed back
        let error = match self {
            IngestError::BadRequest(message) => message,
            _ => "Internal Server Error".to_string(),
        };

        (status, Json(ApiErrorResponse { error })).into_response()
    }
}
