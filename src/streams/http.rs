//! Side-channel HTTP routes for the ingest pipeline and dashboards.

use axum::{
    debug_handler,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::debug;

use crate::{hub::HubHandle, AppResult, AppState};

use super::DetectRequest;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stream/detect", post(detect))
        .route("/stream/test", post(test_stream))
        .route("/streams", get(list_streams))
        .route("/stream/{key}", get(stream_details))
        .route("/status", get(status))
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "success": false, "message": message.into() }))).into_response()
}

#[debug_handler(state = AppState)]
async fn detect(
    State(hub): State<HubHandle>,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(error = %rejection, "malformed detect request");
            return Ok(failure(StatusCode::BAD_REQUEST, rejection.body_text()));
        }
    };

    let reply = hub.detect(request).await?;
    Ok(Json(reply).into_response())
}

#[debug_handler(state = AppState)]
async fn test_stream(State(hub): State<HubHandle>) -> AppResult<Response> {
    let stream = hub.test_stream().await?;
    Ok(Json(json!({ "success": true, "streamKey": stream.key, "stream": stream })).into_response())
}

#[debug_handler(state = AppState)]
async fn list_streams(State(hub): State<HubHandle>) -> AppResult<Response> {
    let streams = hub.streams().await?;
    Ok(Json(json!({ "success": true, "streams": streams })).into_response())
}

#[debug_handler(state = AppState)]
async fn stream_details(State(hub): State<HubHandle>, Path(key): Path<String>) -> AppResult<Response> {
    match hub.stream(&key).await? {
        Some(details) => Ok(Json(json!({
            "success": true,
            "stream": details.stream,
            "chatHistory": details.chat_history,
        }))
        .into_response()),
        None => Ok(failure(StatusCode::NOT_FOUND, "stream not found")),
    }
}

#[debug_handler(state = AppState)]
async fn status(State(hub): State<HubHandle>) -> AppResult<Response> {
    Ok(Json(hub.status().await?).into_response())
}

pub async fn not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "endpoint not found")
}
