//! Camera node routes

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::{CaptureResponse, HealthResponse, NodeStatusResponse, StartPreviewRequest};
use crate::node_store::CaptureRequest;
use crate::state::NodeAppState;

/// Create camera node router
pub fn create_node_router(state: NodeAppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(node_status))
        // Capture & images
        .route("/capture", post(capture))
        .route("/images", get(list_images))
        .route("/images/:filename", get(get_image).delete(delete_image))
        .route("/images/:filename/raw", get(download_image))
        // Preview
        .route("/preview/start", post(start_preview))
        .route("/preview/stop", post(stop_preview))
        .with_state(state)
}

async fn health_check(State(state): State<NodeAppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        role: "node".to_string(),
        node_id: Some(state.store.node_id().to_string()),
    })
}

async fn node_status(State(state): State<NodeAppState>) -> impl IntoResponse {
    let storage = state.store.status().await.to_mb();
    let system = state.metrics.snapshot().await;

    Json(NodeStatusResponse {
        status: "online".to_string(),
        storage,
        system,
        node_id: state.store.node_id().to_string(),
        timestamp: Local::now().to_rfc3339(),
        capture_in_progress: state.store.is_capturing(),
        preview_active: state.preview.session().await.is_some(),
    })
}

// ========================================
// Capture & Images
// ========================================

/// Body is optional; an empty body captures with defaults
async fn capture(State(state): State<NodeAppState>, body: Bytes) -> Result<impl IntoResponse> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CaptureRequest::default()
    } else {
        serde_json::from_slice::<CaptureRequest>(&body)
            .map_err(|e| Error::Validation(format!("Invalid capture request: {}", e)))?
    };

    let record = state.store.capture(request).await?;
    Ok(Json(CaptureResponse::success(&record)))
}

async fn list_images(State(state): State<NodeAppState>) -> impl IntoResponse {
    let (images, storage) = state.store.inventory().await;
    Json(json!({
        "node_id": state.store.node_id(),
        "count": images.len(),
        "storage": storage.to_mb(),
        "images": images,
    }))
}

async fn get_image(
    State(state): State<NodeAppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.store.get(&filename).await?))
}

async fn download_image(
    State(state): State<NodeAppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let (record, data) = state.store.read(&filename).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", record.filename),
            ),
        ],
        data,
    ))
}

async fn delete_image(
    State(state): State<NodeAppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    state.store.delete(&filename).await?;
    Ok(Json(json!({
        "status": "deleted",
        "filename": filename,
    })))
}

// ========================================
// Preview
// ========================================

async fn start_preview(
    State(state): State<NodeAppState>,
    Json(req): Json<StartPreviewRequest>,
) -> Result<impl IntoResponse> {
    if !(req.relay_url.starts_with("http://") || req.relay_url.starts_with("https://")) {
        return Err(Error::Validation(format!(
            "relay_url must be an http(s) URL: {}",
            req.relay_url
        )));
    }
    let session = state.preview.start(&req.relay_url).await?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

async fn stop_preview(State(state): State<NodeAppState>) -> impl IntoResponse {
    let stopped = state.preview.stop().await;
    Json(json!({ "stopped": stopped }))
}
