//! Central server routes

use std::io;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::models::HealthResponse;
use crate::node_registry::RegisterNodeRequest;
use crate::preview_relay::{PreviewRelay, RelayEvent};
use crate::preview_source::MAX_FRAME_BYTES;
use crate::session::SessionId;
use crate::set_aggregator::{GallerySet, ListSetsQuery};
use crate::state::CentralAppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// A publisher silent for this long is treated as disconnected
const PUBLISHER_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create central server router
pub fn create_central_router(state: CentralAppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        // Capture sets
        .route("/api/capture", post(capture_all))
        .route("/api/sets", get(list_sets))
        .route("/api/sets/:timestamp", get(get_set))
        .route("/api/sets/:timestamp/images/:node_id", get(get_set_image))
        .route("/api/late-responses", get(late_responses))
        // Nodes
        .route("/api/nodes", get(list_nodes).post(register_node))
        .route("/api/nodes/:node_id", delete(deregister_node))
        .route("/api/nodes/:node_id/probe", post(probe_node))
        // Preview
        .route("/api/preview/publish/:node_id", post(preview_publish))
        .route("/api/preview/ws", get(preview_websocket))
        .route("/api/preview/status", get(preview_status))
        .route("/api/preview/attach/:node_id", post(preview_attach))
        .route("/api/preview/detach", post(preview_detach))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        role: "central".to_string(),
        node_id: None,
    })
}

fn parse_session(raw: &str) -> Result<SessionId> {
    raw.parse()
}

// ========================================
// Capture Sets
// ========================================

#[derive(Debug, Default, Deserialize)]
struct CaptureAllRequest {
    timeout_ms: Option<u64>,
}

async fn capture_all(
    State(state): State<CentralAppState>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CaptureAllRequest::default()
    } else {
        serde_json::from_slice::<CaptureAllRequest>(&body)
            .map_err(|e| Error::Validation(format!("Invalid capture request: {}", e)))?
    };

    let timeout = match request.timeout_ms {
        Some(0) => return Err(Error::Validation("timeout_ms must be positive".to_string())),
        Some(ms) => Some(Duration::from_millis(ms)),
        None => None,
    };

    let set = state.orchestrator.request_capture(timeout).await?;
    Ok(Json(json!({
        "set": set,
        "gallery": set.gallery_view(),
    })))
}

async fn list_sets(
    State(state): State<CentralAppState>,
    Query(query): Query<ListSetsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let aggregator = state.orchestrator.aggregator();

    let sets: Vec<GallerySet> = aggregator
        .list(limit, offset)
        .await
        .iter()
        .map(|s| s.gallery_view())
        .collect();

    Json(json!({
        "total": aggregator.len().await,
        "limit": limit,
        "offset": offset,
        "sets": sets,
    }))
}

async fn get_set(
    State(state): State<CentralAppState>,
    Path(timestamp): Path<String>,
) -> Result<impl IntoResponse> {
    let key = parse_session(&timestamp)?;
    let set = state.orchestrator.aggregator().get(&key).await?;
    Ok(Json(set))
}

async fn get_set_image(
    State(state): State<CentralAppState>,
    Path((timestamp, node_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let key = parse_session(&timestamp)?;
    let data = state.orchestrator.fetch_set_image(&key, &node_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

#[derive(Debug, Deserialize)]
struct LateQuery {
    limit: Option<usize>,
}

async fn late_responses(
    State(state): State<CentralAppState>,
    Query(query): Query<LateQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(MAX_PAGE_SIZE);
    Json(state.orchestrator.aggregator().late_responses(limit).await)
}

// ========================================
// Nodes
// ========================================

async fn list_nodes(State(state): State<CentralAppState>) -> impl IntoResponse {
    Json(state.orchestrator.registry().list().await)
}

async fn register_node(
    State(state): State<CentralAppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<impl IntoResponse> {
    let entry = state
        .orchestrator
        .registry()
        .register(&req.node_id, &req.address)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn deregister_node(
    State(state): State<CentralAppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.orchestrator.registry().deregister(&node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn probe_node(
    State(state): State<CentralAppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.orchestrator.probe_node(&node_id).await?))
}

// ========================================
// Preview Relay
// ========================================

/// Publisher ingest: length-delimited JPEG frames in one streaming body
async fn preview_publish(
    State(state): State<CentralAppState>,
    Path(node_id): Path<String>,
    body: Body,
) -> Result<impl IntoResponse> {
    if state.orchestrator.registry().get(&node_id).await.is_none() {
        return Err(Error::NotFound(format!("Node {} not registered", node_id)));
    }
    let publisher = state.relay.attach_publisher(&node_id)?;

    let reader = StreamReader::new(
        body.into_data_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
    );
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    let mut frames = FramedRead::new(reader, codec);
    let mut received = 0u64;

    loop {
        match tokio::time::timeout(PUBLISHER_IDLE_TIMEOUT, frames.next()).await {
            Ok(Some(Ok(frame))) => {
                if publisher.publish_frame(frame.freeze()).is_err() {
                    tracing::info!(node_id = %node_id, "Publisher detached, closing ingest");
                    break;
                }
                received += 1;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(node_id = %node_id, error = %e, "Preview ingest stream error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    node_id = %node_id,
                    idle_secs = PUBLISHER_IDLE_TIMEOUT.as_secs(),
                    "Preview publisher idle, disconnecting"
                );
                break;
            }
        }
    }

    drop(publisher);
    Ok(Json(json!({
        "node_id": node_id,
        "frames": received,
    })))
}

async fn preview_websocket(
    ws: WebSocketUpgrade,
    State(state): State<CentralAppState>,
) -> impl IntoResponse {
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| handle_preview_socket(socket, relay))
}

/// Forward relay events to one WebSocket subscriber
async fn handle_preview_socket(socket: WebSocket, relay: PreviewRelay) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = relay.subscribe();
    let subscriber_id = subscription.id();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let message = match event {
                RelayEvent::Frame(frame) => Message::Binary(frame.to_vec()),
                RelayEvent::Control(control) => match serde_json::to_string(&control) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode control message");
                        continue;
                    }
                },
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!(subscriber_id = %subscriber_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    // Either side ending tears down the other; dropping the subscription
    // unregisters it from the relay
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn preview_status(State(state): State<CentralAppState>) -> impl IntoResponse {
    Json(state.relay.status())
}

async fn preview_attach(
    State(state): State<CentralAppState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse> {
    if let Some(current) = state.relay.publisher() {
        return Err(Error::Conflict(format!(
            "Preview publisher {} already live",
            current.node_id
        )));
    }

    let entry = state
        .orchestrator
        .registry()
        .get(&node_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("Node {} not registered", node_id)))?;
    let relay_url = state.config.publish_url(&node_id);

    state
        .orchestrator
        .client()
        .start_preview(&entry.info(), &relay_url)
        .await
        .map_err(|e| e.into_error(&node_id))?;

    tracing::info!(node_id = %node_id, relay_url = %relay_url, "Preview attach requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "node_id": node_id,
            "relay_url": relay_url,
        })),
    ))
}

async fn preview_detach(State(state): State<CentralAppState>) -> Result<impl IntoResponse> {
    let Some(node_id) = state.relay.detach_publisher("detached by operator") else {
        return Err(Error::NotFound("No preview publisher is live".to_string()));
    };

    // The relay side is already closed; stopping the node is best effort
    if let Some(entry) = state.orchestrator.registry().get(&node_id).await {
        if let Err(e) = state.orchestrator.client().stop_preview(&entry.info()).await {
            tracing::warn!(node_id = %node_id, error = %e, "Failed to stop preview on node");
        }
    }

    Ok(Json(json!({ "detached": node_id })))
}
