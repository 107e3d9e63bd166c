//! PreviewRelay types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-subscriber frame queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Control signal sent to subscribers as JSON text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    PublisherOnline { node_id: String },
    PublisherOffline { node_id: String, reason: String },
}

/// Item delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Frame(Bytes),
    Control(ControlMessage),
}

/// Subscription lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Registered, no frame delivered yet
    Connecting,
    Streaming,
    Closed,
}

/// Live publisher info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherStatus {
    pub node_id: String,
    pub since: DateTime<Utc>,
    pub frames: u64,
}

/// Per-subscriber counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberStatus {
    pub subscriber_id: Uuid,
    pub queued: usize,
    pub dropped: u64,
}

/// `GET /api/preview/status` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStatus {
    pub publisher: Option<PublisherStatus>,
    pub queue_capacity: usize,
    pub frames_published: u64,
    pub subscribers: Vec<SubscriberStatus>,
}
