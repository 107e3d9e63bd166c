//! Shared wire models
//!
//! Payloads exchanged between camera nodes and the central server. Both
//! the node routes and the central's node client use these, so they live
//! outside either module.

use crate::capture_device::RawLayout;
use crate::metrics::SystemSnapshot;
use crate::node_store::{ImageRecord, StorageMb};
use crate::session::SessionId;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// `file_info` block of a capture response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub filepath: String,
    pub timestamp: SessionId,
    pub size: u64,
    /// `width`, `height`, `camera_width`, `camera_height`, `bayer_pattern`
    #[serde(flatten)]
    pub layout: Option<RawLayout>,
}

/// Node capture response: `{status, file_info, node_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub status: String,
    pub file_info: FileInfo,
    pub node_id: String,
}

impl CaptureResponse {
    pub fn success(record: &ImageRecord) -> Self {
        Self {
            status: "success".to_string(),
            file_info: FileInfo {
                filename: record.filename.clone(),
                filepath: record.filepath.clone(),
                timestamp: record.timestamp.clone(),
                size: record.size_bytes,
                layout: record.layout,
            },
            node_id: record.node_id.clone(),
        }
    }

    pub fn into_record(self) -> ImageRecord {
        ImageRecord {
            filename: self.file_info.filename,
            node_id: self.node_id,
            timestamp: self.file_info.timestamp,
            size_bytes: self.file_info.size,
            filepath: self.file_info.filepath,
            layout: self.file_info.layout,
        }
    }
}

/// Node status listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub status: String,
    pub storage: StorageMb,
    pub system: SystemSnapshot,
    pub node_id: String,
    /// RFC 3339 local time on the node
    pub timestamp: String,
    #[serde(default)]
    pub capture_in_progress: bool,
    #[serde(default)]
    pub preview_active: bool,
}

/// Ask a node to push preview frames to a relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPreviewRequest {
    /// Full URL of the relay's publish endpoint
    pub relay_url: String,
}
