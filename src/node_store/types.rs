//! NodeStore types

use crate::capture_device::{RawLayout, Resolution};
use crate::session::SessionId;
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One captured image. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    pub node_id: String,
    /// Capture session id (second resolution)
    pub timestamp: SessionId,
    pub size_bytes: u64,
    pub filepath: String,
    /// Raw geometry; unknown for files found on disk at startup
    #[serde(flatten)]
    pub layout: Option<RawLayout>,
}

/// Capture parameters supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    /// Session id chosen by the orchestrator; local clock if absent
    #[serde(default)]
    pub session: Option<SessionId>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

/// Store occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStatus {
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub available_bytes: u64,
}

impl StorageStatus {
    pub fn new(used_bytes: u64, capacity_bytes: u64) -> Self {
        Self {
            used_bytes,
            capacity_bytes,
            available_bytes: capacity_bytes.saturating_sub(used_bytes),
        }
    }

    /// Megabyte view used on the wire
    pub fn to_mb(&self) -> StorageMb {
        StorageMb {
            used_mb: self.used_bytes as f64 / BYTES_PER_MB,
            limit_mb: self.capacity_bytes as f64 / BYTES_PER_MB,
            available_mb: self.available_bytes as f64 / BYTES_PER_MB,
        }
    }
}

/// `{used_mb, limit_mb, available_mb}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageMb {
    pub used_mb: f64,
    pub limit_mb: f64,
    pub available_mb: f64,
}

/// Configuration for a NodeStore
#[derive(Debug, Clone)]
pub struct NodeStoreConfig {
    pub node_id: String,
    pub capture_dir: std::path::PathBuf,
    pub capacity_bytes: u64,
    pub default_resolution: Resolution,
}
