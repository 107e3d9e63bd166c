//! Application state
//!
//! Configuration and shared components for both server roles

use crate::capture_orchestrator::{CaptureOrchestrator, OrchestratorConfig};
use crate::capture_device::Resolution;
use crate::error::{Error, Result};
use crate::metrics::MetricsProvider;
use crate::node_registry::NodeInfo;
use crate::node_store::{NodeStore, NodeStoreConfig};
use crate::preview_relay::PreviewRelay;
use crate::preview_source::PreviewPublisher;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const BYTES_PER_MB: u64 = 1024 * 1024;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Like `env_or`, but a zero value is rejected in favour of `default`
fn env_nonzero(key: &str, default: u64) -> u64 {
    nonzero_or(key, env_or(key, default), default)
}

fn nonzero_or(key: &str, value: u64, default: u64) -> u64 {
    if value == 0 {
        tracing::warn!(key, default, "Zero is not allowed, using default");
        default
    } else {
        value
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Camera node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub capture_dir: PathBuf,
    pub storage_limit_mb: u64,
    pub default_resolution: Resolution,
    pub capture_timeout: Duration,
    /// Keep only red photosites (NoIR nodes)
    pub extract_red_channel: bool,
    pub preview_resolution: Resolution,
    pub preview_framerate: u32,
    /// Start without `libcamera-still --list-cameras` (development hosts)
    pub skip_camera_check: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: std::env::var("NODE_ID")
                .unwrap_or_else(|_| format!("camera_node_{}", std::process::id())),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 5001),
            capture_dir: std::env::var("CAPTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("captured_photos")),
            storage_limit_mb: env_or("STORAGE_LIMIT_MB", 1000),
            default_resolution: env_or("DEFAULT_RESOLUTION", Resolution::new(1280, 720)),
            capture_timeout: Duration::from_secs(env_or("CAPTURE_TIMEOUT_SECS", 15)),
            extract_red_channel: env_flag("EXTRACT_RED_CHANNEL"),
            preview_resolution: env_or("PREVIEW_RESOLUTION", Resolution::new(640, 480)),
            preview_framerate: env_or("PREVIEW_FRAMERATE", 10),
            skip_camera_check: env_flag("SKIP_CAMERA_CHECK"),
        }
    }
}

impl NodeConfig {
    pub fn store_config(&self) -> NodeStoreConfig {
        NodeStoreConfig {
            node_id: self.node_id.clone(),
            capture_dir: self.capture_dir.clone(),
            capacity_bytes: self.storage_limit_mb * BYTES_PER_MB,
            default_resolution: self.default_resolution,
        }
    }
}

/// Central server configuration
#[derive(Debug, Clone)]
pub struct CentralConfig {
    pub host: String,
    pub port: u16,
    /// Nodes registered at startup
    pub nodes: Vec<NodeInfo>,
    pub fanout_timeout: Duration,
    pub unreachable_threshold: u32,
    pub probe_interval: Duration,
    pub node_connect_timeout: Duration,
    pub node_request_timeout: Duration,
    pub database_url: String,
    pub max_sets: usize,
    pub preview_queue_capacity: usize,
    /// Base URL nodes use to reach this server
    pub public_url: String,
}

impl Default for CentralConfig {
    fn default() -> Self {
        let port = env_or("PORT", 8000);
        let nodes = std::env::var("NODES").unwrap_or_else(|_| {
            "node_1=192.168.166.56:5001,node_2=192.168.166.57:5001,\
             node_3=192.168.166.58:5001,node_4=192.168.166.59:5001"
                .to_string()
        });
        let nodes = parse_nodes(&nodes).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring malformed NODES");
            Vec::new()
        });

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            nodes,
            fanout_timeout: Duration::from_millis(env_nonzero("FANOUT_TIMEOUT_MS", 10_000)),
            unreachable_threshold: env_or("UNREACHABLE_THRESHOLD", 3),
            probe_interval: Duration::from_secs(env_nonzero("PROBE_INTERVAL_SECS", 30)),
            node_connect_timeout: Duration::from_millis(env_or("NODE_CONNECT_TIMEOUT_MS", 2000)),
            node_request_timeout: Duration::from_secs(env_or("NODE_REQUEST_TIMEOUT_SECS", 60)),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://camfleet.db".to_string()),
            max_sets: env_or("MAX_SETS", 10_000),
            preview_queue_capacity: env_or("PREVIEW_QUEUE_CAPACITY", 4),
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://127.0.0.1:{}", port)),
        }
    }
}

impl CentralConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            fanout_timeout: self.fanout_timeout,
            probe_interval: self.probe_interval,
        }
    }

    /// Relay publish endpoint for `node_id`
    pub fn publish_url(&self, node_id: &str) -> String {
        format!(
            "{}/api/preview/publish/{}",
            self.public_url.trim_end_matches('/'),
            urlencoding::encode(node_id)
        )
    }
}

/// Parse `id=host:port,id=host:port`
pub fn parse_nodes(raw: &str) -> Result<Vec<NodeInfo>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (id, addr) = entry
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("Expected id=address, got '{}'", entry)))?;
            let (id, addr) = (id.trim(), addr.trim());
            if id.is_empty() || addr.is_empty() {
                return Err(Error::Config(format!("Empty node id or address in '{}'", entry)));
            }
            Ok(NodeInfo::new(id, addr))
        })
        .collect()
}

/// Camera node state shared across handlers
#[derive(Clone)]
pub struct NodeAppState {
    pub config: Arc<NodeConfig>,
    pub store: Arc<NodeStore>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub preview: Arc<PreviewPublisher>,
}

/// Central server state shared across handlers
#[derive(Clone)]
pub struct CentralAppState {
    pub config: Arc<CentralConfig>,
    pub orchestrator: Arc<CaptureOrchestrator>,
    pub relay: PreviewRelay,
}
