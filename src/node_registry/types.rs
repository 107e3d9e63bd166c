//! NodeRegistry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    /// Included in capture fan-outs
    Active,
    /// Excluded until a health probe succeeds
    Unreachable,
    /// Health probe in flight
    Probing,
}

/// Address book entry handed to the node client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    /// `host:port` or a full `http://` base URL
    pub address: String,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
        }
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> String {
        let addr = self.address.trim_end_matches('/');
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        }
    }
}

/// Registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node_id: String,
    pub address: String,
    pub health: NodeHealth,
    /// Unreachable results since the last reachable contact
    pub consecutive_unreachable: u32,
    /// Number of health state changes
    pub transitions: u64,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl NodeEntry {
    pub fn info(&self) -> NodeInfo {
        NodeInfo::new(self.node_id.clone(), self.address.clone())
    }
}

/// Transport-level classification of one node call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    /// Node answered (successfully or with an error status)
    Reachable,
    /// No connection could be established
    Unreachable(String),
    /// Connected but no answer in time
    TimedOut,
}

/// Health transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Active -> Unreachable
    Lost,
    /// Probing -> Active
    Recovered,
}

/// `POST /api/nodes` body
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub address: String,
}
