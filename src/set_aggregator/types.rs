//! SetAggregator types

use crate::error::{Error, Result};
use crate::node_store::ImageRecord;
use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-node result inside a capture set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    Success { image: ImageRecord },
    /// Node answered but capture failed
    Failure { reason: String },
    /// No answer within the fan-out window
    Timeout,
    /// Connection could not be established
    Unreachable { reason: String },
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Success { .. })
    }

    pub fn image(&self) -> Option<&ImageRecord> {
        match self {
            NodeOutcome::Success { image } => Some(image),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeOutcome::Success { .. } => "success",
            NodeOutcome::Failure { .. } => "failure",
            NodeOutcome::Timeout => "timeout",
            NodeOutcome::Unreachable { .. } => "unreachable",
        }
    }

    /// Reason recorded for a missing entry
    pub fn reason(&self) -> Option<String> {
        match self {
            NodeOutcome::Success { .. } => None,
            NodeOutcome::Failure { reason } | NodeOutcome::Unreachable { reason } => {
                Some(reason.clone())
            }
            NodeOutcome::Timeout => Some("no response within fan-out window".to_string()),
        }
    }
}

/// Finalized capture set. Only `CaptureSetBuilder::finalize` produces one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSet {
    timestamp: SessionId,
    expected_node_ids: Vec<String>,
    outcomes: BTreeMap<String, NodeOutcome>,
    complete: bool,
    requested_at: DateTime<Utc>,
    finalized_at: DateTime<Utc>,
}

impl CaptureSet {
    pub fn timestamp(&self) -> &SessionId {
        &self.timestamp
    }

    pub fn expected_node_ids(&self) -> &[String] {
        &self.expected_node_ids
    }

    pub fn outcomes(&self) -> &BTreeMap<String, NodeOutcome> {
        &self.outcomes
    }

    pub fn outcome(&self, node_id: &str) -> Option<&NodeOutcome> {
        self.outcomes.get(node_id)
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn finalized_at(&self) -> DateTime<Utc> {
        self.finalized_at
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageRecord> {
        self.outcomes.values().filter_map(NodeOutcome::image)
    }

    pub fn success_count(&self) -> usize {
        self.images().count()
    }

    /// Gallery view: `{timestamp, images: [{filename, node_id}], complete, missing}`
    pub fn gallery_view(&self) -> GallerySet {
        GallerySet {
            timestamp: self.timestamp.clone(),
            images: self
                .images()
                .map(|img| GalleryImage {
                    filename: img.filename.clone(),
                    node_id: img.node_id.clone(),
                })
                .collect(),
            complete: self.complete,
            missing: self
                .outcomes
                .iter()
                .filter(|(_, o)| !o.is_success())
                .map(|(node_id, o)| MissingEntry {
                    node_id: node_id.clone(),
                    status: o.label().to_string(),
                    reason: o.reason(),
                })
                .collect(),
        }
    }
}

/// Collects per-node outcomes for one in-flight request
#[derive(Debug)]
pub struct CaptureSetBuilder {
    timestamp: SessionId,
    expected_node_ids: Vec<String>,
    outcomes: BTreeMap<String, NodeOutcome>,
    requested_at: DateTime<Utc>,
}

impl CaptureSetBuilder {
    pub fn new(timestamp: SessionId, expected_node_ids: Vec<String>) -> Self {
        Self {
            timestamp,
            expected_node_ids,
            outcomes: BTreeMap::new(),
            requested_at: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> &SessionId {
        &self.timestamp
    }

    /// Record one node's outcome. Unknown or repeated nodes are rejected.
    pub fn record(&mut self, node_id: &str, outcome: NodeOutcome) -> Result<()> {
        if !self.expected_node_ids.iter().any(|id| id == node_id) {
            return Err(Error::InternalConsistency(format!(
                "Node {} is not part of set {}",
                node_id, self.timestamp
            )));
        }
        if self.outcomes.contains_key(node_id) {
            return Err(Error::InternalConsistency(format!(
                "Node {} already reported for set {}",
                node_id, self.timestamp
            )));
        }
        self.outcomes.insert(node_id.to_string(), outcome);
        Ok(())
    }

    /// True once every expected node has reported
    pub fn is_saturated(&self) -> bool {
        self.outcomes.len() == self.expected_node_ids.len()
    }

    pub fn pending(&self) -> Vec<String> {
        self.expected_node_ids
            .iter()
            .filter(|id| !self.outcomes.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Freeze. Nodes that never reported are marked `Timeout`.
    pub fn finalize(mut self) -> CaptureSet {
        for node_id in &self.expected_node_ids {
            self.outcomes
                .entry(node_id.clone())
                .or_insert(NodeOutcome::Timeout);
        }

        let complete = !self.expected_node_ids.is_empty()
            && self.outcomes.values().all(NodeOutcome::is_success);

        CaptureSet {
            timestamp: self.timestamp,
            expected_node_ids: self.expected_node_ids,
            outcomes: self.outcomes,
            complete,
            requested_at: self.requested_at,
            finalized_at: Utc::now(),
        }
    }
}

/// Gallery image entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub filename: String,
    pub node_id: String,
}

/// Missing node entry in the gallery view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingEntry {
    pub node_id: String,
    pub status: String,
    pub reason: Option<String>,
}

/// Gallery set view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GallerySet {
    pub timestamp: SessionId,
    pub images: Vec<GalleryImage>,
    pub complete: bool,
    pub missing: Vec<MissingEntry>,
}

/// Response that arrived after its set was finalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LateResponse {
    pub entry_id: u64,
    pub timestamp: SessionId,
    pub node_id: String,
    pub outcome: NodeOutcome,
    pub received_at: DateTime<Utc>,
}

/// `GET /api/sets` query
#[derive(Debug, Clone, Deserialize)]
pub struct ListSetsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}
