//! NodeRegistry - camera node address book and health FSM
//!
//! ## States
//!
//! ```text
//!   register ──> Active ──(N consecutive unreachable)──> Unreachable
//!                  ^                                         │
//!                  │                                   begin_probe
//!                  │                                         v
//!                  └──────────── probe ok ─────────────── Probing
//!                                probe failed ──> Unreachable
//! ```
//!
//! Only `Active` nodes take part in capture fan-outs. Nodes are never
//! removed automatically.

mod types;

pub use types::*;

use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Default consecutive unreachable results before exclusion
pub const DEFAULT_UNREACHABLE_THRESHOLD: u32 = 3;

/// NodeRegistry instance
pub struct NodeRegistry {
    nodes: RwLock<BTreeMap<String, NodeEntry>>,
    unreachable_threshold: u32,
}

impl NodeRegistry {
    pub fn new(unreachable_threshold: u32) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            unreachable_threshold: unreachable_threshold.max(1),
        }
    }

    /// Register (or re-register) a node as Active
    pub async fn register(&self, node_id: &str, address: &str) -> Result<NodeEntry> {
        let node_id = node_id.trim();
        let address = address.trim();
        if node_id.is_empty() || address.is_empty() {
            return Err(Error::Validation(
                "node_id and address are required".to_string(),
            ));
        }

        let entry = NodeEntry {
            node_id: node_id.to_string(),
            address: address.to_string(),
            health: NodeHealth::Active,
            consecutive_unreachable: 0,
            transitions: 0,
            registered_at: Utc::now(),
            last_seen_at: None,
            last_error: None,
        };

        let mut nodes = self.nodes.write().await;
        let entry = match nodes.get_mut(node_id) {
            Some(existing) => {
                existing.address = entry.address;
                if existing.health != NodeHealth::Active {
                    existing.health = NodeHealth::Active;
                    existing.transitions += 1;
                }
                existing.consecutive_unreachable = 0;
                existing.clone()
            }
            None => {
                nodes.insert(node_id.to_string(), entry.clone());
                entry
            }
        };

        tracing::info!(node_id = %node_id, address = %address, "Node registered");
        Ok(entry)
    }

    /// Manual removal
    pub async fn deregister(&self, node_id: &str) -> Result<()> {
        match self.nodes.write().await.remove(node_id) {
            Some(_) => {
                tracing::info!(node_id = %node_id, "Node deregistered");
                Ok(())
            }
            None => Err(Error::NotFound(format!("Node {} not registered", node_id))),
        }
    }

    pub async fn get(&self, node_id: &str) -> Option<NodeEntry> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn list(&self) -> Vec<NodeEntry> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Snapshot of nodes eligible for a fan-out
    pub async fn active_nodes(&self) -> Vec<NodeInfo> {
        self.nodes_in(NodeHealth::Active).await
    }

    pub async fn unreachable_nodes(&self) -> Vec<NodeInfo> {
        self.nodes_in(NodeHealth::Unreachable).await
    }

    async fn nodes_in(&self, health: NodeHealth) -> Vec<NodeInfo> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|e| e.health == health)
            .map(NodeEntry::info)
            .collect()
    }

    /// Feed one call result into the FSM.
    ///
    /// Timeouts neither count towards nor reset the unreachable streak.
    /// Reachable results on excluded nodes reset the streak but only a probe
    /// re-admits them.
    pub async fn record_call(&self, node_id: &str, result: CallResult) -> Option<HealthTransition> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes.get_mut(node_id)?;

        match result {
            CallResult::Reachable => {
                entry.consecutive_unreachable = 0;
                entry.last_seen_at = Some(Utc::now());
                None
            }
            CallResult::TimedOut => {
                entry.last_error = Some("timeout".to_string());
                None
            }
            CallResult::Unreachable(reason) => {
                entry.consecutive_unreachable += 1;
                entry.last_error = Some(reason);

                if entry.health == NodeHealth::Active
                    && entry.consecutive_unreachable >= self.unreachable_threshold
                {
                    entry.health = NodeHealth::Unreachable;
                    entry.transitions += 1;
                    tracing::warn!(
                        node_id = %node_id,
                        consecutive = entry.consecutive_unreachable,
                        "Node marked unreachable, excluded from fan-out"
                    );
                    Some(HealthTransition::Lost)
                } else {
                    None
                }
            }
        }
    }

    /// Unreachable -> Probing. Returns false if the node is not unreachable.
    pub async fn begin_probe(&self, node_id: &str) -> bool {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(node_id) {
            Some(entry) if entry.health == NodeHealth::Unreachable => {
                entry.health = NodeHealth::Probing;
                entry.transitions += 1;
                true
            }
            _ => false,
        }
    }

    /// Conclude a probe started with `begin_probe`
    pub async fn finish_probe(&self, node_id: &str, reachable: bool) -> Option<HealthTransition> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes.get_mut(node_id)?;
        if entry.health != NodeHealth::Probing {
            return None;
        }

        entry.transitions += 1;
        if reachable {
            entry.health = NodeHealth::Active;
            entry.consecutive_unreachable = 0;
            entry.last_seen_at = Some(Utc::now());
            entry.last_error = None;
            tracing::info!(node_id = %node_id, "Node re-admitted after health probe");
            Some(HealthTransition::Recovered)
        } else {
            entry.health = NodeHealth::Unreachable;
            tracing::debug!(node_id = %node_id, "Health probe failed");
            None
        }
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_UNREACHABLE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down() -> CallResult {
        CallResult::Unreachable("connection refused".into())
    }

    #[tokio::test]
    async fn test_three_unreachable_marks_node() {
        let registry = NodeRegistry::new(3);
        registry.register("node_1", "10.0.0.1:5001").await.unwrap();

        assert_eq!(registry.record_call("node_1", down()).await, None);
        assert_eq!(registry.record_call("node_1", down()).await, None);
        assert_eq!(
            registry.record_call("node_1", down()).await,
            Some(HealthTransition::Lost)
        );

        let entry = registry.get("node_1").await.unwrap();
        assert_eq!(entry.health, NodeHealth::Unreachable);
        assert!(registry.active_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_reachable_resets_streak() {
        let registry = NodeRegistry::new(3);
        registry.register("node_1", "10.0.0.1:5001").await.unwrap();

        registry.record_call("node_1", down()).await;
        registry.record_call("node_1", down()).await;
        registry.record_call("node_1", CallResult::Reachable).await;
        registry.record_call("node_1", down()).await;

        let entry = registry.get("node_1").await.unwrap();
        assert_eq!(entry.health, NodeHealth::Active);
        assert_eq!(entry.consecutive_unreachable, 1);
    }

    #[tokio::test]
    async fn test_timeouts_do_not_count() {
        let registry = NodeRegistry::new(1);
        registry.register("node_1", "10.0.0.1:5001").await.unwrap();
        registry.record_call("node_1", CallResult::TimedOut).await;
        assert_eq!(registry.active_nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_probe_readmits_node() {
        let registry = NodeRegistry::new(1);
        registry.register("node_1", "10.0.0.1:5001").await.unwrap();
        registry.record_call("node_1", down()).await;

        // Reachable result alone does not re-admit
        registry.record_call("node_1", CallResult::Reachable).await;
        assert!(registry.active_nodes().await.is_empty());

        assert!(registry.begin_probe("node_1").await);
        assert_eq!(registry.get("node_1").await.unwrap().health, NodeHealth::Probing);
        assert!(registry.active_nodes().await.is_empty());

        assert_eq!(
            registry.finish_probe("node_1", true).await,
            Some(HealthTransition::Recovered)
        );
        let entry = registry.get("node_1").await.unwrap();
        assert_eq!(entry.health, NodeHealth::Active);
        assert_eq!(entry.transitions, 3);
    }

    #[tokio::test]
    async fn test_failed_probe_returns_to_unreachable() {
        let registry = NodeRegistry::new(1);
        registry.register("node_1", "10.0.0.1:5001").await.unwrap();
        registry.record_call("node_1", down()).await;

        assert!(registry.begin_probe("node_1").await);
        assert_eq!(registry.finish_probe("node_1", false).await, None);
        assert_eq!(registry.unreachable_nodes().await.len(), 1);
        assert!(!registry.begin_probe("missing").await);
    }

    #[tokio::test]
    async fn test_register_validation_and_deregister() {
        let registry = NodeRegistry::default();
        assert!(matches!(
            registry.register("", "x").await,
            Err(Error::Validation(_))
        ));
        registry.register("node_1", "10.0.0.1:5001").await.unwrap();
        registry.deregister("node_1").await.unwrap();
        assert!(matches!(
            registry.deregister("node_1").await,
            Err(Error::NotFound(_))
        ));
    }
}
