//! SetAggregator - timestamp-indexed capture sets
//!
//! ## Responsibilities
//!
//! - Index finalized capture sets by session timestamp
//! - Reject duplicate timestamps
//! - Newest-first gallery listing
//! - Write-through persistence and bounded retention
//! - Log of responses that arrived after their set was frozen

mod repository;
mod types;

pub use repository::SetRepository;
pub use types::*;

use crate::error::{Error, Result};
use crate::session::SessionId;
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::RwLock;

/// Default number of sets kept
pub const DEFAULT_MAX_SETS: usize = 10_000;

const LATE_LOG_CAPACITY: usize = 500;

/// Ring buffer of late responses
struct LateResponseLog {
    entries: VecDeque<LateResponse>,
    capacity: usize,
    next_id: u64,
}

impl LateResponseLog {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, timestamp: SessionId, node_id: String, outcome: NodeOutcome) -> u64 {
        let entry_id = self.next_id;
        self.next_id += 1;

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LateResponse {
            entry_id,
            timestamp,
            node_id,
            outcome,
            received_at: Utc::now(),
        });
        entry_id
    }

    fn latest(&self, count: usize) -> Vec<LateResponse> {
        self.entries.iter().rev().take(count).cloned().collect()
    }
}

/// SetAggregator instance
pub struct SetAggregator {
    sets: RwLock<BTreeMap<SessionId, CaptureSet>>,
    repository: Option<SetRepository>,
    max_sets: usize,
    late: RwLock<LateResponseLog>,
}

impl SetAggregator {
    /// In-memory only aggregator
    pub fn new(max_sets: usize) -> Self {
        Self {
            sets: RwLock::new(BTreeMap::new()),
            repository: None,
            max_sets: max_sets.max(1),
            late: RwLock::new(LateResponseLog::new(LATE_LOG_CAPACITY)),
        }
    }

    /// Aggregator backed by `repository`, preloaded with the newest sets
    pub async fn open(repository: SetRepository, max_sets: usize) -> Result<Self> {
        repository.migrate().await?;
        let mut aggregator = Self::new(max_sets);

        let loaded = repository.load_recent(aggregator.max_sets).await?;
        {
            let sets = aggregator.sets.get_mut();
            for set in loaded {
                sets.insert(set.timestamp().clone(), set);
            }
        }
        tracing::info!(
            count = aggregator.sets.get_mut().len(),
            "Capture sets loaded from database"
        );

        aggregator.repository = Some(repository);
        Ok(aggregator)
    }

    /// Index a finalized set. The in-memory index is authoritative; a failed
    /// database write is logged and the set stays recorded.
    pub async fn record(&self, set: CaptureSet) -> Result<()> {
        let key = set.timestamp().clone();
        let persisted = self.repository.as_ref().map(|_| set.clone());

        let evicted = {
            let mut sets = self.sets.write().await;
            if sets.contains_key(&key) {
                tracing::error!(session = %key, "Duplicate capture set rejected");
                return Err(Error::InternalConsistency(format!(
                    "Capture set {} already recorded",
                    key
                )));
            }

            tracing::info!(
                session = %key,
                complete = set.is_complete(),
                images = set.success_count(),
                expected = set.expected_node_ids().len(),
                "Capture set recorded"
            );
            sets.insert(key.clone(), set);

            let mut evicted = Vec::new();
            while sets.len() > self.max_sets {
                let Some((oldest, _)) = sets.pop_first() else {
                    break;
                };
                tracing::debug!(session = %oldest, "Capture set dropped by retention");
                evicted.push(oldest);
            }
            evicted
        };

        if let (Some(repo), Some(set)) = (&self.repository, persisted) {
            if !evicted.contains(&key) {
                if let Err(e) = repo.insert(&set).await {
                    tracing::error!(session = %key, error = %e, "Failed to persist capture set");
                }
            }
            for oldest in &evicted {
                if let Err(e) = repo.delete(oldest).await {
                    tracing::warn!(session = %oldest, error = %e, "Failed to delete capture set row");
                }
            }
        }

        Ok(())
    }

    /// Most recent first
    pub async fn list(&self, limit: usize, offset: usize) -> Vec<CaptureSet> {
        self.sets
            .read()
            .await
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get(&self, timestamp: &SessionId) -> Result<CaptureSet> {
        self.sets
            .read()
            .await
            .get(timestamp)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Capture set {} not found", timestamp)))
    }

    pub async fn len(&self) -> usize {
        self.sets.read().await.len()
    }

    /// Record a response that missed its fan-out window. The frozen set is
    /// left untouched.
    pub async fn note_late_response(
        &self,
        timestamp: &SessionId,
        node_id: &str,
        outcome: NodeOutcome,
    ) -> u64 {
        tracing::warn!(
            session = %timestamp,
            node_id = %node_id,
            outcome = outcome.label(),
            "Late response discarded"
        );
        self.late
            .write()
            .await
            .push(timestamp.clone(), node_id.to_string(), outcome)
    }

    pub async fn late_responses(&self, count: usize) -> Vec<LateResponse> {
        self.late.read().await.latest(count)
    }
}

impl Default for SetAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SETS)
    }
}

#[cfg(test)]
mod tests {
    use super::repository::memory_repository;
    use super::*;
    use crate::node_store::ImageRecord;

    fn image(node: &str, ts: &str) -> ImageRecord {
        ImageRecord {
            filename: format!("capture_{}_{}.raw", ts, node),
            node_id: node.to_string(),
            timestamp: ts.parse().unwrap(),
            size_bytes: 100,
            filepath: format!("captured_photos/capture_{}_{}.raw", ts, node),
            layout: None,
        }
    }

    fn partial_set(ts: &str) -> CaptureSet {
        let mut builder =
            CaptureSetBuilder::new(ts.parse().unwrap(), vec!["nodeA".into(), "nodeB".into()]);
        builder
            .record(
                "nodeA",
                NodeOutcome::Success {
                    image: image("nodeA", ts),
                },
            )
            .unwrap();
        builder.finalize()
    }

    #[tokio::test]
    async fn test_partial_set_listed_most_recent() {
        let aggregator = SetAggregator::default();
        aggregator.record(partial_set("20250130_122500")).await.unwrap();
        aggregator.record(partial_set("20250130_122601")).await.unwrap();

        let ts: SessionId = "20250130_122601".parse().unwrap();
        let set = aggregator.get(&ts).await.unwrap();
        assert!(!set.is_complete());

        let listed = aggregator.list(10, 0).await;
        assert_eq!(listed[0].timestamp(), &ts);
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_timestamp_rejected() {
        let aggregator = SetAggregator::default();
        aggregator.record(partial_set("20250130_122601")).await.unwrap();
        assert!(matches!(
            aggregator.record(partial_set("20250130_122601")).await,
            Err(Error::InternalConsistency(_))
        ));
        assert_eq!(aggregator.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let aggregator = SetAggregator::default();
        let ts: SessionId = "20250130_000000".parse().unwrap();
        assert!(matches!(aggregator.get(&ts).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let aggregator = SetAggregator::default();
        for second in 0..5 {
            let ts = format!("20250130_12260{}", second);
            aggregator.record(partial_set(&ts)).await.unwrap();
        }

        let page: Vec<String> = aggregator
            .list(2, 1)
            .await
            .iter()
            .map(|s| s.timestamp().to_string())
            .collect();
        assert_eq!(page, vec!["20250130_122603", "20250130_122602"]);
        assert!(aggregator.list(10, 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_retention_drops_oldest() {
        let repo = memory_repository().await;
        let aggregator = SetAggregator::open(repo.clone(), 2).await.unwrap();
        for second in 0..3 {
            let ts = format!("20250130_12260{}", second);
            aggregator.record(partial_set(&ts)).await.unwrap();
        }

        assert_eq!(aggregator.len().await, 2);
        let oldest: SessionId = "20250130_122600".parse().unwrap();
        assert!(aggregator.get(&oldest).await.is_err());
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reopen_restores_sets() {
        let repo = memory_repository().await;
        {
            let aggregator = SetAggregator::open(repo.clone(), 10).await.unwrap();
            aggregator.record(partial_set("20250130_122601")).await.unwrap();
        }

        let aggregator = SetAggregator::open(repo, 10).await.unwrap();
        let ts: SessionId = "20250130_122601".parse().unwrap();
        let set = aggregator.get(&ts).await.unwrap();
        assert_eq!(set.success_count(), 1);
        assert!(!set.is_complete());
    }

    #[tokio::test]
    async fn test_set_kept_when_database_write_fails() {
        let repo = memory_repository().await;
        let aggregator = SetAggregator::open(repo.clone(), 10).await.unwrap();
        repo.close().await;

        aggregator.record(partial_set("20250130_122601")).await.unwrap();

        let ts: SessionId = "20250130_122601".parse().unwrap();
        assert_eq!(aggregator.get(&ts).await.unwrap().success_count(), 1);
        assert_eq!(aggregator.len().await, 1);
    }

    #[tokio::test]
    async fn test_late_response_does_not_touch_set() {
        let aggregator = SetAggregator::default();
        aggregator.record(partial_set("20250130_122601")).await.unwrap();

        let ts: SessionId = "20250130_122601".parse().unwrap();
        let id = aggregator
            .note_late_response(
                &ts,
                "nodeB",
                NodeOutcome::Success {
                    image: image("nodeB", "20250130_122601"),
                },
            )
            .await;
        assert_eq!(id, 1);

        let set = aggregator.get(&ts).await.unwrap();
        assert_eq!(set.outcome("nodeB"), Some(&NodeOutcome::Timeout));
        let late = aggregator.late_responses(10).await;
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].node_id, "nodeB");
    }
}
