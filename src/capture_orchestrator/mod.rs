//! CaptureOrchestrator - fleet-wide fan-out capture
//!
//! ## Responsibilities
//!
//! - Fan a capture request out to every active node concurrently
//! - Collect results until all nodes answered or the window elapsed
//! - Feed per-node results into the registry health FSM
//! - Hand the finalized set to the SetAggregator
//! - Background health probes for unreachable nodes
//!
//! ## Design
//!
//! One task per node reports into a bounded mpsc channel; a single collector
//! with a deadline owns the `CaptureSetBuilder`. Node calls still in flight
//! when the window closes are not aborted. Their results update the registry
//! and land in the aggregator's late-response log.

use crate::error::{Error, Result};
use crate::node_client::NodeClient;
use crate::node_registry::{CallResult, NodeEntry, NodeInfo, NodeRegistry};
use crate::session::{SessionAllocator, SessionId};
use crate::set_aggregator::{CaptureSet, CaptureSetBuilder, NodeOutcome, SetAggregator};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

/// Default fan-out window
pub const DEFAULT_FANOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default health probe interval
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest health probe interval accepted
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub fanout_timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fanout_timeout: DEFAULT_FANOUT_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// CaptureOrchestrator instance
pub struct CaptureOrchestrator {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn NodeClient>,
    aggregator: Arc<SetAggregator>,
    sessions: SessionAllocator,
    config: OrchestratorConfig,
    probe_running: Arc<RwLock<bool>>,
}

impl CaptureOrchestrator {
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<dyn NodeClient>,
        aggregator: Arc<SetAggregator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            client,
            aggregator,
            sessions: SessionAllocator::new(),
            config,
            probe_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Continue session numbering after the newest recorded set
    pub async fn resume_sessions(mut self) -> Self {
        if let Some(latest) = self.aggregator.list(1, 0).await.into_iter().next() {
            tracing::debug!(session = %latest.timestamp(), "Resuming session ids");
            self.sessions = SessionAllocator::resume_after(latest.timestamp().clone());
        }
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Arc<dyn NodeClient> {
        &self.client
    }

    pub fn aggregator(&self) -> &Arc<SetAggregator> {
        &self.aggregator
    }

    pub fn fanout_timeout(&self) -> Duration {
        self.config.fanout_timeout
    }

    /// Capture on every active node and return the finalized set.
    ///
    /// Per-node errors never fail the request; a set with zero successful
    /// nodes is still returned.
    pub async fn request_capture(&self, timeout: Option<Duration>) -> Result<CaptureSet> {
        let timeout = timeout.unwrap_or(self.config.fanout_timeout);
        let session = self.sessions.next();
        let nodes = self.registry.active_nodes().await;
        let expected: Vec<String> = nodes.iter().map(|n| n.node_id.clone()).collect();

        tracing::info!(
            session = %session,
            nodes = nodes.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Capture fan-out started"
        );

        let mut builder = CaptureSetBuilder::new(session.clone(), expected);
        let deadline = Instant::now() + timeout;
        let (tx, mut rx) = mpsc::channel::<(String, NodeOutcome)>(nodes.len().max(1));

        for node in nodes {
            self.spawn_node_capture(node, session.clone(), tx.clone());
        }
        drop(tx);

        while !builder.is_saturated() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((node_id, outcome))) => {
                    if let Err(e) = builder.record(&node_id, outcome) {
                        tracing::error!(session = %session, error = %e, "Dropping node result");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        session = %session,
                        pending = ?builder.pending(),
                        "Fan-out window elapsed"
                    );
                    break;
                }
            }
        }

        // Results queued after the deadline are late too
        rx.close();
        while let Ok((node_id, outcome)) = rx.try_recv() {
            self.aggregator
                .note_late_response(&session, &node_id, outcome)
                .await;
        }

        let set = builder.finalize();
        tracing::info!(
            session = %session,
            complete = set.is_complete(),
            succeeded = set.success_count(),
            expected = set.expected_node_ids().len(),
            "Capture fan-out finished"
        );

        self.aggregator.record(set.clone()).await?;
        Ok(set)
    }

    fn spawn_node_capture(
        &self,
        node: NodeInfo,
        session: SessionId,
        tx: mpsc::Sender<(String, NodeOutcome)>,
    ) {
        let client = self.client.clone();
        let registry = self.registry.clone();
        let aggregator = self.aggregator.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match client.capture(&node, &session).await {
                Ok(image) => {
                    registry
                        .record_call(&node.node_id, CallResult::Reachable)
                        .await;
                    tracing::debug!(
                        node_id = %node.node_id,
                        session = %session,
                        filename = %image.filename,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Node capture succeeded"
                    );
                    NodeOutcome::Success { image }
                }
                Err(e) => {
                    registry.record_call(&node.node_id, e.call_result()).await;
                    tracing::warn!(
                        node_id = %node.node_id,
                        session = %session,
                        error = %e,
                        "Node capture failed"
                    );
                    e.into_outcome()
                }
            };

            if let Err(mpsc::error::SendError((node_id, outcome))) =
                tx.send((node.node_id.clone(), outcome)).await
            {
                aggregator
                    .note_late_response(&session, &node_id, outcome)
                    .await;
            }
        });
    }

    /// Probe one node now. Unreachable nodes go through the probing state and
    /// are re-admitted on success.
    pub async fn probe_node(&self, node_id: &str) -> Result<NodeEntry> {
        let entry = self
            .registry
            .get(node_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Node {} not registered", node_id)))?;

        let probing = self.registry.begin_probe(node_id).await;
        let result = self.client.probe(&entry.info()).await;

        if probing {
            self.registry.finish_probe(node_id, result.is_ok()).await;
        } else {
            let call = match &result {
                Ok(_) => CallResult::Reachable,
                Err(e) => e.call_result(),
            };
            self.registry.record_call(node_id, call).await;
        }

        if let Err(e) = &result {
            tracing::debug!(node_id = %node_id, error = %e, "Probe failed");
        }

        self.registry
            .get(node_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Node {} not registered", node_id)))
    }

    /// Probe every unreachable node once, concurrently
    pub async fn probe_unreachable(&self) -> usize {
        let nodes = self.registry.unreachable_nodes().await;
        let probes = nodes.iter().map(|n| self.probe_node(&n.node_id));
        futures::future::join_all(probes)
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .filter(|e| e.health == crate::node_registry::NodeHealth::Active)
            .count()
    }

    /// Start the background health probe loop
    pub async fn start_health_probe(self: &Arc<Self>) {
        {
            let mut running = self.probe_running.write().await;
            if *running {
                tracing::warn!("Health probe already running");
                return;
            }
            *running = true;
        }

        let period = self.probe_period();
        tracing::info!(
            interval_secs = period.as_secs(),
            "Starting node health probe"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if !*this.probe_running.read().await {
                    break;
                }

                let recovered = this.probe_unreachable().await;
                if recovered > 0 {
                    tracing::info!(recovered, "Nodes re-admitted by health probe");
                }
            }

            tracing::info!("Node health probe stopped");
        });
    }

    fn probe_period(&self) -> Duration {
        self.config.probe_interval.max(MIN_PROBE_INTERVAL)
    }

    pub async fn stop_health_probe(&self) {
        *self.probe_running.write().await = false;
        tracing::info!("Stopping node health probe");
    }

    /// Raw bytes of one image in a recorded set, proxied from its node
    pub async fn fetch_set_image(&self, timestamp: &SessionId, node_id: &str) -> Result<Bytes> {
        let set = self.aggregator.get(timestamp).await?;
        let image = set
            .outcome(node_id)
            .and_then(NodeOutcome::image)
            .ok_or_else(|| {
                Error::NotFound(format!("No image from {} in set {}", node_id, timestamp))
            })?;
        let entry = self
            .registry
            .get(node_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Node {} not registered", node_id)))?;

        self.client
            .fetch_image(&entry.info(), &image.filename)
            .await
            .map_err(|e| e.into_error(node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeStatusResponse;
    use crate::node_client::{CallOutcome, NodeCallError};
    use crate::node_registry::NodeHealth;
    use crate::node_store::{ImageRecord, StorageStatus};
    use crate::set_aggregator::SetRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    enum Behavior {
        Succeed(Duration),
        Fail,
        Refuse,
    }

    struct FakeClient {
        behaviors: HashMap<String, Behavior>,
        probe_ok: AtomicBool,
    }

    impl FakeClient {
        fn new(behaviors: &[(&str, Behavior)]) -> Self {
            Self {
                behaviors: behaviors
                    .iter()
                    .map(|(id, b)| (id.to_string(), b.clone()))
                    .collect(),
                probe_ok: AtomicBool::new(false),
            }
        }
    }

    fn status(node_id: &str) -> NodeStatusResponse {
        NodeStatusResponse {
            status: "online".into(),
            storage: StorageStatus::new(0, 1000).to_mb(),
            system: Default::default(),
            node_id: node_id.into(),
            timestamp: "2025-01-30T12:26:01+09:00".into(),
            capture_in_progress: false,
            preview_active: false,
        }
    }

    #[async_trait]
    impl NodeClient for FakeClient {
        async fn capture(&self, node: &NodeInfo, session: &SessionId) -> CallOutcome<ImageRecord> {
            match self.behaviors.get(&node.node_id) {
                Some(Behavior::Succeed(delay)) => {
                    tokio::time::sleep(*delay).await;
                    Ok(ImageRecord {
                        filename: format!("capture_{}_{}.raw", session, node.node_id),
                        node_id: node.node_id.clone(),
                        timestamp: session.clone(),
                        size_bytes: 64,
                        filepath: format!("captured_photos/capture_{}.raw", session),
                        layout: None,
                    })
                }
                Some(Behavior::Fail) => Err(NodeCallError::Failure("camera busy".into())),
                _ => Err(NodeCallError::Unreachable("connection refused".into())),
            }
        }

        async fn probe(&self, node: &NodeInfo) -> CallOutcome<NodeStatusResponse> {
            if self.probe_ok.load(Ordering::SeqCst) {
                Ok(status(&node.node_id))
            } else {
                Err(NodeCallError::Unreachable("connection refused".into()))
            }
        }

        async fn fetch_image(&self, _node: &NodeInfo, filename: &str) -> CallOutcome<Bytes> {
            Ok(Bytes::from(filename.to_string()))
        }

        async fn start_preview(&self, _node: &NodeInfo, _relay_url: &str) -> CallOutcome<()> {
            Ok(())
        }

        async fn stop_preview(&self, _node: &NodeInfo) -> CallOutcome<()> {
            Ok(())
        }
    }

    async fn orchestrator(
        behaviors: &[(&str, Behavior)],
        timeout: Duration,
    ) -> (Arc<CaptureOrchestrator>, Arc<FakeClient>) {
        let registry = Arc::new(NodeRegistry::new(3));
        for (id, _) in behaviors {
            registry.register(id, "127.0.0.1:5001").await.unwrap();
        }
        let client = Arc::new(FakeClient::new(behaviors));
        let orchestrator = CaptureOrchestrator::new(
            registry,
            client.clone(),
            Arc::new(SetAggregator::default()),
            OrchestratorConfig {
                fanout_timeout: timeout,
                probe_interval: Duration::from_secs(30),
            },
        );
        (Arc::new(orchestrator), client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_node_marked_timeout() {
        let timeout = Duration::from_millis(300);
        let (orch, _) = orchestrator(
            &[
                ("A", Behavior::Succeed(Duration::from_millis(100))),
                ("B", Behavior::Succeed(timeout + Duration::from_millis(1))),
            ],
            timeout,
        )
        .await;

        let set = orch.request_capture(None).await.unwrap();
        assert!(set.outcome("A").unwrap().is_success());
        assert_eq!(set.outcome("B"), Some(&NodeOutcome::Timeout));
        assert!(!set.is_complete());

        // B finishes later and is logged, the frozen set is untouched
        tokio::time::sleep(Duration::from_millis(50)).await;
        let late = orch.aggregator().late_responses(10).await;
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].node_id, "B");
        let stored = orch.aggregator().get(set.timestamp()).await.unwrap();
        assert_eq!(stored.outcome("B"), Some(&NodeOutcome::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_nodes_answer_before_deadline() {
        let (orch, _) = orchestrator(
            &[
                ("A", Behavior::Succeed(Duration::from_millis(10))),
                ("B", Behavior::Succeed(Duration::from_millis(20))),
            ],
            Duration::from_secs(10),
        )
        .await;

        let started = Instant::now();
        let set = orch.request_capture(None).await.unwrap();
        assert!(set.is_complete());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(orch.aggregator().list(10, 0).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_recorded_not_raised() {
        let (orch, _) = orchestrator(
            &[("A", Behavior::Fail), ("B", Behavior::Refuse)],
            Duration::from_secs(1),
        )
        .await;

        let set = orch.request_capture(None).await.unwrap();
        assert_eq!(set.success_count(), 0);
        assert!(matches!(
            set.outcome("A"),
            Some(NodeOutcome::Failure { .. })
        ));
        assert!(matches!(
            set.outcome("B"),
            Some(NodeOutcome::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_excluded_then_readmitted() {
        let (orch, client) = orchestrator(
            &[
                ("A", Behavior::Succeed(Duration::from_millis(1))),
                ("B", Behavior::Refuse),
            ],
            Duration::from_secs(1),
        )
        .await;

        for _ in 0..3 {
            orch.request_capture(None).await.unwrap();
        }
        let entry = orch.registry().get("B").await.unwrap();
        assert_eq!(entry.health, NodeHealth::Unreachable);

        let set = orch.request_capture(None).await.unwrap();
        assert_eq!(set.expected_node_ids(), &["A".to_string()]);
        assert!(set.is_complete());

        // Failed probe keeps it excluded
        assert_eq!(orch.probe_unreachable().await, 0);
        assert_eq!(
            orch.registry().get("B").await.unwrap().health,
            NodeHealth::Unreachable
        );

        client.probe_ok.store(true, Ordering::SeqCst);
        assert_eq!(orch.probe_unreachable().await, 1);
        assert_eq!(orch.registry().active_nodes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_set_survives_database_outage() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SetRepository::new(pool);
        let aggregator = Arc::new(SetAggregator::open(repo.clone(), 10).await.unwrap());

        let registry = Arc::new(NodeRegistry::new(3));
        registry.register("A", "127.0.0.1:5001").await.unwrap();
        let client = Arc::new(FakeClient::new(&[(
            "A",
            Behavior::Succeed(Duration::from_millis(1)),
        )]));
        let orch = CaptureOrchestrator::new(
            registry,
            client,
            aggregator,
            OrchestratorConfig::default(),
        );

        repo.close().await;
        let set = orch
            .request_capture(Some(Duration::from_millis(500)))
            .await
            .unwrap();
        assert!(set.is_complete());
        let stored = orch.aggregator().get(set.timestamp()).await.unwrap();
        assert_eq!(stored.success_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_probe_interval_is_clamped() {
        let registry = Arc::new(NodeRegistry::new(3));
        let orch = Arc::new(CaptureOrchestrator::new(
            registry,
            Arc::new(FakeClient::new(&[])),
            Arc::new(SetAggregator::default()),
            OrchestratorConfig {
                fanout_timeout: Duration::from_secs(1),
                probe_interval: Duration::ZERO,
            },
        ));
        assert_eq!(orch.probe_period(), MIN_PROBE_INTERVAL);

        orch.start_health_probe().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(*orch.probe_running.read().await);
        orch.stop_health_probe().await;
    }

    #[tokio::test]
    async fn test_no_active_nodes_yields_empty_set() {
        let (orch, _) = orchestrator(&[], Duration::from_secs(1)).await;
        let set = orch.request_capture(None).await.unwrap();
        assert!(set.outcomes().is_empty());
        assert!(!set.is_complete());
    }

    #[tokio::test]
    async fn test_consecutive_requests_get_distinct_sessions() {
        let (orch, _) = orchestrator(
            &[("A", Behavior::Succeed(Duration::from_millis(1)))],
            Duration::from_secs(1),
        )
        .await;
        let first = orch.request_capture(None).await.unwrap();
        let second = orch.request_capture(None).await.unwrap();
        assert!(second.timestamp() > first.timestamp());
        assert_eq!(orch.aggregator().len().await, 2);
    }

    #[tokio::test]
    async fn test_fetch_set_image() {
        let (orch, _) = orchestrator(
            &[
                ("A", Behavior::Succeed(Duration::from_millis(1))),
                ("B", Behavior::Fail),
            ],
            Duration::from_secs(1),
        )
        .await;
        let set = orch.request_capture(None).await.unwrap();

        let bytes = orch.fetch_set_image(set.timestamp(), "A").await.unwrap();
        assert!(bytes.starts_with(b"capture_"));
        assert!(matches!(
            orch.fetch_set_image(set.timestamp(), "B").await,
            Err(Error::NotFound(_))
        ));
    }
}
