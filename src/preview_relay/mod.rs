//! PreviewRelay - single-publisher live preview fan-out
//!
//! ## Responsibilities
//!
//! - At most one publishing node at a time
//! - Deliver each published frame to every connected subscriber
//! - Isolate slow subscribers (bounded queue, oldest frame dropped)
//! - Signal `publisher_offline` when the publisher goes away
//!
//! Publishing never awaits a subscriber. Frames are delivered in publish
//! order per subscriber, with independent drops.

mod subscriber;
mod types;

pub use types::*;

use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use subscriber::SubscriberQueue;
use uuid::Uuid;

struct ActivePublisher {
    generation: u64,
    status: PublisherStatus,
}

struct RelayShared {
    subscribers: RwLock<HashMap<Uuid, Arc<SubscriberQueue>>>,
    publisher: Mutex<Option<ActivePublisher>>,
    capacity: usize,
    generation: AtomicU64,
    frames_published: AtomicU64,
}

impl RelayShared {
    fn broadcast(&self, event: RelayEvent) {
        let subscribers = self.subscribers.read();
        for queue in subscribers.values() {
            queue.push_event(event.clone());
        }
    }

    /// Clear the publisher if it is still `generation`
    fn release_publisher(&self, generation: u64, reason: &str) -> bool {
        let released = {
            let mut publisher = self.publisher.lock();
            match publisher.as_ref() {
                Some(active) if active.generation == generation => publisher.take(),
                _ => None,
            }
        };

        match released {
            Some(active) => {
                tracing::info!(
                    node_id = %active.status.node_id,
                    frames = active.status.frames,
                    reason = %reason,
                    "Preview publisher offline"
                );
                self.broadcast(RelayEvent::Control(ControlMessage::PublisherOffline {
                    node_id: active.status.node_id,
                    reason: reason.to_string(),
                }));
                true
            }
            None => false,
        }
    }
}

/// PreviewRelay instance
#[derive(Clone)]
pub struct PreviewRelay {
    shared: Arc<RelayShared>,
}

impl PreviewRelay {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(RelayShared {
                subscribers: RwLock::new(HashMap::new()),
                publisher: Mutex::new(None),
                capacity: queue_capacity.max(1),
                generation: AtomicU64::new(0),
                frames_published: AtomicU64::new(0),
            }),
        }
    }

    /// Claim the publisher slot for `node_id`.
    ///
    /// Fails with `Conflict` while another publisher is live. Dropping the
    /// handle releases the slot and notifies subscribers.
    pub fn attach_publisher(&self, node_id: &str) -> Result<PublisherHandle> {
        let generation = {
            let mut publisher = self.shared.publisher.lock();
            if let Some(active) = publisher.as_ref() {
                return Err(Error::Conflict(format!(
                    "Preview publisher {} already live",
                    active.status.node_id
                )));
            }
            let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
            *publisher = Some(ActivePublisher {
                generation,
                status: PublisherStatus {
                    node_id: node_id.to_string(),
                    since: Utc::now(),
                    frames: 0,
                },
            });
            generation
        };

        tracing::info!(node_id = %node_id, "Preview publisher online");
        self.shared
            .broadcast(RelayEvent::Control(ControlMessage::PublisherOnline {
                node_id: node_id.to_string(),
            }));

        Ok(PublisherHandle {
            shared: self.shared.clone(),
            generation,
            node_id: node_id.to_string(),
        })
    }

    /// Force the current publisher off. Its handle stops accepting frames.
    pub fn detach_publisher(&self, reason: &str) -> Option<String> {
        let (generation, node_id) = {
            let publisher = self.shared.publisher.lock();
            let active = publisher.as_ref()?;
            (active.generation, active.status.node_id.clone())
        };
        self.shared
            .release_publisher(generation, reason)
            .then_some(node_id)
    }

    /// Register a subscriber. Only frames published after this call are
    /// delivered.
    pub fn subscribe(&self) -> PreviewSubscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(SubscriberQueue::new(self.shared.capacity));
        self.shared.subscribers.write().insert(id, queue.clone());

        // Late joiners learn about an already-live publisher
        if let Some(active) = self.shared.publisher.lock().as_ref() {
            queue.push_event(RelayEvent::Control(ControlMessage::PublisherOnline {
                node_id: active.status.node_id.clone(),
            }));
        }

        tracing::info!(subscriber_id = %id, "Preview subscriber connected");

        PreviewSubscription {
            id,
            queue,
            shared: self.shared.clone(),
            state: SubscriptionState::Connecting,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    pub fn publisher(&self) -> Option<PublisherStatus> {
        self.shared
            .publisher
            .lock()
            .as_ref()
            .map(|a| a.status.clone())
    }

    pub fn status(&self) -> RelayStatus {
        let subscribers = self
            .shared
            .subscribers
            .read()
            .iter()
            .map(|(id, q)| SubscriberStatus {
                subscriber_id: *id,
                queued: q.queued_frames(),
                dropped: q.dropped(),
            })
            .collect();

        RelayStatus {
            publisher: self.publisher(),
            queue_capacity: self.shared.capacity,
            frames_published: self.shared.frames_published.load(Ordering::Relaxed),
            subscribers,
        }
    }

    /// End every subscription (shutdown)
    pub fn close(&self) {
        let subscribers = self.shared.subscribers.read();
        for queue in subscribers.values() {
            queue.close();
        }
    }
}

impl Default for PreviewRelay {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Live publisher slot
pub struct PublisherHandle {
    shared: Arc<RelayShared>,
    generation: u64,
    node_id: String,
}

impl PublisherHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// True while this handle still owns the publisher slot
    pub fn is_live(&self) -> bool {
        matches!(
            self.shared.publisher.lock().as_ref(),
            Some(active) if active.generation == self.generation
        )
    }

    /// Deliver one frame to every subscriber.
    ///
    /// Returns the number of subscribers reached, or `Conflict` once the
    /// slot was taken away by `detach_publisher`.
    pub fn publish_frame(&self, frame: Bytes) -> Result<usize> {
        {
            let mut publisher = self.shared.publisher.lock();
            match publisher.as_mut() {
                Some(active) if active.generation == self.generation => {
                    active.status.frames += 1;
                }
                _ => {
                    return Err(Error::Conflict(format!(
                        "Publisher {} was detached",
                        self.node_id
                    )))
                }
            }
        }
        self.shared.frames_published.fetch_add(1, Ordering::Relaxed);

        let subscribers = self.shared.subscribers.read();
        let mut dropped = 0usize;
        for queue in subscribers.values() {
            if queue.push_frame(frame.clone()) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::trace!(node_id = %self.node_id, dropped, "Slow subscribers dropped a frame");
        }
        Ok(subscribers.len())
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.shared
            .release_publisher(self.generation, "publisher disconnected");
    }
}

/// One subscriber's live frame sequence. Dropping it unregisters the
/// subscriber and frees its queue.
pub struct PreviewSubscription {
    id: Uuid,
    queue: Arc<SubscriberQueue>,
    shared: Arc<RelayShared>,
    state: SubscriptionState,
}

impl PreviewSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Next event; `None` once the relay closed this subscription
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        if self.state == SubscriptionState::Closed {
            return None;
        }
        match self.queue.pop().await {
            Some(event) => {
                if matches!(event, RelayEvent::Frame(_)) {
                    self.state = SubscriptionState::Streaming;
                }
                Some(event)
            }
            None => {
                self.state = SubscriptionState::Closed;
                None
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = RelayEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl Drop for PreviewSubscription {
    fn drop(&mut self) {
        self.queue.close();
        if self.shared.subscribers.write().remove(&self.id).is_some() {
            tracing::info!(subscriber_id = %self.id, "Preview subscriber disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n; 3])
    }

    #[tokio::test]
    async fn test_frames_reach_all_subscribers() {
        let relay = PreviewRelay::new(4);
        let mut a = relay.subscribe();
        let mut b = relay.subscribe();
        assert_eq!(a.state(), SubscriptionState::Connecting);

        let publisher = relay.attach_publisher("node_1").unwrap();
        assert_eq!(publisher.publish_frame(frame(1)).unwrap(), 2);

        for sub in [&mut a, &mut b] {
            assert!(matches!(
                sub.recv().await,
                Some(RelayEvent::Control(ControlMessage::PublisherOnline { .. }))
            ));
            assert_eq!(sub.recv().await, Some(RelayEvent::Frame(frame(1))));
            assert_eq!(sub.state(), SubscriptionState::Streaming);
        }
    }

    #[tokio::test]
    async fn test_no_backlog_replay() {
        let relay = PreviewRelay::new(4);
        let publisher = relay.attach_publisher("node_1").unwrap();
        publisher.publish_frame(frame(1)).unwrap();

        let mut sub = relay.subscribe();
        publisher.publish_frame(frame(2)).unwrap();

        assert!(matches!(sub.recv().await, Some(RelayEvent::Control(_))));
        assert_eq!(sub.recv().await, Some(RelayEvent::Frame(frame(2))));
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_newest_and_does_not_block_others() {
        let relay = PreviewRelay::new(2);
        let slow = relay.subscribe();
        let mut fast = relay.subscribe();
        let publisher = relay.attach_publisher("node_1").unwrap();

        for n in 1..=5 {
            publisher.publish_frame(frame(n)).unwrap();
            // fast consumer keeps up
            loop {
                match fast.recv().await {
                    Some(RelayEvent::Frame(f)) => {
                        assert_eq!(f, frame(n));
                        break;
                    }
                    Some(RelayEvent::Control(_)) => continue,
                    None => panic!("closed"),
                }
            }
        }

        let status = relay.status();
        let slow_status = status
            .subscribers
            .iter()
            .find(|s| s.subscriber_id == slow.id())
            .unwrap();
        assert_eq!(slow_status.queued, 2);
        assert_eq!(slow_status.dropped, 3);
        assert_eq!(status.frames_published, 5);
    }

    #[tokio::test]
    async fn test_second_publisher_conflicts() {
        let relay = PreviewRelay::default();
        let first = relay.attach_publisher("node_1").unwrap();
        assert!(matches!(
            relay.attach_publisher("node_2"),
            Err(Error::Conflict(_))
        ));
        drop(first);
        assert!(relay.attach_publisher("node_2").is_ok());
    }

    #[tokio::test]
    async fn test_publisher_drop_signals_offline() {
        let relay = PreviewRelay::default();
        let mut sub = relay.subscribe();
        let publisher = relay.attach_publisher("node_1").unwrap();
        drop(publisher);

        assert!(matches!(sub.recv().await, Some(RelayEvent::Control(ControlMessage::PublisherOnline { .. }))));
        assert_eq!(
            sub.recv().await,
            Some(RelayEvent::Control(ControlMessage::PublisherOffline {
                node_id: "node_1".into(),
                reason: "publisher disconnected".into(),
            }))
        );
        assert!(relay.publisher().is_none());
    }

    #[tokio::test]
    async fn test_detach_invalidates_handle() {
        let relay = PreviewRelay::default();
        let publisher = relay.attach_publisher("node_1").unwrap();
        assert_eq!(relay.detach_publisher("detached by operator"), Some("node_1".into()));
        assert!(!publisher.is_live());
        assert!(publisher.publish_frame(frame(1)).is_err());

        // New publisher is not released by the stale handle's drop
        let _next = relay.attach_publisher("node_2").unwrap();
        drop(publisher);
        assert_eq!(relay.publisher().unwrap().node_id, "node_2");
    }

    #[tokio::test]
    async fn test_subscriber_drop_unregisters() {
        let relay = PreviewRelay::default();
        let sub = relay.subscribe();
        assert_eq!(relay.subscriber_count(), 1);
        drop(sub);
        assert_eq!(relay.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let relay = PreviewRelay::default();
        let sub = relay.subscribe();
        let publisher = relay.attach_publisher("node_1").unwrap();
        publisher.publish_frame(frame(9)).unwrap();
        relay.close();

        let events: Vec<RelayEvent> = tokio::time::timeout(
            Duration::from_secs(1),
            sub.into_stream().collect(),
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], RelayEvent::Frame(frame(9)));
    }
}
