//! Per-subscriber bounded queue with drop-oldest frames

use super::types::RelayEvent;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// Pending control events kept per subscriber; older ones are superseded
const MAX_PENDING_CONTROL: usize = 8;

struct QueueState {
    events: VecDeque<RelayEvent>,
    frames: usize,
    controls: usize,
    dropped: u64,
    closed: bool,
}

impl QueueState {
    fn pop_front(&mut self) -> Option<RelayEvent> {
        let event = self.events.pop_front()?;
        match event {
            RelayEvent::Frame(_) => self.frames -= 1,
            RelayEvent::Control(_) => self.controls -= 1,
        }
        Some(event)
    }
}

/// Outbound queue of one subscriber.
///
/// At most `capacity` frames are held. Control events never yield to frames;
/// past `MAX_PENDING_CONTROL` the oldest pending control event is discarded,
/// so the newest publisher state always reaches the subscriber.
pub(crate) struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity + 1),
                frames: 0,
                controls: 0,
                dropped: 0,
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a frame, evicting the oldest pending frame when full.
    /// Returns true if a frame was dropped.
    pub(crate) fn push_frame(&self, frame: Bytes) -> bool {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }

            let mut dropped = false;
            if state.frames >= self.capacity {
                if let Some(pos) = state
                    .events
                    .iter()
                    .position(|e| matches!(e, RelayEvent::Frame(_)))
                {
                    state.events.remove(pos);
                    state.frames -= 1;
                    state.dropped += 1;
                    dropped = true;
                }
            }
            state.events.push_back(RelayEvent::Frame(frame));
            state.frames += 1;
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    pub(crate) fn push_event(&self, event: RelayEvent) {
        if let RelayEvent::Frame(frame) = event {
            self.push_frame(frame);
            return;
        }
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if state.controls >= MAX_PENDING_CONTROL {
                if let Some(pos) = state
                    .events
                    .iter()
                    .position(|e| matches!(e, RelayEvent::Control(_)))
                {
                    state.events.remove(pos);
                    state.controls -= 1;
                }
            }
            state.events.push_back(event);
            state.controls += 1;
        }
        self.notify.notify_one();
    }

    /// Pending events are still delivered, then `pop` yields `None`
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<RelayEvent> {
        self.state.lock().pop_front()
    }

    pub(crate) async fn pop(&self) -> Option<RelayEvent> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(event) = state.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn queued_frames(&self) -> usize {
        self.state.lock().frames
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
