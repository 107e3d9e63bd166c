//! Capture session identifiers
//!
//! A session id is the second-resolution capture timestamp
//! (`YYYYMMDD_HHMMSS`). When the same second is handed out twice a
//! monotonic counter is appended (`20250130_122601-1`), so two fan-outs in
//! one second never collide in the SetAggregator.

use crate::error::{Error, Result};
use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// strftime layout of the timestamp part
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Ordered by timestamp, then counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId {
    timestamp: String,
    counter: u32,
}

impl SessionId {
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self {
            timestamp: dt.format(TIMESTAMP_FORMAT).to_string(),
            counter: 0,
        }
    }

    /// Session for the current local second
    pub fn now_local() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    pub fn with_counter(mut self, counter: u32) -> Self {
        self.counter = counter;
        self
    }

    /// Timestamp part without counter
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counter == 0 {
            f.write_str(&self.timestamp)
        } else {
            write!(f, "{}-{}", self.timestamp, self.counter)
        }
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ts, counter) = match s.split_once('-') {
            Some((ts, n)) => {
                let counter = n
                    .parse()
                    .map_err(|_| Error::Validation(format!("Invalid session counter: {}", s)))?;
                (ts, counter)
            }
            None => (s, 0),
        };

        NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
            .map_err(|_| Error::Validation(format!("Invalid session timestamp: {}", s)))?;

        Ok(Self {
            timestamp: ts.to_string(),
            counter,
        })
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.to_string()
    }
}

/// Hands out strictly increasing session ids
#[derive(Default)]
pub struct SessionAllocator {
    last: Mutex<Option<SessionId>>,
}

impl SessionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator whose next id is strictly greater than `last`
    pub fn resume_after(last: SessionId) -> Self {
        Self {
            last: Mutex::new(Some(last)),
        }
    }

    /// Allocate a session id for the current local time
    pub fn next(&self) -> SessionId {
        self.next_at(Local::now().naive_local())
    }

    /// Allocate a session id for `now`.
    ///
    /// If `now` falls in (or before) the last allocated second, the last
    /// timestamp is reused with the next counter value.
    pub fn next_at(&self, now: NaiveDateTime) -> SessionId {
        let candidate = SessionId::from_datetime(now);
        let mut last = self.last.lock();

        let id = match last.as_ref() {
            Some(prev) if candidate.timestamp <= prev.timestamp => prev
                .clone()
                .with_counter(prev.counter + 1),
            _ => candidate,
        };

        *last = Some(id.clone());
        id
    }
}
