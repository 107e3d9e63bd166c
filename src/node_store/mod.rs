//! NodeStore - bounded per-node image repository
//!
//! ## Responsibilities
//!
//! - Serialized capture through the node's CaptureGate
//! - Chronological index of ImageRecords (oldest first)
//! - Eviction of the oldest records after every capture
//! - Atomic delete with respect to list/get
//!
//! ## Invariants
//!
//! - `used_bytes == sum(size_bytes)` of indexed records
//! - `used_bytes <= capacity_bytes` after every capture/eviction pass
//!
//! Ordering is by session timestamp, ties broken by insertion order.
//! `list()` returns that order, oldest first.

mod capture_gate;
mod types;

pub use capture_gate::{CaptureGate, CaptureLease};
pub use types::*;

use crate::capture_device::CaptureDevice;
use crate::error::{Error, Result};
use crate::session::SessionId;
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

const FILE_PREFIX: &str = "capture_";
const FILE_EXT: &str = ".raw";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RecordKey {
    session: SessionId,
    seq: u64,
}

#[derive(Default)]
struct StoreIndex {
    records: BTreeMap<RecordKey, ImageRecord>,
    by_name: HashMap<String, RecordKey>,
    used_bytes: u64,
    next_seq: u64,
}

impl StoreIndex {
    fn insert(&mut self, record: ImageRecord) {
        let key = RecordKey {
            session: record.timestamp.clone(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.used_bytes += record.size_bytes;
        self.by_name.insert(record.filename.clone(), key.clone());
        self.records.insert(key, record);
    }

    fn remove(&mut self, filename: &str) -> Option<ImageRecord> {
        let key = self.by_name.remove(filename)?;
        let record = self.records.remove(&key)?;
        self.used_bytes -= record.size_bytes;
        Some(record)
    }

    /// Drop oldest records until the capacity holds
    fn take_evictions(&mut self, capacity_bytes: u64) -> Vec<ImageRecord> {
        let mut evicted = Vec::new();
        while self.used_bytes > capacity_bytes {
            let Some((_, record)) = self.records.pop_first() else {
                break;
            };
            self.by_name.remove(&record.filename);
            self.used_bytes -= record.size_bytes;
            evicted.push(record);
        }
        evicted
    }
}

/// NodeStore instance
///
/// Capture and delete run as spawned tasks and finish even when the caller
/// goes away, so every file on disk stays in the index.
pub struct NodeStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: NodeStoreConfig,
    device: Arc<dyn CaptureDevice>,
    gate: CaptureGate,
    index: RwLock<StoreIndex>,
}

impl NodeStore {
    /// Open the store, indexing files already present in the capture dir
    pub async fn open(config: NodeStoreConfig, device: Arc<dyn CaptureDevice>) -> Result<Self> {
        fs::create_dir_all(&config.capture_dir).await.map_err(|e| {
            Error::Storage(format!(
                "create {}: {}",
                config.capture_dir.display(),
                e
            ))
        })?;

        let mut index = StoreIndex::default();
        for record in scan_capture_dir(&config).await? {
            index.insert(record);
        }
        let evicted = index.take_evictions(config.capacity_bytes);

        tracing::info!(
            node_id = %config.node_id,
            capture_dir = %config.capture_dir.display(),
            records = index.records.len(),
            used_bytes = index.used_bytes,
            capacity_bytes = config.capacity_bytes,
            "NodeStore opened"
        );

        let inner = StoreInner {
            gate: CaptureGate::new(config.node_id.clone()),
            config,
            device,
            index: RwLock::new(index),
        };
        inner.remove_evicted(&evicted).await;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.inner.config.node_id
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.inner.config.capacity_bytes
    }

    /// Whether a capture currently holds the camera
    pub fn is_capturing(&self) -> bool {
        self.inner.gate.is_busy()
    }

    /// Capture one image, persist it and evict down to capacity.
    ///
    /// Concurrent calls wait for the camera. A failed capture leaves the
    /// store untouched. The capture runs to completion even if the returned
    /// future is dropped.
    pub async fn capture(&self, request: CaptureRequest) -> Result<ImageRecord> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.capture(request).await })
            .await
            .map_err(|e| Error::Internal(format!("capture task failed: {}", e)))?
    }

    /// Snapshot of all records, oldest first
    pub async fn list(&self) -> Vec<ImageRecord> {
        self.inner.index.read().await.records.values().cloned().collect()
    }

    /// Records and occupancy read under one lock
    pub async fn inventory(&self) -> (Vec<ImageRecord>, StorageStatus) {
        let index = self.inner.index.read().await;
        (
            index.records.values().cloned().collect(),
            StorageStatus::new(index.used_bytes, self.inner.config.capacity_bytes),
        )
    }

    pub async fn get(&self, filename: &str) -> Result<ImageRecord> {
        let index = self.inner.index.read().await;
        index
            .by_name
            .get(filename)
            .and_then(|key| index.records.get(key))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Image {} not found", filename)))
    }

    /// Record plus file contents
    pub async fn read(&self, filename: &str) -> Result<(ImageRecord, Vec<u8>)> {
        let record = self.get(filename).await?;
        match fs::read(&record.filepath).await {
            Ok(data) => Ok((record, data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Image {} not found", filename)))
            }
            Err(e) => Err(Error::Storage(format!("read {}: {}", record.filepath, e))),
        }
    }

    /// Remove a record and its file
    pub async fn delete(&self, filename: &str) -> Result<()> {
        let inner = self.inner.clone();
        let filename = filename.to_string();
        tokio::spawn(async move { inner.delete(&filename).await })
            .await
            .map_err(|e| Error::Internal(format!("delete task failed: {}", e)))?
    }

    pub async fn status(&self) -> StorageStatus {
        let used = self.inner.index.read().await.used_bytes;
        StorageStatus::new(used, self.inner.config.capacity_bytes)
    }
}

impl StoreInner {
    async fn capture(&self, request: CaptureRequest) -> Result<ImageRecord> {
        if self.gate.is_busy() {
            tracing::debug!(
                node_id = %self.config.node_id,
                waiting = self.gate.waiting() + 1,
                "Camera busy, capture queued"
            );
        }
        let _lease = self.gate.acquire().await;

        let session = request.session.unwrap_or_else(SessionId::now_local);
        let resolution = request.resolution.unwrap_or(self.config.default_resolution);
        let filename = self.allocate_filename(&session).await;
        let target = self.config.capture_dir.join(&filename);

        let output = match self.device.invoke_capture(&target, resolution).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(
                    node_id = %self.config.node_id,
                    session = %session,
                    error = %e,
                    "Capture failed"
                );
                match fs::remove_file(&target).await {
                    Ok(()) => {
                        tracing::warn!(path = %target.display(), "Removed partial capture");
                    }
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        tracing::warn!(
                            path = %target.display(),
                            error = %err,
                            "Failed to remove partial capture"
                        );
                    }
                }
                return Err(e);
            }
        };

        let record = ImageRecord {
            filename,
            node_id: self.config.node_id.clone(),
            timestamp: session,
            size_bytes: output.size_bytes,
            filepath: output.path.to_string_lossy().to_string(),
            layout: Some(output.layout),
        };

        let (evicted, used_bytes) = {
            let mut index = self.index.write().await;
            index.insert(record.clone());
            let evicted = index.take_evictions(self.config.capacity_bytes);
            (evicted, index.used_bytes)
        };
        self.remove_evicted(&evicted).await;

        if evicted.iter().any(|r| r.filename == record.filename) {
            return Err(Error::Storage(format!(
                "Captured {} ({} bytes) exceeds store capacity of {} bytes",
                record.filename, record.size_bytes, self.config.capacity_bytes
            )));
        }

        tracing::info!(
            node_id = %self.config.node_id,
            filename = %record.filename,
            size_kb = record.size_bytes / 1024,
            used_bytes = used_bytes,
            evicted = evicted.len(),
            "Image captured"
        );

        Ok(record)
    }

    /// The index write lock is held across the unlink so list/get never see
    /// a record whose file is already gone.
    async fn delete(&self, filename: &str) -> Result<()> {
        let mut index = self.index.write().await;

        let path = index
            .by_name
            .get(filename)
            .and_then(|key| index.records.get(key))
            .map(|r| PathBuf::from(&r.filepath))
            .ok_or_else(|| Error::NotFound(format!("Image {} not found", filename)))?;

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Backing file already missing");
            }
            Err(e) => {
                return Err(Error::Storage(format!("delete {}: {}", path.display(), e)));
            }
        }

        index.remove(filename);
        tracing::info!(
            node_id = %self.config.node_id,
            filename = %filename,
            used_bytes = index.used_bytes,
            "Image deleted"
        );
        Ok(())
    }

    /// `capture_<session>_<node>.raw`, with `_<n>` appended on collision
    async fn allocate_filename(&self, session: &SessionId) -> String {
        let stem = format!(
            "{}{}_{}",
            FILE_PREFIX,
            session,
            sanitize(&self.config.node_id)
        );
        let mut candidate = format!("{}{}", stem, FILE_EXT);
        let mut n = 1;

        loop {
            let indexed = self.index.read().await.by_name.contains_key(&candidate);
            let on_disk = fs::try_exists(self.config.capture_dir.join(&candidate))
                .await
                .unwrap_or(false);
            if !indexed && !on_disk {
                return candidate;
            }
            candidate = format!("{}_{}{}", stem, n, FILE_EXT);
            n += 1;
        }
    }

    /// Best effort: one failing unlink does not stop the rest
    async fn remove_evicted(&self, evicted: &[ImageRecord]) {
        for record in evicted {
            match fs::remove_file(&record.filepath).await {
                Ok(()) => {
                    tracing::info!(
                        node_id = %self.config.node_id,
                        filename = %record.filename,
                        size_bytes = record.size_bytes,
                        "Removing old file"
                    );
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(
                        node_id = %self.config.node_id,
                        filename = %record.filename,
                        error = %e,
                        "Eviction failed to remove file"
                    );
                }
            }
        }
    }
}

fn sanitize(node_id: &str) -> String {
    node_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Session id embedded in `capture_<session>_...raw`
fn session_from_filename(name: &str) -> Option<SessionId> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let base = rest.get(..15)?;
    let counter: String = rest[15..]
        .strip_prefix('-')
        .map(|t| t.chars().take_while(|c| c.is_ascii_digit()).collect())
        .unwrap_or_default();

    if counter.is_empty() {
        base.parse().ok()
    } else {
        format!("{}-{}", base, counter).parse().ok()
    }
}

/// Existing captures, ordered by modification time
async fn scan_capture_dir(config: &NodeStoreConfig) -> Result<Vec<ImageRecord>> {
    let storage_err =
        |e: std::io::Error| Error::Storage(format!("scan {}: {}", config.capture_dir.display(), e));

    let mut found = Vec::new();
    let mut entries = fs::read_dir(&config.capture_dir).await.map_err(storage_err)?;

    while let Some(entry) = entries.next_entry().await.map_err(storage_err)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_EXT) {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        found.push((meta.modified().ok(), name, meta.len(), entry.path()));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    Ok(found
        .into_iter()
        .map(|(modified, name, size, path)| {
            let timestamp = session_from_filename(&name)
                .or_else(|| {
                    modified.map(|m| SessionId::from_datetime(DateTime::<Local>::from(m).naive_local()))
                })
                .unwrap_or_else(SessionId::now_local);
            ImageRecord {
                filename: name,
                node_id: config.node_id.clone(),
                timestamp,
                size_bytes: size,
                filepath: path.to_string_lossy().to_string(),
                layout: None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_device::{CaptureOutput, RawLayout, Resolution};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes files of scripted sizes and tracks overlapping calls
    #[derive(Default)]
    struct FakeDevice {
        sizes: parking_lot::Mutex<VecDeque<u64>>,
        fail: AtomicBool,
        delay: Duration,
        /// Time spent after the file is written
        settle: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeDevice {
        fn with_sizes(sizes: &[u64]) -> Self {
            Self {
                sizes: parking_lot::Mutex::new(sizes.iter().copied().collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CaptureDevice for FakeDevice {
        async fn invoke_capture(&self, target: &Path, resolution: Resolution) -> Result<CaptureOutput> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Capture("device busy".into()));
            }
            let size = self.sizes.lock().pop_front().unwrap_or(100);
            fs::write(target, vec![0u8; size as usize]).await?;
            tokio::time::sleep(self.settle).await;
            Ok(CaptureOutput {
                path: target.to_path_buf(),
                size_bytes: size,
                layout: RawLayout::plain(resolution),
            })
        }
    }

    fn config(dir: &TempDir, capacity: u64) -> NodeStoreConfig {
        NodeStoreConfig {
            node_id: "node_1".to_string(),
            capture_dir: dir.path().to_path_buf(),
            capacity_bytes: capacity,
            default_resolution: Resolution::new(64, 64),
        }
    }

    fn session(s: &str) -> CaptureRequest {
        CaptureRequest {
            session: Some(s.parse().unwrap()),
            resolution: None,
        }
    }

    #[tokio::test]
    async fn test_third_capture_evicts_first() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice::with_sizes(&[400, 400, 400]));
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();

        let first = store.capture(session("20250130_122601")).await.unwrap();
        let second = store.capture(session("20250130_122602")).await.unwrap();
        let third = store.capture(session("20250130_122603")).await.unwrap();

        let names: Vec<_> = store.list().await.into_iter().map(|r| r.filename).collect();
        assert_eq!(names, vec![second.filename, third.filename]);
        assert_eq!(store.status().await.used_bytes, 800);
        assert!(!Path::new(&first.filepath).exists());
        assert!(matches!(store.get(&first.filename).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_equal_timestamps_evict_first_inserted() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice::with_sizes(&[400, 400, 400]));
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();

        let first = store.capture(session("20250130_122601")).await.unwrap();
        let second = store.capture(session("20250130_122601")).await.unwrap();
        let third = store.capture(session("20250130_122601")).await.unwrap();

        let names: Vec<_> = store.list().await.into_iter().map(|r| r.filename).collect();
        assert_eq!(names, vec![second.filename, third.filename]);
        assert!(!Path::new(&first.filepath).exists());
    }

    #[tokio::test]
    async fn test_eviction_picks_oldest_timestamp_not_oldest_insert() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice::with_sizes(&[400, 400, 400]));
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();

        let newer = store.capture(session("20250130_122605")).await.unwrap();
        let older = store.capture(session("20250130_122603")).await.unwrap();
        store.capture(session("20250130_122606")).await.unwrap();

        assert!(store.get(&newer.filename).await.is_ok());
        assert!(store.get(&older.filename).await.is_err());
    }

    #[tokio::test]
    async fn test_used_bytes_invariant_over_many_captures() {
        let dir = TempDir::new().unwrap();
        let sizes = [120, 700, 50, 333, 999, 1, 400, 640, 20, 510];
        let device = Arc::new(FakeDevice::with_sizes(&sizes));
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();

        for _ in sizes {
            store.capture(CaptureRequest::default()).await.unwrap();
            let status = store.status().await;
            let listed: u64 = store.list().await.iter().map(|r| r.size_bytes).sum();
            assert!(status.used_bytes <= status.capacity_bytes);
            assert_eq!(status.used_bytes, listed);
        }
    }

    #[tokio::test]
    async fn test_capture_failure_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice::with_sizes(&[300]));
        let store = NodeStore::open(config(&dir, 1000), device.clone()).await.unwrap();
        store.capture(CaptureRequest::default()).await.unwrap();

        device.fail.store(true, Ordering::SeqCst);
        let err = store.capture(CaptureRequest::default()).await.unwrap_err();

        assert!(matches!(err, Error::Capture(_)));
        assert_eq!(store.list().await.len(), 1);
        assert_eq!(store.status().await.used_bytes, 300);
    }

    #[tokio::test]
    async fn test_delete_twice_returns_not_found() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice::with_sizes(&[300, 200]));
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();
        let a = store.capture(session("20250130_122601")).await.unwrap();
        store.capture(session("20250130_122602")).await.unwrap();

        store.delete(&a.filename).await.unwrap();
        assert_eq!(store.status().await.used_bytes, 200);
        assert!(!Path::new(&a.filepath).exists());

        let err = store.delete(&a.filename).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.status().await.used_bytes, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_keeps_listing_and_usage_in_step() {
        let dir = TempDir::new().unwrap();
        let sizes: Vec<u64> = (1..=40).collect();
        let device = Arc::new(FakeDevice::with_sizes(&sizes));
        let store = Arc::new(NodeStore::open(config(&dir, 100_000), device).await.unwrap());

        let mut names = Vec::new();
        for _ in &sizes {
            names.push(store.capture(CaptureRequest::default()).await.unwrap().filename);
        }

        let deleter = {
            let store = store.clone();
            tokio::spawn(async move {
                for name in names {
                    store.delete(&name).await.unwrap();
                }
            })
        };

        let mut previous = usize::MAX;
        loop {
            let (records, status) = store.inventory().await;
            let listed: u64 = records.iter().map(|r| r.size_bytes).sum();
            assert_eq!(listed, status.used_bytes);
            assert!(records.len() <= previous);
            previous = records.len();
            if records.is_empty() || deleter.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }

        deleter.await.unwrap();
        assert_eq!(store.status().await.used_bytes, 0);
    }

    #[tokio::test]
    async fn test_abandoned_capture_is_still_indexed() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice {
            settle: Duration::from_millis(300),
            ..FakeDevice::with_sizes(&[500])
        });
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), store.capture(CaptureRequest::default()))
                .await;
        assert!(abandoned.is_err());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.is_capturing() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let on_disk = std::fs::read_dir(dir.path()).unwrap().count();
        let records = store.list().await;
        assert_eq!(on_disk, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(store.status().await.used_bytes, 500);
    }

    #[tokio::test]
    async fn test_concurrent_captures_are_serialized() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice {
            delay: Duration::from_millis(50),
            ..FakeDevice::with_sizes(&[100, 100])
        });
        let store = Arc::new(NodeStore::open(config(&dir, 1000), device.clone()).await.unwrap());

        let (a, b) = tokio::join!(
            store.capture(session("20250130_122601")),
            store.capture(session("20250130_122601")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(device.max_active.load(Ordering::SeqCst), 1);
        assert_ne!(a.filename, b.filename);
        assert_eq!(store.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_capture_larger_than_capacity_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice::with_sizes(&[2000]));
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();

        let err = store.capture(CaptureRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.list().await.is_empty());
        assert_eq!(store.status().await.used_bytes, 0);
    }

    #[tokio::test]
    async fn test_reopen_indexes_and_evicts_existing_files() {
        let dir = TempDir::new().unwrap();
        {
            let device = Arc::new(FakeDevice::with_sizes(&[400, 400, 100]));
            let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();
            store.capture(session("20250130_122601")).await.unwrap();
            store.capture(session("20250130_122602")).await.unwrap();
            store.capture(session("20250130_122602")).await.unwrap();
        }

        let device = Arc::new(FakeDevice::default());
        let store = NodeStore::open(config(&dir, 600), device).await.unwrap();
        let records = store.list().await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp.to_string(), "20250130_122602");
        assert_eq!(store.status().await.used_bytes, 500);
    }

    #[tokio::test]
    async fn test_read_returns_file_bytes() {
        let dir = TempDir::new().unwrap();
        let device = Arc::new(FakeDevice::with_sizes(&[42]));
        let store = NodeStore::open(config(&dir, 1000), device).await.unwrap();
        let record = store.capture(CaptureRequest::default()).await.unwrap();

        let (read_record, data) = store.read(&record.filename).await.unwrap();
        assert_eq!(read_record, record);
        assert_eq!(data.len(), 42);
    }

    #[test]
    fn test_session_from_filename() {
        assert_eq!(
            session_from_filename("capture_20250130_122601_node_1.raw").unwrap().to_string(),
            "20250130_122601"
        );
        assert_eq!(
            session_from_filename("capture_20250130_122601-4_node_1_2.raw").unwrap().to_string(),
            "20250130_122601-4"
        );
        assert!(session_from_filename("capture_garbage.raw").is_none());
    }
}
