//! PreviewSource - node-side live preview producer
//!
//! ## Responsibilities
//!
//! - Produce a stream of JPEG preview frames from the camera
//! - Push frames to a central relay as one streaming HTTP request
//!
//! Wire format of the push body: each frame prefixed with a 4-byte
//! big-endian length (`LengthDelimitedCodec` defaults).

mod jpeg;

pub use jpeg::{JpegFrameDecoder, MAX_FRAME_BYTES};

use crate::capture_device::Resolution;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedRead, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// Live frame stream
pub type FrameStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait PreviewSource: Send + Sync {
    /// Start producing frames. Dropping the stream stops the producer.
    async fn open(&self, resolution: Resolution, framerate: u32) -> Result<FrameStream>;
}

/// `libcamera-vid` MJPEG source
pub struct LibcameraPreview {
    binary: String,
}

impl LibcameraPreview {
    pub fn new() -> Self {
        Self {
            binary: "libcamera-vid".to_string(),
        }
    }
}

impl Default for LibcameraPreview {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames read from a child's stdout; the child is killed when dropped
struct ChildFrames {
    _child: Child,
    frames: FramedRead<ChildStdout, JpegFrameDecoder>,
}

impl Stream for ChildFrames {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames)
            .poll_next(cx)
            .map(|item| item.map(|r| r.map(BytesMut::freeze)))
    }
}

#[async_trait]
impl PreviewSource for LibcameraPreview {
    async fn open(&self, resolution: Resolution, framerate: u32) -> Result<FrameStream> {
        let mut child = Command::new(&self.binary)
            .args(["-t", "0", "--nopreview", "--codec", "mjpeg"])
            .arg("--width")
            .arg(resolution.width.to_string())
            .arg("--height")
            .arg(resolution.height.to_string())
            .arg("--framerate")
            .arg(framerate.to_string())
            .args(["-o", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("Failed to spawn {}: {}", self.binary, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Capture(format!("{} stdout not captured", self.binary)))?;

        tracing::info!(
            resolution = %resolution,
            framerate,
            "Preview camera started"
        );

        Ok(ChildFrames {
            _child: child,
            frames: FramedRead::new(stdout, JpegFrameDecoder::default()),
        }
        .boxed())
    }
}

/// Encode frames with the relay's length prefix
fn length_prefixed(frames: FrameStream) -> impl Stream<Item = Result<Bytes>> + Send {
    let mut codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    frames.map(move |frame| {
        let frame = frame?;
        let mut buf = BytesMut::with_capacity(frame.len() + 4);
        codec
            .encode(frame, &mut buf)
            .map_err(|e| Error::Internal(format!("Frame encoding failed: {}", e)))?;
        Ok(buf.freeze())
    })
}

/// Current push session
#[derive(Debug, Clone, Serialize)]
pub struct PreviewSession {
    pub relay_url: String,
    pub started_at: DateTime<Utc>,
}

struct ActivePush {
    session: PreviewSession,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Pushes preview frames to a relay
pub struct PreviewPublisher {
    source: Arc<dyn PreviewSource>,
    http: reqwest::Client,
    resolution: Resolution,
    framerate: u32,
    active: Mutex<Option<ActivePush>>,
}

impl PreviewPublisher {
    pub fn new(
        source: Arc<dyn PreviewSource>,
        resolution: Resolution,
        framerate: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            source,
            http,
            resolution,
            framerate,
            active: Mutex::new(None),
        })
    }

    /// Start pushing to `relay_url`. `Conflict` if a push is already running.
    pub async fn start(&self, relay_url: &str) -> Result<PreviewSession> {
        let mut active = self.active.lock().await;
        if let Some(push) = active.as_ref() {
            if !push.task.is_finished() {
                return Err(Error::Conflict(format!(
                    "Preview already streaming to {}",
                    push.session.relay_url
                )));
            }
        }

        let frames = self.source.open(self.resolution, self.framerate).await?;
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let body = length_prefixed(frames).take_until(async move { stop.cancelled().await });

        let request = self
            .http
            .post(relay_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body));

        let url = relay_url.to_string();
        let task = tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(relay_url = %url, "Preview push ended");
                }
                Ok(response) => {
                    tracing::warn!(
                        relay_url = %url,
                        status = %response.status(),
                        "Relay rejected preview push"
                    );
                }
                Err(e) => {
                    tracing::warn!(relay_url = %url, error = %e, "Preview push failed");
                }
            }
        });

        let session = PreviewSession {
            relay_url: relay_url.to_string(),
            started_at: Utc::now(),
        };
        tracing::info!(relay_url = %relay_url, "Preview push started");
        *active = Some(ActivePush {
            session: session.clone(),
            cancel,
            task,
        });
        Ok(session)
    }

    /// Stop the running push. Returns false if none was running.
    pub async fn stop(&self) -> bool {
        let Some(push) = self.active.lock().await.take() else {
            return false;
        };
        push.cancel.cancel();
        // The request finishes once the body stream ends
        if tokio::time::timeout(Duration::from_secs(5), push.task)
            .await
            .is_err()
        {
            tracing::warn!(relay_url = %push.session.relay_url, "Preview push did not end in time");
        }
        true
    }

    pub async fn session(&self) -> Option<PreviewSession> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|p| !p.task.is_finished())
            .map(|p| p.session.clone())
    }
}
