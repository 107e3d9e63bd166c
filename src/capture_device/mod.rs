//! CaptureDevice - RAW capture primitive
//!
//! ## Responsibilities
//!
//! - Single-attempt "capture now, return file or error" call
//! - libcamera-raw invocation with timeout and process cleanup
//! - Optional red-channel extraction for NoIR sensors
//!
//! Exclusivity and retry policy live in NodeStore / CaptureOrchestrator,
//! never here.

mod bayer;
mod camera_probe;

pub use bayer::{extract_red_channel, red_channel_dims, BayerOrder};
pub use camera_probe::{parse_camera_list, probe_camera, CameraInfo};

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// Capture resolution, written as `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| Error::Validation(format!("Invalid resolution: {}", s)))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid resolution width: {}", s)))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("Invalid resolution height: {}", s)))?;
        if width == 0 || height == 0 {
            return Err(Error::Validation(format!("Resolution must be non-zero: {}", s)));
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

/// Geometry needed to decode a raw file: the stored plane plus the sensor
/// mosaic it was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLayout {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bayer_pattern: Option<BayerOrder>,
}

impl RawLayout {
    /// Plane of `resolution`, sensor unknown
    pub fn plain(resolution: Resolution) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            camera_width: None,
            camera_height: None,
            bayer_pattern: None,
        }
    }

    /// Plane of `resolution` taken from the sensor described by `camera`
    pub fn from_sensor(resolution: Resolution, camera: &CameraInfo) -> Self {
        Self {
            camera_width: Some(camera.width),
            camera_height: Some(camera.height),
            bayer_pattern: Some(camera.bayer),
            ..Self::plain(resolution)
        }
    }
}

/// File produced by a successful capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutput {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub layout: RawLayout,
}

/// External capture primitive.
///
/// Implementations write the image to `target` and report its size. They
/// must not retry and must leave no file behind on failure.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn invoke_capture(&self, target: &Path, resolution: Resolution) -> Result<CaptureOutput>;
}

/// libcamera-raw backed device
pub struct LibcameraDevice {
    binary: String,
    timeout: Duration,
    /// Probed sensor, reported in every capture's layout
    camera: Option<CameraInfo>,
    red_channel: bool,
}

impl LibcameraDevice {
    /// Create new LibcameraDevice
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "libcamera-raw".to_string(),
            timeout,
            camera: None,
            red_channel: false,
        }
    }

    /// Attach the sensor found at startup
    pub fn with_camera(mut self, info: CameraInfo) -> Self {
        self.camera = Some(info);
        self
    }

    /// Enable NoIR red-channel extraction; needs `with_camera`
    pub fn with_red_channel(mut self) -> Self {
        self.red_channel = true;
        self
    }

    fn layout(&self, resolution: Resolution) -> RawLayout {
        match &self.camera {
            Some(camera) => RawLayout::from_sensor(resolution, camera),
            None => RawLayout::plain(resolution),
        }
    }

    /// Rewrites `target` as its red plane; returns the new size and plane
    async fn extract_red(
        &self,
        target: &Path,
        resolution: Resolution,
        info: &CameraInfo,
    ) -> Result<(u64, Resolution)> {
        let data = fs::read(target)
            .await
            .map_err(|e| Error::Storage(format!("read {}: {}", target.display(), e)))?;

        match extract_red_channel(
            &data,
            resolution.width as usize,
            resolution.height as usize,
            info.bayer,
        ) {
            Some(red) => {
                fs::write(target, &red)
                    .await
                    .map_err(|e| Error::Storage(format!("write {}: {}", target.display(), e)))?;
                let (w, h) = red_channel_dims(
                    resolution.width as usize,
                    resolution.height as usize,
                    info.bayer,
                );
                let plane = Resolution::new(w as u32, h as u32);
                tracing::info!(
                    path = %target.display(),
                    size = red.len(),
                    bayer = %info.bayer,
                    plane = %plane,
                    "Extracted red channel"
                );
                Ok((red.len() as u64, plane))
            }
            None => {
                tracing::warn!(
                    path = %target.display(),
                    size = data.len(),
                    expected = resolution.width as u64 * resolution.height as u64,
                    "Raw buffer is not 8-bit unpacked, keeping full mosaic"
                );
                Ok((data.len() as u64, resolution))
            }
        }
    }
}

#[async_trait]
impl CaptureDevice for LibcameraDevice {
    /// Uses kill_on_drop(true) so a timed-out libcamera-raw is killed when
    /// the Child is dropped.
    async fn invoke_capture(&self, target: &Path, resolution: Resolution) -> Result<CaptureOutput> {
        let width = resolution.width.to_string();
        let height = resolution.height.to_string();
        let mode = format!("{}:{}:10:P", resolution.width, resolution.height);
        let target_str = target.to_string_lossy().to_string();

        tracing::info!(
            binary = %self.binary,
            resolution = %resolution,
            target = %target.display(),
            "Executing capture command"
        );

        let child = Command::new(&self.binary)
            .args([
                "-t", "1000",
                "--nopreview",
                "--width", width.as_str(),
                "--height", height.as_str(),
                "-o", target_str.as_str(),
                "--mode", mode.as_str(),
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("{} spawn failed: {}", self.binary, e)))?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::Capture(format!("Capture failed: {}", stderr.trim())))
            }
            Ok(Err(e)) => Err(Error::Capture(format!("Capture execution failed: {}", e))),
            Err(_) => {
                tracing::warn!(
                    timeout_sec = self.timeout.as_secs(),
                    "libcamera-raw timeout, process killed via kill_on_drop"
                );
                Err(Error::Capture(format!(
                    "Capture timed out ({}s)",
                    self.timeout.as_secs()
                )))
            }
        };

        if let Err(e) = result {
            let _ = fs::remove_file(target).await;
            return Err(e);
        }

        let mut size_bytes = fs::metadata(target)
            .await
            .map_err(|e| Error::Capture(format!("Capture produced no file: {}", e)))?
            .len();

        let mut layout = self.layout(resolution);
        if let (true, Some(info)) = (self.red_channel, &self.camera) {
            let (size, plane) = match self.extract_red(target, resolution, info).await {
                Ok(extracted) => extracted,
                Err(e) => {
                    let _ = fs::remove_file(target).await;
                    return Err(e);
                }
            };
            size_bytes = size;
            layout.width = plane.width;
            layout.height = plane.height;
        }

        Ok(CaptureOutput {
            path: target.to_path_buf(),
            size_bytes,
            layout,
        })
    }
}
