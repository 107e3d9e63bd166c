//! Camera detection via `libcamera-still --list-cameras`

use super::bayer::BayerOrder;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// First detected sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub index: u32,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub bit_depth: Option<u8>,
    pub bayer: BayerOrder,
}

/// Parse the listing printed by `libcamera-still --list-cameras`.
///
/// The sensor line (`0 : imx708_noir [4608x2592 10-bit RGGB] (...)`) gives
/// the resolution; if it lacks a Bayer order the first `'SRGGB10...` mode
/// format is used instead.
pub fn parse_camera_list(output: &str) -> Result<CameraInfo> {
    if !output.contains("Available cameras") {
        return Err(Error::Capture("No cameras found".to_string()));
    }

    let sensor_re = Regex::new(
        r"^\s*(\d+)\s*:\s*(\S+)\s*\[(\d+)x(\d+)(?:\s+(\d+)-bit)?(?:\s+([RGB]{4}))?\]",
    )
    .map_err(|e| Error::Internal(e.to_string()))?;
    let mode_re =
        Regex::new(r"'S([RGB]{4})(\d+)").map_err(|e| Error::Internal(e.to_string()))?;

    let mut lines = output.lines();
    let caps = lines
        .by_ref()
        .find_map(|line| sensor_re.captures(line))
        .ok_or_else(|| Error::Capture("No active camera found".to_string()))?;

    let parse_num = |idx: usize| -> Result<u32> {
        caps[idx]
            .parse()
            .map_err(|_| Error::Capture(format!("Bad number in camera listing: {}", &caps[idx])))
    };

    let index = parse_num(1)?;
    let model = caps[2].to_string();
    let width = parse_num(3)?;
    let height = parse_num(4)?;
    let mut bit_depth = caps.get(5).and_then(|m| m.as_str().parse().ok());

    let bayer = match caps.get(6) {
        Some(m) => m.as_str().parse()?,
        None => {
            let mode = lines
                .find_map(|line| mode_re.captures(line))
                .ok_or_else(|| Error::Capture("No camera modes found".to_string()))?;
            if bit_depth.is_none() {
                bit_depth = mode[2].parse().ok();
            }
            mode[1].parse()?
        }
    };

    Ok(CameraInfo {
        index,
        model,
        width,
        height,
        bit_depth,
        bayer,
    })
}

/// Run the listing command and parse its output
pub async fn probe_camera(binary: &str) -> Result<CameraInfo> {
    let child = Command::new(binary)
        .arg("--list-cameras")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Capture(format!("{} spawn failed: {}", binary, e)))?;

    let output = match tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(Error::Capture(format!("{} failed: {}", binary, e))),
        Err(_) => return Err(Error::Timeout("Camera check timed out".to_string())),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Capture(format!(
            "{} command failed: {}",
            binary,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let info = parse_camera_list(&stdout)?;

    tracing::info!(
        model = %info.model,
        width = info.width,
        height = info.height,
        bayer = %info.bayer,
        "Camera detected"
    );

    Ok(info)
}
