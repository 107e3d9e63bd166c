//! Bayer mosaic helpers for NoIR nodes

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Colour filter array order of the top-left 2x2 block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BayerOrder {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl BayerOrder {
    /// (row, col) of the red photosite inside each 2x2 block
    pub fn red_offset(&self) -> (usize, usize) {
        match self {
            BayerOrder::Rggb => (0, 0),
            BayerOrder::Grbg => (0, 1),
            BayerOrder::Gbrg => (1, 0),
            BayerOrder::Bggr => (1, 1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BayerOrder::Rggb => "RGGB",
            BayerOrder::Bggr => "BGGR",
            BayerOrder::Grbg => "GRBG",
            BayerOrder::Gbrg => "GBRG",
        }
    }
}

impl fmt::Display for BayerOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BayerOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGGB" => Ok(BayerOrder::Rggb),
            "BGGR" => Ok(BayerOrder::Bggr),
            "GRBG" => Ok(BayerOrder::Grbg),
            "GBRG" => Ok(BayerOrder::Gbrg),
            other => Err(Error::Validation(format!("Unsupported Bayer pattern: {}", other))),
        }
    }
}

/// Width and height of the red plane of a `width` x `height` mosaic
pub fn red_channel_dims(width: usize, height: usize, order: BayerOrder) -> (usize, usize) {
    let (row_off, col_off) = order.red_offset();
    (
        width.saturating_sub(col_off).div_ceil(2),
        height.saturating_sub(row_off).div_ceil(2),
    )
}

/// Subsample an 8-bit mosaic to its red photosites.
///
/// Returns `None` if `data` is not exactly `width * height` bytes (e.g. packed
/// 10-bit output), in which case the caller keeps the original buffer.
pub fn extract_red_channel(
    data: &[u8],
    width: usize,
    height: usize,
    order: BayerOrder,
) -> Option<Vec<u8>> {
    if width == 0 || height == 0 || data.len() != width * height {
        return None;
    }

    let (row_off, col_off) = order.red_offset();
    let (out_w, out_h) = red_channel_dims(width, height, order);
    let mut out = Vec::with_capacity(out_w * out_h);

    for row in (row_off..height).step_by(2) {
        let line = &data[row * width..(row + 1) * width];
        out.extend(line.iter().skip(col_off).step_by(2));
    }

    Some(out)
}
