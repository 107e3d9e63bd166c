//! MJPEG byte stream splitter

use crate::error::Error;
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound for one preview frame
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Splits a concatenated MJPEG stream into individual JPEG frames.
///
/// Bytes before a start-of-image marker are discarded.
#[derive(Debug, Default)]
pub struct JpegFrameDecoder {
    /// Offset already searched for EOI in the current frame
    scanned: usize,
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

impl Decoder for JpegFrameDecoder {
    type Item = BytesMut;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, Error> {
        if self.scanned == 0 {
            match find(src, &SOI, 0) {
                Some(0) => {}
                Some(start) => src.advance(start),
                None => {
                    // Keep a trailing 0xFF, it may begin the next SOI
                    let keep = usize::from(src.last() == Some(&0xFF));
                    let drop = src.len() - keep;
                    src.advance(drop);
                    return Ok(None);
                }
            }
        }

        // EOI search starts after the SOI marker
        let from = self.scanned.max(2).saturating_sub(1);
        match find(src, &EOI, from) {
            Some(end) => {
                self.scanned = 0;
                Ok(Some(src.split_to(end + 2)))
            }
            None => {
                if src.len() > MAX_FRAME_BYTES {
                    return Err(Error::Capture(format!(
                        "Preview frame exceeds {} bytes",
                        MAX_FRAME_BYTES
                    )));
                }
                self.scanned = src.len();
                Ok(None)
            }
        }
    }
}
