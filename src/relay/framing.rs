//! Line reassembly for upstream event streams.
//!
//! The caller owns the carry-over buffer and appends every upstream read to it;
//! [`LineFramer`] splits off complete lines and leaves the unterminated tail in
//! place for the next read. Works on bytes, so multi-byte characters split
//! across reads are reassembled intact.

use crate::types::StreamFrame;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug, Default, Clone)]
pub struct LineFramer {
    // Bytes of the buffer already known to hold no terminator.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineFramer {
    type Item = StreamFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamFrame>, Self::Error> {
        loop {
            let start = self.scanned.min(src.len());
            let Some(offset) = src[start..].iter().position(|b| *b == b'\n') else {
                self.scanned = src.len();
                return Ok(None);
            };
            let end = start + offset;
            self.scanned = 0;
            let line = src.split_to(end + 1);
            if let Some(frame) = StreamFrame::from_line(&line[..end]) {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<StreamFrame>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // The unterminated tail is still content.
        self.scanned = 0;
        let tail = src.split();
        Ok(StreamFrame::from_line(&tail))
    }
}
