//! Decoder for request bodies framed by `Content-Length`.

use crate::buf::RingBuf;
use crate::codec::Decoder;
use crate::protocol::{ParseError, PayloadItem};
use bytes::Buf;

/// Hands out buffered bytes until the declared length is exhausted, then reports EOF.
/// Bytes past the declared length are left in the buffer for the next pipelined request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }

    pub fn remaining(&self) -> u64 {
        self.length
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut RingBuf) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = self.length.min(src.len() as u64);
        // len <= src.len()
        let bytes = src.copy_to_bytes(len as usize);

        self.length -= len;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}
