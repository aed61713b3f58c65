//! Chunked framing for response bodies of unknown length.

use crate::buf::RingBuf;
use crate::codec::Encoder;
use crate::protocol::{PayloadItem, SendError};
use bytes::Buf;
use std::io::Write;

/// Frames each segment as `<HEX>\r\n<data>\r\n` and the end of the body as `0\r\n\r\n`.
///
/// Empty segments are skipped since a zero size would terminate the body early. Anything
/// encoded after the terminator is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    eof: bool,
    send_size: u64,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false, send_size: 0 }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Total payload bytes framed so far, excluding framing overhead.
    pub fn send_size(&self) -> u64 {
        self.send_size
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut RingBuf) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(mut bytes) => {
                let len = bytes.remaining();
                if len == 0 {
                    return Ok(());
                }
                // size line, data and CRLF must land together or not at all
                if !dst.reserve(len + 20) {
                    return Err(SendError::BufferFull { pending: len });
                }
                write!(dst, "{len:X}\r\n")?;
                while bytes.has_remaining() {
                    let n = dst.put_slice(bytes.chunk());
                    bytes.advance(n);
                }
                dst.put_slice(b"\r\n");
                self.send_size += len as u64;
                Ok(())
            }
            PayloadItem::Eof => {
                if !dst.reserve(5) {
                    return Err(SendError::BufferFull { pending: 5 });
                }
                self.eof = true;
                dst.put_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}
