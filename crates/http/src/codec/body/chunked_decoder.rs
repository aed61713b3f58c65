//! Decoder for request bodies sent with `Transfer-Encoding: chunked`.
//!
//! See [RFC 9112 Section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1). The decoder
//! is a byte-level state machine, so a chunk header split across socket reads simply leaves the
//! decoder in the middle of a state until more bytes arrive.

use crate::buf::RingBuf;
use crate::codec::Decoder;
use crate::protocol::{ParseError, PayloadItem};
use bytes::Buf;
use std::task::Poll;
use tracing::trace;
use ChunkedState::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: SizeStart, remaining_size: 0 }
    }

    /// True once the terminal chunk and its trailing blank line have been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == End
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// First hex digit of the chunk size
    SizeStart,
    /// Further hex digits of the chunk size
    Size,
    /// Whitespace after the size
    SizeLws,
    /// Chunk extensions, ignored
    Extension,
    /// LF closing the size line
    SizeLf,
    /// Chunk data
    Body,
    BodyCr,
    BodyLf,
    /// Trailer fields after the last chunk, ignored
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

type Step = Poll<Result<ChunkedState, &'static str>>;

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Returns the next run of body bytes, `PayloadItem::Eof` once the terminal chunk is complete,
    /// or `Ok(None)` when the buffered bytes end inside a chunk header.
    fn decode(&mut self, src: &mut RingBuf) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!("finished reading chunked data");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            let mut buf = None;

            self.state = match self.state.step(src, &mut self.remaining_size, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(new_state)) => new_state,
                Poll::Ready(Err(reason)) => return Err(ParseError::invalid_body(reason)),
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        match $src.get_byte() {
            Some(b) => b,
            None => return Poll::Pending,
        }
    }};
}

impl ChunkedState {
    fn step(self, src: &mut RingBuf, remaining_size: &mut u64, buf: &mut Option<bytes::Bytes>) -> Step {
        match self {
            SizeStart => Self::read_size_start(src, remaining_size),
            Size => Self::read_size(src, remaining_size),
            SizeLws => Self::read_size_lws(src),
            Extension => Self::read_extension(src),
            SizeLf => Self::read_size_lf(src, *remaining_size),
            Body => Self::read_body(src, remaining_size, buf),
            BodyCr => Self::expect(src, b'\r', BodyLf, "invalid chunk body CR"),
            BodyLf => Self::expect(src, b'\n', SizeStart, "invalid chunk body LF"),
            Trailer => Self::read_trailer(src),
            TrailerLf => Self::expect(src, b'\n', EndCr, "invalid trailer end LF"),
            EndCr => Self::read_end_cr(src),
            EndLf => Self::expect(src, b'\n', End, "invalid chunk end LF"),
            End => Poll::Ready(Ok(End)),
        }
    }

    fn expect(src: &mut RingBuf, want: u8, next: ChunkedState, reason: &'static str) -> Step {
        if try_next_byte!(src) == want { Poll::Ready(Ok(next)) } else { Poll::Ready(Err(reason)) }
    }

    fn hex_digit(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b + 10 - b'a'),
            b'A'..=b'F' => Some(b + 10 - b'A'),
            _ => None,
        }
    }

    /// A size line must start with a hex digit.
    fn read_size_start(src: &mut RingBuf, size: &mut u64) -> Step {
        match Self::hex_digit(try_next_byte!(src)) {
            Some(digit) => {
                *size = u64::from(digit);
                Poll::Ready(Ok(Size))
            }
            None => Poll::Ready(Err("invalid chunk size line")),
        }
    }

    /// Accumulates hex digits; whitespace, `;` or CR end the size.
    fn read_size(src: &mut RingBuf, size: &mut u64) -> Step {
        let digit = match try_next_byte!(src) {
            b'\t' | b' ' => return Poll::Ready(Ok(SizeLws)),
            b';' => return Poll::Ready(Ok(Extension)),
            b'\r' => return Poll::Ready(Ok(SizeLf)),
            b => match Self::hex_digit(b) {
                Some(digit) => digit,
                None => return Poll::Ready(Err("invalid chunk size line: Invalid Size")),
            },
        };

        match size.checked_mul(16).and_then(|s| s.checked_add(u64::from(digit))) {
            Some(s) => {
                *size = s;
                Poll::Ready(Ok(Size))
            }
            None => Poll::Ready(Err("invalid overflow chunked length")),
        }
    }

    fn read_size_lws(src: &mut RingBuf) -> Step {
        match try_next_byte!(src) {
            // no more digits may follow the whitespace
            b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            _ => Poll::Ready(Err("invalid chunk size linear white space")),
        }
    }

    /// Extensions run to the next CRLF; a bare LF inside one is rejected.
    fn read_extension(src: &mut RingBuf) -> Step {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b'\n' => Poll::Ready(Err("invalid chunk extension contains newline")),
            _ => Poll::Ready(Ok(Extension)),
        }
    }

    /// A zero size marks the terminal chunk.
    fn read_size_lf(src: &mut RingBuf, size: u64) -> Step {
        match try_next_byte!(src) {
            b'\n' if size == 0 => Poll::Ready(Ok(EndCr)),
            b'\n' => Poll::Ready(Ok(Body)),
            _ => Poll::Ready(Err("invalid chunk size LF")),
        }
    }

    fn read_body(src: &mut RingBuf, size: &mut u64, buf: &mut Option<bytes::Bytes>) -> Step {
        if src.is_empty() {
            return Poll::Ready(Ok(Body));
        }
        if *size == 0 {
            return Poll::Ready(Ok(BodyCr));
        }

        let available = src.len() as u64;
        let read_size = (*size).min(available);
        *size -= read_size;
        // read_size <= src.len(), so the cast cannot truncate
        *buf = Some(src.copy_to_bytes(read_size as usize));

        if *size > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }

    fn read_trailer(src: &mut RingBuf) -> Step {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(TrailerLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    /// Either the final CRLF or the first byte of a trailer field.
    fn read_end_cr(src: &mut RingBuf) -> Step {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(EndLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }
}
