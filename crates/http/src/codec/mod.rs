//! Incremental codecs over [`RingBuf`].
//!
//! Decoders consume bytes from the front of a connection's receive buffer and return
//! `Ok(None)` whenever the buffered bytes do not yet form a complete item. They keep enough state
//! to resume after any read boundary, so feeding a stream one byte at a time produces the same
//! items as feeding it whole. Encoders append to a transmit buffer.
//!
//! - [`HeaderDecoder`]: request line and header block, via `httparse`
//! - [`PayloadDecoder`]: request body framing, either Content-Length or chunked
//! - [`HeaderEncoder`]: response status line and header block
//! - [`ChunkedEncoder`]: chunked response framing

use crate::buf::RingBuf;

mod body;
mod header;

pub use body::{ChunkedDecoder, ChunkedEncoder, LengthDecoder, PayloadDecoder};
pub use header::{HeaderDecoder, HeaderEncoder, ResponseHead};

/// Decodes items from the front of a receive buffer.
pub trait Decoder {
    type Item;
    type Error;

    /// Returns `Ok(None)` when more bytes are needed. Consumed bytes are removed from `src`.
    fn decode(&mut self, src: &mut RingBuf) -> Result<Option<Self::Item>, Self::Error>;
}

/// Encodes items onto the end of a transmit buffer.
pub trait Encoder<Item> {
    type Error;

    fn encode(&mut self, item: Item, dst: &mut RingBuf) -> Result<(), Self::Error>;
}
