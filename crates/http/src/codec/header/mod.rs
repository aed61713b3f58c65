//! Request header decoding and response header encoding.
//!
//! - [`HeaderDecoder`] parses the request line and header block with `httparse`, enforcing the
//!   configured header size, header count and URL length limits, and extracts the fields the
//!   connection consults (keep-alive, body framing, authorization, cookies, host).
//! - [`HeaderEncoder`] writes a [`ResponseHead`] as a status line and header block.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::{HeaderEncoder, ResponseHead};
