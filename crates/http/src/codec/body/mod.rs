//! Body framing.
//!
//! ## Decoders
//! - [`ChunkedDecoder`]: chunked transfer encoding, tolerant of any split point
//! - [`LengthDecoder`]: fixed Content-Length bodies
//! - [`PayloadDecoder`]: selects one of the above from the parsed [`PayloadSize`]
//!
//! ## Encoders
//! - [`ChunkedEncoder`]: wraps response segments as `<HEX>\r\n<data>\r\n`, finishing with
//!   `0\r\n\r\n`
//!
//! [`PayloadSize`]: crate::protocol::PayloadSize

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod payload_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use chunked_encoder::ChunkedEncoder;
pub use length_decoder::LengthDecoder;
pub use payload_decoder::PayloadDecoder;
