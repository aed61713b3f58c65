//! Protocol types shared by the codec and the connection.
//!
//! - [`RequestHeader`]: the request line and header-derived fields of one request
//! - [`PayloadItem`] / [`PayloadSize`]: body framing and decoded body pieces
//! - [`url`]: request target splitting, decoding and path normalization
//! - [`HttpError`], [`ParseError`], [`SendError`]: error types; every [`ParseError`] maps to the
//!   status code of the error response sent before the connection is closed

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::ContentKind;
pub use request::RequestHeader;

pub mod url;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
