use std::io;

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("uri length {len} exceed the limit {max_len}")]
    UriTooLong { len: usize, max_len: usize },

    #[error("bad request path: {reason}")]
    BadPath { reason: String },

    #[error("bad host header: {host}")]
    BadHost { host: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("request body of {size} bytes exceed the limit {max_size}")]
    TooLargeBody { size: u64, max_size: u64 },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn uri_too_long(len: usize, max_len: usize) -> Self {
        Self::UriTooLong { len, max_len }
    }

    pub fn bad_path<S: ToString>(str: S) -> Self {
        Self::BadPath { reason: str.to_string() }
    }

    pub fn bad_host<S: ToString>(host: S) -> Self {
        Self::BadHost { host: host.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn too_large_body(size: u64, max_size: u64) -> Self {
        Self::TooLargeBody { size, max_size }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The status code of the error response sent before the connection is closed.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TooLargeHeader { .. }
            | Self::TooManyHeaders { .. }
            | Self::InvalidContentLength { .. }
            | Self::TooLargeBody { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UriTooLong { .. } => StatusCode::URI_TOO_LONG,
            Self::InvalidVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            Self::InvalidHeader { .. }
            | Self::InvalidMethod
            | Self::InvalidUri
            | Self::BadPath { .. }
            | Self::BadHost { .. }
            | Self::InvalidBody { .. }
            | Self::Io { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("output buffer full, {pending} bytes pending")]
    BufferFull { pending: usize },

    #[error("response already finalized")]
    Finalized,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
