//! Per-connection limits, timeouts and response defaults.
//!
//! Each connection holds a shared [`ConnConfig`]. The defaults are sized for small devices: a
//! connection starts with a few kilobytes of buffers and may only grow them up to the maxima
//! below.
//!
//! ```
//! use ember_http::limits::{ConnConfig, Limits};
//! use std::time::Duration;
//!
//! let config = ConnConfig {
//!     limits: Limits {
//!         max_post_body: 64 * 1024,
//!         keep_alive_timeout: Duration::from_secs(5),
//!         ..Limits::default()
//!     },
//!     ..ConnConfig::default()
//! };
//! assert_eq!(config.limits.max_headers, 64);
//! ```

use std::time::Duration;

/// Request parsing and buffering limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum size of the request line plus header block.
    pub max_header_bytes: usize,
    /// Maximum number of header lines.
    pub max_headers: usize,
    /// Maximum length of the request target.
    pub max_url: usize,
    /// Maximum body size for every method other than PUT.
    pub max_post_body: u64,
    /// Maximum body size for PUT.
    pub max_put_body: u64,

    /// Initial size of the receive and transmit buffers.
    pub buffer_size: usize,
    /// Largest the receive buffer may grow.
    pub max_rx_buffer: usize,
    /// Largest the transmit buffer may grow.
    pub max_tx_buffer: usize,
    /// Staged response bytes that trigger emitting one chunk.
    pub chunk_size: usize,

    /// Time allowed to receive a complete request once its first byte arrived.
    pub request_timeout: Duration,
    /// Time an idle keep-alive connection is held open between requests.
    pub keep_alive_timeout: Duration,
    /// Requests served on one connection before keep-alive is declined.
    pub max_keep_alive_requests: u32,
    /// Time a closing connection waits for its output to drain before it is dropped.
    pub close_linger: Duration,
    /// Interval at which a background writer that produced nothing is called again.
    pub writer_poll: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_headers: 64,
            max_url: 4 * 1024,
            max_post_body: 16 * 1024 * 1024,
            max_put_body: 16 * 1024 * 1024,

            buffer_size: 4 * 1024,
            max_rx_buffer: 64 * 1024,
            max_tx_buffer: 1024 * 1024,
            chunk_size: 8 * 1024,

            request_timeout: Duration::from_secs(60),
            keep_alive_timeout: Duration::from_secs(15),
            max_keep_alive_requests: 100,
            close_linger: Duration::from_secs(2),
            writer_poll: Duration::from_millis(50),
        }
    }
}

/// Headers added to every response.
#[derive(Debug, Clone)]
pub struct ResponseConfig {
    /// `Server` header value.
    pub server_name: String,
    /// `X-Frame-Options` header value, if any.
    pub x_frame_options: Option<String>,
    /// Extensions that get a `Cache-Control: public, max-age=...` header.
    pub client_cache: Vec<String>,
    pub client_cache_lifespan: Duration,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            server_name: concat!("ember/", env!("CARGO_PKG_VERSION")).to_owned(),
            x_frame_options: Some("SAMEORIGIN".to_owned()),
            client_cache: Vec::new(),
            client_cache_lifespan: Duration::from_secs(86_400),
        }
    }
}

/// Everything a connection needs from the server configuration.
#[derive(Debug, Clone, Default)]
pub struct ConnConfig {
    pub limits: Limits,
    pub response: ResponseConfig,
}
