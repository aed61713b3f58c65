//! A single-threaded HTTP/1.1 connection engine for embedded web servers
//!
//! This crate provides the protocol core of an embedded server: incremental request parsing,
//! a per-connection state machine, chunked transfer coding in both directions and a
//! readiness-based socket multiplexer. Everything runs on one thread; nothing in the request path
//! blocks, so a connection can be advanced after every partial read or write.
//!
//! Policy (routes, authentication, sessions, built-in handlers) lives in `ember-web`, which plugs
//! into the seams defined in [`handler`].
//!
//! # Features
//!
//! - HTTP/1.0 and HTTP/1.1 with keep-alive and pipelining
//! - Chunked request bodies decoded across arbitrary read boundaries
//! - Chunked or close-delimited responses when the length is unknown
//! - Expect-continue
//! - Request, idle and linger timeouts
//! - Bounded buffers: every connection has configured maxima and never grows beyond them
//!
//! # Example
//!
//! ```no_run
//! use ember_http::connection::{Connection, State};
//! use ember_http::handler::Dispatcher;
//! use ember_http::limits::ConnConfig;
//! use http::StatusCode;
//! use std::net::TcpListener;
//!
//! struct Hello;
//!
//! impl Dispatcher for Hello {
//!     fn route(&mut self, _conn: &mut Connection) -> bool {
//!         true
//!     }
//!
//!     fn run(&mut self, conn: &mut Connection) -> bool {
//!         conn.response(StatusCode::OK, b"Hello World!\r\n");
//!         true
//!     }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080")?;
//!     let config = triomphe::Arc::new(ConnConfig::default());
//!     for (id, stream) in listener.incoming().enumerate() {
//!         let mut stream = stream?;
//!         let mut conn = Connection::new(id as u64, stream.peer_addr()?, stream.local_addr()?, false, config.clone());
//!         while conn.state() != State::Complete {
//!             conn.read_event(&mut stream)?;
//!             conn.advance(&mut Hello);
//!             conn.write_event(&mut stream)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`buf`]: the bounded ring buffer behind every receive, transmit and staging buffer
//! - [`codec`]: incremental decoders and encoders over [`buf::RingBuf`]
//! - [`protocol`]: request records, body framing and error types
//! - [`connection`]: the state machine, from request bytes to a drained response
//! - [`handler`]: traits through which routing and handlers drive a connection
//! - [`net`]: the socket multiplexer, a thin layer over `mio`
//! - [`sched`]: the cooperative timer queue
//! - [`symbol`]: tagged-value tables for variables and sessions
//! - [`arena`]: generational handles for sockets and timers
//!
//! # Error Handling
//!
//! Malformed or oversized requests never surface as errors to the event loop. The connection
//! answers them itself with the status from [`protocol::ParseError::status`] and closes. Socket
//! errors are returned from [`connection::Connection::read_event`] and
//! [`connection::Connection::write_event`]; the caller passes them to
//! [`connection::Connection::io_failed`].
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - TLS is not handled here; a secure transport only changes the `SECURE` flag

pub mod arena;
pub mod buf;
pub mod codec;
pub mod connection;
pub mod handler;
pub mod limits;
pub mod net;
pub mod protocol;
pub mod sched;
pub mod symbol;

mod utils;
pub(crate) use utils::ensure;
