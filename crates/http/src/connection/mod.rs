//! The per-socket HTTP state machine.
//!
//! A [`Connection`] owns the buffers and per-request state of one accepted socket. It never
//! touches the socket itself except through [`Connection::read_event`] and
//! [`Connection::write_event`], which take any `Read`/`Write`; everything in between is driven by
//! [`Connection::advance`]:
//!
//! ```text
//! BEGIN ──header──▶ CONTENT ──body eof──▶ READY ──handler──▶ RUNNING ──done + drained──▶ COMPLETE
//!   ▲                                                                                        │
//!   └──────────────────────────────── keep-alive reuse ─────────────────────────────────────┘
//! ```
//!
//! Routing happens as soon as the header block is parsed, so an unauthorized request is answered
//! before its body is read. Between keep-alive requests the connection is rebuilt from the few
//! fields that survive a request (see [`Connection::reuse`]).

mod flags;
mod input;
mod output;

pub use flags::Flags;

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use http::Method;
use tracing::{debug, trace};
use triomphe::Arc;

use crate::buf::RingBuf;
use crate::codec::{ChunkedEncoder, HeaderDecoder, PayloadDecoder};
use crate::handler::{BackgroundWriter, ContentConsumer};
use crate::limits::ConnConfig;
use crate::protocol::{RequestHeader, SendError};
use crate::sched::TimerId;
use crate::symbol::SymbolTable;

/// Re-route attempts allowed for one request before it is answered with 404.
pub const MAX_REROUTES: u32 = 16;

/// Lifecycle of one request on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Waiting for a complete header block.
    Begin,
    /// Reading the request body.
    Content,
    /// Request complete, handler not yet invoked.
    Ready,
    /// A handler owns the response.
    Running,
    /// Response finalized and drained.
    Complete,
}

/// What a connection's timer should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Fire again after the given delay.
    Rearm(Duration),
    /// No timeout applies in the current state.
    Disarm,
    /// The deadline passed; a timeout response may have been queued and the connection must be
    /// closed once it drains.
    Expired,
}

/// Fields that survive a keep-alive reset.
struct Preserved {
    id: u64,
    peer: SocketAddr,
    local: SocketAddr,
    flags: Flags,
    config: Arc<ConnConfig>,
    rx: RingBuf,
    tx: RingBuf,
    timer: Option<TimerId>,
    requests: u32,
    last_activity: Instant,
}

pub struct Connection {
    id: u64,
    peer: SocketAddr,
    local: SocketAddr,
    state: State,
    flags: Flags,
    config: Arc<ConnConfig>,

    rx: RingBuf,
    tx: RingBuf,
    chunk: RingBuf,
    input: RingBuf,

    header_decoder: HeaderDecoder,
    payload: Option<PayloadDecoder>,
    chunk_encoder: ChunkedEncoder,

    request: Option<RequestHeader>,
    /// Per-request variables: `HTTP_*` headers, CGI-style request fields, query and form values.
    pub vars: SymbolTable,
    body_received: u64,

    status: http::StatusCode,
    response_headers: http::HeaderMap,
    written: u64,

    route: Option<usize>,
    route_start: usize,
    reroutes: u32,

    /// Session bound to this request, if any.
    pub session_id: Option<String>,
    /// Identity claimed by the request credentials or bound to the session.
    pub username: Option<String>,
    /// Password from the request credentials, consumed by the verifier.
    pub password: Option<String>,

    consumer: Option<Box<dyn ContentConsumer>>,
    writer: Option<Box<dyn BackgroundWriter>>,

    timer: Option<TimerId>,
    started: Instant,
    last_activity: Instant,
    requests: u32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("url", &self.request.as_ref().map(|r| r.url.as_str()))
            .field("route", &self.route)
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(id: u64, peer: SocketAddr, local: SocketAddr, secure: bool, config: Arc<ConnConfig>) -> Self {
        let limits = &config.limits;
        let rx = RingBuf::with_limits(limits.buffer_size, limits.max_rx_buffer);
        let tx = RingBuf::with_limits(limits.buffer_size, limits.max_tx_buffer);
        let flags = if secure { Flags::SECURE } else { Flags::NONE };
        Self::from_preserved(Preserved {
            id,
            peer,
            local,
            flags,
            config,
            rx,
            tx,
            timer: None,
            requests: 0,
            last_activity: Instant::now(),
        })
    }

    fn from_preserved(p: Preserved) -> Self {
        let limits = &p.config.limits;
        let chunk = RingBuf::with_limits(2, limits.chunk_size + 1);
        let header_decoder = HeaderDecoder::new(limits);
        Self {
            id: p.id,
            peer: p.peer,
            local: p.local,
            state: State::Begin,
            flags: p.flags,
            rx: p.rx,
            tx: p.tx,
            chunk,
            input: RingBuf::unbounded(64),
            header_decoder,
            payload: None,
            chunk_encoder: ChunkedEncoder::new(),
            request: None,
            vars: SymbolTable::new(),
            body_received: 0,
            status: http::StatusCode::OK,
            response_headers: http::HeaderMap::new(),
            written: 0,
            route: None,
            route_start: 0,
            reroutes: 0,
            session_id: None,
            username: None,
            password: None,
            consumer: None,
            writer: None,
            timer: p.timer,
            started: p.last_activity,
            last_activity: p.last_activity,
            requests: p.requests,
            config: p.config,
        }
    }

    /// Resets the connection for the next request on the same socket.
    ///
    /// Only the socket identity, buffers, timer handle, request count and the
    /// `SECURE`/`KEEP_ALIVE`/`HTTP11` flags survive; every per-request field starts over.
    /// Pipelined bytes already in the receive buffer are kept.
    pub fn reuse(&mut self) {
        let placeholder = || RingBuf::with_limits(2, 2);
        let preserved = Preserved {
            id: self.id,
            peer: self.peer,
            local: self.local,
            flags: self.flags.retain(Flags::SECURE | Flags::KEEP_ALIVE | Flags::HTTP11),
            config: Arc::clone(&self.config),
            rx: std::mem::replace(&mut self.rx, placeholder()),
            tx: std::mem::replace(&mut self.tx, placeholder()),
            timer: self.timer.take(),
            requests: self.requests,
            last_activity: self.last_activity,
        };
        *self = Self::from_preserved(preserved);
        debug!(conn = self.id, requests = self.requests, "connection reset for keep-alive");
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn config(&self) -> &ConnConfig {
        &self.config
    }

    pub fn is_secure(&self) -> bool {
        self.flags.contains(Flags::SECURE)
    }

    pub fn scheme(&self) -> &'static str {
        if self.is_secure() { "https" } else { "http" }
    }

    pub fn request(&self) -> Option<&RequestHeader> {
        self.request.as_ref()
    }

    pub fn request_mut(&mut self) -> Option<&mut RequestHeader> {
        self.request.as_mut()
    }

    pub fn method(&self) -> Option<&Method> {
        self.request.as_ref().map(|r| &r.method)
    }

    /// Decoded request path, empty before a header block was parsed.
    pub fn path(&self) -> &str {
        self.request.as_ref().map_or("", |r| r.path.as_str())
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get_str(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.set(name, value.into());
    }

    /// Decoded request body bytes not yet taken by a consumer.
    pub fn input(&self) -> &RingBuf {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut RingBuf {
        &mut self.input
    }

    /// Whether the whole request body has been received.
    pub fn content_done(&self) -> bool {
        self.flags.contains(Flags::CONTENT_DONE)
    }

    pub fn body_received(&self) -> u64 {
        self.body_received
    }

    pub fn set_consumer(&mut self, consumer: Box<dyn ContentConsumer>) {
        self.consumer = Some(consumer);
    }

    pub fn set_writer(&mut self, writer: Box<dyn BackgroundWriter>) {
        self.writer = Some(writer);
        self.flags.remove(Flags::WRITER_IDLE);
    }

    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Whether the background writer is parked after producing nothing.
    pub fn is_writer_idle(&self) -> bool {
        self.writer.is_some() && self.flags.contains(Flags::WRITER_IDLE)
    }

    /// Lets a parked background writer be called again on the next write event.
    pub fn wake_writer(&mut self) {
        self.flags.remove(Flags::WRITER_IDLE);
    }

    /// Index of the resolved route.
    pub fn route(&self) -> Option<usize> {
        self.route
    }

    pub fn set_route(&mut self, route: Option<usize>) {
        self.route = route;
    }

    /// First route index the next resolution may consider.
    pub fn route_start(&self) -> usize {
        self.route_start
    }

    pub fn reroutes(&self) -> u32 {
        self.reroutes
    }

    /// Replaces the request target; resolution restarts at the first route once the current
    /// handler declines.
    pub fn rewrite(&mut self, url: &str) -> Result<(), crate::protocol::ParseError> {
        let target = crate::protocol::url::parse_target(url)?;
        if let Some(request) = self.request.as_mut() {
            debug!(conn = self.id, from = %request.url, to = url, "request rewritten");
            request.url = url.to_owned();
            request.path = target.path;
            request.query = target.query;
            request.ext = target.ext;
            self.vars.set("REQUEST_URI", url);
            self.vars.set("PATH_INFO", request.path.as_str());
        }
        self.flags.insert(Flags::REROUTE);
        Ok(())
    }

    pub fn is_keep_alive(&self) -> bool {
        self.flags.contains(Flags::KEEP_ALIVE)
    }

    /// Closes the connection after the current response.
    pub fn revoke_keep_alive(&mut self) {
        self.flags.remove(Flags::KEEP_ALIVE);
    }

    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn set_timer(&mut self, timer: Option<TimerId>) {
        self.timer = timer;
    }

    /// Whether the transmit buffer holds unsent bytes.
    pub fn has_output(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Whether the socket should be watched for writability: output is queued or an active
    /// background writer can produce more.
    pub fn wants_write(&self) -> bool {
        self.has_output() || (self.writer.is_some() && !self.flags.contains(Flags::WRITER_IDLE))
    }

    /// Whether the receive buffer can take more bytes.
    pub fn wants_read(&self) -> bool {
        !self.flags.contains(Flags::PEER_EOF) && self.rx.max_room() > 0
    }

    /// Whether bytes are waiting in the receive buffer for a state that can parse them.
    pub fn has_pending_input(&self) -> bool {
        !self.rx.is_empty() && matches!(self.state, State::Begin | State::Content)
    }

    /// Reads from `io` until it would block, the peer closes, or the receive buffer is full.
    ///
    /// Returns the number of bytes read. End of stream sets [`Flags::PEER_EOF`].
    pub fn read_event(&mut self, io: &mut impl Read) -> io::Result<usize> {
        let mut total = 0;
        loop {
            if self.rx.write_space().is_empty() && !self.rx.reserve(self.config.limits.buffer_size.min(self.rx.max_room())) {
                break;
            }
            let space = self.rx.write_space();
            if space.is_empty() {
                break;
            }
            match io.read(space) {
                Ok(0) => {
                    trace!(conn = self.id, "peer closed");
                    self.flags.insert(Flags::PEER_EOF);
                    break;
                }
                Ok(n) => {
                    self.rx.commit(n);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if total > 0 {
            self.touch();
            trace!(conn = self.id, read = total, buffered = self.rx.len(), "read event");
        }
        Ok(total)
    }

    /// Drains the transmit buffer into `io`, pulling more output from a background writer when
    /// one is installed. Reaching an empty buffer after [`Connection::done`] completes the
    /// request.
    pub fn write_event(&mut self, io: &mut impl Write) -> io::Result<()> {
        loop {
            self.flush_staged()?;
            if !self.drain(io)? {
                return Ok(());
            }
            if self.flags.contains(Flags::WRITER_IDLE) {
                break;
            }
            let Some(mut writer) = self.writer.take() else { break };
            let queued = self.tx.len() + self.chunk.len();
            match writer.write_event(self) {
                Ok(true) => {
                    self.writer = Some(writer);
                    if self.tx.len() + self.chunk.len() == queued {
                        trace!(conn = self.id, "background writer idle");
                        self.flags.insert(Flags::WRITER_IDLE);
                        break;
                    }
                }
                Ok(false) => self.done(),
                Err(e) => {
                    self.revoke_keep_alive();
                    self.flags.insert(Flags::CLOSING);
                    return Err(e);
                }
            }
        }
        if self.tx.is_empty() && self.flags.contains(Flags::FINALIZED) && self.state != State::Complete {
            self.state = State::Complete;
            trace!(conn = self.id, "response drained");
        }
        Ok(())
    }

    /// Writes out the transmit buffer. Returns false when `io` would block.
    fn drain(&mut self, io: &mut impl Write) -> io::Result<bool> {
        use bytes::Buf;

        while !self.tx.is_empty() {
            match io.write(self.tx.chunk()) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.tx.advance(n);
                    self.touch();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.tx.compact();
        Ok(true)
    }

    /// Marks a failed socket: no further output is attempted and the connection is closed.
    pub fn io_failed(&mut self, e: &io::Error) {
        debug!(conn = self.id, cause = %e, "connection io failed");
        self.revoke_keep_alive();
        self.flags.insert(Flags::CLOSING | Flags::FINALIZED);
        self.writer = None;
        self.consumer = None;
        self.tx.clear();
        self.state = State::Complete;
    }

    /// Whether the socket should be closed now, without waiting for more events.
    ///
    /// True after an I/O failure, when the peer closed before a request was complete, or when a
    /// finished response will not be followed by another request.
    pub fn should_close(&self) -> bool {
        match self.state {
            State::Begin | State::Content => self.flags.contains(Flags::PEER_EOF) && self.tx.is_empty(),
            State::Complete => !self.can_reuse(),
            State::Ready | State::Running => false,
        }
    }

    /// Whether a completed connection may serve another request.
    pub fn can_reuse(&self) -> bool {
        self.state == State::Complete
            && self.flags.contains(Flags::KEEP_ALIVE)
            && !self.flags.contains(Flags::CLOSING)
            && !self.flags.contains(Flags::PEER_EOF)
            && self.payload.is_none()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Evaluates the request, keep-alive or linger deadline at `now`.
    ///
    /// Timeouts only apply while waiting for request bytes and while a finished response drains;
    /// a running handler is never interrupted. An expired request that has not produced response
    /// headers yet gets a 408.
    pub fn expiry(&mut self, now: Instant) -> Expiry {
        let limits = &self.config.limits;
        let timeout = match self.state {
            State::Begin if self.rx.is_empty() && self.requests > 0 => limits.keep_alive_timeout,
            State::Begin | State::Content => limits.request_timeout,
            State::Complete => limits.close_linger,
            State::Ready | State::Running if self.flags.contains(Flags::CLOSING | Flags::FINALIZED) => limits.close_linger,
            // a parked writer is polled again, it is not a timeout
            State::Running if self.is_writer_idle() => return Expiry::Rearm(limits.writer_poll),
            State::Ready | State::Running => return Expiry::Disarm,
        };
        let deadline = self.last_activity + timeout;
        if now < deadline {
            return Expiry::Rearm(deadline - now);
        }

        if matches!(self.state, State::Begin | State::Content) {
            let idle = self.state == State::Begin && self.rx.is_empty();
            debug!(conn = self.id, state = ?self.state, idle, "connection timed out");
            self.revoke_keep_alive();
            if !idle && !self.flags.contains(Flags::HEADERS_WRITTEN) {
                self.error(http::StatusCode::REQUEST_TIMEOUT, "Request timed out");
            }
            // nothing else will be written for this request
            self.flags.insert(Flags::CLOSING | Flags::FINALIZED);
            self.state = State::Running;
            // the linger period starts now
            self.last_activity = now;
        }
        Expiry::Expired
    }
}

/// Response body bytes go through [`Connection::write_block`]. A full transmit buffer reports
/// `WouldBlock`.
impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.write_block(buf) {
            Ok(0) if !buf.is_empty() => Err(ErrorKind::WouldBlock.into()),
            Ok(n) => Ok(n),
            Err(SendError::Io { source }) => Err(source),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
