//! Socket multiplexer over `mio`.
//!
//! Every socket lives in an arena slot together with caller data `T`, a software interest mask
//! and the readiness last reported by the OS. Sockets are registered with mio for both read and
//! write readiness once; the software mask decides which of those readiness bits get dispatched.
//!
//! mio reports readiness edge-triggered, so readiness is sticky here: a bit stays set until a
//! read or write through [`SocketStream`] (or [`Multiplexer::accept`]) hits `WouldBlock`. A
//! socket whose mask intersects its readiness, or that asked for reservice, makes
//! [`Multiplexer::select`] return without blocking.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, trace, warn};

use crate::arena::{Arena, Handle};

/// Readiness and interest bits of a socket.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Mask(u8);

impl Mask {
    pub const NONE: Mask = Mask(0);
    pub const READABLE: Mask = Mask(0b001);
    pub const WRITABLE: Mask = Mask(0b010);
    pub const EXCEPTION: Mask = Mask(0b100);

    pub fn contains(self, other: Mask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Mask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Mask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Mask) {
        self.0 &= !other.0;
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mask {
    fn bitor_assign(&mut self, rhs: Mask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Mask {
    type Output = Mask;

    fn bitand(self, rhs: Mask) -> Mask {
        Mask(self.0 & rhs.0)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [(Mask::READABLE, "READABLE"), (Mask::WRITABLE, "WRITABLE"), (Mask::EXCEPTION, "EXCEPTION")]
            .into_iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| name)
            .collect();
        if names.is_empty() { f.write_str("NONE") } else { f.write_str(&names.join(" | ")) }
    }
}

/// Handle of a socket owned by a [`Multiplexer`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(Handle);

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SocketId({})", self.0)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

enum Kind {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl Kind {
    fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Kind::Listener(listener) => registry.register(listener, token, Interest::READABLE),
            Kind::Stream(stream) => registry.register(stream, token, Interest::READABLE | Interest::WRITABLE),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Kind::Listener(listener) => registry.deregister(listener),
            Kind::Stream(stream) => registry.deregister(stream),
        }
    }
}

struct Socket<T> {
    kind: Kind,
    data: T,
    mask: Mask,
    ready: Mask,
    reservice: bool,
}

/// Owner of every listening and accepted socket of a server.
pub struct Multiplexer<T> {
    poll: Poll,
    events: Events,
    sockets: Arena<Socket<T>>,
}

impl<T> fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer").field("sockets", &self.sockets.len()).finish_non_exhaustive()
    }
}

impl<T> Multiplexer<T> {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(event_capacity), sockets: Arena::new() })
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Binds a nonblocking listening socket. Its mask starts as [`Mask::READABLE`].
    pub fn listen(&mut self, addr: SocketAddr, data: T) -> io::Result<SocketId> {
        let listener = TcpListener::bind(addr)?;
        let id = self.insert(Kind::Listener(listener), data, Mask::READABLE)?;
        debug!(%addr, socket = %id, "listening");
        Ok(id)
    }

    /// Takes ownership of an accepted stream. Its mask starts as [`Mask::READABLE`].
    pub fn add_stream(&mut self, stream: TcpStream, data: T) -> io::Result<SocketId> {
        self.insert(Kind::Stream(stream), data, Mask::READABLE)
    }

    fn insert(&mut self, kind: Kind, data: T, mask: Mask) -> io::Result<SocketId> {
        let handle = self.sockets.insert(Socket { kind, data, mask, ready: Mask::NONE, reservice: false });
        let registry = self.poll.registry();
        let registered = match self.sockets.get_mut(handle) {
            Some(socket) => socket.kind.register(registry, Token(handle.to_bits())),
            None => Ok(()),
        };
        if let Err(e) = registered {
            self.sockets.remove(handle);
            return Err(e);
        }
        Ok(SocketId(handle))
    }

    /// Accepts one pending connection. `Ok(None)` means the backlog is drained.
    pub fn accept(&mut self, id: SocketId) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let Some(socket) = self.sockets.get_mut(id.0) else {
            return Err(ErrorKind::NotFound.into());
        };
        let Kind::Listener(listener) = &socket.kind else {
            return Err(ErrorKind::InvalidInput.into());
        };
        match listener.accept() {
            Ok(accepted) => Ok(Some(accepted)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                socket.ready.remove(Mask::READABLE);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, id: SocketId) -> bool {
        self.sockets.contains(id.0)
    }

    pub fn data(&self, id: SocketId) -> Option<&T> {
        self.sockets.get(id.0).map(|s| &s.data)
    }

    pub fn data_mut(&mut self, id: SocketId) -> Option<&mut T> {
        self.sockets.get_mut(id.0).map(|s| &mut s.data)
    }

    pub fn mask(&self, id: SocketId) -> Mask {
        self.sockets.get(id.0).map_or(Mask::NONE, |s| s.mask)
    }

    /// Replaces the software interest mask; only these readiness bits are dispatched.
    pub fn set_mask(&mut self, id: SocketId, mask: Mask) {
        if let Some(socket) = self.sockets.get_mut(id.0) {
            socket.mask = mask;
        }
    }

    /// Readiness currently cached for the socket.
    pub fn readiness(&self, id: SocketId) -> Mask {
        self.sockets.get(id.0).map_or(Mask::NONE, |s| s.ready)
    }

    /// Asks for the socket to be dispatched on the next select even without new readiness.
    pub fn reservice(&mut self, id: SocketId) {
        if let Some(socket) = self.sockets.get_mut(id.0) {
            socket.reservice = true;
        }
    }

    pub fn local_addr(&self, id: SocketId) -> io::Result<SocketAddr> {
        match self.sockets.get(id.0).map(|s| &s.kind) {
            Some(Kind::Listener(listener)) => listener.local_addr(),
            Some(Kind::Stream(stream)) => stream.local_addr(),
            None => Err(ErrorKind::NotFound.into()),
        }
    }

    /// Read/write access to a stream socket.
    pub fn stream(&mut self, id: SocketId) -> Option<SocketStream<'_>> {
        let socket = self.sockets.get_mut(id.0)?;
        match &mut socket.kind {
            Kind::Stream(stream) => Some(SocketStream { stream, ready: &mut socket.ready }),
            Kind::Listener(_) => None,
        }
    }

    /// Shuts down the write half so the peer sees end of stream while reads continue.
    pub fn shutdown_write(&mut self, id: SocketId) {
        if let Some(Socket { kind: Kind::Stream(stream), .. }) = self.sockets.get_mut(id.0) {
            if let Err(e) = stream.shutdown(Shutdown::Write) {
                trace!(socket = %id, cause = %e, "shutdown write failed");
            }
        }
    }

    /// Deregisters and drops the socket, returning its data.
    pub fn close(&mut self, id: SocketId) -> Option<T> {
        let mut socket = self.sockets.remove(id.0)?;
        if let Err(e) = socket.kind.deregister(self.poll.registry()) {
            warn!(socket = %id, cause = %e, "failed to deregister socket");
        }
        trace!(socket = %id, "socket closed");
        Some(socket.data)
    }

    /// Ids of every socket, listeners included.
    pub fn ids(&self) -> Vec<SocketId> {
        self.sockets.handles().into_iter().map(SocketId).collect()
    }

    /// Waits for readiness and returns the sockets to dispatch with the mask bits that fired.
    ///
    /// The wait is skipped when a socket already has dispatchable readiness or asked for
    /// reservice. `timeout` of `None` blocks until an event arrives.
    pub fn select(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(SocketId, Mask)>> {
        let pending = self.sockets.iter().any(|(_, s)| s.reservice || s.ready.intersects(s.mask));
        let timeout = if pending { Some(Duration::ZERO) } else { timeout };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        for event in &self.events {
            let handle = Handle::from_bits(event.token().0);
            let Some(socket) = self.sockets.get_mut(handle) else { continue };
            if event.is_readable() || event.is_read_closed() {
                socket.ready.insert(Mask::READABLE);
            }
            if event.is_writable() || event.is_write_closed() {
                socket.ready.insert(Mask::WRITABLE);
            }
            if event.is_error() {
                socket.ready.insert(Mask::EXCEPTION | Mask::READABLE);
            }
        }

        let mut dispatch = Vec::new();
        for handle in self.sockets.handles() {
            let Some(socket) = self.sockets.get_mut(handle) else { continue };
            let fired = socket.ready & socket.mask;
            if !fired.is_empty() || socket.reservice {
                socket.reservice = false;
                dispatch.push((SocketId(handle), fired));
            }
        }
        Ok(dispatch)
    }
}

/// A stream socket borrowed from the multiplexer.
///
/// Hitting `WouldBlock` clears the matching cached readiness bit.
pub struct SocketStream<'a> {
    stream: &'a mut TcpStream,
    ready: &'a mut Mask,
}

impl fmt::Debug for SocketStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketStream").field("ready", &self.ready).finish_non_exhaustive()
    }
}

impl SocketStream<'_> {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl Read for SocketStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.ready.remove(Mask::READABLE);
                Err(e)
            }
            other => other,
        }
    }
}

impl Write for SocketStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.write(buf) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.ready.remove(Mask::WRITABLE);
                Err(e)
            }
            other => other,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};

    fn select_until(mux: &mut Multiplexer<u32>, want: impl Fn(&[(SocketId, Mask)]) -> bool) -> Vec<(SocketId, Mask)> {
        for _ in 0..200 {
            let fired = mux.select(Some(Duration::from_millis(10))).unwrap();
            if want(fired.as_slice()) {
                return fired;
            }
        }
        panic!("socket never became ready");
    }

    #[test]
    fn test_mask_bits() {
        let mut mask = Mask::READABLE | Mask::WRITABLE;
        assert!(mask.contains(Mask::READABLE));
        assert!(!mask.contains(Mask::EXCEPTION));
        mask.remove(Mask::READABLE);
        assert_eq!(mask, Mask::WRITABLE);
        assert!(!mask.intersects(Mask::READABLE | Mask::EXCEPTION));
        assert_eq!(format!("{:?}", Mask::READABLE | Mask::EXCEPTION), "READABLE | EXCEPTION");
        assert_eq!(format!("{:?}", Mask::NONE), "NONE");
    }

    #[test]
    fn test_accept_read_write() {
        let mut mux = Multiplexer::new(16).unwrap();
        let listener = mux.listen("127.0.0.1:0".parse().unwrap(), 0).unwrap();
        let addr = mux.local_addr(listener).unwrap();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        select_until(&mut mux, |fired| fired.iter().any(|(id, _)| *id == listener));

        let (stream, _) = mux.accept(listener).unwrap().unwrap();
        assert!(mux.accept(listener).unwrap().is_none());
        let peer = mux.add_stream(stream, 7).unwrap();
        assert_eq!(mux.data(peer), Some(&7));

        client.write_all(b"ping").unwrap();
        select_until(&mut mux, |fired| fired.iter().any(|(id, mask)| *id == peer && mask.contains(Mask::READABLE)));

        let mut buf = [0u8; 16];
        let n = mux.stream(peer).unwrap().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        // drained reads clear the cached readiness bit
        let err = mux.stream(peer).unwrap().read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert!(!mux.readiness(peer).contains(Mask::READABLE));

        mux.set_mask(peer, Mask::WRITABLE);
        select_until(&mut mux, |fired| fired.iter().any(|(id, mask)| *id == peer && mask.contains(Mask::WRITABLE)));
        mux.stream(peer).unwrap().write_all(b"pong").unwrap();

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"pong");

        assert_eq!(mux.close(peer), Some(7));
        assert!(!mux.contains(peer));
        assert!(mux.stream(peer).is_none());
    }

    #[test]
    fn test_reservice_skips_wait() {
        let mut mux = Multiplexer::new(16).unwrap();
        let listener = mux.listen("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        mux.reservice(listener);

        let fired = mux.select(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(fired, vec![(listener, Mask::NONE)]);

        // the flag is consumed by the dispatch
        let fired = mux.select(Some(Duration::from_millis(1))).unwrap();
        assert!(fired.is_empty());
    }
}
