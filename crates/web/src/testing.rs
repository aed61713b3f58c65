//! Fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

use ember_http::connection::Connection;
use ember_http::handler::Dispatcher;
use ember_http::limits::ConnConfig;
use triomphe::Arc;

/// Reads hand out queued bytes then block; writes are captured.
#[derive(Debug, Default)]
pub(crate) struct MockIo {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl MockIo {
    pub fn new(input: &str) -> Self {
        Self { input: input.bytes().collect(), output: Vec::new() }
    }

    pub fn output(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.output)).into_owned()
    }
}

impl Read for MockIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return Err(ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Accepts every request at route 0 without answering it.
struct Accept;

impl Dispatcher for Accept {
    fn route(&mut self, conn: &mut Connection) -> bool {
        conn.set_route(Some(0));
        true
    }

    fn run(&mut self, _conn: &mut Connection) -> bool {
        true
    }
}

/// A connection that has parsed `raw` and is waiting for a handler to respond.
pub(crate) fn connection(raw: &str) -> Connection {
    let addr = "127.0.0.1:8080".parse().unwrap();
    let mut conn = Connection::new(1, "127.0.0.1:40000".parse().unwrap(), addr, false, Arc::new(ConnConfig::default()));
    conn.read_event(&mut MockIo::new(raw)).unwrap();
    conn.advance(&mut Accept);
    conn.set_route(None);
    conn
}

/// Flushes everything the connection has queued.
pub(crate) fn flush(conn: &mut Connection) -> String {
    let mut io = MockIo::default();
    conn.write_event(&mut io).unwrap();
    io.output()
}
