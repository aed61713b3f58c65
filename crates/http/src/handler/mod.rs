//! The seams between the connection state machine and whatever produces responses.
//!
//! [`Dispatcher`] is called by [`Connection::advance`] to resolve a route and run its handler.
//! [`ContentConsumer`] receives request body bytes while they arrive, and [`BackgroundWriter`]
//! produces response output whenever the socket can take more.

use std::io;

use crate::connection::Connection;

/// Route resolution and handler invocation for a connection.
pub trait Dispatcher {
    /// Resolves the route for the current request, starting at [`Connection::route_start`].
    ///
    /// Called as soon as the header block is parsed, before the body is read, so authentication
    /// can fail early and handlers can install a [`ContentConsumer`]. Returns false when a
    /// response (404, 401, a login redirect) was produced instead of a route.
    fn route(&mut self, conn: &mut Connection) -> bool;

    /// Runs the handler of the resolved route.
    ///
    /// Returns false when the handler declined the request; resolution then continues with the
    /// route after the current one.
    fn run(&mut self, conn: &mut Connection) -> bool;
}

/// Receives request body bytes as they arrive.
pub trait ContentConsumer {
    /// Called whenever new body bytes were added to [`Connection::input_mut`] and once more when
    /// the body is complete. Returning false rejects the request; the consumer should have
    /// written an error response.
    fn process_data(&mut self, conn: &mut Connection) -> bool;
}

impl<F> ContentConsumer for F
where
    F: FnMut(&mut Connection) -> bool,
{
    fn process_data(&mut self, conn: &mut Connection) -> bool {
        (self)(conn)
    }
}

/// Produces response output in the RUNNING state, e.g. streaming a large file.
pub trait BackgroundWriter {
    /// Called when the transmit buffer has drained. Returns `Ok(true)` while more output
    /// remains; on `Ok(false)` the response is completed.
    fn write_event(&mut self, conn: &mut Connection) -> io::Result<bool>;
}
