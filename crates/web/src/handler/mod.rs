//! Request handlers and the registry routes refer to them by.
//!
//! A route names its handler; the [`Handlers`] registry maps that name to a boxed
//! [`RequestHandler`]. The built-in handlers are registered by [`Handlers::with_builtins`]:
//!
//! | name       | handler             |
//! |------------|---------------------|
//! | `file`     | [`FileHandler`]     |
//! | `action`   | [`ActionHandler`]   |
//! | `options`  | [`OptionsHandler`]  |
//! | `redirect` | [`RedirectHandler`] |
//! | `continue` | [`ContinueHandler`] |
//!
//! Handlers for CGI programs, uploads or templates can be registered under any name.

mod action;
mod file;
mod options;
mod redirect;

pub use action::{Action, ActionHandler};
pub use file::FileHandler;
pub use options::OptionsHandler;
pub use redirect::RedirectHandler;

use std::fmt;

use ember_http::symbol::{SymbolTable, Value};
use tracing::{debug, trace};

use crate::request::RequestContext;

/// Produces the response for a matched route.
///
/// Calls happen in this order for one request: [`matches`](Self::matches) once the route
/// matched structurally and the request passed authentication, [`prepare`](Self::prepare) right
/// after the route was chosen and before the body is read, then [`service`](Self::service) once
/// the body is complete.
pub trait RequestHandler {
    /// Returns false to decline the route; resolution continues with the next one.
    fn matches(&self, _ctx: &mut RequestContext<'_>) -> bool {
        true
    }

    /// Runs before the request body is read, e.g. to install a content consumer. Returns false
    /// when it answered the request itself.
    fn prepare(&self, _ctx: &mut RequestContext<'_>) -> bool {
        true
    }

    /// Serves the request. Returns false when the request was not handled and the next route
    /// should be tried.
    ///
    /// A handler that returns true owns the response: it must eventually call
    /// [`Connection::done`](ember_http::connection::Connection::done), directly or through a
    /// background writer.
    fn service(&self, ctx: &mut RequestContext<'_>) -> bool;

    /// Releases resources when the server closes.
    fn close(&mut self) {}
}

/// A handler that wraps a closure.
pub struct FnHandler<F>(F);

impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(&mut RequestContext<'_>) -> bool,
{
    fn service(&self, ctx: &mut RequestContext<'_>) -> bool {
        (self.0)(ctx)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

/// Creates a handler from a closure.
///
/// ```
/// use ember_web::handler::handler_fn;
/// use http::StatusCode;
///
/// let hello = handler_fn(|ctx| {
///     ctx.conn_mut().response(StatusCode::OK, b"hello");
///     true
/// });
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut RequestContext<'_>) -> bool,
{
    FnHandler(f)
}

/// Declines every request so resolution proceeds to the next route.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinueHandler;

impl RequestHandler for ContinueHandler {
    fn matches(&self, ctx: &mut RequestContext<'_>) -> bool {
        trace!(conn = ctx.conn().id(), prefix = ctx.route().prefix(), "continue");
        false
    }

    fn service(&self, _ctx: &mut RequestContext<'_>) -> bool {
        false
    }
}

/// Named handlers.
#[derive(Default)]
pub struct Handlers {
    handlers: SymbolTable<Box<dyn RequestHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in handlers, with `action` serving the given actions.
    pub fn with_builtins(actions: ActionHandler) -> Self {
        let mut handlers = Self::new();
        handlers.define("file", FileHandler);
        handlers.define("action", actions);
        handlers.define("options", OptionsHandler);
        handlers.define("redirect", RedirectHandler);
        handlers.define("continue", ContinueHandler);
        handlers
    }

    /// Registers a handler, replacing one of the same name.
    pub fn define<H: RequestHandler + 'static>(&mut self, name: &str, handler: H) {
        self.define_boxed(name, Box::new(handler));
    }

    pub fn define_boxed(&mut self, name: &str, handler: Box<dyn RequestHandler>) {
        if self.handlers.set(name, Value::Symbol(handler)).is_some() {
            debug!(handler = name, "handler replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn RequestHandler> {
        self.handlers.lookup(name).and_then(Value::as_symbol).map(|handler| &**handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains(name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.handlers.delete(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(name, _)| name.as_str())
    }

    /// Calls [`RequestHandler::close`] on every handler.
    pub fn close_all(&mut self) {
        for (name, value) in self.handlers.iter_mut() {
            if let Some(handler) = value.as_symbol_mut() {
                trace!(handler = %name, "close handler");
                handler.close();
            }
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
