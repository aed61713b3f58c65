//! The top-level server: one thread, one multiplexer, every connection driven to completion by
//! readiness events.
//!
//! ```no_run
//! use ember_web::{Server, ServerConfig};
//! use std::sync::atomic::AtomicBool;
//!
//! fn main() -> Result<(), ember_web::ServerError> {
//!     let config = ServerConfig::builder().documents("web").realm("example.com").build();
//!     let mut server = Server::builder().config(config).route_file("route.txt").open()?;
//!     server.listen("0.0.0.0:8080".parse().unwrap())?;
//!
//!     let finished = AtomicBool::new(false);
//!     server.service_events(&finished)?;
//!     server.close();
//!     Ok(())
//! }
//! ```

mod config;
mod host;


pub use config::{ServerConfig, ServerConfigBuilder};
pub use host::Host;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ember_http::connection::{Connection, Expiry, State};
use ember_http::limits::ConnConfig;
use ember_http::net::{Mask, Multiplexer, SocketId};
use ember_http::sched::Scheduler;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use triomphe::Arc;

use crate::auth::{Auth, AuthError, AuthStore, FileVerifier, PasswordVerifier};
use crate::config::{self as route_config, ConfigError};
use crate::handler::{Action, ActionHandler, Handlers, RequestHandler};
use crate::route::{Route, RouteTable};

/// Readiness events collected per poll.
const EVENT_CAPACITY: usize = 256;

/// Longest wait in [`Server::service_events`] before the finished flag is checked again.
const MAX_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("route {prefix} uses undefined handler {handler}")]
    UnknownHandler { prefix: String, handler: String },

    #[error("cannot listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("socket poll failed: {source}")]
    Poll { source: io::Error },
}

enum Socket {
    Listener,
    Conn(Box<Connection>),
    /// Placeholder while a connection is taken out to be serviced.
    Detached,
}

#[derive(Debug)]
enum Event {
    Timeout(SocketId),
    PruneSessions,
}

pub struct ServerBuilder {
    config: ServerConfig,
    route_file: Option<PathBuf>,
    routes: Vec<Route>,
    handlers: Vec<(String, Box<dyn RequestHandler>)>,
    actions: ActionHandler,
    verifier: Option<Box<dyn PasswordVerifier>>,
    users: Vec<(String, String, Vec<String>)>,
    roles: Vec<(String, Vec<String>)>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            route_file: None,
            routes: Vec::new(),
            handlers: Vec::new(),
            actions: ActionHandler::new(),
            verifier: None,
            users: Vec::new(),
            roles: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads routes, users and roles from a configuration file when the server opens.
    #[must_use]
    pub fn route_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.route_file = Some(path.into());
        self
    }

    /// Adds a route. Routes added here come before the ones of the route file.
    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Registers a handler, replacing a built-in one of the same name.
    #[must_use]
    pub fn handler(mut self, name: impl Into<String>, handler: impl RequestHandler + 'static) -> Self {
        self.handlers.push((name.into(), Box::new(handler)));
        self
    }

    /// Registers an action served by the `action` handler.
    #[must_use]
    pub fn action(mut self, name: &str, action: impl Action + 'static) -> Self {
        self.actions.define(name, action);
        self
    }

    /// Replaces the default [`FileVerifier`].
    #[must_use]
    pub fn verifier(mut self, verifier: impl PasswordVerifier + 'static) -> Self {
        self.verifier = Some(Box::new(verifier));
        self
    }

    /// Adds a user; `password` is stored as given, see [`encode_password`](crate::auth::encode_password).
    #[must_use]
    pub fn user<I, S>(mut self, name: impl Into<String>, password: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users.push((name.into(), password.into(), roles.into_iter().map(Into::into).collect()));
        self
    }

    #[must_use]
    pub fn role<I, S>(mut self, name: impl Into<String>, abilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.push((name.into(), abilities.into_iter().map(Into::into).collect()));
        self
    }

    /// Builds the route table, user database and handler registry.
    ///
    /// Without any route, everything is served from the documents directory.
    pub fn open(self) -> Result<Server, ServerError> {
        let mut routes = RouteTable::new();
        for route in self.routes {
            routes.add(route);
        }

        let mut store = AuthStore::new(self.config.realm.clone());
        for (name, abilities) in self.roles {
            store.add_role(&name, abilities)?;
        }
        for (name, password, roles) in self.users {
            store.add_user(&name, &password, roles)?;
        }
        match &self.route_file {
            Some(path) => route_config::load(path, &mut routes, &mut store)?,
            None => store.compute_abilities(),
        }
        if routes.is_empty() {
            debug!("no routes configured, serving documents");
            if let Ok(route) = Route::builder("/").build() {
                routes.add(route);
            }
        }

        let mut handlers = Handlers::with_builtins(self.actions);
        for (name, handler) in self.handlers {
            handlers.define_boxed(&name, handler);
        }
        if let Some(route) = routes.iter().find(|route| !handlers.contains(route.handler())) {
            return Err(ServerError::UnknownHandler { prefix: route.prefix().to_owned(), handler: route.handler().to_owned() });
        }

        let verifier = self.verifier.unwrap_or_else(|| Box::new(FileVerifier));
        let auth = Auth::new(store, verifier);
        let mux = Multiplexer::new(EVENT_CAPACITY).map_err(|source| ServerError::Poll { source })?;

        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(now, self.config.prune_interval, Event::PruneSessions);

        info!(documents = %self.config.documents.display(), routes = routes.len(), "server opened");
        let conn_config = Arc::new(self.config.conn_config());
        Ok(Server { host: Host::new(routes, handlers, auth, self.config), mux, scheduler, conn_config, next_conn: 0 })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("route_file", &self.route_file)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

pub struct Server {
    host: Host,
    mux: Multiplexer<Socket>,
    scheduler: Scheduler<Event>,
    conn_config: Arc<ConnConfig>,
    next_conn: u64,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Opens a server for `documents` configured by `route_file`.
    pub fn open(documents: impl AsRef<Path>, route_file: impl AsRef<Path>) -> Result<Self, ServerError> {
        let config = ServerConfig::builder().documents(documents.as_ref()).build();
        Self::builder().config(config).route_file(route_file.as_ref()).open()
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut Host {
        &mut self.host
    }

    /// Starts listening; returns the bound address, which tells the port when `addr` asked for 0.
    pub fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        let id = self.mux.listen(addr, Socket::Listener).map_err(|source| ServerError::Bind { addr, source })?;
        let local = self.mux.local_addr(id).map_err(|source| ServerError::Bind { addr, source })?;
        info!(addr = %local, "listening for http");
        Ok(local)
    }

    /// Runs until `finished` is set.
    pub fn service_events(&mut self, finished: &AtomicBool) -> Result<(), ServerError> {
        while !finished.load(Ordering::Relaxed) {
            self.poll_once(Some(MAX_WAIT))?;
        }
        Ok(())
    }

    /// Fires due timers, waits up to `timeout` for readiness and services every ready socket.
    /// Returns the number of sockets serviced.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, ServerError> {
        let next_timer = self.run_timers(Instant::now());
        let timeout = match (timeout, next_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let ready = self.mux.select(timeout).map_err(|source| ServerError::Poll { source })?;
        for &(id, mask) in &ready {
            match self.mux.data(id) {
                Some(Socket::Listener) => self.accept(id),
                Some(Socket::Conn(_)) => self.service(id, mask),
                Some(Socket::Detached) | None => {}
            }
        }
        Ok(ready.len())
    }

    /// Closes every socket and releases the handlers and sessions.
    pub fn close(&mut self) {
        for id in self.mux.ids() {
            if let Some(Socket::Conn(conn)) = self.mux.close(id) {
                if let Some(timer) = conn.timer() {
                    self.scheduler.cancel(timer);
                }
            }
        }
        self.host.handlers.close_all();
        self.host.sessions.clear();
        info!("server closed");
    }

    fn run_timers(&mut self, now: Instant) -> Option<Duration> {
        while let Some((_, event)) = self.scheduler.pop_due(now) {
            match event {
                Event::Timeout(id) => self.expire(id, now),
                Event::PruneSessions => {
                    let pruned = self.host.sessions.prune(now);
                    if pruned > 0 {
                        debug!(pruned, remaining = self.host.sessions.len(), "expired sessions removed");
                    }
                    self.scheduler.schedule(now, self.host.config.prune_interval, Event::PruneSessions);
                }
            }
        }
        self.scheduler.next_delay(now)
    }

    fn accept(&mut self, listener: SocketId) {
        loop {
            let (stream, peer) = match self.mux.accept(listener) {
                Ok(Some(accepted)) => accepted,
                Ok(None) => return,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    return;
                }
            };
            let local = match stream.local_addr() {
                Ok(local) => local,
                Err(e) => {
                    warn!(%peer, cause = %e, "accepted socket has no local address");
                    continue;
                }
            };
            self.next_conn += 1;
            let conn = Connection::new(self.next_conn, peer, local, false, Arc::clone(&self.conn_config));
            match self.mux.add_stream(stream, Socket::Conn(Box::new(conn))) {
                Ok(id) => {
                    info!(%peer, socket = %id, conn = self.next_conn, "accepted connection");
                    if let Some(Socket::Conn(conn)) = self.mux.data_mut(id) {
                        arm_timer(&mut self.scheduler, id, conn, Instant::now());
                    }
                }
                Err(e) => warn!(%peer, cause = %e, "cannot register connection"),
            }
        }
    }

    /// Services one connection: reads, advances the state machine, writes, reuses it for the
    /// next request and finally either closes it or waits for its next event.
    fn service(&mut self, id: SocketId, mask: Mask) {
        let Some(slot) = self.mux.data_mut(id) else { return };
        let mut conn = match std::mem::replace(slot, Socket::Detached) {
            Socket::Conn(conn) => conn,
            other => {
                *slot = other;
                return;
            }
        };

        let keep = self.drive(id, &mut conn, mask);
        if !keep {
            self.close_conn(id, &conn);
            return;
        }

        let mut interest = Mask::NONE;
        if conn.wants_read() {
            interest |= Mask::READABLE;
        }
        if conn.wants_write() {
            interest |= Mask::WRITABLE;
        }
        self.mux.set_mask(id, interest);
        arm_timer(&mut self.scheduler, id, &mut conn, Instant::now());
        if let Some(slot) = self.mux.data_mut(id) {
            *slot = Socket::Conn(conn);
        }
    }

    /// Returns false when the socket must be closed.
    fn drive(&mut self, id: SocketId, conn: &mut Connection, mask: Mask) -> bool {
        let Some(mut stream) = self.mux.stream(id) else { return false };

        if mask.intersects(Mask::READABLE | Mask::EXCEPTION) && conn.wants_read() {
            if let Err(e) = conn.read_event(&mut stream) {
                conn.io_failed(&e);
                return false;
            }
        }
        loop {
            conn.advance(&mut self.host);
            if let Err(e) = conn.write_event(&mut stream) {
                conn.io_failed(&e);
                return false;
            }
            if !conn.can_reuse() {
                break;
            }
            conn.reuse();
            if !conn.has_pending_input() {
                break;
            }
            trace!(conn = conn.id(), "pipelined request");
        }
        !conn.should_close()
    }

    fn expire(&mut self, id: SocketId, now: Instant) {
        let Some(Socket::Conn(conn)) = self.mux.data_mut(id) else { return };
        conn.set_timer(None);
        let waiting = matches!(conn.state(), State::Begin | State::Content);
        match conn.expiry(now) {
            Expiry::Rearm(_) if conn.is_writer_idle() => {
                trace!(socket = %id, conn = conn.id(), "waking background writer");
                conn.wake_writer();
                let mask = self.mux.mask(id) | Mask::WRITABLE;
                self.mux.set_mask(id, mask);
                self.mux.reservice(id);
            }
            // a timeout response or a lingering response still has to be written
            Expiry::Expired if waiting => self.service(id, Mask::WRITABLE),
            Expiry::Rearm(_) | Expiry::Disarm if conn.has_output() => self.service(id, Mask::WRITABLE),
            Expiry::Rearm(_) | Expiry::Disarm => arm_timer(&mut self.scheduler, id, conn, now),
            Expiry::Expired => {
                debug!(socket = %id, conn = conn.id(), "closing connection after linger");
                self.mux.close(id);
            }
        }
    }

    fn close_conn(&mut self, id: SocketId, conn: &Connection) {
        if let Some(timer) = conn.timer() {
            self.scheduler.cancel(timer);
        }
        self.mux.close(id);
        debug!(conn = conn.id(), peer = %conn.peer(), requests = conn.requests(), "connection closed");
    }
}

/// Keeps the connection timer in step with the connection state.
fn arm_timer(scheduler: &mut Scheduler<Event>, id: SocketId, conn: &mut Connection, now: Instant) {
    match conn.expiry(now) {
        Expiry::Rearm(delay) => {
            let rescheduled = conn.timer().is_some_and(|timer| scheduler.reschedule(timer, now, delay));
            if !rescheduled {
                conn.set_timer(Some(scheduler.schedule(now, delay, Event::Timeout(id))));
            }
        }
        Expiry::Disarm => {
            if let Some(timer) = conn.timer() {
                scheduler.cancel(timer);
                conn.set_timer(None);
            }
        }
        // fires right away; the event handles it
        Expiry::Expired => {
            if conn.timer().is_none_or(|timer| !scheduler.reschedule(timer, now, Duration::ZERO)) {
                conn.set_timer(Some(scheduler.schedule(now, Duration::ZERO, Event::Timeout(id))));
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("host", &self.host).field("sockets", &self.mux.len()).field("timers", &self.scheduler.len()).finish()
    }
}
