use std::fmt;
use std::time::Instant;

use ember_http::connection::Connection;
use ember_http::handler::Dispatcher;
use http::StatusCode;
use tracing::{debug, error, trace};

use crate::auth::Auth;
use crate::handler::Handlers;
use crate::request::RequestContext;
use crate::route::RouteTable;
use crate::server::ServerConfig;
use crate::session::SessionStore;

/// The tables requests are resolved against.
///
/// Resolution walks the route table from [`Connection::route_start`]. A route is taken when its
/// prefix and filters match, the request passes its authentication and ability checks, and its
/// handler accepts the request. Authentication runs again for every candidate route, including
/// the ones reached after a handler declined.
pub struct Host {
    pub(crate) routes: RouteTable,
    pub(crate) handlers: Handlers,
    pub(crate) auth: Auth,
    pub(crate) sessions: SessionStore,
    pub(crate) config: ServerConfig,
}

impl Host {
    pub fn new(routes: RouteTable, handlers: Handlers, auth: Auth, config: ServerConfig) -> Self {
        let sessions = SessionStore::new(config.session_lifespan, config.session_limit);
        Self { routes, handlers, auth, sessions, config }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut Handlers {
        &mut self.handlers
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut Auth {
        &mut self.auth
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionStore {
        &mut self.sessions
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Dispatcher for Host {
    fn route(&mut self, conn: &mut Connection) -> bool {
        let now = Instant::now();
        for index in conn.route_start()..self.routes.len() {
            let Some(route) = self.routes.get(index) else { break };
            if !route.matches(conn) {
                continue;
            }
            trace!(conn = conn.id(), index, prefix = route.prefix(), "route candidate");

            let Some(handler) = self.handlers.get(route.handler()) else {
                error!(conn = conn.id(), prefix = route.prefix(), handler = route.handler(), "route handler is not defined");
                conn.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot find handler for route.");
                return false;
            };
            let mut ctx = RequestContext::new(conn, route, &self.auth, &mut self.sessions, &self.config, now);
            if !ctx.authenticate() || !ctx.can() {
                return false;
            }
            if !handler.matches(&mut ctx) {
                continue;
            }
            debug!(conn = ctx.conn().id(), prefix = route.prefix(), handler = route.handler(), "route selected");
            ctx.conn_mut().set_route(Some(index));
            return handler.prepare(&mut ctx);
        }

        debug!(conn = conn.id(), path = conn.path(), from = conn.route_start(), "no route");
        conn.error(StatusCode::NOT_FOUND, "Cannot find suitable route for request.");
        false
    }

    fn run(&mut self, conn: &mut Connection) -> bool {
        let Some(route) = conn.route().and_then(|index| self.routes.get(index)) else {
            return false;
        };
        let Some(handler) = self.handlers.get(route.handler()) else {
            conn.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot find handler for route.");
            return true;
        };
        let mut ctx = RequestContext::new(conn, route, &self.auth, &mut self.sessions, &self.config, Instant::now());
        handler.service(&mut ctx)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("routes", &self.routes.len())
            .field("handlers", &self.handlers)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
