//! What a handler sees of a request.
//!
//! A [`RequestContext`] pairs the connection with the route it resolved to and the server-wide
//! tables a handler may need: the user database, the session store and the server
//! configuration. It lives for one handler or predicate call.

use std::path::PathBuf;
use std::time::Instant;

use ember_http::connection::Connection;
use http::StatusCode;
use http::header;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::auth::Auth;
use crate::route::Route;
use crate::server::ServerConfig;
use crate::session::{Session, SessionStore, find_cookie};

pub struct RequestContext<'a> {
    conn: &'a mut Connection,
    route: &'a Route,
    auth: &'a Auth,
    sessions: &'a mut SessionStore,
    config: &'a ServerConfig,
    now: Instant,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        conn: &'a mut Connection,
        route: &'a Route,
        auth: &'a Auth,
        sessions: &'a mut SessionStore,
        config: &'a ServerConfig,
        now: Instant,
    ) -> Self {
        Self { conn, route, auth, sessions, config, now }
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        self.conn
    }

    pub fn route(&self) -> &'a Route {
        self.route
    }

    pub fn auth(&self) -> &'a Auth {
        self.auth
    }

    pub fn config(&self) -> &'a ServerConfig {
        self.config
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Decoded request path.
    pub fn path(&self) -> &str {
        self.conn.path()
    }

    /// A request variable: a query or form value, an `HTTP_*` header or a CGI-style field.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.conn.var(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.conn.set_var(name, value);
    }

    /// Deserializes the query string.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        let query = self.conn.request().map_or("", |r| r.query.as_str());
        serde_urlencoded::from_str(query)
    }

    /// Deserializes an url-encoded request body.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, serde_urlencoded::de::Error> {
        let (a, b) = self.conn.input().as_slices();
        let mut body = Vec::with_capacity(a.len() + b.len());
        body.extend_from_slice(a);
        body.extend_from_slice(b);
        serde_urlencoded::from_bytes(&body)
    }

    /// File system path of the request: the route directory (or the documents root) joined
    /// with the request path.
    pub fn filename(&self) -> PathBuf {
        let root = self.route.dir().unwrap_or(&self.config.documents);
        root.join(self.conn.path().trim_start_matches('/'))
    }

    /// Redirects to the route's target for `status`, if it has one.
    pub fn redirect_by_status(&mut self, status: StatusCode) -> bool {
        let Some(uri) = self.route.redirect_for(status.as_u16()) else {
            return false;
        };
        trace!(conn = self.conn.id(), status = status.as_u16(), uri, "redirect by status");
        self.conn.redirect(uri);
        true
    }

    /// Answers with an error page, or with the route's redirect for that status.
    pub fn error(&mut self, status: StatusCode, message: &str) {
        if !self.redirect_by_status(status) {
            self.conn.error(status, message);
        }
    }

    pub fn redirect(&mut self, uri: &str) {
        self.conn.redirect(uri);
    }

    /// Id of the live session named by the connection or its session cookie.
    pub fn session_id(&mut self) -> Option<String> {
        if let Some(id) = self.conn.session_id.take() {
            if self.sessions.get(&id, self.now).is_some() {
                self.conn.session_id = Some(id.clone());
                return Some(id);
            }
        }
        let cookies = self.conn.request().and_then(|r| r.cookie.as_deref())?;
        let id = find_cookie(cookies, &self.config.session_cookie)?;
        if self.sessions.get(id, self.now).is_none() {
            trace!(conn = self.conn.id(), session = id, "stale session cookie");
            return None;
        }
        let id = id.to_owned();
        self.conn.session_id = Some(id.clone());
        Some(id)
    }

    /// The session of this request, extended by its lifespan.
    ///
    /// With `create`, a missing session is created and its cookie added to the response.
    pub fn session(&mut self, create: bool) -> Option<&mut Session> {
        let id = match self.session_id() {
            Some(id) => id,
            None if create => self.create_session()?,
            None => return None,
        };
        self.sessions.get_mut(&id, self.now)
    }

    fn create_session(&mut self) -> Option<String> {
        let entropy = format!("{}-{}", self.conn.peer(), self.conn.id());
        let id = self.sessions.create(self.now, &entropy)?;
        let mut cookie = format!("{}={id}; Path=/; HttpOnly", self.config.session_cookie);
        if self.conn.is_secure() {
            cookie.push_str("; Secure");
        }
        self.conn.add_header(header::SET_COOKIE, &cookie);
        self.conn.session_id = Some(id.clone());
        Some(id)
    }

    pub fn session_var(&mut self, name: &str) -> Option<String> {
        let id = self.session_id()?;
        self.sessions.get(&id, self.now)?.get(name).map(str::to_owned)
    }

    /// Sets a session variable, creating the session when needed. Returns false when no session
    /// could be created.
    pub fn set_session_var(&mut self, name: &str, value: &str) -> bool {
        match self.session(true) {
            Some(session) => {
                session.set(name, value);
                true
            }
            None => false,
        }
    }

    pub fn remove_session_var(&mut self, name: &str) -> bool {
        self.session(false).is_some_and(|session| session.remove(name))
    }

    pub fn destroy_session(&mut self) {
        if let Some(id) = self.session_id() {
            self.sessions.destroy(&id);
            debug!(conn = self.conn.id(), session = %id, "session ended");
        }
        self.conn.session_id = None;
    }
}

impl std::fmt::Debug for RequestContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext").field("conn", &self.conn).field("route", &self.route.prefix()).finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::{AuthStore, FileVerifier};
    use crate::testing::{connection, flush};
    use serde::Deserialize;
    use std::time::Duration;

    /// The tables a context borrows, owned by the test.
    pub(crate) struct Fixture {
        pub route: Route,
        pub auth: Auth,
        pub sessions: SessionStore,
        pub config: ServerConfig,
    }

    impl Fixture {
        pub fn new(route: Route) -> Self {
            Self {
                route,
                auth: Auth::new(AuthStore::new("example.com"), Box::new(FileVerifier)),
                sessions: SessionStore::new(Duration::from_secs(60), 10),
                config: ServerConfig::builder().documents("/srv/web").build(),
            }
        }

        pub fn context<'a>(&'a mut self, conn: &'a mut Connection) -> RequestContext<'a> {
            RequestContext::new(conn, &self.route, &self.auth, &mut self.sessions, &self.config, Instant::now())
        }
    }

    #[derive(Debug, Deserialize)]
    struct Person {
        name: String,
        age: u32,
    }

    #[test]
    fn test_query_and_form() {
        let mut fixture = Fixture::new(Route::builder("/").build().unwrap());
        let mut conn = connection("POST /form?name=b&age=7 HTTP/1.1\r\nContent-Length: 12\r\n\r\nname=a&age=9");
        let ctx = fixture.context(&mut conn);

        let query: Person = ctx.query().unwrap();
        assert_eq!((query.name.as_str(), query.age), ("b", 7));
        let form: Person = ctx.form().unwrap();
        assert_eq!((form.name.as_str(), form.age), ("a", 9));
    }

    #[test]
    fn test_filename() {
        let mut fixture = Fixture::new(Route::builder("/").build().unwrap());
        let mut conn = connection("GET /a/../b/index.html HTTP/1.1\r\n\r\n");
        assert_eq!(fixture.context(&mut conn).filename(), PathBuf::from("/srv/web/b/index.html"));

        let mut fixture = Fixture::new(Route::builder("/").dir("/tmp/other").build().unwrap());
        assert_eq!(fixture.context(&mut conn).filename(), PathBuf::from("/tmp/other/b/index.html"));
    }

    #[test]
    fn test_session_created_lazily() {
        let mut fixture = Fixture::new(Route::builder("/").build().unwrap());
        let mut conn = connection("GET / HTTP/1.1\r\n\r\n");
        let mut ctx = fixture.context(&mut conn);
        assert!(ctx.session(false).is_none());
        assert!(ctx.set_session_var("color", "blue"));
        let id = ctx.session_id().unwrap();
        assert_eq!(ctx.session_var("color").as_deref(), Some("blue"));
        assert!(ctx.remove_session_var("color"));
        ctx.conn_mut().done();

        let out = flush(&mut conn);
        assert!(out.contains(&format!("set-cookie: ember-session={id}; Path=/; HttpOnly\r\n")));
        assert_eq!(fixture.sessions.len(), 1);
    }

    #[test]
    fn test_session_from_cookie() {
        let mut fixture = Fixture::new(Route::builder("/").build().unwrap());
        let id = fixture.sessions.create(Instant::now(), "peer").unwrap();
        fixture.sessions.get_mut(&id, Instant::now()).unwrap().set("user", "joshua");

        let mut conn = connection(&format!("GET / HTTP/1.1\r\nCookie: theme=dark; ember-session={id}\r\n\r\n"));
        let mut ctx = fixture.context(&mut conn);
        assert_eq!(ctx.session_var("user").as_deref(), Some("joshua"));
        ctx.destroy_session();
        assert!(ctx.session_id().is_none());
        assert!(fixture.sessions.is_empty());

        let mut conn = connection("GET / HTTP/1.1\r\nCookie: ember-session=0123456789abcdef\r\n\r\n");
        assert!(fixture.context(&mut conn).session_id().is_none());
    }

    #[test]
    fn test_error_redirects_by_status() {
        let route = Route::builder("/").redirect(401, "/login.html").build().unwrap();
        let mut fixture = Fixture::new(route);
        let mut conn = connection("GET /secret HTTP/1.1\r\nHost: device.local\r\n\r\n");
        fixture.context(&mut conn).error(StatusCode::UNAUTHORIZED, "Access Denied");

        let out = flush(&mut conn);
        assert!(out.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(out.contains("location: http://device.local/login.html\r\n"));

        let mut conn = connection("GET /secret HTTP/1.1\r\n\r\n");
        fixture.context(&mut conn).error(StatusCode::NOT_FOUND, "Cannot find document");
        assert!(flush(&mut conn).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }
}
