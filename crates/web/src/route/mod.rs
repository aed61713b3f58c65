//! The ordered route table.
//!
//! A [`Route`] maps a URL prefix plus structural [filters](filter) to a named handler, with
//! optional authentication, required abilities and per-status redirects. Routes are consulted in
//! table order; the first route whose prefix and filters match, whose authentication and
//! authorization pass, and whose handler accepts the request wins. See
//! [`Host`](crate::server::Host) for the resolution walk.

pub mod filter;

use std::fmt;
use std::path::{Path, PathBuf};

use ember_http::connection::Connection;
use filter::{AllFilter, Filter, MethodFilter};
use thiserror::Error;
use tracing::trace;

use crate::auth::AuthType;

/// Handler bound to a route that names none.
pub const DEFAULT_HANDLER: &str = "file";

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route prefix must not be empty")]
    EmptyPrefix,

    #[error("route prefix {prefix} must start with /")]
    RelativePrefix { prefix: String },
}

pub struct Route {
    prefix: String,
    dir: Option<PathBuf>,
    handler: String,
    auth: Option<AuthType>,
    abilities: Vec<String>,
    redirects: Vec<(u16, String)>,
    filters: AllFilter,
}

impl Route {
    pub fn builder(prefix: impl Into<String>) -> RouteBuilder {
        RouteBuilder::new(prefix.into())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Document directory overriding the server documents root.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn auth(&self) -> Option<AuthType> {
        self.auth
    }

    /// Required abilities; an entry `a|b` is met by either alternative.
    pub fn abilities(&self) -> &[String] {
        &self.abilities
    }

    pub fn redirects(&self) -> &[(u16, String)] {
        &self.redirects
    }

    /// Redirect target for a response status: the exact status entry, else the `*` entry.
    pub fn redirect_for(&self, status: u16) -> Option<&str> {
        self.redirects
            .iter()
            .find(|(s, _)| *s == status)
            .or_else(|| self.redirects.iter().find(|(s, _)| *s == 0))
            .map(|(_, uri)| uri.as_str())
    }

    /// Structural match: path prefix and filters.
    pub fn matches(&self, conn: &Connection) -> bool {
        if !conn.path().starts_with(&self.prefix) {
            return false;
        }
        let matched = self.filters.matches(conn);
        trace!(conn = conn.id(), prefix = %self.prefix, matched, "route filters");
        matched
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("prefix", &self.prefix)
            .field("handler", &self.handler)
            .field("dir", &self.dir)
            .field("auth", &self.auth)
            .field("abilities", &self.abilities)
            .field("redirects", &self.redirects)
            .field("filters", &self.filters)
            .finish()
    }
}

pub struct RouteBuilder {
    prefix: String,
    dir: Option<PathBuf>,
    handler: String,
    auth: Option<AuthType>,
    abilities: Vec<String>,
    redirects: Vec<(u16, String)>,
    methods: Option<MethodFilter>,
    filters: AllFilter,
}

impl RouteBuilder {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            dir: None,
            handler: DEFAULT_HANDLER.to_owned(),
            auth: None,
            abilities: Vec::new(),
            redirects: Vec::new(),
            methods: None,
            filters: filter::all_filter(),
        }
    }

    #[must_use]
    pub fn handler(mut self, name: impl Into<String>) -> Self {
        self.handler = name.into();
        self
    }

    #[must_use]
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: AuthType) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn ability(mut self, ability: impl Into<String>) -> Self {
        self.abilities.push(ability.into());
        self
    }

    #[must_use]
    pub fn abilities<I, S>(mut self, abilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abilities.extend(abilities.into_iter().map(Into::into));
        self
    }

    /// Redirects responses with `status` to `uri`; status 0 applies to any status.
    #[must_use]
    pub fn redirect(mut self, status: u16, uri: impl Into<String>) -> Self {
        self.redirects.push((status, uri.into()));
        self
    }

    /// Restricts the route to a set of methods. Without it only GET, HEAD and POST match.
    #[must_use]
    pub fn methods(mut self, methods: MethodFilter) -> Self {
        self.methods = Some(methods);
        self
    }

    #[must_use]
    pub fn with<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.and(filter);
        self
    }

    pub fn build(self) -> Result<Route, RouteError> {
        if self.prefix.is_empty() {
            return Err(RouteError::EmptyPrefix);
        }
        if !self.prefix.starts_with('/') {
            return Err(RouteError::RelativePrefix { prefix: self.prefix });
        }
        let mut filters = self.filters;
        filters.and(self.methods.unwrap_or_else(filter::safe_methods));
        Ok(Route {
            prefix: self.prefix,
            dir: self.dir,
            handler: self.handler,
            auth: self.auth,
            abilities: self.abilities,
            redirects: self.redirects,
            filters,
        })
    }
}

impl fmt::Debug for RouteBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBuilder").field("prefix", &self.prefix).field("handler", &self.handler).finish_non_exhaustive()
    }
}

/// Routes in resolution order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route at the end of the table.
    pub fn add(&mut self, route: Route) -> usize {
        self.routes.push(route);
        self.routes.len() - 1
    }

    /// Inserts a route at `index`, clamped to the table length.
    pub fn insert(&mut self, index: usize, route: Route) -> usize {
        let index = index.min(self.routes.len());
        self.routes.insert(index, route);
        index
    }

    /// Removes the first route with exactly this prefix.
    pub fn remove(&mut self, prefix: &str) -> Option<Route> {
        let index = self.lookup(prefix)?;
        Some(self.routes.remove(index))
    }

    /// Index of the first route with exactly this prefix.
    pub fn lookup(&self, prefix: &str) -> Option<usize> {
        self.routes.iter().position(|r| r.prefix == prefix)
    }

    pub fn get(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Route> {
        self.routes.iter()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

impl<'a> IntoIterator for &'a RouteTable {
    type Item = &'a Route;
    type IntoIter = std::slice::Iter<'a, Route>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connection;
    use http::Method;

    #[test]
    fn test_builder_defaults() {
        let route = Route::builder("/").build().unwrap();
        assert_eq!(route.handler(), "file");
        assert!(route.auth().is_none());
        assert!(route.abilities().is_empty());

        assert!(matches!(Route::builder("").build(), Err(RouteError::EmptyPrefix)));
        assert!(matches!(Route::builder("docs").build(), Err(RouteError::RelativePrefix { .. })));
    }

    #[test]
    fn test_prefix_and_default_methods() {
        let route = Route::builder("/admin").build().unwrap();
        assert!(route.matches(&connection("GET /admin/index.html HTTP/1.1\r\n\r\n")));
        assert!(!route.matches(&connection("GET /public/admin HTTP/1.1\r\n\r\n")));
        assert!(!route.matches(&connection("DELETE /admin/x HTTP/1.1\r\n\r\n")));

        let route = Route::builder("/").methods(filter::methods([Method::DELETE])).build().unwrap();
        assert!(route.matches(&connection("DELETE /admin/x HTTP/1.1\r\n\r\n")));
        assert!(!route.matches(&connection("GET /admin/x HTTP/1.1\r\n\r\n")));
    }

    #[test]
    fn test_redirect_for() {
        let route = Route::builder("/").redirect(401, "/login.html").redirect(0, "/other").build().unwrap();
        assert_eq!(route.redirect_for(401), Some("/login.html"));
        assert_eq!(route.redirect_for(200), Some("/other"));

        let route = Route::builder("/").redirect(200, "/home").build().unwrap();
        assert_eq!(route.redirect_for(404), None);
    }

    #[test]
    fn test_table() {
        let mut table = RouteTable::new();
        table.add(Route::builder("/").build().unwrap());
        table.insert(0, Route::builder("/action").handler("action").build().unwrap());
        table.insert(99, Route::builder("/cgi-bin").handler("cgi").build().unwrap());

        let prefixes: Vec<_> = table.iter().map(Route::prefix).collect();
        assert_eq!(prefixes, ["/action", "/", "/cgi-bin"]);
        assert_eq!(table.lookup("/"), Some(1));

        assert_eq!(table.remove("/action").map(|r| r.handler().to_owned()).as_deref(), Some("action"));
        assert!(table.remove("/action").is_none());
        assert_eq!(table.len(), 2);
    }
}
