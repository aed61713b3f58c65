//! Structural request filters a route applies after its prefix matched.
//!
//! Filters look at the parsed request only; authentication and handler predicates run later,
//! once a route matched structurally. The filters configured from a route file are
//! [`MethodFilter`], [`ExtensionFilter`] and [`ProtocolFilter`]; [`fn_filter`] adds custom ones.
//!
//! ```
//! use ember_web::route::filter::{all_filter, methods, protocol};
//! use http::Method;
//!
//! let mut filters = all_filter();
//! filters.and(methods([Method::GET, Method::HEAD])).and(protocol("https"));
//! ```

use std::collections::BTreeSet;
use std::fmt;

use ember_http::connection::Connection;
use http::Method;

/// A predicate over the parsed request of a connection.
pub trait Filter {
    /// Returns `true` if the request may be served by the route.
    fn matches(&self, conn: &Connection) -> bool;
}

struct FnFilter<F: Fn(&Connection) -> bool>(F);

impl<F: Fn(&Connection) -> bool> Filter for FnFilter<F> {
    fn matches(&self, conn: &Connection) -> bool {
        (self.0)(conn)
    }
}

impl<F: Fn(&Connection) -> bool> fmt::Debug for FnFilter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFilter")
    }
}

/// Creates a filter from a closure.
///
/// ```
/// use ember_web::route::filter::fn_filter;
///
/// let no_query = fn_filter(|conn| conn.request().is_some_and(|r| r.query.is_empty()));
/// ```
pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&Connection) -> bool,
{
    FnFilter(f)
}

pub fn all_filter() -> AllFilter {
    AllFilter::new()
}

/// Compose filters with AND logic. An empty chain matches everything.
#[derive(Default)]
pub struct AllFilter {
    filters: Vec<Box<dyn Filter>>,
}

impl AllFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    pub fn and<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for AllFilter {
    fn matches(&self, conn: &Connection) -> bool {
        self.filters.iter().all(|filter| filter.matches(conn))
    }
}

impl fmt::Debug for AllFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllFilter").field("len", &self.filters.len()).finish()
    }
}

/// Matches a set of request methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFilter(BTreeSet<String>);

impl MethodFilter {
    pub fn contains(&self, method: &Method) -> bool {
        self.0.contains(method.as_str())
    }
}

impl Filter for MethodFilter {
    fn matches(&self, conn: &Connection) -> bool {
        conn.method().is_some_and(|method| self.contains(method))
    }
}

/// Creates a filter matching any of `methods`.
pub fn methods<I>(methods: I) -> MethodFilter
where
    I: IntoIterator<Item = Method>,
{
    MethodFilter(methods.into_iter().map(|m| m.as_str().to_owned()).collect())
}

/// The methods a route accepts when it does not name any: GET, HEAD and POST.
pub fn safe_methods() -> MethodFilter {
    methods([Method::GET, Method::HEAD, Method::POST])
}

macro_rules! method_filter {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Creates a filter that matches HTTP ", stringify!($upper_case_method), " requests.")]
        #[inline]
        pub fn $method() -> MethodFilter {
            methods([Method::$upper_case_method])
        }
    };
}

method_filter!(get_method, GET);
method_filter!(post_method, POST);
method_filter!(put_method, PUT);
method_filter!(delete_method, DELETE);
method_filter!(head_method, HEAD);
method_filter!(options_method, OPTIONS);
method_filter!(trace_method, TRACE);

/// Matches the extension of the request path, without the dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter(BTreeSet<String>);

impl Filter for ExtensionFilter {
    fn matches(&self, conn: &Connection) -> bool {
        conn.request().and_then(|r| r.ext.as_deref()).is_some_and(|ext| self.0.contains(ext))
    }
}

pub fn extensions<I, S>(extensions: I) -> ExtensionFilter
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ExtensionFilter(extensions.into_iter().map(|e| e.as_ref().trim_start_matches('.').to_owned()).collect())
}

/// Matches the transport scheme, `http` or `https`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFilter(String);

impl Filter for ProtocolFilter {
    fn matches(&self, conn: &Connection) -> bool {
        self.0.eq_ignore_ascii_case(conn.scheme())
    }
}

pub fn protocol(scheme: impl Into<String>) -> ProtocolFilter {
    ProtocolFilter(scheme.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connection;

    #[test]
    fn test_method_filters() {
        let conn = connection("PUT /doc.txt HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        assert!(put_method().matches(&conn));
        assert!(!safe_methods().matches(&conn));
        assert!(methods([Method::PUT, Method::DELETE]).matches(&conn));
    }

    #[test]
    fn test_extension_and_protocol() {
        let conn = connection("GET /pages/index.html?x=1 HTTP/1.1\r\n\r\n");
        assert!(extensions(["html", ".htm"]).matches(&conn));
        assert!(!extensions(["cgi"]).matches(&conn));
        assert!(protocol("HTTP").matches(&conn));
        assert!(!protocol("https").matches(&conn));

        let bare = connection("GET /pages/ HTTP/1.1\r\n\r\n");
        assert!(!extensions(["html"]).matches(&bare));
    }

    #[test]
    fn test_all_filter() {
        let conn = connection("GET /index.html HTTP/1.1\r\n\r\n");
        let mut filters = all_filter();
        assert!(filters.matches(&conn));

        filters.and(get_method()).and(fn_filter(|conn| conn.path().starts_with("/index")));
        assert!(filters.matches(&conn));
        filters.and(extensions(["js"]));
        assert!(!filters.matches(&conn));
        assert_eq!(filters.len(), 3);
    }
}
