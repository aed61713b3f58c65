use http::StatusCode;
use tracing::trace;

use super::RequestHandler;
use crate::request::RequestContext;

/// Redirects every request by the route's redirect map.
///
/// The target is the entry for status 200, else the `*` entry, else the first entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectHandler;

impl RequestHandler for RedirectHandler {
    fn service(&self, ctx: &mut RequestContext<'_>) -> bool {
        let route = ctx.route();
        let target = route.redirect_for(StatusCode::OK.as_u16()).or_else(|| route.redirects().first().map(|(_, uri)| uri.as_str()));
        match target {
            Some(uri) => {
                trace!(conn = ctx.conn().id(), uri, "redirect route");
                ctx.redirect(uri);
            }
            None => ctx.conn_mut().error(StatusCode::INTERNAL_SERVER_ERROR, "No redirect target configured"),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::Fixture;
    use crate::route::Route;
    use crate::testing::{connection, flush};

    fn service(route: Route) -> String {
        let mut fixture = Fixture::new(route);
        let mut conn = connection("GET /old/page.html HTTP/1.1\r\nHost: device\r\n\r\n");
        assert!(RedirectHandler.service(&mut fixture.context(&mut conn)));
        flush(&mut conn)
    }

    #[test]
    fn test_redirect_targets() {
        let out = service(Route::builder("/old").handler("redirect").redirect(404, "/a").redirect(200, "/b").build().unwrap());
        assert!(out.contains("location: http://device/b\r\n"));

        let out = service(Route::builder("/old").handler("redirect").redirect(404, "/a").build().unwrap());
        assert!(out.contains("location: http://device/a\r\n"));

        let out = service(Route::builder("/old").handler("redirect").redirect(0, "https://").build().unwrap());
        assert!(out.contains("location: https://device/old/page.html\r\n"));
    }

    #[test]
    fn test_missing_target() {
        let out = service(Route::builder("/old").handler("redirect").build().unwrap());
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }
}
