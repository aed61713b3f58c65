use http::{Method, StatusCode, header};

use super::RequestHandler;
use crate::request::RequestContext;

/// Answers OPTIONS with the supported methods and echoes TRACE requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsHandler;

pub const ALLOWED_METHODS: &str = "DELETE,GET,HEAD,OPTIONS,POST,PUT,TRACE";

impl RequestHandler for OptionsHandler {
    fn service(&self, ctx: &mut RequestContext<'_>) -> bool {
        let conn = ctx.conn_mut();
        let Some((method, echo)) = conn.request().map(|r| (r.method.clone(), format!("{} {} {}\r\n", r.method, r.url, r.protocol()))) else {
            return false;
        };
        match method {
            Method::OPTIONS => {
                conn.set_header(header::ALLOW, ALLOWED_METHODS);
                conn.response(StatusCode::OK, b"");
            }
            Method::TRACE => {
                conn.set_header(header::CONTENT_TYPE, "message/http");
                conn.response(StatusCode::OK, echo.as_bytes());
            }
            _ => conn.error(StatusCode::NOT_ACCEPTABLE, "Unsupported method"),
        }
        true
    }
}
