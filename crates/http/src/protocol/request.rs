//! The per-request record built from the request line and header block.

use http::{HeaderMap, Method, Version, header};

use crate::protocol::url::Target;

/// Classification of the request body by `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    #[default]
    None,
    /// `application/x-www-form-urlencoded`
    Form,
    /// `application/json` or a `+json` suffix
    Json,
    /// `multipart/form-data`, consumed by an upload handler
    Multipart,
    Other,
}

impl ContentKind {
    pub fn classify(content_type: &str) -> Self {
        let Ok(mime) = content_type.parse::<mime::Mime>() else {
            return ContentKind::Other;
        };
        match (mime.type_(), mime.subtype(), mime.suffix()) {
            (mime::APPLICATION, mime::WWW_FORM_URLENCODED, _) => ContentKind::Form,
            (mime::APPLICATION, mime::JSON, _) | (_, _, Some(mime::JSON)) => ContentKind::Json,
            (mime::MULTIPART, mime::FORM_DATA, _) => ContentKind::Multipart,
            _ => ContentKind::Other,
        }
    }
}

/// Request line fields plus the header-derived fields the pipeline consults.
///
/// The full header map is kept for generic consumers; the dedicated fields are extracted once by
/// the header decoder.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub method: Method,
    /// The request target exactly as received.
    pub url: String,
    /// Decoded, normalized path.
    pub path: String,
    pub query: String,
    pub ext: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,

    pub host: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// All `Cookie` header lines joined with `"; "`.
    pub cookie: Option<String>,
    pub content_type: Option<String>,
    pub content_kind: ContentKind,
    pub content_length: Option<u64>,
    pub chunked: bool,
    /// Lower-cased scheme of the `Authorization` header.
    pub auth_type: Option<String>,
    /// Everything after the scheme.
    pub auth_details: Option<String>,
    pub if_modified_since: Option<String>,
    /// Keep-alive as negotiated by the version and the `Connection` header.
    pub keep_alive: bool,
}

impl RequestHeader {
    pub fn new(method: Method, url: String, target: Target, version: Version) -> Self {
        Self {
            method,
            url,
            path: target.path,
            query: target.query,
            ext: target.ext,
            version,
            headers: HeaderMap::new(),
            host: None,
            user_agent: None,
            referrer: None,
            cookie: None,
            content_type: None,
            content_kind: ContentKind::None,
            content_length: None,
            chunked: false,
            auth_type: None,
            auth_details: None,
            if_modified_since: None,
            keep_alive: version == Version::HTTP_11,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether a request body follows the header block.
    pub fn has_body(&self) -> bool {
        self.chunked || self.content_length.is_some_and(|len| len > 0)
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// The protocol token of the request line, e.g. `HTTP/1.1`.
    pub fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(ContentKind::classify("application/x-www-form-urlencoded"), ContentKind::Form);
        assert_eq!(ContentKind::classify("application/x-www-form-urlencoded; charset=utf-8"), ContentKind::Form);
        assert_eq!(ContentKind::classify("application/json"), ContentKind::Json);
        assert_eq!(ContentKind::classify("application/vnd.api+json"), ContentKind::Json);
        assert_eq!(ContentKind::classify("multipart/form-data; boundary=xyz"), ContentKind::Multipart);
        assert_eq!(ContentKind::classify("text/plain"), ContentKind::Other);
        assert_eq!(ContentKind::classify("???"), ContentKind::Other);
    }
}
