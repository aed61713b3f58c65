//! Request line and header block decoding.
//!
//! The decoder waits until the receive buffer holds a complete header block, parses it with
//! `httparse` and converts it into an owned [`RequestHeader`] plus the [`PayloadSize`] that
//! decides how the body is read. Only the parsed bytes are consumed; body bytes and pipelined
//! requests stay in the buffer.
//!
//! # Limits
//!
//! - header block larger than the configured maximum: 413
//! - more header lines than the configured maximum: 413
//! - request target longer than the configured maximum: 414
//! - `Content-Length` unparsable or above the per-method maximum (PUT and everything else have
//!   separate limits): 413
//! - protocol version other than HTTP/1.0 or HTTP/1.1: 505

use http::header::{self, HeaderName, HeaderValue};
use http::{Method, Version};
use httparse::{Error, Status};
use tracing::trace;

use crate::buf::RingBuf;
use crate::codec::Decoder;
use crate::ensure;
use crate::limits::Limits;
use crate::protocol::url;
use crate::protocol::{ContentKind, ParseError, PayloadSize, RequestHeader};
use bytes::Buf;

/// Decoder for the request line and header block.
#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    max_header_bytes: usize,
    max_headers: usize,
    max_url: usize,
    max_post_body: u64,
    max_put_body: u64,
}

impl HeaderDecoder {
    pub fn new(limits: &Limits) -> Self {
        Self {
            max_header_bytes: limits.max_header_bytes,
            max_headers: limits.max_headers,
            max_url: limits.max_url,
            max_post_body: limits.max_post_body,
            max_put_body: limits.max_put_body,
        }
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(&Limits::default())
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut RingBuf) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let bytes = src.make_contiguous();
        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut req = httparse::Request::new(&mut headers);

        let parsed = req.parse(bytes).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            Error::Version => ParseError::InvalidVersion(None),
            e => ParseError::invalid_header(e),
        })?;

        let body_offset = match parsed {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                // a request line that has not ended yet is judged against the url limit
                if !bytes.contains(&b'\n') {
                    ensure!(bytes.len() <= self.max_url + 32, ParseError::uri_too_long(bytes.len(), self.max_url));
                }
                ensure!(bytes.len() <= self.max_header_bytes, ParseError::too_large_header(bytes.len(), self.max_header_bytes));
                return Ok(None);
            }
        };

        trace!(header_size = body_offset, "parsed request header");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

        let header = self.build(&req)?;
        let payload = self.payload_size(&header)?;

        src.advance(body_offset);
        Ok(Some((header, payload)))
    }
}

impl HeaderDecoder {
    fn build(&self, req: &httparse::Request<'_, '_>) -> Result<RequestHeader, ParseError> {
        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;

        let url = req.path.ok_or(ParseError::InvalidUri)?;
        ensure!(!url.is_empty(), ParseError::InvalidUri);
        ensure!(url.len() <= self.max_url, ParseError::uri_too_long(url.len(), self.max_url));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };

        let target = url::parse_target(url)?;
        let mut header = RequestHeader::new(method, url.to_owned(), target, version);

        header.headers.reserve(req.headers.len());
        for h in req.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_bytes(h.value).map_err(ParseError::invalid_header)?;
            header.headers.append(name, value);
        }

        extract_fields(&mut header)?;
        Ok(header)
    }

    /// Chooses the body framing; `Transfer-Encoding` and `Content-Length` together are rejected.
    fn payload_size(&self, header: &RequestHeader) -> Result<PayloadSize, ParseError> {
        let max = if header.method == Method::PUT { self.max_put_body } else { self.max_post_body };
        match (header.chunked, header.content_length) {
            (true, Some(_)) => {
                Err(ParseError::invalid_header("transfer-encoding and content-length both present in headers"))
            }
            (true, None) => Ok(PayloadSize::Chunked),
            (false, Some(length)) => {
                ensure!(length <= max, ParseError::too_large_body(length, max));
                Ok(if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) })
            }
            (false, None) => Ok(PayloadSize::Empty),
        }
    }
}

fn header_str(header: &RequestHeader, name: HeaderName) -> Option<String> {
    header.headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.trim().to_owned())
}

/// Fills the dedicated fields from the header map.
fn extract_fields(header: &mut RequestHeader) -> Result<(), ParseError> {
    header.user_agent = header_str(header, header::USER_AGENT);
    header.referrer = header_str(header, header::REFERER);
    header.if_modified_since = header_str(header, header::IF_MODIFIED_SINCE);

    if let Some(host) = header_str(header, header::HOST) {
        ensure!(url::valid_host(&host), ParseError::bad_host(host));
        header.host = Some(host);
    }

    if let Some(content_type) = header_str(header, header::CONTENT_TYPE) {
        header.content_kind = ContentKind::classify(&content_type);
        header.content_type = Some(content_type);
    }

    let cookies: Vec<&str> = header.headers.get_all(header::COOKIE).iter().filter_map(|v| v.to_str().ok()).collect();
    if !cookies.is_empty() {
        header.cookie = Some(cookies.join("; "));
    }

    if let Some(authorization) = header_str(header, header::AUTHORIZATION) {
        let (scheme, details) = authorization.split_once(' ').unwrap_or((&authorization, ""));
        header.auth_type = Some(scheme.to_ascii_lowercase());
        header.auth_details = Some(details.trim().to_owned());
    }

    for value in header.headers.get_all(header::CONNECTION) {
        let Ok(value) = value.to_str() else { continue };
        for token in value.split(',').map(str::trim) {
            if token.eq_ignore_ascii_case("keep-alive") {
                header.keep_alive = true;
            } else if token.eq_ignore_ascii_case("close") {
                header.keep_alive = false;
            }
        }
    }

    header.chunked = is_chunked(header.headers.get(header::TRANSFER_ENCODING));

    if let Some(value) = header.headers.get(header::CONTENT_LENGTH) {
        let value = value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
        let length = value
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseError::invalid_content_length(format!("value {value} is not u64")))?;
        header.content_length = Some(length);
    }
    Ok(())
}

/// Checks if the Transfer-Encoding header indicates chunked encoding.
///
/// According to RFC 7230, chunked must be the last encoding if present.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value {
        if let Some(bytes) = value.as_bytes().rsplit(|b| *b == b',').next() {
            return bytes.trim_ascii().eq_ignore_ascii_case(CHUNKED);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};
    use indoc::indoc;

    fn buffer(s: &str) -> RingBuf {
        let mut buf = RingBuf::unbounded(64);
        buf.put_slice(s.as_bytes());
        buf
    }

    fn decode(s: &str) -> Result<Option<(RequestHeader, PayloadSize)>, ParseError> {
        HeaderDecoder::default().decode(&mut buffer(s))
    }

    #[test]
    fn check_is_chunked() {
        {
            let headers = HeaderMap::new();
            assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)))
        }

        {
            let mut headers = HeaderMap::new();
            headers.insert("Transfer-Encoding", "gzip, chunked".parse().unwrap());
            assert!(is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
        }

        {
            let mut headers = HeaderMap::new();
            headers.insert("Transfer-Encoding", "chunked, gzip".parse().unwrap());
            assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
        }
    }

    #[test]
    fn test_leaves_body_in_buffer() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let mut bytes = buffer(str);
        let result = HeaderDecoder::default().decode(&mut bytes).unwrap();
        assert!(result.is_some());
        assert_eq!(bytes.take_vec(), b"123");
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /docs/../index.html?x=1 HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let (header, payload) = decode(str).unwrap().unwrap();
        assert!(payload.is_empty());
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.url, "/docs/../index.html?x=1");
        assert_eq!(header.path, "/index.html");
        assert_eq!(header.query, "x=1");
        assert_eq!(header.ext.as_deref(), Some("html"));
        assert_eq!(header.host.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(header.user_agent.as_deref(), Some("curl/7.79.1"));
        assert_eq!(header.headers().len(), 3);
        assert!(header.keep_alive);
    }

    #[test]
    fn test_partial_header() {
        let mut buf = buffer("GET /index.html HTTP/1.1\r\nHost: x\r\n");
        let mut decoder = HeaderDecoder::default();
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.put_slice(b"\r\n");
        assert!(decoder.decode(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_dedicated_fields() {
        let str = indoc! {r##"
        POST /form HTTP/1.0
        Host: device.local
        Connection: keep-alive
        Content-Type: application/x-www-form-urlencoded
        Content-Length: 13
        Cookie: a=1
        Cookie: b=2
        Authorization: Basic am9lOnNlY3JldA==
        Referer: http://device.local/login.html
        If-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT

        "##};

        let (header, payload) = decode(str).unwrap().unwrap();
        assert_eq!(payload, PayloadSize::Length(13));
        assert!(header.keep_alive);
        assert_eq!(header.content_kind, ContentKind::Form);
        assert_eq!(header.cookie.as_deref(), Some("a=1; b=2"));
        assert_eq!(header.auth_type.as_deref(), Some("basic"));
        assert_eq!(header.auth_details.as_deref(), Some("am9lOnNlY3JldA=="));
        assert_eq!(header.referrer.as_deref(), Some("http://device.local/login.html"));
        assert_eq!(header.if_modified_since.as_deref(), Some("Sun, 06 Nov 1994 08:49:37 GMT"));
    }

    #[test]
    fn test_http10_defaults_to_close() {
        let (header, _) = decode("GET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert!(!header.keep_alive);

        let (header, _) = decode("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap().unwrap();
        assert!(!header.keep_alive);
    }

    #[test]
    fn test_chunked_payload() {
        let (header, payload) = decode("PUT /f HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap().unwrap();
        assert!(header.chunked);
        assert_eq!(payload, PayloadSize::Chunked);

        let err = decode("PUT /f HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_content_length_limits() {
        let limits = Limits { max_post_body: 10, max_put_body: 100, ..Limits::default() };
        let mut decoder = HeaderDecoder::new(&limits);

        let err = decoder.decode(&mut buffer("POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\n")).unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let ok = decoder.decode(&mut buffer("PUT /f HTTP/1.1\r\nContent-Length: 11\r\n\r\n")).unwrap();
        assert_eq!(ok.unwrap().1, PayloadSize::Length(11));

        let err = decoder.decode(&mut buffer("POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n")).unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_too_many_headers() {
        let limits = Limits { max_headers: 2, ..Limits::default() };
        let err = HeaderDecoder::new(&limits)
            .decode(&mut buffer("GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n"))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_too_large_header() {
        let limits = Limits { max_header_bytes: 64, ..Limits::default() };
        let str = format!("GET / HTTP/1.1\r\nX-Long: {}\r\n", "a".repeat(80));
        let err = HeaderDecoder::new(&limits).decode(&mut buffer(&str)).unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_uri_too_long() {
        let limits = Limits { max_url: 16, ..Limits::default() };
        let mut decoder = HeaderDecoder::new(&limits);

        let complete = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(20));
        assert_eq!(decoder.decode(&mut buffer(&complete)).unwrap_err().status(), StatusCode::URI_TOO_LONG);

        let partial = format!("GET /{}", "a".repeat(100));
        assert_eq!(decoder.decode(&mut buffer(&partial)).unwrap_err().status(), StatusCode::URI_TOO_LONG);
    }

    #[test]
    fn test_bad_version() {
        let err = decode("GET / HTTP/2.0\r\n\r\n").unwrap_err();
        assert_eq!(err.status(), StatusCode::HTTP_VERSION_NOT_SUPPORTED);
    }

    #[test]
    fn test_bad_path_and_host() {
        assert_eq!(decode("GET /../etc/passwd HTTP/1.1\r\n\r\n").unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert_eq!(decode("GET /a%5Cb HTTP/1.1\r\n\r\n").unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert_eq!(decode("GET / HTTP/1.1\r\nHost: a/b\r\n\r\n").unwrap_err().status(), StatusCode::BAD_REQUEST);
    }
}
