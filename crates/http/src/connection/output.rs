use std::io;

use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{StatusCode, Version};
use tracing::{debug, error, info, warn};

use super::{Connection, Flags, State};
use crate::codec::{Encoder, HeaderEncoder, ResponseHead};
use crate::protocol::url::escape_html;
use crate::protocol::{ParseError, PayloadItem, PayloadSize, SendError};

impl Connection {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status used when headers are written implicitly.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Body bytes accepted for the current response.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn headers_written(&self) -> bool {
        self.flags.contains(Flags::HEADERS_WRITTEN)
    }

    pub fn is_finalized(&self) -> bool {
        self.flags.contains(Flags::FINALIZED)
    }

    /// Sets a response header, replacing earlier values. Invalid values are dropped.
    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.response_headers.insert(name, value);
            }
            Err(e) => warn!(conn = self.id, header = %name, cause = %e, "dropping invalid response header"),
        }
    }

    /// Adds a response header, keeping earlier values (e.g. several `Set-Cookie`).
    pub fn add_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.response_headers.append(name, value);
            }
            Err(e) => warn!(conn = self.id, header = %name, cause = %e, "dropping invalid response header"),
        }
    }

    pub fn response_header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.response_headers.get(name)
    }

    /// Writes the status line and headers. Later calls are no-ops.
    ///
    /// `length` is the body length when known. Without it, HTTP/1.1 responses are chunk framed
    /// and HTTP/1.0 responses are delimited by closing the connection.
    pub fn write_headers(&mut self, status: StatusCode, length: Option<u64>) -> Result<(), SendError> {
        if self.flags.contains(Flags::HEADERS_WRITTEN) {
            return Ok(());
        }
        self.status = status;

        let bodyless = status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED || status.is_informational();
        if bodyless {
            self.flags.insert(Flags::NO_BODY);
        }
        // answers to unparsable requests speak HTTP/1.1
        let http11 = self.flags.contains(Flags::HTTP11) || self.request.is_none();

        let payload = match length {
            _ if bodyless => PayloadSize::Empty,
            Some(length) if self.flags.contains(Flags::NO_BODY) => {
                self.response_headers.insert(header::CONTENT_LENGTH, length.into());
                PayloadSize::Empty
            }
            Some(length) => PayloadSize::Length(length),
            None if self.flags.contains(Flags::NO_BODY) => PayloadSize::Empty,
            None if http11 => {
                self.flags.insert(Flags::CHUNKED);
                PayloadSize::Chunked
            }
            None => {
                self.revoke_keep_alive();
                PayloadSize::Empty
            }
        };

        let mut head = ResponseHead::new(if http11 { Version::HTTP_11 } else { Version::HTTP_10 }, status);
        self.standard_headers(&mut head);
        head.headers.extend(self.response_headers.drain());

        HeaderEncoder.encode((head, payload), &mut self.tx)?;
        self.flags.insert(Flags::HEADERS_WRITTEN);
        Ok(())
    }

    fn standard_headers(&self, head: &mut ResponseHead) {
        let response = &self.config.response;
        let headers = &mut head.headers;

        if let Ok(value) = HeaderValue::from_str(&response.server_name) {
            headers.insert(header::SERVER, value);
        }
        let mut date = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut date);
        if let Ok(value) = HeaderValue::from_bytes(&date[..]) {
            headers.insert(header::DATE, value);
        }
        if let Some(value) = response.x_frame_options.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::X_FRAME_OPTIONS, value);
        }

        let cacheable = self.status == StatusCode::OK
            && self.request.as_ref().and_then(|r| r.ext.as_deref()).is_some_and(|ext| response.client_cache.iter().any(|c| c == ext));
        if cacheable {
            let value = format!("public, max-age={}", response.client_cache_lifespan.as_secs());
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::CACHE_CONTROL, value);
            }
        }

        let connection = if self.is_keep_alive() { "keep-alive" } else { "close" };
        headers.insert(header::CONNECTION, HeaderValue::from_static(connection));
    }

    /// Queues response body bytes, writing default headers first if needed.
    ///
    /// Returns the number of bytes accepted, which is short when the transmit buffer is at its
    /// maximum size. Bodies of bodyless responses are discarded.
    pub fn write_block(&mut self, data: &[u8]) -> Result<usize, SendError> {
        if self.flags.contains(Flags::FINALIZED) {
            return Err(SendError::Finalized);
        }
        if !self.flags.contains(Flags::HEADERS_WRITTEN) {
            self.write_headers(self.status, None)?;
        }
        if self.flags.contains(Flags::NO_BODY) {
            return Ok(data.len());
        }

        let taken = if self.flags.contains(Flags::CHUNKED) { self.stage_chunks(data)? } else { self.tx.put_slice(data) };
        self.written += taken as u64;
        Ok(taken)
    }

    fn stage_chunks(&mut self, data: &[u8]) -> Result<usize, SendError> {
        let chunk_size = self.config.limits.chunk_size;
        let mut taken = 0;
        while taken < data.len() {
            if self.chunk.len() >= chunk_size && !self.emit_chunk()? {
                break;
            }
            let n = (chunk_size - self.chunk.len()).min(data.len() - taken);
            self.chunk.put_slice(&data[taken..taken + n]);
            taken += n;
        }
        Ok(taken)
    }

    /// Moves the staged bytes into the transmit buffer as one chunk. Returns false when the
    /// transmit buffer cannot take it yet.
    fn emit_chunk(&mut self) -> Result<bool, SendError> {
        if self.chunk.is_empty() {
            return Ok(true);
        }
        if !self.tx.reserve(self.chunk.len() + 20) {
            return Ok(false);
        }
        let staged = Bytes::from(self.chunk.take_vec());
        self.chunk_encoder.encode(PayloadItem::Chunk(staged), &mut self.tx)?;
        Ok(true)
    }

    /// Emits the bytes staged for chunk framing, so a response streamed in pieces smaller than
    /// the chunk size reaches the peer before it is done.
    pub(super) fn flush_staged(&mut self) -> io::Result<()> {
        if self.flags.contains(Flags::CHUNKED) && !self.flags.contains(Flags::FINALIZED) {
            self.emit_chunk().map_err(io::Error::other)?;
        }
        Ok(())
    }

    /// Finalizes the response: writes missing headers, the last chunk and the terminal chunk,
    /// and logs the access record. The connection completes once the output drains.
    /// Later calls are no-ops.
    pub fn done(&mut self) {
        if self.flags.contains(Flags::FINALIZED) {
            return;
        }
        if !self.flags.contains(Flags::HEADERS_WRITTEN) {
            if let Err(e) = self.write_headers(self.status, Some(0)) {
                error!(conn = self.id, cause = %e, "cannot write response headers");
                self.flags.insert(Flags::CLOSING);
            }
        }
        if self.flags.contains(Flags::CHUNKED) {
            let terminated = match self.emit_chunk() {
                Ok(true) => self.chunk_encoder.encode(PayloadItem::<Bytes>::Eof, &mut self.tx),
                Ok(false) => Err(SendError::BufferFull { pending: self.chunk.len() }),
                Err(e) => Err(e),
            };
            if let Err(e) = terminated {
                error!(conn = self.id, cause = %e, "cannot terminate chunked response");
                self.revoke_keep_alive();
                self.flags.insert(Flags::CLOSING);
            }
        }
        self.flags.insert(Flags::FINALIZED);
        self.writer = None;
        if self.state < State::Running {
            self.state = State::Running;
        }

        info!(
            target: "ember::access",
            peer = %self.peer,
            method = self.request.as_ref().map_or("-", |r| r.method.as_str()),
            url = self.request.as_ref().map_or("-", |r| r.url.as_str()),
            status = self.status.as_u16(),
            written = self.written,
            "request completed"
        );
    }

    /// Sends a complete response with a known body.
    pub fn response(&mut self, status: StatusCode, body: &[u8]) {
        if let Err(e) = self.write_headers(status, Some(body.len() as u64)) {
            error!(conn = self.id, cause = %e, "cannot write response headers");
            self.flags.insert(Flags::CLOSING);
        } else if !body.is_empty() {
            match self.write_block(body) {
                Ok(n) if n < body.len() => {
                    error!(conn = self.id, size = body.len(), "response body exceeds the output buffer");
                    self.revoke_keep_alive();
                    self.flags.insert(Flags::CLOSING);
                }
                Ok(_) => {}
                Err(e) => error!(conn = self.id, cause = %e, "cannot write response body"),
            }
        }
        self.done();
    }

    /// Sends a minimal HTML error page.
    ///
    /// Once headers have been sent the error can only be logged.
    pub fn error(&mut self, status: StatusCode, message: &str) {
        if self.flags.contains(Flags::HEADERS_WRITTEN) {
            warn!(conn = self.id, status = status.as_u16(), message, "error after the response started");
            return;
        }
        if status.is_server_error() {
            error!(conn = self.id, status = status.as_u16(), url = self.url_for_log(), message, "request failed");
        } else {
            debug!(conn = self.id, status = status.as_u16(), url = self.url_for_log(), message, "request rejected");
        }

        let reason = status.canonical_reason().unwrap_or("Error");
        let body = format!(
            "<html><head><title>{code} {reason}</title></head>\r\n<body><h2>{code} {reason}</h2>\r\n<p>{message}</p></body></html>\r\n",
            code = status.as_u16(),
            message = escape_html(message),
        );
        self.set_header(header::CONTENT_TYPE, "text/html");
        self.set_header(header::CACHE_CONTROL, "no-cache");
        self.response(status, body.as_bytes());
    }

    /// Answers a malformed or oversized request and closes the connection after the response.
    pub fn protocol_error(&mut self, e: &ParseError) {
        warn!(conn = self.id, peer = %self.peer, cause = %e, "protocol error");
        self.revoke_keep_alive();
        self.payload = None;
        self.flags.insert(Flags::CLOSING);
        if self.flags.contains(Flags::HEADERS_WRITTEN) {
            self.done();
        } else {
            self.error(e.status(), &e.to_string());
        }
        self.state = State::Running;
    }

    /// Redirects with 302 to `uri`, made absolute from the request scheme and host.
    pub fn redirect(&mut self, uri: &str) {
        self.redirect_with(StatusCode::FOUND, uri);
    }

    pub fn redirect_with(&mut self, status: StatusCode, uri: &str) {
        let location = self.absolute_url(uri);
        let body = format!(
            "<html><head></head><body>\r\nThis document has moved to a new <a href=\"{0}\">location</a>.\r\nPlease update your documents to reflect the new location.\r\n</body></html>\r\n",
            escape_html(&location)
        );
        self.set_header(header::LOCATION, &location);
        self.set_header(header::CONTENT_TYPE, "text/html");
        self.response(status, body.as_bytes());
    }

    /// Absolute form of `uri`. A bare `https://` or `http://` switches the scheme of the current
    /// request URL.
    pub fn absolute_url(&self, uri: &str) -> String {
        let host = self.request.as_ref().and_then(|r| r.host.clone()).unwrap_or_else(|| self.local.to_string());
        let current = self.request.as_ref().map_or("/", |r| r.url.as_str());
        match uri {
            "https://" | "http://" => format!("{uri}{host}{current}"),
            uri if uri.starts_with("http://") || uri.starts_with("https://") => uri.to_owned(),
            uri if uri.starts_with('/') => format!("{}://{host}{uri}", self.scheme()),
            uri => format!("{}://{host}/{uri}", self.scheme()),
        }
    }

    fn url_for_log(&self) -> &str {
        self.request.as_ref().map_or("-", |r| r.url.as_str())
    }
}
