use http::{Method, StatusCode, Version, header};
use std::time::Instant;
use tracing::{debug, trace, warn};

use super::{Connection, Flags, MAX_REROUTES, State};
use crate::codec::{Decoder, PayloadDecoder};
use crate::handler::Dispatcher;
use crate::protocol::url::parse_query;
use crate::protocol::{ContentKind, ParseError, PayloadItem, PayloadSize, RequestHeader};

impl Connection {
    /// Runs state steps until one needs more I/O or the request reaches RUNNING.
    ///
    /// Calling it again without new input or output is a no-op.
    pub fn advance(&mut self, dispatcher: &mut dyn Dispatcher) {
        loop {
            let progressed = match self.state {
                State::Begin => self.parse_header(dispatcher),
                State::Content => self.parse_content(),
                State::Ready => self.dispatch(dispatcher),
                State::Running | State::Complete => false,
            };
            if !progressed {
                break;
            }
        }
    }

    fn parse_header(&mut self, dispatcher: &mut dyn Dispatcher) -> bool {
        if self.flags.contains(Flags::CLOSING) {
            return false;
        }
        match self.header_decoder.decode(&mut self.rx) {
            Ok(Some((header, payload))) => {
                self.begin_request(header, payload);
                self.route_early(dispatcher);
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.protocol_error(&e);
                false
            }
        }
    }

    fn begin_request(&mut self, header: RequestHeader, payload: PayloadSize) {
        self.requests += 1;
        self.started = Instant::now();

        let max_requests = self.config.limits.max_keep_alive_requests;
        self.flags.set(Flags::HTTP11, header.version == Version::HTTP_11);
        self.flags.set(Flags::KEEP_ALIVE, header.keep_alive && self.requests < max_requests);
        self.flags.set(Flags::NO_BODY, header.is_head());

        for name in header.headers.keys() {
            let var = format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"));
            let separator = if name == header::COOKIE { "; " } else { ", " };
            let value = header
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(separator);
            self.vars.set(var, value);
        }

        let vars = &mut self.vars;
        vars.set("REQUEST_METHOD", header.method.as_str());
        vars.set("REQUEST_URI", header.url.as_str());
        vars.set("PATH_INFO", header.path.as_str());
        vars.set("QUERY_STRING", header.query.as_str());
        vars.set("SERVER_PROTOCOL", header.protocol());
        vars.set("REQUEST_TRANSPORT", if self.flags.contains(Flags::SECURE) { "https" } else { "http" });
        vars.set("REMOTE_ADDR", self.peer.ip().to_string());
        vars.set("SERVER_ADDR", self.local.ip().to_string());
        vars.set("SERVER_PORT", i64::from(self.local.port()));
        if let Some(content_type) = &header.content_type {
            vars.set("CONTENT_TYPE", content_type.as_str());
        }
        if let Some(length) = header.content_length {
            vars.set("CONTENT_LENGTH", length.to_string());
        }

        debug!(
            conn = self.id,
            method = %header.method,
            url = %header.url,
            version = ?header.version,
            keep_alive = self.flags.contains(Flags::KEEP_ALIVE),
            "request header received"
        );

        self.payload = (!payload.is_empty()).then(|| PayloadDecoder::from(payload));
        self.request = Some(header);
    }

    /// Resolves the route before the body is read. A route that answered by itself (404, 401,
    /// login redirect) leaves any body unread, so the connection is not reused.
    fn route_early(&mut self, dispatcher: &mut dyn Dispatcher) {
        if !dispatcher.route(self) {
            if self.payload.is_some() {
                self.revoke_keep_alive();
            }
            self.state = State::Running;
            return;
        }

        if self.payload.is_none() {
            self.flags.insert(Flags::CONTENT_DONE);
            self.state = State::Ready;
            return;
        }

        let expects_continue = self
            .request
            .as_ref()
            .and_then(|r| r.headers.get(header::EXPECT))
            .is_some_and(|v| v.as_bytes().len() >= 4 && v.as_bytes()[..4].eq_ignore_ascii_case(b"100-"));
        if expects_continue && self.flags.contains(Flags::HTTP11) {
            self.tx.put_slice(b"HTTP/1.1 100 Continue\r\n\r\n");
            trace!(conn = self.id, "sent continue response");
        }
        self.state = State::Content;
    }

    fn parse_content(&mut self) -> bool {
        let Some(mut decoder) = self.payload.take() else {
            self.flags.insert(Flags::CONTENT_DONE);
            self.state = State::Ready;
            return true;
        };

        let limits = &self.config.limits;
        let max = if self.method() == Some(&Method::PUT) { limits.max_put_body } else { limits.max_post_body };

        let mut received = false;
        loop {
            match decoder.decode(&mut self.rx) {
                Ok(Some(PayloadItem::Chunk(bytes))) => {
                    self.body_received += bytes.len() as u64;
                    if self.body_received > max {
                        self.protocol_error(&ParseError::too_large_body(self.body_received, max));
                        return false;
                    }
                    self.input.put_slice(&bytes);
                    received = true;
                }
                Ok(Some(PayloadItem::Eof)) => {
                    self.flags.insert(Flags::CONTENT_DONE);
                    break;
                }
                Ok(None) => {
                    self.payload = Some(decoder);
                    break;
                }
                Err(e) => {
                    self.protocol_error(&e);
                    return false;
                }
            }
        }

        let done = self.flags.contains(Flags::CONTENT_DONE);
        if (received || done) && !self.feed_consumer() {
            return true;
        }

        if done {
            trace!(conn = self.id, size = self.body_received, "request body complete");
            self.state = State::Ready;
        }
        done
    }

    /// Hands new body bytes to the installed consumer. Returns false when it rejected the
    /// request.
    fn feed_consumer(&mut self) -> bool {
        let Some(mut consumer) = self.consumer.take() else {
            return true;
        };
        let proceed = consumer.process_data(self);
        self.consumer = Some(consumer);
        if !proceed {
            debug!(conn = self.id, "content consumer rejected the request");
            self.payload = None;
            self.revoke_keep_alive();
            if !self.flags.contains(Flags::HEADERS_WRITTEN) {
                self.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot process request body");
            }
            self.state = State::Running;
        }
        proceed
    }

    fn dispatch(&mut self, dispatcher: &mut dyn Dispatcher) -> bool {
        self.state = State::Running;
        self.consumer = None;
        loop {
            if self.flags.contains(Flags::REROUTE) {
                self.flags.remove(Flags::REROUTE);
                self.route = None;
                self.route_start = 0;
            }
            if self.route.is_none() && !dispatcher.route(self) {
                return true;
            }
            self.decode_vars();
            if dispatcher.run(self) {
                return true;
            }
            if self.flags.contains(Flags::HEADERS_WRITTEN) {
                // a handler that started a response cannot hand the request on
                return true;
            }

            self.route_start = self.route.map_or(0, |route| route + 1);
            self.route = None;
            self.reroutes += 1;
            trace!(conn = self.id, next = self.route_start, reroutes = self.reroutes, "handler declined");
            if self.reroutes > MAX_REROUTES {
                warn!(conn = self.id, path = self.path(), "too many re-routes");
                self.error(StatusCode::NOT_FOUND, "Cannot find document: route loop");
                return true;
            }
        }
    }

    /// Adds query and url-encoded form variables, once per request.
    fn decode_vars(&mut self) {
        if self.flags.contains(Flags::VARS_DECODED) {
            return;
        }
        self.flags.insert(Flags::VARS_DECODED);
        let Some(request) = self.request.as_ref() else { return };

        let mut pairs = parse_query(&request.query);
        // an untyped POST body is treated as a form
        let form = match request.content_kind {
            ContentKind::Form => true,
            ContentKind::None => request.method == Method::POST,
            _ => false,
        };
        if form && !self.input.is_empty() {
            let (a, b) = self.input.as_slices();
            let mut body = Vec::with_capacity(a.len() + b.len());
            body.extend_from_slice(a);
            body.extend_from_slice(b);
            pairs.extend(parse_query(&String::from_utf8_lossy(&body)));
        }
        for (name, value) in pairs {
            self.vars.set(name, value);
        }
    }
}
