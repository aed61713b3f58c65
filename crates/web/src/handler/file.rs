//! Static documents.
//!
//! GET, HEAD and POST read a document, PUT writes one and DELETE removes it. Documents up to
//! the output chunk size are answered in one go; larger ones are streamed by a
//! [`BackgroundWriter`] while the connection is RUNNING, so a big file never sits in memory.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ember_http::connection::Connection;
use ember_http::handler::{BackgroundWriter, ContentConsumer};
use http::{Method, StatusCode, header};
use tracing::{debug, error, trace, warn};

use super::RequestHandler;
use crate::request::RequestContext;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileHandler;

impl RequestHandler for FileHandler {
    fn prepare(&self, ctx: &mut RequestContext<'_>) -> bool {
        let has_body = ctx.conn().request().is_some_and(|r| r.method == Method::PUT && r.has_body());
        if !has_body {
            return true;
        }
        let target = ctx.filename();
        let temp = temp_path(&target, ctx.conn().id());
        match File::create(&temp) {
            Ok(file) => {
                trace!(conn = ctx.conn().id(), temp = %temp.display(), "receiving put body");
                ctx.conn_mut().set_consumer(Box::new(PutConsumer { file: Some(file), temp, complete: false }));
                true
            }
            Err(e) => {
                warn!(conn = ctx.conn().id(), path = %temp.display(), cause = %e, "cannot create put file");
                let status = if e.kind() == ErrorKind::NotFound { StatusCode::NOT_FOUND } else { StatusCode::INTERNAL_SERVER_ERROR };
                ctx.error(status, "Cannot create document");
                false
            }
        }
    }

    fn service(&self, ctx: &mut RequestContext<'_>) -> bool {
        let method = ctx.conn().method().cloned().unwrap_or_default();
        match method {
            Method::GET | Method::HEAD | Method::POST => serve(ctx),
            Method::PUT => put(ctx),
            Method::DELETE => delete(ctx),
            _ => ctx.error(StatusCode::METHOD_NOT_ALLOWED, "Unsupported method"),
        }
        true
    }
}

fn serve(ctx: &mut RequestContext<'_>) {
    let path = ctx.filename();
    let meta = match fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) => {
            debug!(conn = ctx.conn().id(), path = %path.display(), cause = %e, "cannot open document");
            let message = format!("Cannot open document for: {}", ctx.path());
            ctx.error(StatusCode::NOT_FOUND, &message);
            return;
        }
    };

    if meta.is_dir() {
        let index = format!("{}/{}", ctx.path().trim_end_matches('/'), ctx.config().index);
        ctx.redirect(&index);
        return;
    }

    let modified = meta.modified().ok();
    let conn = ctx.conn_mut();
    if let Some(modified) = modified {
        conn.set_header(header::LAST_MODIFIED, &httpdate::fmt_http_date(modified));
        if not_modified(conn, modified) {
            trace!(conn = conn.id(), "document not modified");
            if let Err(e) = conn.write_headers(StatusCode::NOT_MODIFIED, None) {
                error!(conn = conn.id(), cause = %e, "cannot write response headers");
            }
            conn.done();
            return;
        }
    }
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    conn.set_header(header::CONTENT_TYPE, mime.as_ref());

    let size = meta.len();
    if conn.request().is_some_and(|r| r.is_head()) {
        if let Err(e) = conn.write_headers(StatusCode::OK, Some(size)) {
            error!(conn = conn.id(), cause = %e, "cannot write response headers");
        }
        conn.done();
        return;
    }

    let chunk_size = conn.config().limits.chunk_size;
    if size <= chunk_size as u64 {
        match fs::read(&path) {
            Ok(body) => conn.response(StatusCode::OK, &body),
            Err(e) => {
                error!(conn = conn.id(), path = %path.display(), cause = %e, "cannot read document");
                conn.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot read document");
            }
        }
        return;
    }

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            error!(conn = conn.id(), path = %path.display(), cause = %e, "cannot open document");
            conn.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot open document");
            return;
        }
    };
    if let Err(e) = conn.write_headers(StatusCode::OK, Some(size)) {
        error!(conn = conn.id(), cause = %e, "cannot write response headers");
        conn.done();
        return;
    }
    trace!(conn = conn.id(), size, "streaming document");
    conn.set_writer(Box::new(FileWriter { file, remaining: size, buf: vec![0; chunk_size], pos: 0, filled: 0 }));
}

/// Whether `If-Modified-Since` is not older than the document, compared in whole seconds.
fn not_modified(conn: &Connection, modified: SystemTime) -> bool {
    let Some(since) = conn.request().and_then(|r| r.if_modified_since.as_deref()) else {
        return false;
    };
    let Ok(since) = httpdate::parse_http_date(since) else {
        return false;
    };
    let seconds = |t: SystemTime| t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    seconds(modified) <= seconds(since)
}

fn put(ctx: &mut RequestContext<'_>) {
    let target = ctx.filename();
    let existed = target.exists();
    let has_body = ctx.conn().request().is_some_and(|r| r.has_body());

    let result = if has_body {
        let temp = temp_path(&target, ctx.conn().id());
        fs::rename(&temp, &target).inspect_err(|_| {
            let _ = fs::remove_file(&temp);
        })
    } else {
        File::create(&target).map(drop)
    };

    match result {
        Ok(()) => {
            let status = if existed { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
            debug!(conn = ctx.conn().id(), path = %target.display(), status = status.as_u16(), "document stored");
            ctx.conn_mut().response(status, b"");
        }
        Err(e) => {
            error!(conn = ctx.conn().id(), path = %target.display(), cause = %e, "cannot store document");
            ctx.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot store document");
        }
    }
}

fn delete(ctx: &mut RequestContext<'_>) {
    let target = ctx.filename();
    match fs::remove_file(&target) {
        Ok(()) => ctx.conn_mut().response(StatusCode::NO_CONTENT, b""),
        Err(e) if e.kind() == ErrorKind::NotFound => ctx.error(StatusCode::NOT_FOUND, "Cannot delete the URI"),
        Err(e) => {
            error!(conn = ctx.conn().id(), path = %target.display(), cause = %e, "cannot delete document");
            ctx.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot delete the URI");
        }
    }
}

fn temp_path(target: &Path, conn: u64) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(format!(".tmp-{conn}"));
    PathBuf::from(name)
}

/// Writes a PUT body into a temporary file next to the target. The file is removed unless the
/// whole body arrived.
struct PutConsumer {
    file: Option<File>,
    temp: PathBuf,
    complete: bool,
}

impl ContentConsumer for PutConsumer {
    fn process_data(&mut self, conn: &mut Connection) -> bool {
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        let data = conn.input_mut().take_vec();
        if let Err(e) = file.write_all(&data) {
            error!(conn = conn.id(), path = %self.temp.display(), cause = %e, "cannot write put body");
            return false;
        }
        if conn.content_done() {
            self.complete = true;
            if let Some(file) = self.file.take() {
                if let Err(e) = file.sync_all() {
                    error!(conn = conn.id(), cause = %e, "cannot flush put body");
                    self.complete = false;
                    return false;
                }
            }
        }
        true
    }
}

impl Drop for PutConsumer {
    fn drop(&mut self) {
        if !self.complete {
            self.file = None;
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Streams a document in RUNNING state.
struct FileWriter {
    file: File,
    remaining: u64,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl BackgroundWriter for FileWriter {
    fn write_event(&mut self, conn: &mut Connection) -> io::Result<bool> {
        loop {
            if self.pos == self.filled {
                if self.remaining == 0 {
                    return Ok(false);
                }
                let want = self.buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
                let n = self.file.read(&mut self.buf[..want])?;
                if n == 0 {
                    return Err(ErrorKind::UnexpectedEof.into());
                }
                self.remaining -= n as u64;
                self.pos = 0;
                self.filled = n;
            }
            let n = conn.write_block(&self.buf[self.pos..self.filled]).map_err(io::Error::other)?;
            if n == 0 {
                return Ok(true);
            }
            self.pos += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::Fixture;
    use crate::route::{Route, filter};
    use crate::testing::{connection, flush};
    use std::time::Duration;

    fn fixture(dir: &Path) -> Fixture {
        let route = Route::builder("/")
            .dir(dir)
            .methods(filter::methods([Method::GET, Method::HEAD, Method::PUT, Method::DELETE, Method::PATCH]))
            .build()
            .unwrap();
        Fixture::new(route)
    }

    fn serve_request(fixture: &mut Fixture, raw: &str) -> String {
        let mut conn = connection(raw);
        assert!(FileHandler.service(&mut fixture.context(&mut conn)));
        let out = flush(&mut conn);
        assert!(conn.is_finalized());
        out
    }

    #[test]
    fn test_get_small_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        let mut fixture = fixture(dir.path());

        let out = serve_request(&mut fixture, "GET /index.html HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("content-length: 11\r\n"));
        assert!(out.contains("content-type: text/html\r\n"));
        assert!(out.contains("last-modified: "));
        assert!(out.ends_with("\r\n\r\n<h1>hi</h1>"));
    }

    #[test]
    fn test_head_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "abc").unwrap();
        let mut fixture = fixture(dir.path());

        let out = serve_request(&mut fixture, "HEAD /a.txt HTTP/1.1\r\n\r\n");
        assert!(out.contains("content-length: 3\r\n"));
        assert!(out.ends_with("\r\n\r\n"));

        let out = serve_request(&mut fixture, "GET /missing.txt HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_directory_redirects_to_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        let mut fixture = fixture(dir.path());

        let out = serve_request(&mut fixture, "GET /docs/ HTTP/1.1\r\nHost: device\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(out.contains("location: http://device/docs/index.html\r\n"));
    }

    #[test]
    fn test_conditional_get() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "abc").unwrap();
        let mut fixture = fixture(dir.path());

        let later = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(60));
        let out = serve_request(&mut fixture, &format!("GET /a.txt HTTP/1.1\r\nIf-Modified-Since: {later}\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(!out.contains("abc"));

        let earlier = httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(1_000_000));
        let out = serve_request(&mut fixture, &format!("GET /a.txt HTTP/1.1\r\nIf-Modified-Since: {earlier}\r\n\r\n"));
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn test_large_file_streams() {
        let dir = tempfile::tempdir().unwrap();
        let body: Vec<u8> = (0..40_000u32).map(|i| b'a' + (i % 26) as u8).collect();
        fs::write(dir.path().join("big.bin"), &body).unwrap();
        let mut fixture = fixture(dir.path());

        let mut conn = connection("GET /big.bin HTTP/1.1\r\n\r\n");
        assert!(FileHandler.service(&mut fixture.context(&mut conn)));
        assert!(conn.has_writer());
        assert!(!conn.is_finalized());

        let out = flush(&mut conn);
        assert!(conn.is_finalized());
        assert!(out.contains("content-type: application/octet-stream\r\n"));
        assert!(out.contains("content-length: 40000\r\n"));
        let (_, received) = out.split_once("\r\n\r\n").unwrap();
        assert_eq!(received.as_bytes(), &body[..]);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gone.txt"), "x").unwrap();
        let mut fixture = fixture(dir.path());

        let out = serve_request(&mut fixture, "DELETE /gone.txt HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!dir.path().join("gone.txt").exists());

        let out = serve_request(&mut fixture, "DELETE /gone.txt HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_empty_put_and_unsupported_method() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = fixture(dir.path());

        let out = serve_request(&mut fixture, "PUT /new.txt HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 201 Created\r\n"));
        assert_eq!(fs::read(dir.path().join("new.txt")).unwrap(), b"");

        let out = serve_request(&mut fixture, "PUT /new.txt HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"));

        let out = serve_request(&mut fixture, "PATCH /new.txt HTTP/1.1\r\n\r\n");
        assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(temp_path(Path::new("/srv/a.txt"), 7), PathBuf::from("/srv/a.txt.tmp-7"));
    }
}
