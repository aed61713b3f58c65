//! Status line and response header serialization.
//!
//! The body framing header is derived from the [`PayloadSize`] handed in with the head, so the
//! connection decides framing exactly once and the encoder cannot disagree with it.

use crate::buf::RingBuf;
use crate::codec::Encoder;
use crate::protocol::{PayloadSize, SendError};

use http::{HeaderMap, HeaderValue, StatusCode, Version, header};
use std::io::Write;

/// Status line fields plus headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(version: Version, status: StatusCode) -> Self {
        Self { version, status, headers: HeaderMap::new() }
    }

    fn protocol(&self) -> &'static str {
        match self.version {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        }
    }

    /// Serialized size, used to reserve the output buffer up front.
    fn encoded_len(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(name, value)| name.as_str().len() + value.len() + 4).sum();
        // status line, a framing header and the closing CRLF
        64 + headers + 40
    }
}

/// Encoder for the response head.
///
/// `Length(n)` sets `Content-Length: n`, `Chunked` sets `Transfer-Encoding: chunked` and
/// `Empty` adds neither, which leaves a close-delimited or bodyless response as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut RingBuf) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        match payload_size {
            PayloadSize::Length(n) => {
                head.headers.remove(header::TRANSFER_ENCODING);
                head.headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");
                head.headers.remove(header::CONTENT_LENGTH);
                head.headers.insert(header::TRANSFER_ENCODING, CHUNKED);
            }
            PayloadSize::Empty => {}
        }

        let needed = head.encoded_len();
        if !dst.reserve(needed) {
            return Err(SendError::BufferFull { pending: needed });
        }

        write!(
            dst,
            "{} {} {}\r\n",
            head.protocol(),
            head.status.as_str(),
            head.status.canonical_reason().unwrap_or("Unknown")
        )?;

        for (name, value) in &head.headers {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(head: ResponseHead, size: PayloadSize) -> String {
        let mut dst = RingBuf::unbounded(16);
        HeaderEncoder.encode((head, size), &mut dst).unwrap();
        String::from_utf8(dst.take_vec()).unwrap()
    }

    #[test]
    fn test_content_length() {
        let mut head = ResponseHead::new(Version::HTTP_11, StatusCode::OK);
        head.headers.insert(header::SERVER, HeaderValue::from_static("ember"));
        assert_eq!(encode(head, PayloadSize::Length(5)), "HTTP/1.1 200 OK\r\nserver: ember\r\ncontent-length: 5\r\n\r\n");
    }

    #[test]
    fn test_chunked_replaces_length() {
        let mut head = ResponseHead::new(Version::HTTP_11, StatusCode::NOT_FOUND);
        head.headers.insert(header::CONTENT_LENGTH, 10.into());
        assert_eq!(encode(head, PayloadSize::Chunked), "HTTP/1.1 404 Not Found\r\ntransfer-encoding: chunked\r\n\r\n");
    }

    #[test]
    fn test_empty_adds_no_framing() {
        let head = ResponseHead::new(Version::HTTP_10, StatusCode::NOT_MODIFIED);
        assert_eq!(encode(head, PayloadSize::Empty), "HTTP/1.0 304 Not Modified\r\n\r\n");
    }

    #[test]
    fn test_buffer_full() {
        let mut dst = RingBuf::with_limits(16, 32);
        let head = ResponseHead::new(Version::HTTP_11, StatusCode::OK);
        let err = HeaderEncoder.encode((head, PayloadSize::Length(1)), &mut dst).unwrap_err();
        assert!(matches!(err, SendError::BufferFull { .. }));
    }
}
