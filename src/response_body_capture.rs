//! Response body capture for the access-log middleware
//!
//! Tracks what the server writes back: status, headers, the total number of
//! body bytes, and a bounded prefix of the body. The body is never buffered
//! for the client; chunks are mirrored as they stream out.

use actix_web::http::header::HeaderMap;
use actix_web::http::StatusCode;

use crate::buffer::PooledBuffer;
use crate::utils::is_capturable;

/// What has been written for one response
#[derive(Debug)]
pub struct ResponseCapture {
    buffer: PooledBuffer,
    headers: HeaderMap,
    status: Option<StatusCode>,
    size: u64,
    enabled: bool,
    first_write: bool,
}

impl ResponseCapture {
    /// `requested` is an upper bound: the first write may still turn capture
    /// off if the content type is not eligible, but never on.
    pub fn new(buffer: PooledBuffer, requested: bool) -> Self {
        Self {
            buffer,
            headers: HeaderMap::new(),
            status: None,
            size: 0,
            enabled: requested,
            first_write: true,
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Record a chunk written to the client and return its full length
    ///
    /// Headers are final by the first write, so eligibility is settled there.
    pub fn write(&mut self, chunk: &[u8]) -> usize {
        if self.first_write {
            self.first_write = false;
            self.enabled = self.enabled && is_capturable(&self.headers);
        }

        if self.enabled {
            self.buffer.write(chunk);
        }
        self.size += chunk.len() as u64;
        chunk.len()
    }

    /// Status sent to the client, `200 OK` if none was ever set
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Every body byte written, captured or not
    pub fn written_size(&self) -> u64 {
        self.size
    }

    pub fn captured_body(&self) -> &[u8] {
        self.buffer.captured_bytes()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use actix_web::http::header::{HeaderValue, CONTENT_TYPE};

    fn json_capture(pool: &BufferPool, requested: bool) -> ResponseCapture {
        let mut capture = ResponseCapture::new(pool.acquire(), requested);
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        capture
    }

    #[test]
    fn test_status_defaults_to_ok() {
        let pool = BufferPool::new(16);
        let mut capture = ResponseCapture::new(pool.acquire(), true);
        assert_eq!(capture.status_code(), StatusCode::OK);

        capture.set_status(StatusCode::NOT_FOUND);
        assert_eq!(capture.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_captures_eligible_body() {
        let pool = BufferPool::new(64);
        let mut capture = json_capture(&pool, true);

        assert_eq!(capture.write(br#"{"name": "peter", "#), 18);
        capture.write(br#""age": 12}"#);
        assert!(capture.is_enabled());
        assert_eq!(capture.captured_body(), br#"{"name": "peter", "age": 12}"#);
        assert_eq!(capture.written_size(), 28);
    }

    #[test]
    fn test_size_counts_past_capacity() {
        let pool = BufferPool::new(4);
        let mut capture = json_capture(&pool, true);

        assert_eq!(capture.write(b"0123456789"), 10);
        capture.write(b"abc");
        assert_eq!(capture.captured_body(), b"0123");
        assert_eq!(capture.written_size(), 13);
    }

    #[test]
    fn test_first_write_narrows_eligibility() {
        let pool = BufferPool::new(64);
        let mut capture = ResponseCapture::new(pool.acquire(), true);
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));

        capture.write(b"\x89PNG");
        assert!(!capture.is_enabled());
        assert!(capture.captured_body().is_empty());
        assert_eq!(capture.written_size(), 4);
    }

    #[test]
    fn test_eligibility_never_widened() {
        let pool = BufferPool::new(64);
        let mut capture = json_capture(&pool, false);

        capture.write(b"{}");
        assert!(!capture.is_enabled());
        assert!(capture.captured_body().is_empty());
        assert_eq!(capture.written_size(), 2);
    }

    #[test]
    fn test_headers_set_before_first_write_count() {
        let pool = BufferPool::new(64);
        let mut capture = ResponseCapture::new(pool.acquire(), true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        capture.set_headers(headers);

        capture.write(b"hello\n");
        assert_eq!(capture.captured_body(), b"hello\n");
    }

    #[test]
    fn test_later_header_changes_ignored() {
        let pool = BufferPool::new(64);
        let mut capture = json_capture(&pool, true);

        capture.write(b"[1,");
        capture
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        capture.write(b"2]");
        assert_eq!(capture.captured_body(), b"[1,2]");
    }
}
