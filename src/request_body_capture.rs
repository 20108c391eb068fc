//! Request body capture for the access-log middleware
//!
//! The request payload is wrapped, not buffered: each chunk the handler pulls
//! is mirrored into a bounded buffer and handed on unchanged. Only text-based
//! content types are captured to avoid binary bloat.

use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::http::header::HeaderMap;
use actix_web::web::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

use crate::buffer::PooledBuffer;
use crate::utils::is_capturable;

/// What has been seen of one request body
#[derive(Debug)]
pub struct RequestCapture {
    buffer: PooledBuffer,
    enabled: bool,
}

impl RequestCapture {
    /// Capture is on only if it was requested and the declared content type
    /// is on the allow-list. Decided once, here.
    pub fn new(buffer: PooledBuffer, requested: bool, headers: &HeaderMap) -> Self {
        Self {
            buffer,
            enabled: requested && is_capturable(headers),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Copy `chunk` into the buffer if capture is on
    pub fn mirror(&mut self, chunk: &[u8]) {
        if self.enabled {
            self.buffer.write(chunk);
        }
    }

    pub fn body(&self) -> &[u8] {
        self.buffer.captured_bytes()
    }

    /// Body bytes that went through the mirror, kept or not
    pub fn observed(&self) -> u64 {
        self.buffer.total_bytes_seen()
    }
}

/// Shared between the payload wrapper (owned by the handler) and the log line
pub type SharedRequestCapture = Rc<RefCell<RequestCapture>>;

pin_project! {
    /// Payload stream that mirrors every chunk into a [`RequestCapture`]
    pub struct CapturingPayload<S> {
        #[pin]
        inner: S,
        capture: SharedRequestCapture,
    }
}

impl<S> CapturingPayload<S> {
    pub fn new(inner: S, capture: SharedRequestCapture) -> Self {
        Self { inner, capture }
    }
}

impl<S, E> Stream for CapturingPayload<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = this.inner.poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            this.capture.borrow_mut().mirror(chunk);
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
