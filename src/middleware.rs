//! Actix-Web middleware implementation for the access log
//!
//! For every request the middleware:
//!
//! 1. takes two pooled buffers and records request metadata,
//! 2. swaps the request payload for a capturing stream (if eligible),
//! 3. calls the inner service,
//! 4. wraps the response body so chunks are mirrored as they stream out,
//! 5. formats the line once the body finishes (or is dropped) and hands it
//!    to the sink.
//!
//! Logging never fails a request: sink errors are reported through `tracing`
//! and the response goes out untouched.

use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use actix_web::body::{BodySize, MessageBody};
use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::web::Bytes;
use actix_web::{Error, HttpMessage};
use chrono::Utc;
use futures::future::{ok, LocalBoxFuture, Ready};
use pin_project_lite::pin_project;
use serde::Serialize;
use tracing::error;

use crate::buffer::{BufferPool, DEFAULT_CAPTURE_LIMIT};
use crate::config::Config;
use crate::error::AccessLogError;
use crate::file_sink::AsyncFileSink;
use crate::formatter::{format_line, RequestMeta};
use crate::logger::{LogSink, TracingSink};
use crate::request_body_capture::{CapturingPayload, RequestCapture, SharedRequestCapture};
use crate::response_body_capture::ResponseCapture;

/// Access-log middleware for Actix-Web
///
/// Add it to your app via `.wrap()`. Clones share the sink, the buffer pools
/// and the capture switches, so keep one around to flip capture at runtime or
/// to flush on shutdown:
///
/// ```rust,no_run
/// use actix_web::{web, App, HttpResponse, HttpServer};
/// use accesslog_actix::{AccessLog, Config};
///
/// #[actix_web::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let access_log = AccessLog::from_config(Config::with_filename("./access/app.log"))?;
///
///     let middleware = access_log.clone();
///     HttpServer::new(move || {
///         App::new()
///             .wrap(middleware.clone())
///             .route("/", web::get().to(|| async { HttpResponse::Ok().body("hi") }))
///     })
///     .bind("0.0.0.0:8080")?
///     .run()
///     .await?;
///
///     access_log.flush()?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct AccessLog {
    shared: Arc<Shared>,
}

struct Shared {
    sink: Arc<dyn LogSink>,
    request_body: AtomicBool,
    response_body: AtomicBool,
    pool: BufferPool,
}

/// Snapshot for health endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStat {
    /// Lines accepted by the sink but not yet written
    pub queue_depth: usize,
}

impl AccessLog {
    /// Log through `tracing` with request and response body capture on
    pub fn new() -> Self {
        Self::assemble(Arc::new(TracingSink), &Config::default())
    }

    /// Build from `config`, opening the log file if one is named
    pub fn from_config(config: Config) -> Result<Self, AccessLogError> {
        Self::builder().config(config).build()
    }

    /// Log into a custom sink with body capture on
    pub fn with_sink<S: LogSink + 'static>(sink: S) -> Self {
        Self::assemble(Arc::new(sink), &Config::default())
    }

    pub fn builder() -> AccessLogBuilder {
        AccessLogBuilder::default()
    }

    fn assemble(sink: Arc<dyn LogSink>, config: &Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                request_body: AtomicBool::new(config.request_body),
                response_body: AtomicBool::new(config.response_body),
                pool: BufferPool::new(config.body_capture_limit),
            }),
        }
    }

    /// Turn request body capture on or off for subsequent requests
    pub fn switch_request_body(&self, enabled: bool) {
        self.shared.request_body.store(enabled, Ordering::Relaxed);
    }

    /// Turn response body capture on or off for subsequent requests
    pub fn switch_response_body(&self, enabled: bool) {
        self.shared.response_body.store(enabled, Ordering::Relaxed);
    }

    pub fn captures_request_body(&self) -> bool {
        self.shared.request_body.load(Ordering::Relaxed)
    }

    pub fn captures_response_body(&self) -> bool {
        self.shared.response_body.load(Ordering::Relaxed)
    }

    /// Drain and close the sink. Call once the server has stopped.
    pub fn flush(&self) -> Result<(), AccessLogError> {
        self.shared.sink.close()
    }

    pub fn health(&self) -> HealthStat {
        HealthStat {
            queue_depth: self.shared.sink.queue_depth(),
        }
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`AccessLog`]
///
/// A sink set with [`sink`](Self::sink) wins over `config.filename`. Without
/// either, lines go to `tracing`.
#[derive(Default)]
pub struct AccessLogBuilder {
    config: Option<Config>,
    sink: Option<Arc<dyn LogSink>>,
}

impl AccessLogBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn sink<S: LogSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Fails only if the configured log file cannot be opened.
    pub fn build(self) -> Result<AccessLog, AccessLogError> {
        let config = self.config.unwrap_or_default();
        let sink: Arc<dyn LogSink> = match (self.sink, &config.filename) {
            (Some(sink), _) => sink,
            (None, Some(path)) => Arc::new(AsyncFileSink::with_max_file_size(
                path,
                config.max_file_size,
            )?),
            (None, None) => Arc::new(TracingSink),
        };

        let config = Config {
            body_capture_limit: if config.body_capture_limit == 0 {
                DEFAULT_CAPTURE_LIMIT
            } else {
                config.body_capture_limit
            },
            ..config
        };
        Ok(AccessLog::assemble(sink, &config))
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<CapturingBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AccessLogService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AccessLogService {
            service,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// The actual service that handles each request
pub struct AccessLogService<S> {
    service: S,
    shared: Arc<Shared>,
}

impl<S, B> Service<ServiceRequest> for AccessLogService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<CapturingBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let meta = RequestMeta::from_request(&req, Utc::now());
        let shared = Arc::clone(&self.shared);

        let request: SharedRequestCapture = Rc::new(RefCell::new(RequestCapture::new(
            shared.pool.acquire(),
            shared.request_body.load(Ordering::Relaxed),
            req.headers(),
        )));
        let response = ResponseCapture::new(
            shared.pool.acquire(),
            shared.response_body.load(Ordering::Relaxed),
        );

        if request.borrow().is_enabled() {
            let payload = req.take_payload();
            req.set_payload(Payload::Stream {
                payload: Box::pin(CapturingPayload::new(payload, Rc::clone(&request))),
            });
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut exchange = Exchange {
                shared,
                meta,
                request,
                response,
                started,
            };

            match fut.await {
                Ok(res) => {
                    exchange.response.set_status(res.status());
                    exchange.response.set_headers(res.headers().clone());
                    let line = LineGuard {
                        exchange: Some(exchange),
                    };
                    Ok(res.map_body(move |_, body| CapturingBody { body, line }))
                }
                Err(err) => {
                    // Log what the client will get from the error.
                    let rendered = err.error_response();
                    exchange.response.set_status(rendered.status());
                    exchange.response.set_headers(rendered.headers().clone());
                    exchange.emit();
                    Err(err)
                }
            }
        })
    }
}

/// Everything needed to format one line
struct Exchange {
    shared: Arc<Shared>,
    meta: RequestMeta,
    request: SharedRequestCapture,
    response: ResponseCapture,
    started: Instant,
}

impl Exchange {
    fn emit(self) {
        let line = format_line(
            &self.meta,
            &self.request.borrow(),
            &self.response,
            self.started.elapsed(),
        );

        if let Err(e) = self.shared.sink.log(line) {
            error!(
                error = %e,
                method = %self.meta.method,
                uri = %self.meta.uri,
                "access log line dropped"
            );
        }
        // Buffers go back to the pool as `self` drops.
    }
}

/// Emits the line exactly once: at end of body, or on drop
struct LineGuard {
    exchange: Option<Exchange>,
}

impl LineGuard {
    fn write(&mut self, chunk: &[u8]) {
        if let Some(exchange) = self.exchange.as_mut() {
            exchange.response.write(chunk);
        }
    }

    fn emit(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            exchange.emit();
        }
    }
}

impl Drop for LineGuard {
    fn drop(&mut self) {
        self.emit();
    }
}

pin_project! {
    /// Response body that mirrors chunks into the access log as they stream out
    pub struct CapturingBody<B> {
        #[pin]
        body: B,
        line: LineGuard,
    }
}

impl<B> MessageBody for CapturingBody<B>
where
    B: MessageBody,
{
    type Error = B::Error;

    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        let this = self.project();

        match this.body.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.line.write(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                this.line.emit();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
