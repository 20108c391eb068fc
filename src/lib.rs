//! # AccessLog Actix
//!
//! HTTP access-log middleware for Actix-Web applications.
//!
//! Every request/response exchange becomes one tab-separated line: start time,
//! method, URI, request headers, request body, status, response headers,
//! response body, response size and elapsed microseconds. The middleware is
//! built on a few principles:
//!
//! - **Non-intrusive**: bodies are mirrored while they stream, never buffered
//!   in front of the handler or the client
//! - **Bounded**: at most 1 KiB of each body is kept, in pooled buffers
//! - **Fail-safe**: a broken log file is reported, never turned into an error
//!   response
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpResponse, HttpServer};
//! use accesslog_actix::AccessLog;
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     HttpServer::new(|| {
//!         App::new()
//!             // No file configured: lines go to `tracing` on target "access_log"
//!             .wrap(AccessLog::new())
//!             .service(web::resource("/").to(|| async {
//!                 HttpResponse::Ok().body("Hello!")
//!             }))
//!     })
//!     .bind("0.0.0.0:8080")?
//!     .run()
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! [`Config`] can be built in code, parsed from JSON or read from the
//! environment:
//!
//! - `ACCESSLOG_FILENAME`: write to this file, rotating at the size limit
//! - `ACCESSLOG_REQUEST_BODY` / `ACCESSLOG_RESPONSE_BODY`: body capture switches
//! - `ACCESSLOG_MAX_FILE_SIZE`: rotation threshold in bytes
//! - `ACCESSLOG_BODY_LIMIT`: captured bytes per body
//!
//! Only bodies with a textual content type (`application/json`,
//! `application/xml`, `application/x-www-form-urlencoded`, `text/plain`,
//! `text/xml`) are captured. Empty bodies show as `{no data}`, truncated ones
//! as `{too large to display}`.
//!
//! ## Architecture
//!
//! - `middleware`: Actix-Web transform, per-request service and body wrapper
//! - `request_body_capture` / `response_body_capture`: streaming mirrors
//! - `buffer`: bounded capture buffers and their pool
//! - `formatter`: the line layout
//! - `logger`: the [`LogSink`] trait and the `tracing` pass-through
//! - `file_sink`: background file writer with rotation
//! - `config`, `error`, `utils`

pub mod buffer;
pub mod config;
pub mod error;
pub mod file_sink;
pub mod formatter;
pub mod logger;
pub mod middleware;
pub mod prelude;
pub mod request_body_capture;
pub mod response_body_capture;
pub mod utils;

pub use buffer::{BufferPool, MirrorBuffer, PooledBuffer};
pub use config::Config;
pub use error::AccessLogError;
pub use file_sink::AsyncFileSink;
pub use logger::{LogSink, TracingSink, ACCESS_LOG_TARGET};
pub use middleware::{AccessLog, AccessLogBuilder, AccessLogService, CapturingBody, HealthStat};
