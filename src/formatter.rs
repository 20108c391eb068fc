//! Access-log line formatting
//!
//! One tab-separated, newline-terminated line per request:
//!
//! ```text
//! start(ns)  method  uri  {req headers}  req body  status  {resp headers}  resp body  size  elapsed(µs)
//! ```
//!
//! Header maps render as `{"Key":"Value",...}` with canonical keys sorted
//! lexicographically; only the first value of a repeated header is used. The
//! request map always starts with `Content-Length`, `Host` and `IP`.
//!
//! Fields are written as-is. A tab or newline inside a header value or a body
//! makes the line ambiguous; nothing is escaped.

use std::fmt::Display;
use std::io::Write as _;
use std::time::Duration;

use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use actix_web::http::Method;
use chrono::{DateTime, Utc};

use crate::request_body_capture::RequestCapture;
use crate::response_body_capture::ResponseCapture;
use crate::utils::{canonical_header_key, unix_nanos};

/// Initial size of a line buffer (1KB)
pub const LINE_BUF_CAPACITY: usize = 1 << 10;

const NO_DATA: &[u8] = b"{no data}";
const TOO_LARGE: &[u8] = b"{too large to display}";

/// Request metadata captured before the handler runs
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub started_at: DateTime<Utc>,
    pub method: Method,
    /// Path and query as received
    pub uri: String,
    /// Declared body length; `-1` when unknown (chunked)
    pub content_length: i64,
    pub host: String,
    /// Peer address, `ip:port`
    pub remote_addr: String,
    pub headers: HeaderMap,
}

impl RequestMeta {
    pub fn from_request(req: &ServiceRequest, started_at: DateTime<Utc>) -> Self {
        let headers = req.headers().clone();
        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| req.uri().host())
            .unwrap_or_default()
            .to_owned();

        Self {
            started_at,
            method: req.method().clone(),
            uri: req
                .uri()
                .path_and_query()
                .map_or_else(|| req.path().to_owned(), |pq| pq.as_str().to_owned()),
            content_length: declared_content_length(&headers),
            host,
            remote_addr: req
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_default(),
            headers,
        }
    }
}

/// `Content-Length` if present, `-1` for a chunked body, otherwise `0`
pub fn declared_content_length(headers: &HeaderMap) -> i64 {
    if let Some(length) = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
    {
        return length;
    }

    let chunked = headers
        .get(TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
    if chunked {
        -1
    } else {
        0
    }
}

/// Build the log line for one finished exchange
pub fn format_line(
    meta: &RequestMeta,
    request: &RequestCapture,
    response: &ResponseCapture,
    elapsed: Duration,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LINE_BUF_CAPACITY);

    push_display(&mut buf, unix_nanos(meta.started_at));
    buf.push(b'\t');

    buf.extend_from_slice(meta.method.as_str().as_bytes());
    buf.push(b'\t');

    buf.extend_from_slice(meta.uri.as_bytes());
    buf.push(b'\t');

    buf.push(b'{');
    push_pair(&mut buf, b"Content-Length", meta.content_length.to_string().as_bytes());
    buf.push(b',');
    push_pair(&mut buf, b"Host", meta.host.as_bytes());
    buf.push(b',');
    push_pair(&mut buf, b"IP", meta.remote_addr.as_bytes());
    // Host already leads the map.
    for (key, value) in sorted_headers(&meta.headers) {
        if key == "Host" {
            continue;
        }
        buf.push(b',');
        push_pair(&mut buf, key.as_bytes(), value);
    }
    buf.push(b'}');
    buf.push(b'\t');

    let body = request.body();
    if body.is_empty() {
        buf.extend_from_slice(NO_DATA);
    } else if meta.content_length != body.len() as i64 {
        buf.extend_from_slice(TOO_LARGE);
    } else {
        buf.extend_from_slice(body);
    }
    buf.push(b'\t');

    push_display(&mut buf, response.status_code().as_u16());
    buf.push(b'\t');

    buf.push(b'{');
    for (i, (key, value)) in sorted_headers(response.headers()).into_iter().enumerate() {
        if i != 0 {
            buf.push(b',');
        }
        push_pair(&mut buf, key.as_bytes(), value);
    }
    buf.push(b'}');
    buf.push(b'\t');

    let body = response.captured_body();
    if body.is_empty() {
        buf.extend_from_slice(NO_DATA);
    } else if response.written_size() != body.len() as u64 {
        buf.extend_from_slice(TOO_LARGE);
    } else {
        buf.extend_from_slice(body.strip_suffix(b"\n").unwrap_or(body));
    }
    buf.push(b'\t');

    push_display(&mut buf, response.written_size());
    buf.push(b'\t');

    push_display(&mut buf, elapsed.as_micros());
    buf.push(b'\n');

    buf
}

/// First value of every header, keyed by canonical name, in key order
fn sorted_headers(headers: &HeaderMap) -> Vec<(String, &[u8])> {
    let mut pairs: Vec<_> = headers
        .keys()
        .filter_map(|name| {
            headers
                .get(name)
                .map(|value| (canonical_header_key(name.as_str()), value.as_bytes()))
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

fn push_pair(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    buf.push(b'"');
    buf.extend_from_slice(key);
    buf.extend_from_slice(b"\":\"");
    buf.extend_from_slice(value);
    buf.push(b'"');
}

fn push_display(buf: &mut Vec<u8>, value: impl Display) {
    // Writing into a Vec cannot fail.
    let _ = write!(buf, "{value}");
}
