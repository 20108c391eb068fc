//! Helper functions for the access-log middleware
//!
//! Content-type eligibility, header key normalisation and the timestamps
//! used in log lines and rotated file names.

use std::path::{Path, PathBuf};

use actix_web::http::header::{HeaderMap, CONTENT_TYPE};
use chrono::{DateTime, Local, Utc};

/// Media types whose bodies are captured; everything else is treated as binary
const CAPTURABLE_MEDIA_TYPES: [&str; 5] = [
    "application/json",
    "application/x-www-form-urlencoded",
    "application/xml",
    "text/plain",
    "text/xml",
];

/// Check a `Content-Type` value against the capture allow-list
///
/// Parameters such as `; charset=utf-8` are ignored. A missing or empty
/// content type is never capturable.
pub fn is_capturable_content_type(content_type: &str) -> bool {
    let media_type = match content_type.split_once(';') {
        Some((media_type, _params)) => media_type,
        None => content_type,
    }
    .trim();

    CAPTURABLE_MEDIA_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(media_type))
}

/// Whether the `Content-Type` in `headers` allows body capture
pub fn is_capturable(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_capturable_content_type)
}

/// Canonical MIME form of a header name (`x-request-id` -> `X-Request-Id`)
pub fn canonical_header_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            key.push(c.to_ascii_uppercase());
        } else {
            key.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    key
}

/// Nanoseconds since the Unix epoch, the first field of every line
pub fn unix_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or_default()
}

/// Name a full log file is renamed to: `<path>-<YYYYMMDDHHMMSS>`
pub fn rotated_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!("-{}", at.format("%Y%m%d%H%M%S")));
    PathBuf::from(name)
}
