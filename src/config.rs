//! Configuration management for the access-log middleware
//!
//! Loaded from environment variables or JSON with fail-soft behavior: bad
//! values fall back to defaults with a warning instead of stopping the app.
//! Only opening the log file can fail, and that happens when the middleware
//! is built, not here.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::buffer::DEFAULT_CAPTURE_LIMIT;
use crate::error::AccessLogError;
use crate::file_sink::MAX_LOG_FILE_SIZE;

/// Configuration for the access-log middleware
///
/// Loaded from environment variables:
/// - `ACCESSLOG_FILENAME`: log file path; enables the rotating file sink
/// - `ACCESSLOG_REQUEST_BODY`: capture request bodies (`true`/`false`, default `true`)
/// - `ACCESSLOG_RESPONSE_BODY`: capture response bodies (default `true`)
/// - `ACCESSLOG_MAX_FILE_SIZE`: rotation threshold in bytes (default 1800 MiB)
/// - `ACCESSLOG_BODY_LIMIT`: bytes of each body kept for the log (default 1024)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log file path; `None` logs through `tracing` instead
    pub filename: Option<PathBuf>,

    /// Whether request bodies are captured
    pub request_body: bool,

    /// Whether response bodies are captured
    pub response_body: bool,

    /// Size in bytes at which the log file is rotated
    pub max_file_size: u64,

    /// Body bytes kept per request and per response
    pub body_capture_limit: usize,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables take their defaults; unparsable ones are reported and
    /// ignored. Never fails.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let filename = std::env::var_os("ACCESSLOG_FILENAME")
            .filter(|name| !name.is_empty())
            .map(PathBuf::from);

        let config = Self {
            filename,
            request_body: env_parse("ACCESSLOG_REQUEST_BODY", parse_flag)
                .unwrap_or(defaults.request_body),
            response_body: env_parse("ACCESSLOG_RESPONSE_BODY", parse_flag)
                .unwrap_or(defaults.response_body),
            max_file_size: env_parse("ACCESSLOG_MAX_FILE_SIZE", |v| v.parse().ok())
                .unwrap_or(defaults.max_file_size),
            body_capture_limit: env_parse("ACCESSLOG_BODY_LIMIT", |v| v.parse().ok())
                .unwrap_or(defaults.body_capture_limit),
        };

        debug!(?config, "access log configuration loaded from environment");
        config
    }

    /// Parse the JSON form, e.g. `{"filename": "access.log", "request_body": false}`
    pub fn from_json(json: &str) -> Result<Self, AccessLogError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Configuration writing to `filename` with default capture settings
    pub fn with_filename(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filename: None,
            request_body: true,
            response_body: true,
            max_file_size: MAX_LOG_FILE_SIZE,
            body_capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

fn env_parse<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(variable = name, value = %raw, "ignoring invalid access log setting");
    }
    parsed
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
