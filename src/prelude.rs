//! Convenience re-exports
//!
//! ```rust
//! use accesslog_actix::prelude::*;
//! ```

pub use crate::config::Config;
pub use crate::error::AccessLogError;
pub use crate::file_sink::AsyncFileSink;
pub use crate::logger::{LogSink, TracingSink};
pub use crate::middleware::{AccessLog, HealthStat};
