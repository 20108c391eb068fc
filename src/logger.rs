//! Log sinks
//!
//! The middleware hands every finished line to a [`LogSink`] and does not care
//! which one is installed. Two are built in: [`AsyncFileSink`](crate::AsyncFileSink),
//! which appends to a rotating file from a background thread, and
//! [`TracingSink`], which passes lines straight to `tracing`.

use std::sync::Arc;

use tracing::info;

use crate::error::AccessLogError;

/// Target used for access-log events emitted through `tracing`
pub const ACCESS_LOG_TARGET: &str = "access_log";

/// Destination for formatted access-log lines
pub trait LogSink: Send + Sync {
    /// Accept one newline-terminated line. Must not block the caller.
    fn log(&self, line: Vec<u8>) -> Result<(), AccessLogError>;

    /// Flush everything accepted so far and release the destination
    fn close(&self) -> Result<(), AccessLogError>;

    /// Lines accepted but not yet persisted
    fn queue_depth(&self) -> usize {
        0
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn log(&self, line: Vec<u8>) -> Result<(), AccessLogError> {
        (**self).log(line)
    }

    fn close(&self) -> Result<(), AccessLogError> {
        (**self).close()
    }

    fn queue_depth(&self) -> usize {
        (**self).queue_depth()
    }
}

/// Synchronous pass-through to the host's `tracing` subscriber
///
/// Used when no file is configured. Lines go out as `info` events on the
/// [`ACCESS_LOG_TARGET`] target with the trailing newline removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for TracingSink {
    fn log(&self, line: Vec<u8>) -> Result<(), AccessLogError> {
        let line = String::from_utf8_lossy(&line);
        info!(target: ACCESS_LOG_TARGET, "{}", line.trim_end_matches('\n'));
        Ok(())
    }

    fn close(&self) -> Result<(), AccessLogError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        lines: Mutex<Vec<Vec<u8>>>,
    }

    impl LogSink for MemorySink {
        fn log(&self, line: Vec<u8>) -> Result<(), AccessLogError> {
            self.lines.lock().unwrap().push(line);
            Ok(())
        }

        fn close(&self) -> Result<(), AccessLogError> {
            Ok(())
        }
    }

    #[test]
    fn test_tracing_sink_accepts_lines() {
        let sink = TracingSink::new();
        assert!(sink.log(b"1\tGET\t/\n".to_vec()).is_ok());
        assert!(sink.log(vec![0xff, 0xfe, b'\n']).is_ok());
        assert_eq!(sink.queue_depth(), 0);
        assert!(sink.close().is_ok());
    }

    #[test]
    fn test_tracing_sink_with_subscriber() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        tracing::subscriber::with_default(subscriber, || {
            assert!(TracingSink.log(b"line\n".to_vec()).is_ok());
        });
    }

    #[test]
    fn test_arc_sink_delegates() {
        let memory = Arc::new(MemorySink::default());
        let sink: Arc<dyn LogSink> = memory.clone();

        sink.log(b"a\n".to_vec()).unwrap();
        sink.log(b"b\n".to_vec()).unwrap();
        assert_eq!(sink.queue_depth(), 0);
        assert_eq!(*memory.lines.lock().unwrap(), vec![b"a\n".to_vec(), b"b\n".to_vec()]);
    }
}
