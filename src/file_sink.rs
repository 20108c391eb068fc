//! Asynchronous rotating file sink
//!
//! Request handlers only enqueue. A single writer thread owns the file and its
//! offset, appends lines in queue order and rotates by size:
//!
//! ```text
//! log(line) ──► unbounded FIFO ──► writer thread ──► <path>
//!                                       │ offset + len > max_file_size
//!                                       └──► rename to <path>-<YYYYMMDDHHMMSS>, reopen <path>
//! ```
//!
//! [`close`](LogSink::close) enqueues a close marker behind every line already
//! accepted, waits for the writer to drain up to it, then syncs and closes the
//! file. Lines racing with `close` are written if they reached the queue before
//! it was shut, and rejected with [`AccessLogError::SinkClosed`] otherwise.
//!
//! A failed write or rotation stops the writer. There is no recovery from a
//! full disk; the error is logged, later lines are refused, and `close`
//! returns the original error.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::Local;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::error::AccessLogError;
use crate::logger::LogSink;
use crate::utils::rotated_path;

/// Default rotation threshold (1800 MiB)
pub const MAX_LOG_FILE_SIZE: u64 = 1024 * 1024 * 1800;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

enum Command {
    Line(Vec<u8>),
    Close,
}

/// [`LogSink`] that appends to a size-rotated file from a background thread
pub struct AsyncFileSink {
    path: PathBuf,
    sender: UnboundedSender<Command>,
    depth: Arc<AtomicUsize>,
    state: AtomicU8,
    writer: Mutex<Option<JoinHandle<Result<(), AccessLogError>>>>,
}

impl AsyncFileSink {
    /// Open (or create) `path` for appending and start the writer thread
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AccessLogError> {
        Self::with_max_file_size(path, MAX_LOG_FILE_SIZE)
    }

    /// Like [`open`](Self::open) with a custom rotation threshold in bytes
    pub fn with_max_file_size(
        path: impl AsRef<Path>,
        max_file_size: u64,
    ) -> Result<Self, AccessLogError> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| AccessLogError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let file = open_append(&path).map_err(|source| AccessLogError::OpenFile {
            path: path.clone(),
            source,
        })?;
        let offset = file
            .metadata()
            .map_err(|source| AccessLogError::OpenFile {
                path: path.clone(),
                source,
            })?
            .len();

        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let writer = FileWriter {
            path: path.clone(),
            file: Some(file),
            offset,
            max_file_size,
            depth: Arc::clone(&depth),
        };

        let handle = thread::Builder::new()
            .name("access-log-writer".to_owned())
            .spawn(move || writer.run(receiver))
            .map_err(AccessLogError::Spawn)?;

        info!(path = %path.display(), offset, max_file_size, "access log file opened");

        Ok(Self {
            path,
            sender,
            depth,
            state: AtomicU8::new(RUNNING),
            writer: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }
}

impl LogSink for AsyncFileSink {
    fn log(&self, line: Vec<u8>) -> Result<(), AccessLogError> {
        if self.state.load(Ordering::Acquire) != RUNNING {
            return Err(AccessLogError::SinkClosed);
        }

        // Count first so the writer never decrements below zero.
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Command::Line(line)).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(AccessLogError::SinkClosed);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), AccessLogError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = writer.take() else {
            // Already closed.
            return Ok(());
        };

        self.state.store(DRAINING, Ordering::Release);
        // The writer may already be gone after a fatal error; its result says why.
        let _ = self.sender.send(Command::Close);

        let result = handle.join().unwrap_or(Err(AccessLogError::WriterPanicked));
        self.state.store(CLOSED, Ordering::Release);
        debug!(path = %self.path.display(), "access log file closed");
        result
    }

    fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

impl Drop for AsyncFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "access log not flushed cleanly");
        }
    }
}

/// State owned by the writer thread alone
struct FileWriter {
    path: PathBuf,
    /// `None` only between closing the full file and opening its successor
    file: Option<File>,
    offset: u64,
    max_file_size: u64,
    depth: Arc<AtomicUsize>,
}

impl FileWriter {
    fn run(mut self, mut receiver: UnboundedReceiver<Command>) -> Result<(), AccessLogError> {
        if let Err(e) = self.write_queued(&mut receiver) {
            // Fatal: refuse new lines and account for everything still queued.
            receiver.close();
            let mut dropped = 1usize;
            while let Ok(command) = receiver.try_recv() {
                if let Command::Line(_) = command {
                    self.depth.fetch_sub(1, Ordering::AcqRel);
                    dropped += 1;
                }
            }
            error!(error = %e, dropped, "access log writer stopped, further lines are refused");
            return Err(e);
        }

        self.finish()
    }

    fn write_queued(
        &mut self,
        receiver: &mut UnboundedReceiver<Command>,
    ) -> Result<(), AccessLogError> {
        // Parks while the queue is empty.
        while let Some(command) = receiver.blocking_recv() {
            match command {
                Command::Line(line) => self.write_line(&line)?,
                Command::Close => break,
            }
        }

        // Refuse new lines, then write whatever raced in ahead of the close.
        receiver.close();
        loop {
            match receiver.try_recv() {
                Ok(Command::Line(line)) => self.write_line(&line)?,
                Ok(Command::Close) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(())
    }

    /// Leaves the queue count whether or not the append succeeds.
    fn write_line(&mut self, line: &[u8]) -> Result<(), AccessLogError> {
        let result = self.append(line);
        self.depth.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn append(&mut self, line: &[u8]) -> Result<(), AccessLogError> {
        let len = line.len() as u64;
        // An empty file is never rotated, even for an oversized line.
        if self.offset > 0 && self.offset + len > self.max_file_size {
            self.rotate()?;
        }

        let file = self.file.as_mut().ok_or_else(|| AccessLogError::Write {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "log file is not open"),
        })?;
        file.write_all(line).map_err(|source| AccessLogError::Write {
            path: self.path.clone(),
            source,
        })?;

        self.offset += len;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), AccessLogError> {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all() {
                warn!(path = %self.path.display(), error = %e, "sync before rotation failed");
            }
        }

        let rotated = unique_path(rotated_path(&self.path, Local::now()));
        fs::rename(&self.path, &rotated).map_err(|source| AccessLogError::Rotate {
            path: self.path.clone(),
            source,
        })?;

        let file = open_append(&self.path).map_err(|source| AccessLogError::Rotate {
            path: self.path.clone(),
            source,
        })?;
        self.offset = file
            .metadata()
            .map_err(|source| AccessLogError::Rotate {
                path: self.path.clone(),
                source,
            })?
            .len();
        self.file = Some(file);

        info!(
            path = %self.path.display(),
            rotated = %rotated.display(),
            "access log rotated"
        );
        Ok(())
    }

    fn finish(mut self) -> Result<(), AccessLogError> {
        match self.file.take() {
            Some(file) => file.sync_all().map_err(|source| AccessLogError::Write {
                path: self.path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `path`, or `path.1`, `path.2`, ... if a file of that name already exists
fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    (1u32..)
        .map(|n| {
            let mut name = path.as_os_str().to_owned();
            name.push(format!(".{n}"));
            PathBuf::from(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::time::Duration;

    fn read_lines(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        BufReader::new(file).lines().map(Result::unwrap).collect()
    }

    fn rotated_files(dir: &Path, name: &str) -> Vec<PathBuf> {
        let prefix = format!("{name}-");
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_lines_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = AsyncFileSink::open(&path).unwrap();

        for i in 0..100 {
            sink.log(format!("line {i}\n").into_bytes()).unwrap();
        }
        sink.close().unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 100);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line, &format!("line {i}"));
        }
        assert_eq!(sink.queue_depth(), 0);
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/access.log");
        let sink = AsyncFileSink::open(&path).unwrap();
        sink.log(b"hello\n".to_vec()).unwrap();
        sink.close().unwrap();

        assert_eq!(read_lines(&path), vec!["hello"]);
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, "earlier\n").unwrap();

        let sink = AsyncFileSink::open(&path).unwrap();
        sink.log(b"later\n".to_vec()).unwrap();
        sink.close().unwrap();

        assert_eq!(read_lines(&path), vec!["earlier", "later"]);
    }

    #[test]
    fn test_close_drains_everything_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = Arc::new(AsyncFileSink::open(&path).unwrap());

        let producers: Vec<_> = (0..4)
            .map(|t| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..250 {
                        sink.log(format!("{t}:{i}\n").into_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        sink.close().unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1000);
        // Per-producer order survives interleaving.
        for t in 0..4 {
            let own: Vec<_> = lines
                .iter()
                .filter(|l| l.starts_with(&format!("{t}:")))
                .cloned()
                .collect();
            let expected: Vec<_> = (0..250).map(|i| format!("{t}:{i}")).collect();
            assert_eq!(own, expected);
        }
    }

    #[test]
    fn test_log_after_close_refused() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AsyncFileSink::open(dir.path().join("access.log")).unwrap();
        sink.close().unwrap();

        assert!(sink.is_closed());
        assert!(matches!(
            sink.log(b"late\n".to_vec()),
            Err(AccessLogError::SinkClosed)
        ));
        // Second close is a no-op.
        assert!(sink.close().is_ok());
    }

    #[test]
    fn test_rotation_on_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = AsyncFileSink::with_max_file_size(&path, 100).unwrap();

        // 40 bytes each: 0 -> 40 -> 80, the third would reach 120.
        let line = |c: char| format!("{}\n", c.to_string().repeat(39)).into_bytes();
        sink.log(line('a')).unwrap();
        sink.log(line('b')).unwrap();
        sink.log(line('c')).unwrap();
        sink.close().unwrap();

        let rotated = rotated_files(dir.path(), "access.log");
        assert_eq!(rotated.len(), 1);
        assert_eq!(read_lines(&rotated[0]), vec!["a".repeat(39), "b".repeat(39)]);
        assert_eq!(read_lines(&path), vec!["c".repeat(39)]);
        assert_eq!(fs::metadata(&path).unwrap().len(), 40);
    }

    #[test]
    fn test_offset_reset_after_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = AsyncFileSink::with_max_file_size(&path, 100).unwrap();

        // 60-byte lines: every second line crosses the threshold.
        let line = |c: char| format!("{}\n", c.to_string().repeat(59)).into_bytes();
        sink.log(line('a')).unwrap();
        sink.log(line('b')).unwrap();
        sink.log(line('c')).unwrap();
        sink.close().unwrap();

        // Rotations in the same second get a numeric suffix instead of clobbering.
        let rotated = rotated_files(dir.path(), "access.log");
        assert_eq!(rotated.len(), 2);
        let mut kept: Vec<_> = rotated.iter().flat_map(|p| read_lines(p)).collect();
        kept.sort();
        assert_eq!(kept, vec!["a".repeat(59), "b".repeat(59)]);
        assert_eq!(read_lines(&path), vec!["c".repeat(59)]);
    }

    #[test]
    fn test_oversized_line_into_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = AsyncFileSink::with_max_file_size(&path, 10).unwrap();

        sink.log(format!("{}\n", "x".repeat(30)).into_bytes()).unwrap();
        sink.close().unwrap();

        assert!(rotated_files(dir.path(), "access.log").is_empty());
        assert_eq!(read_lines(&path), vec!["x".repeat(30)]);
    }

    #[test]
    fn test_rotation_failure_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("logs");
        let path = dir.join("access.log");
        let sink = AsyncFileSink::with_max_file_size(&path, 10).unwrap();

        sink.log(b"12345678\n".to_vec()).unwrap();
        for _ in 0..500 {
            if sink.queue_depth() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sink.queue_depth(), 0);

        // The rename needed by the next rotation now fails.
        fs::remove_dir_all(&dir).unwrap();
        sink.log(b"abcdefghi\n".to_vec()).unwrap();

        let mut refused = false;
        for _ in 0..500 {
            match sink.log(b"late\n".to_vec()) {
                Err(AccessLogError::SinkClosed) => {
                    refused = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
                Ok(()) => thread::sleep(Duration::from_millis(10)),
            }
        }
        assert!(refused, "writer kept accepting lines after a failed rotation");

        assert!(matches!(sink.close(), Err(AccessLogError::Rotate { .. })));
        assert_eq!(sink.queue_depth(), 0);
        assert!(matches!(
            sink.log(b"after close\n".to_vec()),
            Err(AccessLogError::SinkClosed)
        ));
    }

    #[tokio::test]
    async fn test_log_from_async_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let sink = Arc::new(AsyncFileSink::open(&path).unwrap());

        let producer = Arc::clone(&sink);
        tokio::spawn(async move {
            for i in 0..10 {
                producer.log(format!("async {i}\n").into_bytes()).unwrap();
            }
        })
        .await
        .unwrap();

        sink.close().unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[9], "async 9");
    }

    #[test]
    fn test_drop_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        {
            let sink = AsyncFileSink::open(&path).unwrap();
            sink.log(b"kept on drop\n".to_vec()).unwrap();
        }
        assert_eq!(read_lines(&path), vec!["kept on drop"]);
    }

    #[test]
    fn test_open_fails_on_directory_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = AsyncFileSink::open(dir.path());
        assert!(matches!(result, Err(AccessLogError::OpenFile { .. })));
    }

    #[test]
    fn test_unique_path() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("access.log-20240115103005");
        assert_eq!(unique_path(base.clone()), base);

        fs::write(&base, "").unwrap();
        let next = unique_path(base.clone());
        assert_eq!(next, dir.path().join("access.log-20240115103005.1"));
    }
}
