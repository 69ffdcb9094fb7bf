//! Durable, size-rotating log sink.
//!
//! Producers enqueue [`LogRecord`]s on a bounded channel. A dedicated writer
//! thread owns the file handle: it appends and flushes every record, and once
//! the file grows past the rollover threshold it moves it to `<path>.1`
//! (replacing any previous backup) and reopens a fresh file.

use crate::config::{QueuePolicy, SinkConfig};
use crate::error::SinkError;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const BACKUP_SUFFIX: &str = ".1";

/// One formatted line, owned by the sink once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord(String);

impl LogRecord {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for LogRecord {
    fn from(line: String) -> Self {
        Self(line)
    }
}

#[derive(Debug, Default)]
pub struct SinkStats {
    pub written: AtomicU64,
    pub dropped: AtomicU64,
    pub write_errors: AtomicU64,
    pub rotations: AtomicU64,
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

type WriterHandle = thread::JoinHandle<Result<(), SinkError>>;

pub struct LogSink {
    path: PathBuf,
    policy: QueuePolicy,
    tx: RwLock<Option<mpsc::Sender<LogRecord>>>,
    writer: Mutex<Option<WriterHandle>>,
    stats: Arc<SinkStats>,
}

impl LogSink {
    /// Open (or create) the file at `path` and start its writer thread.
    pub fn open(path: impl Into<PathBuf>, config: &SinkConfig) -> Result<Self, SinkError> {
        let (sink, writer, rx) = Self::prepare(path.into(), config)?;
        sink.start(writer, rx)?;
        Ok(sink)
    }

    /// Open the file and build the queue without starting the writer.
    fn prepare(
        path: PathBuf,
        config: &SinkConfig,
    ) -> Result<(Self, Writer, mpsc::Receiver<LogRecord>), SinkError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;
        }

        let file = open_append(&path).map_err(|source| SinkError::Open {
            path: path.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(SinkStats::default());
        let writer = Writer {
            path: path.clone(),
            file: Some(BufWriter::new(file)),
            rollover_bytes: config.rollover_bytes,
            stats: Arc::clone(&stats),
        };

        let sink = Self {
            path,
            policy: config.queue_policy,
            tx: RwLock::new(Some(tx)),
            writer: Mutex::new(None),
            stats,
        };
        Ok((sink, writer, rx))
    }

    fn start(&self, writer: Writer, rx: mpsc::Receiver<LogRecord>) -> Result<(), SinkError> {
        let thread_name = format!(
            "authsim-sink-{}",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || writer.run(rx))
            .map_err(|source| SinkError::Open {
                path: self.path.clone(),
                source,
            })?;

        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Enqueue a record.
    ///
    /// With [`QueuePolicy::Block`] this waits while the queue is full; with
    /// [`QueuePolicy::Drop`] the record is rejected with
    /// [`SinkError::QueueFull`]. Fails with [`SinkError::Closed`] once the sink
    /// has been stopped or its writer has died. A producer still waiting for
    /// space when `stop` runs gets `Closed` too.
    pub async fn write(&self, record: LogRecord) -> Result<(), SinkError> {
        match self.policy {
            QueuePolicy::Block => {
                let tx = self.sender()?;
                let permit = tx
                    .reserve()
                    .await
                    .map_err(|_| SinkError::Closed(self.path.clone()))?;
                // Commit under the lock `stop` takes, so nothing lands after it.
                let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
                if guard.is_none() {
                    return Err(SinkError::Closed(self.path.clone()));
                }
                permit.send(record);
                Ok(())
            }
            QueuePolicy::Drop => {
                let guard = self.tx.read().unwrap_or_else(PoisonError::into_inner);
                let tx = guard
                    .as_ref()
                    .ok_or_else(|| SinkError::Closed(self.path.clone()))?;
                match tx.try_send(record) {
                    Ok(()) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        Err(SinkError::QueueFull(self.path.clone()))
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        Err(SinkError::Closed(self.path.clone()))
                    }
                }
            }
        }
    }

    /// Stop accepting records, drain everything already queued and join the
    /// writer. Returns the writer's fatal error, if it died on a rollover.
    pub async fn stop(&self) -> Result<(), SinkError> {
        drop(
            self.tx
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handle = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(result)) => result,
            _ => Err(SinkError::WriterPanicked(self.path.clone())),
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<LogRecord>, SinkError> {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SinkError::Closed(self.path.clone()))
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

struct Writer {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    rollover_bytes: u64,
    stats: Arc<SinkStats>,
}

impl Writer {
    fn run(mut self, mut rx: mpsc::Receiver<LogRecord>) -> Result<(), SinkError> {
        info!(path = %self.path.display(), "Log writer started");

        // Ends once every sender is gone and the queue is empty.
        while let Some(record) = rx.blocking_recv() {
            if let Err(e) = self.append(&record) {
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropped record after write failure");
                continue;
            }
            self.stats.written.fetch_add(1, Ordering::Relaxed);

            if self.over_threshold() {
                if let Err(e) = self.roll() {
                    error!(error = %e, "Log writer terminated, sink is no longer writable");
                    return Err(e);
                }
            }
        }

        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!(path = %self.path.display(), error = %e, "Final flush failed");
            }
        }
        info!(path = %self.path.display(), "Log writer stopped");
        Ok(())
    }

    fn append(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or_else(|| SinkError::Write {
            path: self.path.clone(),
            source: std::io::Error::other("no open file"),
        })?;
        let result = file
            .write_all(record.as_str().as_bytes())
            .and_then(|_| file.flush());
        if let Err(source) = result {
            self.discard_buffered();
            return Err(SinkError::Write {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Throw away bytes of a failed record so a later flush cannot write them.
    fn discard_buffered(&mut self) {
        if let Some(file) = self.file.take() {
            let (inner, _unwritten) = file.into_parts();
            self.file = Some(BufWriter::new(inner));
        }
    }

    fn over_threshold(&self) -> bool {
        let Some(file) = self.file.as_ref() else {
            return false;
        };
        match file.get_ref().metadata() {
            Ok(meta) => meta.len() > self.rollover_bytes,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to stat log file");
                false
            }
        }
    }

    fn roll(&mut self) -> Result<(), SinkError> {
        let rotation = |source| SinkError::Rotation {
            path: self.path.clone(),
            source,
        };

        // Close the current handle before moving the file.
        drop(self.file.take());

        let backup = backup_path(&self.path);
        fs::rename(&self.path, &backup).map_err(rotation)?;
        let file = open_append(&self.path).map_err(rotation)?;
        self.file = Some(BufWriter::new(file));

        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        debug!(path = %self.path.display(), backup = %backup.display(), "Rolled over log file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(rollover_bytes: u64) -> SinkConfig {
        SinkConfig {
            rollover_bytes,
            queue_capacity: 64,
            queue_policy: QueuePolicy::Block,
        }
    }

    fn record(i: usize) -> LogRecord {
        // 16 bytes per record including CRLF.
        LogRecord::new(format!("record-{i:07}\r\n"))
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .split_terminator("\r\n")
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_stop_drains_every_queued_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        let sink = LogSink::open(&path, &config(u64::MAX)).unwrap();

        for i in 0..2000 {
            sink.write(record(i)).await.unwrap();
        }
        sink.stop().await.unwrap();

        let lines = read_lines(&path);
        let expected: Vec<String> = (0..2000).map(|i| format!("record-{i:07}")).collect();
        assert_eq!(lines, expected);
        assert_eq!(sink.stats().written.load(Ordering::Relaxed), 2000);
    }

    #[tokio::test]
    async fn test_write_after_stop_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sink = LogSink::open(dir.path().join("cpu.log"), &config(u64::MAX)).unwrap();
        sink.stop().await.unwrap();

        assert!(matches!(
            sink.write(record(0)).await,
            Err(SinkError::Closed(_))
        ));
        // Stopping twice is harmless.
        sink.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollover_keeps_a_single_backup_generation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        // Rolls over after the fourth 16-byte record (64 > 60).
        let sink = LogSink::open(&path, &config(60)).unwrap();

        for i in 0..9 {
            sink.write(record(i)).await.unwrap();
        }
        sink.stop().await.unwrap();

        assert_eq!(sink.stats().rotations.load(Ordering::Relaxed), 2);
        let backup = backup_path(&path);
        assert_eq!(
            read_lines(&backup),
            vec!["record-0000004", "record-0000005", "record-0000006", "record-0000007"]
        );
        assert_eq!(read_lines(&path), vec!["record-0000008"]);

        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 2, "only the live file and one backup may exist");
    }

    #[tokio::test]
    async fn test_first_rollover_moves_pre_rollover_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mem.log");
        let sink = LogSink::open(&path, &config(60)).unwrap();

        for i in 0..6 {
            sink.write(record(i)).await.unwrap();
        }
        sink.stop().await.unwrap();

        assert_eq!(
            read_lines(&backup_path(&path)),
            vec!["record-0000000", "record-0000001", "record-0000002", "record-0000003"]
        );
        assert_eq!(read_lines(&path), vec!["record-0000004", "record-0000005"]);
    }

    #[tokio::test]
    async fn test_rotation_failure_terminates_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("df.log");
        // A non-empty directory at the backup path makes the rename fail.
        let blocker = backup_path(&path);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        let sink = LogSink::open(&path, &config(10)).unwrap();
        sink.write(record(0)).await.unwrap();

        assert!(matches!(
            sink.stop().await,
            Err(SinkError::Rotation { .. })
        ));
        assert!(matches!(
            sink.write(record(1)).await,
            Err(SinkError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_open_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("logs").join("audit.log");
        let sink = LogSink::open(&path, &config(u64::MAX)).unwrap();
        sink.write(LogRecord::new("hello\r\n")).await.unwrap();
        sink.stop().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\r\n");
    }

    #[tokio::test]
    async fn test_drop_policy_rejects_when_queue_is_full() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        let cfg = SinkConfig {
            rollover_bytes: u64::MAX,
            queue_capacity: 1,
            queue_policy: QueuePolicy::Drop,
        };
        // Writer not running yet, so the single slot stays occupied.
        let (sink, writer, rx) = LogSink::prepare(path.clone(), &cfg).unwrap();

        sink.write(record(0)).await.unwrap();
        for i in 1..4 {
            assert!(matches!(
                sink.write(record(i)).await,
                Err(SinkError::QueueFull(_))
            ));
        }
        assert_eq!(sink.stats().dropped.load(Ordering::Relaxed), 3);

        sink.start(writer, rx).unwrap();
        sink.stop().await.unwrap();
        assert_eq!(read_lines(&path), vec!["record-0000000"]);
        assert_eq!(sink.stats().written.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_blocked_producer_is_closed_out_by_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        let cfg = SinkConfig {
            rollover_bytes: u64::MAX,
            queue_capacity: 1,
            queue_policy: QueuePolicy::Block,
        };
        let (sink, writer, rx) = LogSink::prepare(path.clone(), &cfg).unwrap();
        let sink = Arc::new(sink);
        sink.write(record(0)).await.unwrap();

        // Waits for queue space while holding its own sender.
        let blocked = tokio::spawn({
            let sink = Arc::clone(&sink);
            async move { sink.write(record(1)).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // No writer was started, so this only closes the sink.
        sink.stop().await.unwrap();
        let drain = thread::spawn(move || writer.run(rx));

        assert!(matches!(
            blocked.await.unwrap(),
            Err(SinkError::Closed(_))
        ));
        drain.join().unwrap().unwrap();
        assert_eq!(read_lines(&path), vec!["record-0000000"]);
    }

    #[cfg(target_os = "linux")]
    fn full_device_writer() -> (Writer, Arc<SinkStats>) {
        // Every write to /dev/full fails with ENOSPC.
        let file = OpenOptions::new().write(true).open("/dev/full").unwrap();
        let stats = Arc::new(SinkStats::default());
        let writer = Writer {
            path: PathBuf::from("/dev/full"),
            file: Some(BufWriter::new(file)),
            rollover_bytes: u64::MAX,
            stats: Arc::clone(&stats),
        };
        (writer, stats)
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_drops_record_and_keeps_writer_running() {
        let (writer, stats) = full_device_writer();
        let (tx, rx) = mpsc::channel(8);
        for i in 0..3 {
            tx.try_send(record(i)).unwrap();
        }
        drop(tx);

        writer.run(rx).unwrap();
        assert_eq!(stats.write_errors.load(Ordering::Relaxed), 3);
        assert_eq!(stats.written.load(Ordering::Relaxed), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_record_is_not_left_buffered() {
        let (mut writer, _stats) = full_device_writer();

        assert!(matches!(
            writer.append(&record(0)),
            Err(SinkError::Write { .. })
        ));
        assert!(writer.file.as_ref().unwrap().buffer().is_empty());
    }

    #[test]
    fn test_backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/var/log/mock/audit.log")),
            PathBuf::from("/var/log/mock/audit.log.1")
        );
    }
}
