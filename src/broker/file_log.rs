//! Append-only JSONL log on local disk
//!
//! Layout under `dir`:
//! - `<topic>.log` - one JSON record per line: `{"offset":N,"appended_at":"...","data":"..."}`
//! - `<topic>.<group>.offset` - committed position of a durable consumer group
//!
//! Any number of handles, in any number of processes, may append to the same
//! segment. Each append takes an exclusive `flock` on the segment, reads the
//! next free offset from whatever was appended since this handle last looked,
//! writes its line and syncs before returning the offset.
//!
//! Readers tail the file; a trailing line without a newline is an append in
//! progress and is not consumed until it is complete. A line left torn by a
//! crashed writer is terminated by the next appender, under the lock, and
//! readers skip it as unreadable.

use super::{BrokerError, DurableConsumer, EphemeralReader, EventLog, LogRecord};
use crate::events::{format_event_time, now_micros};
use crate::snapshot::{read_json, write_json_atomic, SnapshotError};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use tokio::time::sleep;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    offset: u64,
    appended_at: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommittedOffset {
    group: String,
    next_offset: u64,
}

/// How much of the segment this handle has already accounted for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TailPosition {
    /// Byte length up to the end of the last complete line scanned
    scanned: u64,
    next_offset: u64,
}

pub struct FileLog {
    dir: PathBuf,
    topic: String,
    log_path: PathBuf,
    tail: Mutex<TailPosition>,
    poll_interval: Duration,
}

impl FileLog {
    /// Open (creating the directory if needed) the log for `topic` under `dir`
    ///
    /// Opening never writes to the segment.
    pub fn open(dir: impl AsRef<Path>, topic: &str) -> Result<Self, BrokerError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            BrokerError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create log directory {}: {}", dir.display(), e),
            ))
        })?;

        let log_path = dir.join(format!("{}.log", topic));
        let tail = match File::open(&log_path) {
            Ok(mut file) => scan_tail(&mut file, TailPosition::default())?.0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TailPosition::default(),
            Err(e) => return Err(e.into()),
        };

        log::info!(
            "📜 File log ready: {} (next offset {})",
            log_path.display(),
            tail.next_offset
        );

        Ok(Self {
            dir,
            topic: topic.to_string(),
            log_path,
            tail: Mutex::new(tail),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// How often idle readers re-check the file for new lines
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn offset_path(&self, group: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.offset", self.topic, group))
    }
}

/// Continue scanning complete lines from `from`
///
/// Returns the new position and whether the segment ends in a partial line.
fn scan_tail(file: &mut File, from: TailPosition) -> Result<(TailPosition, bool), BrokerError> {
    // A segment shorter than what was scanned has been replaced; start over
    let mut position = if file.metadata()?.len() < from.scanned {
        TailPosition::default()
    } else {
        from
    };

    file.seek(SeekFrom::Start(position.scanned))?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok((position, false));
        }
        if line.last() != Some(&b'\n') {
            return Ok((position, true));
        }

        position.scanned += read as u64;
        if let Ok(record) = serde_json::from_slice::<StoredRecord>(&line) {
            position.next_offset = position.next_offset.max(record.offset + 1);
        }
    }
}

/// Append one record while holding the segment's exclusive lock
fn append_locked(path: &Path, from: TailPosition, data: &[u8]) -> Result<(TailPosition, u64), BrokerError> {
    let mut file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
    // Released when `file` is closed
    file.lock_exclusive()?;

    let (mut position, torn) = scan_tail(&mut file, from)?;
    if torn {
        log::warn!("⚠️  Terminating torn record at end of {}", path.display());
        file.write_all(b"\n")?;
    }

    let offset = position.next_offset;
    let record = StoredRecord {
        offset,
        appended_at: format_event_time(&now_micros()),
        data: String::from_utf8_lossy(data).into_owned(),
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');

    file.write_all(&line)?;
    file.sync_data()?;

    position.scanned = file.seek(SeekFrom::End(0))?;
    position.next_offset = offset + 1;
    Ok((position, offset))
}

#[async_trait]
impl EventLog for FileLog {
    async fn append(&self, data: &[u8]) -> Result<u64, BrokerError> {
        let mut tail = self.tail.lock().await;

        let path = self.log_path.clone();
        let from = *tail;
        let data = data.to_vec();
        let (position, offset) = tokio::task::spawn_blocking(move || append_locked(&path, from, &data))
            .await
            .map_err(|e| BrokerError::Unavailable(format!("append task failed: {}", e)))??;

        *tail = position;
        log::debug!("📨 Appended offset {} to {}", offset, self.log_path.display());
        Ok(offset)
    }

    async fn durable_consumer(&self, group: &str) -> Result<Box<dyn DurableConsumer>, BrokerError> {
        let offset_path = self.offset_path(group);
        let committed = match read_json::<CommittedOffset>(&offset_path) {
            Ok(saved) => saved.next_offset,
            Err(SnapshotError::Missing(_)) => 0,
            Err(e) => {
                return Err(BrokerError::Unavailable(format!(
                    "cannot read committed offset for group {}: {}",
                    group, e
                )))
            }
        };

        log::info!("📥 Consumer group '{}' resuming at offset {}", group, committed);

        Ok(Box::new(FileConsumer {
            group: group.to_string(),
            cursor: LogCursor::new(self.log_path.clone()),
            offset_path,
            committed,
            poll_interval: self.poll_interval,
        }))
    }

    async fn ephemeral_reader(&self, idle_timeout: Duration) -> Result<Box<dyn EphemeralReader>, BrokerError> {
        Ok(Box::new(FileReader {
            cursor: LogCursor::new(self.log_path.clone()),
            idle_timeout,
            poll_interval: self.poll_interval,
        }))
    }

    fn describe(&self) -> String {
        self.log_path.display().to_string()
    }
}

/// Sequential reader over the segment file
struct LogCursor {
    path: PathBuf,
    reader: Option<tokio::io::BufReader<tokio::fs::File>>,
    partial: String,
}

impl LogCursor {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            reader: None,
            partial: String::new(),
        }
    }

    /// Next complete record, or `None` if nothing complete is available yet
    async fn next_record(&mut self) -> Result<Option<StoredRecord>, BrokerError> {
        if self.reader.is_none() {
            match tokio::fs::File::open(&self.path).await {
                Ok(file) => self.reader = Some(tokio::io::BufReader::new(file)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        loop {
            let read = reader.read_line(&mut self.partial).await?;
            if read == 0 || !self.partial.ends_with('\n') {
                return Ok(None);
            }

            let line = std::mem::take(&mut self.partial);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<StoredRecord>(line) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    log::warn!("⚠️  Skipping unreadable line in {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

impl From<StoredRecord> for LogRecord {
    fn from(record: StoredRecord) -> Self {
        LogRecord {
            offset: record.offset,
            data: record.data.into_bytes(),
        }
    }
}

struct FileConsumer {
    group: String,
    cursor: LogCursor,
    offset_path: PathBuf,
    /// First offset not yet committed
    committed: u64,
    poll_interval: Duration,
}

#[async_trait]
impl DurableConsumer for FileConsumer {
    async fn poll(&mut self, max_wait: Duration) -> Result<Option<LogRecord>, BrokerError> {
        let deadline = Instant::now() + max_wait;

        loop {
            while let Some(record) = self.cursor.next_record().await? {
                if record.offset >= self.committed {
                    return Ok(Some(record.into()));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn commit(&mut self, offset: u64) -> Result<(), BrokerError> {
        if offset < self.committed {
            return Ok(());
        }

        let saved = CommittedOffset {
            group: self.group.clone(),
            next_offset: offset + 1,
        };
        write_json_atomic(&self.offset_path, &saved).map_err(|e| match e {
            SnapshotError::Io(io) => BrokerError::Io(io),
            other => BrokerError::Unavailable(other.to_string()),
        })?;

        self.committed = offset + 1;
        Ok(())
    }

    async fn reject(&mut self, offset: u64) -> Result<(), BrokerError> {
        // Rewind to the committed position so the record is delivered again
        log::debug!(
            "↩️  Group '{}' rewinding to offset {} after rejecting {}",
            self.group,
            self.committed,
            offset
        );
        self.cursor = LogCursor::new(self.cursor.path.clone());
        Ok(())
    }
}

struct FileReader {
    cursor: LogCursor,
    idle_timeout: Duration,
    poll_interval: Duration,
}

#[async_trait]
impl EphemeralReader for FileReader {
    async fn next_record(&mut self) -> Result<Option<LogRecord>, BrokerError> {
        let idle_since = Instant::now();

        loop {
            if let Some(record) = self.cursor.next_record().await? {
                return Ok(Some(record.into()));
            }

            let idle = idle_since.elapsed();
            if idle >= self.idle_timeout {
                return Ok(None);
            }
            sleep(self.poll_interval.min(self.idle_timeout - idle)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast_log(dir: &Path) -> FileLog {
        FileLog::open(dir, "events")
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
    }

    async fn drain(reader: &mut Box<dyn EphemeralReader>) -> Vec<LogRecord> {
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().await.unwrap() {
            records.push(record);
        }
        records
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_offsets() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());

        assert_eq!(log.append(b"first").await.unwrap(), 0);
        assert_eq!(log.append(b"second").await.unwrap(), 1);

        // Reopening continues where the segment ends
        let reopened = fast_log(dir.path());
        assert_eq!(reopened.append(b"third").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ephemeral_reader_replays_from_start() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());
        log.append(b"a").await.unwrap();
        log.append(b"b").await.unwrap();

        let mut reader = log.ephemeral_reader(Duration::from_millis(30)).await.unwrap();
        let records = drain(&mut reader).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, b"a");
        assert_eq!(records[1].offset, 1);
    }

    #[tokio::test]
    async fn test_ephemeral_reader_on_empty_log_times_out() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());

        let started = Instant::now();
        let mut reader = log.ephemeral_reader(Duration::from_millis(40)).await.unwrap();
        assert!(reader.next_record().await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_durable_consumer_resumes_after_commit() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());
        for data in [b"one", b"two", b"six"] {
            log.append(data).await.unwrap();
        }

        let mut consumer = log.durable_consumer("event_group").await.unwrap();
        let first = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(first.data, b"one");
        consumer.commit(first.offset).await.unwrap();
        drop(consumer);

        let mut resumed = log.durable_consumer("event_group").await.unwrap();
        let next = resumed.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(next.offset, 1);
        assert_eq!(next.data, b"two");
    }

    #[tokio::test]
    async fn test_uncommitted_record_is_redelivered() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());
        log.append(b"payload").await.unwrap();

        // Crash before commit
        let mut consumer = log.durable_consumer("event_group").await.unwrap();
        assert!(consumer.poll(Duration::from_millis(50)).await.unwrap().is_some());
        drop(consumer);

        let mut consumer = log.durable_consumer("event_group").await.unwrap();
        let again = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(again.offset, 0);
    }

    #[tokio::test]
    async fn test_reject_rewinds_to_committed_position() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());
        log.append(b"a").await.unwrap();
        log.append(b"b").await.unwrap();

        let mut consumer = log.durable_consumer("g").await.unwrap();
        let a = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        consumer.commit(a.offset).await.unwrap();

        let b = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        consumer.reject(b.offset).await.unwrap();

        let redelivered = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(redelivered.offset, b.offset);
        assert_eq!(redelivered.data, b"b");
    }

    #[tokio::test]
    async fn test_groups_track_offsets_independently() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());
        log.append(b"x").await.unwrap();

        let mut first = log.durable_consumer("storage").await.unwrap();
        let record = first.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        first.commit(record.offset).await.unwrap();

        let mut other = log.durable_consumer("audit").await.unwrap();
        assert!(other.poll(Duration::from_millis(50)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_poll_sees_records_appended_while_waiting() {
        let dir = tempdir().unwrap();
        let log = std::sync::Arc::new(fast_log(dir.path()));

        let mut consumer = log.durable_consumer("g").await.unwrap();
        assert!(consumer.poll(Duration::from_millis(20)).await.unwrap().is_none());

        let writer = log.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            writer.append(b"late").await.unwrap();
        });

        let record = consumer.poll(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(record.data, b"late");
    }

    #[tokio::test]
    async fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let log = fast_log(dir.path());
        log.append(b"whole").await.unwrap();

        let mut file = OpenOptions::new().append(true).open(log.log_path()).unwrap();
        file.write_all(br#"{"offset":1,"appended_"#).unwrap();
        drop(file);

        // Opening alone leaves the segment as it is
        let len_before = std::fs::metadata(log.log_path()).unwrap().len();
        let reopened = fast_log(dir.path());
        assert_eq!(std::fs::metadata(log.log_path()).unwrap().len(), len_before);

        assert_eq!(reopened.append(b"next").await.unwrap(), 1);

        let mut reader = reopened.ephemeral_reader(Duration::from_millis(30)).await.unwrap();
        let records = drain(&mut reader).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].data, b"next");
    }

    #[tokio::test]
    async fn test_handles_sharing_a_segment_get_distinct_offsets() {
        let dir = tempdir().unwrap();
        let a = fast_log(dir.path());
        let b = fast_log(dir.path());

        assert_eq!(a.append(b"from-a").await.unwrap(), 0);
        assert_eq!(b.append(b"from-b").await.unwrap(), 1);
        assert_eq!(a.append(b"again-a").await.unwrap(), 2);

        let mut consumer = a.durable_consumer("event_group").await.unwrap();
        let mut delivered = Vec::new();
        while let Some(record) = consumer.poll(Duration::from_millis(30)).await.unwrap() {
            consumer.commit(record.offset).await.unwrap();
            delivered.push(record.data);
        }

        assert_eq!(delivered, vec![b"from-a".to_vec(), b"from-b".to_vec(), b"again-a".to_vec()]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_from_many_handles() {
        let dir = tempdir().unwrap();
        let mut tasks = Vec::new();
        for writer in 0..4 {
            let log = fast_log(dir.path());
            tasks.push(tokio::spawn(async move {
                let mut offsets = Vec::new();
                for i in 0..10 {
                    let data = format!("w{}-{}", writer, i);
                    offsets.push(log.append(data.as_bytes()).await.unwrap());
                }
                offsets
            }));
        }

        let mut offsets = Vec::new();
        for task in tasks {
            offsets.extend(task.await.unwrap());
        }
        offsets.sort_unstable();
        assert_eq!(offsets, (0..40).collect::<Vec<u64>>());

        let reader_log = fast_log(dir.path());
        let mut reader = reader_log.ephemeral_reader(Duration::from_millis(30)).await.unwrap();
        assert_eq!(drain(&mut reader).await.len(), 40);
    }
}
