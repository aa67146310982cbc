//! Durable queue module for payloads awaiting delivery.
//!
//! The queue is an append-only log of JSON-line records on disk, mirrored by
//! an in-memory index ordered by id. Every mutation is appended and synced
//! before the index changes, so the file alone reconstructs the queue after
//! a restart.
//!
//! Record kinds:
//!
//! ```text
//! {"op":"enqueue","id":7,"created_at":"2026-10-19T08:30:00Z","payload":"{...}"}
//! {"op":"delete","id":7}
//! {"op":"watermark","next_id":8}
//! ```
//!
//! The log is compacted (rewritten through a temp file and renamed) when it
//! drains or accumulates too many dead records. A `watermark` record keeps
//! ids monotonic across compactions.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::payload::Payload;

/// Dead records tolerated before the log is rewritten.
const COMPACT_THRESHOLD: usize = 1_024;

/// A payload waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Monotonic id; insertion order
    pub id: u64,

    /// When the payload was enqueued
    pub created_at: DateTime<Utc>,

    /// Serialized payload JSON
    pub payload: String,
}

impl QueueEntry {
    /// Decode the stored payload.
    pub fn decode(&self) -> Result<Payload, serde_json::Error> {
        Payload::from_json(&self.payload)
    }
}

/// Errors that can occur during queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Reading or writing the log file failed
    #[error("queue I/O error: {0}")]
    Io(#[from] io::Error),

    /// A payload or record could not be encoded
    #[error("queue encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The blocking storage task did not complete
    #[error("queue storage task failed: {0}")]
    Task(String),
}

/// One line of the log file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum QueueRecord {
    Enqueue {
        id: u64,
        created_at: DateTime<Utc>,
        payload: String,
    },
    Delete {
        id: u64,
    },
    Watermark {
        next_id: u64,
    },
}

/// File-backed state guarded by the queue mutex.
struct QueueLog {
    path: PathBuf,
    writer: BufWriter<File>,
    entries: BTreeMap<u64, QueueEntry>,
    next_id: u64,

    /// Records in the file that no longer describe a live entry
    dead_records: usize,

    /// A failed append may have left a partial line at the end of the file
    torn_tail: bool,
}

impl QueueLog {
    fn open(path: &Path) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (entries, next_id) = match File::open(path) {
            Ok(file) => replay(BufReader::new(file))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => (BTreeMap::new(), 1),
            Err(e) => return Err(e.into()),
        };

        let writer = BufWriter::new(OpenOptions::new().create(true).append(true).open(path)?);
        let mut log = Self {
            path: path.to_path_buf(),
            writer,
            entries,
            next_id,
            dead_records: 0,
            torn_tail: false,
        };

        // Start every session from a clean, fully valid file
        log.compact()?;
        Ok(log)
    }

    fn append(&mut self, record: &QueueRecord) -> Result<(), QueueError> {
        if let Err(e) = self.write_record(record) {
            // Leave no partial line behind for the next append to extend
            if let Err(compact_err) = self.compact() {
                warn!(error = %compact_err, "Queue log rewrite after failed append failed");
                self.torn_tail = true;
            }
            return Err(e);
        }
        Ok(())
    }

    fn write_record(&mut self, record: &QueueRecord) -> Result<(), QueueError> {
        let mut line = String::new();
        if self.torn_tail {
            // Terminate the partial line so this record stands on its own
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(record)?);
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.torn_tail = false;
        Ok(())
    }

    fn enqueue(&mut self, payload: String) -> Result<u64, QueueError> {
        let id = self.next_id;
        let created_at = Utc::now();

        // Burn the id even if the write fails so it is never handed out twice
        self.next_id += 1;

        self.append(&QueueRecord::Enqueue {
            id,
            created_at,
            payload: payload.clone(),
        })?;

        self.entries.insert(
            id,
            QueueEntry {
                id,
                created_at,
                payload,
            },
        );
        Ok(id)
    }

    fn delete(&mut self, id: u64) -> Result<bool, QueueError> {
        if !self.entries.contains_key(&id) {
            return Ok(false);
        }

        self.append(&QueueRecord::Delete { id })?;
        self.entries.remove(&id);
        self.dead_records += 2;

        if self.entries.is_empty() || self.dead_records >= COMPACT_THRESHOLD {
            if let Err(e) = self.compact() {
                // The delete itself is durable; compaction retries next time
                warn!(error = %e, path = %self.path.display(), "Queue compaction failed");
            }
        }

        Ok(true)
    }

    /// Rewrite the log with only the live entries and the id watermark.
    fn compact(&mut self) -> Result<(), QueueError> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            let watermark = serde_json::to_string(&QueueRecord::Watermark {
                next_id: self.next_id,
            })?;
            writeln!(out, "{}", watermark)?;

            for entry in self.entries.values() {
                let record = serde_json::to_string(&QueueRecord::Enqueue {
                    id: entry.id,
                    created_at: entry.created_at,
                    payload: entry.payload.clone(),
                })?;
                writeln!(out, "{}", record)?;
            }

            out.flush()?;
            out.get_ref().sync_all()?;
        }

        fs::rename(&tmp, &self.path)?;
        self.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        self.dead_records = 0;
        self.torn_tail = false;

        debug!(
            live = self.entries.len(),
            next_id = self.next_id,
            "Compacted queue log"
        );
        Ok(())
    }
}

/// Rebuild the index from a log.
///
/// Unreadable lines (torn writes) are skipped and counted; every complete
/// record before and after them is replayed.
fn replay(reader: impl BufRead) -> Result<(BTreeMap<u64, QueueEntry>, u64), QueueError> {
    let mut entries = BTreeMap::new();
    let mut next_id: u64 = 1;
    let mut skipped: usize = 0;

    for (line_no, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let record = std::str::from_utf8(&line)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                if text.trim().is_empty() {
                    Ok(None)
                } else {
                    serde_json::from_str::<QueueRecord>(text)
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
            });

        let record = match record {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                skipped += 1;
                warn!(line = line_no + 1, error = %e, "Skipping corrupt queue record");
                continue;
            }
        };

        match record {
            QueueRecord::Enqueue {
                id,
                created_at,
                payload,
            } => {
                next_id = next_id.max(id + 1);
                entries.insert(
                    id,
                    QueueEntry {
                        id,
                        created_at,
                        payload,
                    },
                );
            }
            QueueRecord::Delete { id } => {
                entries.remove(&id);
            }
            QueueRecord::Watermark { next_id: mark } => {
                next_id = next_id.max(mark);
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, recovered = entries.len(), "Queue log contained corrupt records");
    }

    Ok((entries, next_id))
}

/// Restart-surviving FIFO of undelivered payloads.
///
/// Cheap to clone; all clones share one log. Each operation takes the lock
/// once on the blocking pool and releases it before returning, so the
/// sampling loop and the flush worker can use the queue concurrently.
#[derive(Clone)]
pub struct DurableQueue {
    log: Arc<Mutex<QueueLog>>,

    /// Entry count published at the end of every critical section
    pending: Arc<AtomicUsize>,
    path: PathBuf,
}

impl DurableQueue {
    /// Open (or create) the queue backed by `path`, replaying existing records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let log = QueueLog::open(&path)?;

        info!(
            path = %path.display(),
            pending = log.entries.len(),
            next_id = log.next_id,
            "Durable queue opened"
        );

        Ok(Self {
            pending: Arc::new(AtomicUsize::new(log.entries.len())),
            log: Arc::new(Mutex::new(log)),
            path,
        })
    }

    /// Append a payload; returns its id.
    pub async fn enqueue(&self, payload: &Payload) -> Result<u64, QueueError> {
        let json = payload.to_json()?;
        let id = self.with_log(move |log| log.enqueue(json)).await?;
        debug!(id, "Payload enqueued");
        Ok(id)
    }

    /// Snapshot of every entry, oldest first.
    pub async fn list_all(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.with_log(|log| Ok(log.entries.values().cloned().collect()))
            .await
    }

    /// Remove one entry. Returns `false` if no entry had this id.
    pub async fn delete(&self, id: u64) -> Result<bool, QueueError> {
        self.with_log(move |log| log.delete(id)).await
    }

    /// Number of pending entries. Never takes the log lock.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run one short critical section on the blocking pool.
    async fn with_log<T, F>(&self, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueueLog) -> Result<T, QueueError> + Send + 'static,
    {
        let log = Arc::clone(&self.log);
        let pending = Arc::clone(&self.pending);
        tokio::task::spawn_blocking(move || {
            let mut guard = log.lock();
            let result = op(&mut guard);
            pending.store(guard.entries.len(), Ordering::Release);
            result
        })
        .await
        .map_err(|e| QueueError::Task(e.to_string()))?
    }
}
