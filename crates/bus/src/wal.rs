//! Write-ahead-log bus.
//!
//! Every publish is appended and fsynced before it is acknowledged to
//! the caller. Each event carries a bus sequence number; once every
//! subscriber has processed an event its sequence is acked, and the
//! persisted cursor advances over the contiguous acked prefix. On
//! startup, entries past the cursor are replayed, so a crash between
//! delivery and ack re-delivers (documented at-least-once; dedup
//! transforms are the user's remedy). The log is truncated only after
//! the new cursor has been fsynced.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use relay_core::config::BusConfig;
use relay_core::event::Event;

use crate::dispatch::{Acker, Dispatcher};
use crate::error::BusError;
use crate::traits::{EventBus, EventHandler};

const LOG_FILE: &str = "wal.log";
const CURSOR_FILE: &str = "cursor";

/// One JSON line in the log.
#[derive(Debug, Serialize, Deserialize)]
struct WalRecord {
    seq: u64,
    event: Event,
}

// ── Ack tracking ────────────────────────────────────────────────────

/// Tracks completed sequence numbers and advances a cursor over the
/// contiguous acked prefix. Out-of-order acks (different sources on
/// different shards) are parked until the gap closes.
struct AckTracker {
    cursor: u64,
    done: BTreeSet<u64>,
}

impl AckTracker {
    fn new(cursor: u64) -> Self {
        Self {
            cursor,
            done: BTreeSet::new(),
        }
    }

    /// Record `seq` as complete; returns the new cursor when the
    /// contiguous prefix advanced.
    fn complete(&mut self, seq: u64) -> Option<u64> {
        if seq <= self.cursor {
            return None;
        }
        self.done.insert(seq);
        let mut advanced = false;
        while self.done.remove(&(self.cursor + 1)) {
            self.cursor += 1;
            advanced = true;
        }
        advanced.then_some(self.cursor)
    }
}

// ── WAL bus ─────────────────────────────────────────────────────────

struct WalInner {
    file: File,
    next_seq: u64,
    bytes: u64,
    acked: AckTracker,
}

impl WalInner {
    fn truncate(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_data()?;
        self.bytes = 0;
        Ok(())
    }
}

pub struct WalBus {
    dispatcher: Dispatcher,
    inner: Arc<Mutex<WalInner>>,
    cursor_path: PathBuf,
    max_bytes: u64,
    /// Unacked entries found at open, dispatched by `start`.
    replay: Mutex<Vec<(u64, Event)>>,
}

impl WalBus {
    /// Open (or create) the log under `dir` and recover its state.
    pub fn open(dir: &Path, cfg: &BusConfig) -> Result<Self, BusError> {
        fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);
        let cursor_path = dir.join(CURSOR_FILE);

        let cursor = read_cursor(&cursor_path)?;
        let (replay, last_seq, good_bytes) = scan_log(&log_path, cursor)?;

        // A partial tail write from a crash is discarded.
        let disk_len = fs::metadata(&log_path).map(|m| m.len()).unwrap_or(0);
        if good_bytes < disk_len {
            warn!(
                discarded = disk_len - good_bytes,
                "truncating torn tail of WAL"
            );
            OpenOptions::new()
                .write(true)
                .open(&log_path)?
                .set_len(good_bytes)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let mut bytes = good_bytes;

        // Everything acked: the log holds no recoverable state.
        if replay.is_empty() && bytes > 0 {
            file.set_len(0)?;
            file.sync_data()?;
            bytes = 0;
        }

        if !replay.is_empty() {
            info!(entries = replay.len(), cursor, "WAL replay pending");
        }

        Ok(Self {
            dispatcher: Dispatcher::new(cfg),
            inner: Arc::new(Mutex::new(WalInner {
                file,
                next_seq: last_seq.max(cursor) + 1,
                bytes,
                acked: AckTracker::new(cursor),
            })),
            cursor_path,
            max_bytes: cfg.max_wal_bytes,
            replay: Mutex::new(replay),
        })
    }

    fn acker(&self) -> Acker {
        let inner = Arc::clone(&self.inner);
        let cursor_path = self.cursor_path.clone();
        Arc::new(move |seq| {
            let mut guard = inner.lock().expect("wal lock poisoned");
            if let Some(cursor) = guard.acked.complete(seq) {
                if let Err(e) = persist_cursor(&cursor_path, cursor) {
                    warn!(error = %e, cursor, "failed to persist WAL cursor");
                    return;
                }
                // Truncate once nothing unacked remains; the cursor is
                // already durable at this point.
                if cursor + 1 == guard.next_seq {
                    if let Err(e) = guard.truncate() {
                        warn!(error = %e, "failed to truncate WAL");
                    }
                }
            }
        })
    }
}

#[async_trait]
impl EventBus for WalBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        let (seq, event) = {
            let mut guard = self.inner.lock().expect("wal lock poisoned");
            let seq = guard.next_seq;
            let record = WalRecord { seq, event };
            let mut line = serde_json::to_vec(&record)
                .map_err(|e| BusError::Corrupt(e.to_string()))?;
            line.push(b'\n');

            if guard.bytes + line.len() as u64 > self.max_bytes {
                return Err(BusError::Full);
            }

            guard.file.write_all(&line)?;
            guard.file.sync_data()?;
            guard.next_seq += 1;
            guard.bytes += line.len() as u64;
            (seq, record.event)
        };
        self.dispatcher.enqueue(seq, event).await
    }

    async fn subscribe(&self, handler: EventHandler) -> Result<(), BusError> {
        self.dispatcher.subscribe(handler);
        Ok(())
    }

    async fn start(&self) -> Result<(), BusError> {
        self.dispatcher.start(Some(self.acker()));
        let pending: Vec<(u64, Event)> = {
            let mut guard = self.replay.lock().expect("replay lock poisoned");
            guard.drain(..).collect()
        };
        for (seq, event) in pending {
            self.dispatcher.enqueue(seq, event).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BusError> {
        self.dispatcher.shutdown().await;
        Ok(())
    }
}

// ── Recovery helpers ────────────────────────────────────────────────

fn read_cursor(path: &Path) -> Result<u64, BusError> {
    match fs::read_to_string(path) {
        Ok(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| BusError::Corrupt(format!("cursor file: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn persist_cursor(path: &Path, cursor: u64) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(cursor.to_string().as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Scan the log, returning unacked entries, the last sequence seen, and
/// the byte offset of the last well-formed record. Scanning stops at
/// the first torn or corrupt line.
fn scan_log(
    path: &Path,
    cursor: u64,
) -> Result<(Vec<(u64, Event)>, u64, u64), BusError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0, 0)),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut offset = 0u64;
    let mut last_seq = 0u64;
    let mut replay = Vec::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        if !line.ends_with('\n') {
            warn!("WAL ends in a torn record, discarding tail");
            break;
        }
        match serde_json::from_str::<WalRecord>(&line) {
            Ok(record) => {
                offset += n as u64;
                last_seq = record.seq;
                if record.seq > cursor {
                    replay.push((record.seq, record.event));
                }
            }
            Err(e) => {
                warn!(error = %e, "corrupt WAL record, discarding tail");
                break;
            }
        }
    }

    Ok((replay, last_seq, offset))
}
