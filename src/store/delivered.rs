//! Append-only log of delivered idempotency keys.
//!
//! One JSON record per line in `delivered.jsonl`. Records older than the
//! dedup horizon are dropped when the log is opened and on each compaction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::common::error::{StorageError, StorageResult};
use crate::common::messages::IdempotencyKey;
use crate::common::types::{ConversationId, MessageId};

const DELIVERED_FILE: &str = "delivered.jsonl";

/// A message that reached the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredRecord {
    pub key: IdempotencyKey,
    pub dest_message_id: MessageId,
    /// Conversation or group the message was sent to.
    pub dest: ConversationId,
    pub at: DateTime<Utc>,
}

impl DeliveredRecord {
    pub fn new(key: IdempotencyKey, dest: ConversationId, dest_message_id: MessageId) -> Self {
        Self {
            key,
            dest_message_id,
            dest,
            at: Utc::now(),
        }
    }
}

/// Durable half of the dedup index.
pub struct DeliveredLog {
    path: PathBuf,
    horizon: chrono::Duration,
    write: Mutex<()>,
}

impl DeliveredLog {
    /// Open the log under `state_dir`, compacting it to records younger than `horizon`.
    ///
    /// Returns the log and the surviving records, oldest first.
    pub async fn open(
        state_dir: impl AsRef<Path>,
        horizon: Duration,
    ) -> StorageResult<(Self, Vec<DeliveredRecord>)> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir)
            .await
            .map_err(|e| StorageError::io(state_dir, e))?;

        let log = Self {
            path: state_dir.join(DELIVERED_FILE),
            horizon: chrono::Duration::from_std(horizon)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            write: Mutex::new(()),
        };
        let (records, _) = log.retain_live().await?;
        info!(path = %log.path.display(), records = records.len(), "Delivered log opened");

        Ok((log, records))
    }

    /// Append one record and flush it to disk.
    pub async fn append(&self, record: &DeliveredRecord) -> StorageResult<()> {
        let line = to_line(record)?;
        let _guard = self.write.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;
        Ok(())
    }

    /// Drop records older than the horizon from disk. Returns how many were dropped.
    pub async fn compact(&self) -> StorageResult<usize> {
        let _guard = self.write.lock().await;
        let (_, dropped) = self.retain_live().await?;
        Ok(dropped)
    }

    async fn read(&self) -> StorageResult<String> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    /// Read the log, rewriting it if any record expired or was unreadable.
    /// Returns the live records and how many lines were dropped.
    ///
    /// Callers other than `open` must hold the write lock.
    async fn retain_live(&self) -> StorageResult<(Vec<DeliveredRecord>, usize)> {
        let content = self.read().await?;
        let cutoff = Utc::now() - self.horizon;

        let mut total = 0usize;
        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            total += 1;
            match serde_json::from_str::<DeliveredRecord>(line) {
                Ok(record) if record.at >= cutoff => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(path = %self.path.display(), error = %e, "Skipping unreadable delivered record"),
            }
        }

        if records.len() != total {
            let mut compacted = String::new();
            for record in &records {
                compacted.push_str(&to_line(record)?);
            }
            let tmp = self.path.with_extension("jsonl.tmp");
            super::atomic_write_file(&tmp, &self.path, compacted.as_bytes()).await?;
            debug!(
                path = %self.path.display(),
                before = total,
                after = records.len(),
                "Compacted delivered log"
            );
        }

        let dropped = total - records.len();
        Ok((records, dropped))
    }
}

fn to_line(record: &DeliveredRecord) -> StorageResult<String> {
    let mut line =
        serde_json::to_string(record).map_err(|e| StorageError::Serialization(e.to_string()))?;
    line.push('\n');
    Ok(line)
}
