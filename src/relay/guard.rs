//! Idempotency index.
//!
//! Every relayed message passes [`DedupGuard::admit`] before any translation
//! or media work. Delivered keys are kept in memory and in the delivered log
//! until the dedup horizon passes.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::common::error::StorageResult;
use crate::common::messages::IdempotencyKey;
use crate::store::{DeliveredLog, DeliveredRecord};

/// Outcome of [`DedupGuard::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Duplicate,
}

#[derive(Debug, Clone)]
enum KeyState {
    InFlight,
    Delivered(DeliveredRecord),
    /// Terminal failure; a later re-ingestion may try again.
    Failed,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    state: KeyState,
    at: DateTime<Utc>,
}

impl IndexEntry {
    fn now(state: KeyState) -> Self {
        Self {
            state,
            at: Utc::now(),
        }
    }
}

/// Shared idempotency index backed by the delivered log.
pub struct DedupGuard {
    index: DashMap<IdempotencyKey, IndexEntry>,
    log: Option<DeliveredLog>,
    horizon: chrono::Duration,
}

impl DedupGuard {
    /// Open the guard, loading delivered keys younger than `horizon`.
    pub async fn open(state_dir: impl AsRef<Path>, horizon: Duration) -> StorageResult<Self> {
        let (log, records) = DeliveredLog::open(state_dir, horizon).await?;
        let guard = Self::with_log(Some(log), horizon);
        for record in records {
            let at = record.at;
            guard.index.insert(
                record.key.clone(),
                IndexEntry {
                    state: KeyState::Delivered(record),
                    at,
                },
            );
        }
        Ok(guard)
    }

    /// A guard that keeps its index in memory only.
    #[cfg(test)]
    pub fn in_memory(horizon: Duration) -> Self {
        Self::with_log(None, horizon)
    }

    fn with_log(log: Option<DeliveredLog>, horizon: Duration) -> Self {
        Self {
            index: DashMap::new(),
            log,
            horizon: chrono::Duration::from_std(horizon)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    /// Claim `key` for processing.
    ///
    /// A key that is in flight or delivered is a duplicate. A key whose last
    /// attempt failed may be claimed again.
    pub fn admit(&self, key: &IdempotencyKey) -> Admission {
        match self.index.entry(key.clone()) {
            Entry::Occupied(mut entry) => match entry.get().state {
                KeyState::InFlight | KeyState::Delivered(_) => {
                    debug!(key = %key, "Dropping duplicate");
                    Admission::Duplicate
                }
                KeyState::Failed => {
                    entry.insert(IndexEntry::now(KeyState::InFlight));
                    Admission::Proceed
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(IndexEntry::now(KeyState::InFlight));
                Admission::Proceed
            }
        }
    }

    /// Record a delivery.
    ///
    /// The key counts as delivered in memory even if persisting fails; the
    /// error is fatal to the caller.
    pub async fn delivered(&self, record: DeliveredRecord) -> StorageResult<()> {
        self.index.insert(
            record.key.clone(),
            IndexEntry {
                at: record.at,
                state: KeyState::Delivered(record.clone()),
            },
        );
        match &self.log {
            Some(log) => log.append(&record).await,
            None => Ok(()),
        }
    }

    pub fn failed(&self, key: &IdempotencyKey) {
        self.index.insert(key.clone(), IndexEntry::now(KeyState::Failed));
    }

    /// The delivered copy of `key`, if any.
    pub fn delivered_copy(&self, key: &IdempotencyKey) -> Option<DeliveredRecord> {
        self.index.get(key).and_then(|entry| match &entry.state {
            KeyState::Delivered(record) => Some(record.clone()),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn is_delivered(&self, key: &IdempotencyKey) -> bool {
        self.delivered_copy(key).is_some()
    }

    /// Forget terminal keys older than the horizon. In-flight keys are kept.
    pub fn evict_expired(&self) -> usize {
        let cutoff = Utc::now() - self.horizon;
        let before = self.index.len();
        self.index.retain(|_, entry| {
            matches!(entry.state, KeyState::InFlight) || entry.at >= cutoff
        });
        let evicted = before.saturating_sub(self.index.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired dedup keys");
        }
        evicted
    }

    /// Rewrite the delivered log without records past the horizon.
    pub async fn compact(&self) -> StorageResult<usize> {
        match &self.log {
            Some(log) => log.compact().await,
            None => Ok(0),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::common::types::Direction;

    const HOUR: Duration = Duration::from_secs(3600);

    fn key(id: &str) -> IdempotencyKey {
        IdempotencyKey::derive(Direction::TelegramToSignal, &"chat".into(), &id.into())
    }

    #[test]
    fn test_second_admit_is_duplicate() {
        let guard = DedupGuard::in_memory(HOUR);
        assert_eq!(guard.admit(&key("1")), Admission::Proceed);
        assert_eq!(guard.admit(&key("1")), Admission::Duplicate);
        assert_eq!(guard.admit(&key("2")), Admission::Proceed);
    }

    #[tokio::test]
    async fn test_delivered_key_stays_duplicate() {
        let guard = DedupGuard::in_memory(HOUR);
        guard.admit(&key("1"));
        guard
            .delivered(DeliveredRecord::new(key("1"), "group".into(), "99".into()))
            .await
            .unwrap();

        assert_eq!(guard.admit(&key("1")), Admission::Duplicate);
        assert_eq!(
            guard.delivered_copy(&key("1")).unwrap().dest_message_id.as_str(),
            "99"
        );
    }

    #[test]
    fn test_failed_key_can_be_readmitted() {
        let guard = DedupGuard::in_memory(HOUR);
        guard.admit(&key("1"));
        guard.failed(&key("1"));

        assert_eq!(guard.admit(&key("1")), Admission::Proceed);
        assert_eq!(guard.admit(&key("1")), Admission::Duplicate);
    }

    #[tokio::test]
    async fn test_delivered_keys_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let guard = DedupGuard::open(dir.path(), HOUR).await.unwrap();
            guard.admit(&key("1"));
            guard
                .delivered(DeliveredRecord::new(key("1"), "group".into(), "99".into()))
                .await
                .unwrap();
        }

        let guard = DedupGuard::open(dir.path(), HOUR).await.unwrap();
        assert!(guard.is_delivered(&key("1")));
        assert_eq!(guard.admit(&key("1")), Admission::Duplicate);
    }

    #[tokio::test]
    async fn test_evicts_only_expired_terminal_keys() {
        let guard = DedupGuard::in_memory(HOUR);
        guard.admit(&key("in-flight"));

        let mut old = DeliveredRecord::new(key("old"), "group".into(), "1".into());
        old.at = Utc::now() - chrono::Duration::hours(2);
        guard.delivered(old).await.unwrap();
        guard
            .delivered(DeliveredRecord::new(key("fresh"), "group".into(), "2".into()))
            .await
            .unwrap();

        assert_eq!(guard.evict_expired(), 1);
        assert_eq!(guard.len(), 2);
        assert_eq!(guard.admit(&key("old")), Admission::Proceed);
        assert_eq!(guard.admit(&key("in-flight")), Admission::Duplicate);
    }

    #[tokio::test]
    async fn test_compaction_keeps_evicted_keys_off_disk() {
        let dir = TempDir::new().unwrap();
        {
            let guard = DedupGuard::open(dir.path(), HOUR).await.unwrap();
            let mut old = DeliveredRecord::new(key("old"), "group".into(), "1".into());
            old.at = Utc::now() - chrono::Duration::hours(2);
            guard.delivered(old).await.unwrap();
            guard
                .delivered(DeliveredRecord::new(key("fresh"), "group".into(), "2".into()))
                .await
                .unwrap();

            assert_eq!(guard.evict_expired(), 1);
            assert_eq!(guard.compact().await.unwrap(), 1);
        }

        let log = std::fs::read_to_string(dir.path().join("delivered.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 1);
        let guard = DedupGuard::open(dir.path(), HOUR).await.unwrap();
        assert_eq!(guard.len(), 1);
        assert!(guard.is_delivered(&key("fresh")));
    }

    #[tokio::test]
    async fn test_in_memory_compaction_is_a_no_op() {
        let guard = DedupGuard::in_memory(HOUR);
        assert_eq!(guard.compact().await.unwrap(), 0);
    }
}
