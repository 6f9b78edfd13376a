//! Grouped-media (album) aggregation.
//!
//! The first item carrying a group token opens a buffer and hands back a
//! receiver for the eventual flush. The buffer flushes once, either when the
//! source signals completion or when the deadline passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why an album was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Complete,
    Deadline,
    /// The relay is stopping and no more items will arrive.
    Drain,
}

/// Items collected for one album, handed over on flush.
#[derive(Debug)]
pub struct AlbumFlush<T> {
    pub group_token: String,
    pub items: Vec<T>,
    pub opened_at: Instant,
    pub flushed_at: Instant,
    pub reason: FlushReason,
}

struct AlbumBuffer<T> {
    items: Vec<T>,
    opened_at: Instant,
    timer: CancellationToken,
    flush: oneshot::Sender<AlbumFlush<T>>,
}

struct Inner<T> {
    buffers: Mutex<HashMap<String, AlbumBuffer<T>>>,
    flush_after: Duration,
    shutdown: CancellationToken,
}

impl<T> Inner<T> {
    fn buffers(&self) -> MutexGuard<'_, HashMap<String, AlbumBuffer<T>>> {
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush(&self, group_token: &str, reason: FlushReason) -> bool {
        let Some(buffer) = self.buffers().remove(group_token) else {
            return false;
        };

        buffer.timer.cancel();
        debug!(
            group_token,
            items = buffer.items.len(),
            ?reason,
            "Flushing album"
        );
        let _ = buffer.flush.send(AlbumFlush {
            group_token: group_token.to_string(),
            items: buffer.items,
            opened_at: buffer.opened_at,
            flushed_at: Instant::now(),
            reason,
        });
        true
    }
}

/// Collects album items until completion or deadline.
///
/// Group tokens must already be scoped to their conversation.
pub struct AlbumAggregator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AlbumAggregator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> AlbumAggregator<T> {
    pub fn new(flush_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffers: Mutex::new(HashMap::new()),
                flush_after,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Add an item to its album.
    ///
    /// Returns the flush receiver when this item opened a new buffer, `None`
    /// when it joined an existing one.
    pub fn push(&self, group_token: &str, item: T) -> Option<oneshot::Receiver<AlbumFlush<T>>> {
        let mut buffers = self.inner.buffers();

        if let Some(buffer) = buffers.get_mut(group_token) {
            buffer.items.push(item);
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let timer = self.inner.shutdown.child_token();
        let opened_at = Instant::now();
        buffers.insert(
            group_token.to_string(),
            AlbumBuffer {
                items: vec![item],
                opened_at,
                timer: timer.clone(),
                flush: tx,
            },
        );
        drop(buffers);

        let inner = self.inner.clone();
        let token = group_token.to_string();
        let deadline = opened_at + self.inner.flush_after;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    inner.flush(&token, FlushReason::Deadline);
                }
                _ = timer.cancelled() => {}
            }
        });

        Some(rx)
    }

    /// The source signalled the album is complete; flush it now.
    ///
    /// Returns `false` if no such album is open (already flushed or unknown).
    pub fn complete(&self, group_token: &str) -> bool {
        self.inner.flush(group_token, FlushReason::Complete)
    }

    /// Flush every open album now. Returns how many were flushed.
    pub fn flush_all(&self) -> usize {
        let tokens: Vec<String> = self.inner.buffers().keys().cloned().collect();
        tokens
            .iter()
            .filter(|token| self.inner.flush(token, FlushReason::Drain))
            .count()
    }

    /// Stop all flush timers. Open albums are dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.buffers().clear();
    }
}
