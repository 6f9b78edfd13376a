//! Per-pair serialization of relay work.
//!
//! Each (conversation, direction) pair gets a bounded queue drained by a
//! single worker, so work for one pair runs strictly in arrival order while
//! different pairs proceed in parallel. A full queue blocks the producer.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::common::error::{Classify, ErrorClass, RelayError, RelayResult};
use crate::common::types::{ConversationId, Direction};

/// Identity of one ordered lane.
pub type LaneKey = (ConversationId, Direction);

/// Processes work items taken off a lane, one at a time.
#[async_trait]
pub trait LaneHandler<W>: Send + Sync + 'static {
    /// A fatal error stops every lane; other errors are logged and the lane continues.
    async fn handle(&self, lane: &LaneKey, work: W) -> RelayResult<()>;
}

struct Lane<W> {
    tx: mpsc::Sender<W>,
    task: JoinHandle<()>,
}

/// Bounded work queues keyed by (conversation, direction).
pub struct PairQueues<W> {
    lanes: DashMap<LaneKey, Lane<W>>,
    handler: Arc<dyn LaneHandler<W>>,
    capacity: usize,
    halt: CancellationToken,
}

impl<W: Send + 'static> PairQueues<W> {
    /// `halt` is cancelled when a handler reports a fatal error, and stops all lanes when cancelled.
    pub fn new(handler: Arc<dyn LaneHandler<W>>, capacity: usize, halt: CancellationToken) -> Self {
        Self {
            lanes: DashMap::new(),
            handler,
            capacity: capacity.max(1),
            halt,
        }
    }

    /// Queue `work` behind everything already queued for `lane`.
    ///
    /// Waits while the lane's queue is full.
    pub async fn push(&self, lane: LaneKey, work: W) -> RelayResult<()> {
        if self.halt.is_cancelled() {
            return Err(RelayError::Shutdown);
        }

        let tx = self
            .lanes
            .entry(lane.clone())
            .or_insert_with(|| self.spawn_lane(lane))
            .tx
            .clone();

        tx.send(work).await.map_err(|_| RelayError::Shutdown)
    }

    fn spawn_lane(&self, lane: LaneKey) -> Lane<W> {
        let (tx, rx) = mpsc::channel(self.capacity);
        debug!(conversation = %lane.0, direction = %lane.1, "Opening lane");
        let task = tokio::spawn(drain_lane(
            lane,
            rx,
            self.handler.clone(),
            self.halt.clone(),
        ));
        Lane { tx, task }
    }

    /// Close every lane and wait for queued work to finish.
    ///
    /// Lanes stop early if the halt token is cancelled.
    pub async fn shutdown(&self) {
        let keys: Vec<LaneKey> = self.lanes.iter().map(|lane| lane.key().clone()).collect();
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, lane)) = self.lanes.remove(&key) {
                drop(lane.tx);
                tasks.push(lane.task);
            }
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Lane task ended abnormally: {}", e);
            }
        }
    }
}

async fn drain_lane<W: Send + 'static>(
    lane: LaneKey,
    mut rx: mpsc::Receiver<W>,
    handler: Arc<dyn LaneHandler<W>>,
    halt: CancellationToken,
) {
    loop {
        let work = tokio::select! {
            biased;
            _ = halt.cancelled() => break,
            work = rx.recv() => match work {
                Some(work) => work,
                None => break,
            },
        };

        if let Err(e) = handler.handle(&lane, work).await {
            if e.class() == ErrorClass::Fatal {
                error!(
                    conversation = %lane.0,
                    direction = %lane.1,
                    error = %e,
                    "Fatal error, halting relay"
                );
                halt.cancel();
                break;
            }
            warn!(conversation = %lane.0, direction = %lane.1, error = %e, "Lane work failed");
        }
    }
    debug!(conversation = %lane.0, direction = %lane.1, "Lane closed");
}
