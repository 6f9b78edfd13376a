//! Relay orchestrator.
//!
//! Owns one ingest task per platform stream and the shared components they
//! feed: the dedup guard, the per-pair lanes and the album aggregator.
//! Storage failures halt the whole relay; everything else is contained to
//! the message it happened to.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::error::{Classify, ErrorClass, RelayError, RelayResult};
use crate::common::types::{ConversationId, Direction, GroupId, MessageId, Platform};
use crate::config::types::Config;
use crate::media::{AlbumAggregator, MediaPipeline, Transcoder};
use crate::platform::{IncomingMessage, PlatformClient, PlatformEvent};
use crate::store::MappingStore;

use super::dispatch::{Dispatcher, Work};
use super::guard::{Admission, DedupGuard};
use super::ingest::{IngestPolicy, Routed};
use super::ordering::PairQueues;
use super::provision::GroupProvisioner;

/// How often expired dedup keys are dropped from memory and from the delivered log.
const EVICTION_INTERVAL: Duration = Duration::from_secs(15 * 60);

struct Shared {
    policy: IngestPolicy,
    guard: Arc<DedupGuard>,
    provisioner: Arc<GroupProvisioner>,
    dispatcher: Arc<Dispatcher>,
    lanes: PairQueues<Work>,
    albums: AlbumAggregator<IncomingMessage>,
    telegram: Arc<dyn PlatformClient>,
    avatar_refresh: Option<Duration>,
    /// Cancelled on shutdown.
    stop: CancellationToken,
    /// Child of `stop`; also cancelled by a fatal error.
    halt: CancellationToken,
}

/// The relay core: ingest, ordering, provisioning and delivery.
#[derive(Clone)]
pub struct Relay {
    shared: Arc<Shared>,
}

impl Relay {
    pub fn new(
        config: &Config,
        store: Arc<dyn MappingStore>,
        guard: Arc<DedupGuard>,
        telegram: Arc<dyn PlatformClient>,
        signal: Arc<dyn PlatformClient>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let stop = CancellationToken::new();
        let halt = stop.child_token();

        let provisioner = Arc::new(GroupProvisioner::new(
            config,
            store,
            telegram.clone(),
            signal.clone(),
        ));
        let media = MediaPipeline::new(&config.media, config.scratch_dir(), transcoder);
        let dispatcher = Arc::new(Dispatcher::new(
            config,
            media,
            provisioner.clone(),
            guard.clone(),
            telegram.clone(),
            signal,
            halt.clone(),
        ));
        let lanes = PairQueues::new(
            dispatcher.clone(),
            config.relay.pair_queue_capacity,
            halt.clone(),
        );

        let avatar_refresh = (config.groups.avatar_refresh_mins > 0)
            .then(|| Duration::from_secs(config.groups.avatar_refresh_mins * 60));

        Self {
            shared: Arc::new(Shared {
                policy: IngestPolicy::from_config(config),
                guard,
                provisioner,
                dispatcher,
                lanes,
                albums: AlbumAggregator::new(Duration::from_millis(config.media.album_flush_ms)),
                telegram,
                avatar_refresh,
                stop,
                halt,
            }),
        }
    }

    /// Consume both event streams until they end, [`Relay::stop`] is called,
    /// or a fatal error halts the relay.
    pub async fn run(
        &self,
        telegram_events: mpsc::Receiver<PlatformEvent>,
        signal_events: mpsc::Receiver<PlatformEvent>,
    ) -> RelayResult<()> {
        info!("Relay started");

        let telegram = tokio::spawn(self.clone().ingest_loop(Platform::Telegram, telegram_events));
        let signal = tokio::spawn(self.clone().ingest_loop(Platform::Signal, signal_events));
        let maintenance = tokio::spawn(self.clone().maintenance_loop());

        for (platform, task) in [(Platform::Telegram, telegram), (Platform::Signal, signal)] {
            if let Err(e) = task.await {
                error!(platform = %platform, "Ingest task panicked: {}", e);
            }
        }

        maintenance.abort();
        self.shutdown().await;

        if self.is_halted() {
            error!("Relay halted");
            return Err(RelayError::Halted);
        }
        info!("Relay stopped");
        Ok(())
    }

    /// Ask a running relay to stop. Work already queued but not started is abandoned.
    pub fn stop(&self) {
        self.shared.stop.cancel();
    }

    /// Whether a fatal error stopped the relay.
    pub fn is_halted(&self) -> bool {
        self.shared.halt.is_cancelled() && !self.shared.stop.is_cancelled()
    }

    async fn shutdown(&self) {
        let shared = &self.shared;
        let drained = shared.albums.flush_all();
        if drained > 0 {
            debug!(albums = drained, "Flushed open albums");
        }
        shared.albums.shutdown();
        shared.lanes.shutdown().await;
        shared.dispatcher.media().shutdown().await;
    }

    async fn ingest_loop(self, platform: Platform, mut events: mpsc::Receiver<PlatformEvent>) {
        let halt = self.shared.halt.clone();
        loop {
            let event = tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!(platform = %platform, "Event stream closed");
                        break;
                    }
                },
            };

            if let Err(e) = self.ingest(platform, event).await {
                if e.class() == ErrorClass::Fatal {
                    error!(platform = %platform, error = %e, "Fatal error, halting relay");
                    halt.cancel();
                    break;
                }
                warn!(platform = %platform, error = %e, "Failed to ingest event");
            }
        }
    }

    /// Route one event from `platform`.
    pub async fn ingest(&self, platform: Platform, event: PlatformEvent) -> RelayResult<()> {
        let shared = &self.shared;
        let receipt = match &event {
            PlatformEvent::NewMessage(message) if shared.policy.marks_read(platform, message.kind) => {
                Some((message.conversation.clone(), message.message_id.clone()))
            }
            _ => None,
        };

        match shared.policy.route(platform, event) {
            Routed::Ignored(reason) => {
                debug!(platform = %platform, reason, "Event ignored");
                self.mark_read(receipt);
            }
            Routed::Message {
                direction,
                key,
                message,
            } => {
                if !self.relays_back(direction, &message.conversation).await? {
                    return Ok(());
                }
                if shared.guard.admit(&key) == Admission::Duplicate {
                    return Ok(());
                }
                self.mark_read(receipt);
                let lane = (message.conversation.clone(), direction);
                shared.lanes.push(lane, Work::Message { key, message }).await?;
            }
            Routed::AlbumItem {
                direction,
                album,
                message,
            } => {
                self.mark_read(receipt);
                if !self.relays_back(direction, &message.conversation).await? {
                    return Ok(());
                }
                let conversation = message.conversation.clone();
                let group_token = message.group_token.clone().unwrap_or_default();
                if let Some(flush) = shared.albums.push(&album, message) {
                    let work = Work::Album { group_token, flush };
                    shared.lanes.push((conversation, direction), work).await?;
                }
            }
            Routed::AlbumComplete { album } => {
                if !shared.albums.complete(&album) {
                    debug!(album = %album, "Completion for an album that is not open");
                }
            }
            Routed::Deletion {
                direction,
                conversation,
                message_ids,
            } => {
                let work = Work::Deletion { message_ids };
                shared.lanes.push((conversation, direction), work).await?;
            }
        }
        Ok(())
    }

    /// Signal messages are relayed only from groups mapped back to Telegram.
    async fn relays_back(&self, direction: Direction, conversation: &ConversationId) -> RelayResult<bool> {
        if direction != Direction::SignalToTelegram {
            return Ok(true);
        }
        let group = GroupId::new(conversation.as_str());
        let mapped = self.shared.provisioner.reverse(&group).await?.is_some();
        if !mapped {
            debug!(group = %group, "Message from an unmapped Signal group");
        }
        Ok(mapped)
    }

    /// Send a read receipt in the background. Duplicates never get here.
    fn mark_read(&self, receipt: Option<(ConversationId, MessageId)>) {
        let Some((conversation, id)) = receipt else {
            return;
        };
        let telegram = self.shared.telegram.clone();
        let ids = vec![id];
        tokio::spawn(async move {
            if let Err(e) = telegram.mark_read(&conversation, &ids).await {
                warn!(conversation = %conversation, error = %e, "Failed to mark message read");
            }
        });
    }

    async fn maintenance_loop(self) {
        let shared = self.shared.clone();
        let mut eviction = tokio::time::interval(EVICTION_INTERVAL);
        let mut avatars =
            tokio::time::interval(shared.avatar_refresh.unwrap_or(Duration::from_secs(86_400)));
        eviction.tick().await;
        avatars.tick().await;

        loop {
            tokio::select! {
                _ = shared.halt.cancelled() => break,
                _ = eviction.tick() => {
                    shared.guard.evict_expired();
                    match shared.guard.compact().await {
                        Ok(0) => {}
                        Ok(dropped) => debug!(dropped, "Compacted delivered log"),
                        Err(e) if e.class() == ErrorClass::Fatal => {
                            error!(error = %e, "Fatal error compacting delivered log, halting relay");
                            shared.halt.cancel();
                            break;
                        }
                        Err(e) => warn!(error = %e, "Delivered log compaction failed"),
                    }
                }
                _ = avatars.tick(), if shared.avatar_refresh.is_some() => {
                    if let Err(e) = shared.provisioner.resync_all().await {
                        if e.class() == ErrorClass::Fatal {
                            error!(error = %e, "Fatal error during avatar sync, halting relay");
                            shared.halt.cancel();
                            break;
                        }
                        warn!(error = %e, "Avatar sync failed");
                    }
                }
            }
        }
    }
}
