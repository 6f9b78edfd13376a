//! Delivery of admitted messages to the destination platform.
//!
//! A message is translated once, then each attempt resolves the destination,
//! prepares media (kept across attempts) and sends. Transient failures are
//! retried under the shared [`RetryPolicy`]; anything else fails the message.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::error::{Classify, ErrorClass, RelayError, RelayResult};
use crate::common::messages::{Attachment, IdempotencyKey, MessageStatus, RelayMessage};
use crate::common::retry::{pause, RetryPolicy};
use crate::common::types::{
    ConversationId, ConversationKind, Direction, GroupId, MessageId, Platform, WireText,
};
use crate::config::types::Config;
use crate::media::{AlbumFlush, MediaPipeline, PreparedMedia};
use crate::platform::{IncomingMessage, PlatformClient};
use crate::store::DeliveredRecord;
use crate::translate::Translator;

use super::guard::{Admission, DedupGuard};
use super::ingest::IngestPolicy;
use super::ordering::{LaneHandler, LaneKey};
use super::provision::GroupProvisioner;

/// One item on a (conversation, direction) lane.
#[derive(Debug)]
pub enum Work {
    /// A single message, already admitted.
    Message {
        key: IdempotencyKey,
        message: IncomingMessage,
    },
    /// An album still aggregating; admitted once it flushes.
    Album {
        group_token: String,
        flush: oneshot::Receiver<AlbumFlush<IncomingMessage>>,
    },
    Deletion { message_ids: Vec<MessageId> },
}

/// Content of one destination send, from a single message or a whole album.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub conversation: ConversationId,
    /// Source messages, in arrival order.
    pub message_ids: Vec<MessageId>,
    pub kind: ConversationKind,
    pub sender_name: Option<String>,
    pub text: WireText,
    pub attachments: Vec<Attachment>,
}

impl Outbound {
    pub fn single(message: IncomingMessage) -> Self {
        Self {
            conversation: message.conversation,
            message_ids: vec![message.message_id],
            kind: message.kind,
            sender_name: message.sender_name,
            text: message.text,
            attachments: message.attachments,
        }
    }

    /// Merge album parts into one send. The first non-empty text is the caption.
    pub fn album(parts: Vec<IncomingMessage>) -> Option<Self> {
        let mut parts = parts.into_iter();
        let mut outbound = Self::single(parts.next()?);
        for part in parts {
            outbound.message_ids.push(part.message_id);
            if outbound.text.is_empty() {
                outbound.text = part.text;
            }
            if outbound.sender_name.is_none() {
                outbound.sender_name = part.sender_name;
            }
            outbound.attachments.extend(part.attachments);
        }
        Some(outbound)
    }
}

/// Sends translated messages, provisioning groups on the way.
pub struct Dispatcher {
    translator: Translator,
    policy: IngestPolicy,
    media: MediaPipeline,
    provisioner: Arc<GroupProvisioner>,
    guard: Arc<DedupGuard>,
    telegram: Arc<dyn PlatformClient>,
    signal: Arc<dyn PlatformClient>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        media: MediaPipeline,
        provisioner: Arc<GroupProvisioner>,
        guard: Arc<DedupGuard>,
        telegram: Arc<dyn PlatformClient>,
        signal: Arc<dyn PlatformClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            translator: Translator::new(&config.formatting.attribution),
            policy: IngestPolicy::from_config(config),
            media,
            provisioner,
            guard,
            telegram,
            signal,
            retry: RetryPolicy::from_config(&config.retry),
            cancel,
        }
    }

    fn client(&self, platform: Platform) -> &Arc<dyn PlatformClient> {
        match platform {
            Platform::Telegram => &self.telegram,
            Platform::Signal => &self.signal,
        }
    }

    pub fn media(&self) -> &MediaPipeline {
        &self.media
    }

    /// Deliver one admitted message.
    ///
    /// Returns the message in its terminal state. Only fatal errors are
    /// returned as `Err`; every other failure leaves the message Failed.
    pub async fn dispatch(
        &self,
        key: IdempotencyKey,
        direction: Direction,
        outbound: Outbound,
    ) -> RelayResult<RelayMessage> {
        let source_id = outbound
            .message_ids
            .first()
            .cloned()
            .unwrap_or_else(|| MessageId::new(""));
        let mut relay =
            RelayMessage::with_key(outbound.conversation.clone(), source_id, direction, key);

        relay.advance(MessageStatus::Translating)?;
        let sender = self.policy.attribution_for(
            direction,
            outbound.kind,
            outbound.sender_name.as_deref(),
        );
        let translation = self.translator.translate(direction, &outbound.text, sender);
        if !translation.degradations.is_empty() {
            let dropped: Vec<String> = translation
                .degradations
                .iter()
                .map(|d| d.to_string())
                .collect();
            warn!(key = %relay.key, degradations = ?dropped, "Formatting degraded");
        }

        let mut prepared = None;
        let mut retry = self.retry.start();
        let outcome = loop {
            let result = self
                .attempt(&mut relay, &translation.wire, &outbound.attachments, &mut prepared)
                .await;
            let e = match result {
                Ok(sent) => break Ok(sent),
                Err(e) => e,
            };

            relay.fail(e.class())?;
            if e.class() == ErrorClass::Fatal {
                break Err(e);
            }
            match retry.next_delay(&e) {
                Some(delay) => {
                    debug!(
                        key = %relay.key,
                        attempt = relay.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying dispatch"
                    );
                    if !pause(delay, &self.cancel).await {
                        break Err(e);
                    }
                }
                None => break Err(e),
            }
        };

        if let Some(prepared) = prepared {
            self.media.discard(prepared).await;
        }

        match outcome {
            Ok((target, dest_id)) => {
                relay.deliver(dest_id.clone())?;
                self.guard
                    .delivered(DeliveredRecord::new(relay.key.clone(), target.clone(), dest_id))
                    .await?;
                info!(
                    key = %relay.key,
                    target = %target,
                    attempt = relay.attempt,
                    "Message delivered"
                );
                if self.policy.acknowledges_delivery(direction.source()) {
                    self.acknowledge(&outbound).await;
                }
                Ok(relay)
            }
            Err(e) if e.class() == ErrorClass::Fatal => {
                self.guard.failed(&relay.key);
                Err(e)
            }
            Err(e) => {
                self.guard.failed(&relay.key);
                error!(
                    key = %relay.key,
                    attempt = relay.attempt,
                    class = ?e.class(),
                    error = %e,
                    "Message failed"
                );
                Ok(relay)
            }
        }
    }

    async fn attempt(
        &self,
        relay: &mut RelayMessage,
        wire: &WireText,
        attachments: &[Attachment],
        prepared: &mut Option<PreparedMedia>,
    ) -> RelayResult<(ConversationId, MessageId)> {
        let target = self.resolve_target(relay.direction, &relay.conversation).await?;

        if prepared.is_none() {
            let media = self.media.prepare(relay.direction, attachments).await?;
            if media.converted() > 0 {
                debug!(
                    conversation = %relay.conversation,
                    converted = media.converted(),
                    "Media converted for destination"
                );
            }
            *prepared = Some(media);
        }
        let files = prepared
            .as_ref()
            .map(|p| p.attachments.as_slice())
            .unwrap_or_default();

        relay.advance(MessageStatus::Dispatching)?;
        let id = self
            .client(relay.direction.destination())
            .send_message(&target, wire, files)
            .await?;
        Ok((target, id))
    }

    /// Where messages from `conversation` travelling in `direction` go.
    async fn resolve_target(
        &self,
        direction: Direction,
        conversation: &ConversationId,
    ) -> RelayResult<ConversationId> {
        match direction {
            Direction::TelegramToSignal => Ok(self
                .provisioner
                .destination(conversation)
                .await?
                .as_conversation()),
            Direction::SignalToTelegram => self
                .provisioner
                .reverse(&GroupId::new(conversation.as_str()))
                .await?
                .map(|mapping| mapping.source_conversation_id)
                .ok_or_else(|| RelayError::NotMapped {
                    conversation: conversation.clone(),
                }),
        }
    }

    async fn acknowledge(&self, outbound: &Outbound) {
        let source = self.client(Platform::Signal);
        if let Err(e) = source
            .mark_read(&outbound.conversation, &outbound.message_ids)
            .await
        {
            warn!(
                conversation = %outbound.conversation,
                error = %e,
                "Failed to send read receipt"
            );
        }
    }

    /// Delete the destination copies of deleted source messages.
    ///
    /// Messages that were never delivered are skipped. Returns how many copies were deleted.
    pub async fn relay_deletions(
        &self,
        direction: Direction,
        conversation: &ConversationId,
        message_ids: &[MessageId],
    ) -> RelayResult<usize> {
        let client = self.client(direction.destination());
        let mut deleted = 0;

        for id in message_ids {
            let key = IdempotencyKey::derive(direction, conversation, id);
            let Some(record) = self.guard.delivered_copy(&key) else {
                debug!(key = %key, "No delivered copy to delete");
                continue;
            };

            let result = self
                .retry
                .run(&self.cancel, |_| {
                    client.delete_message(&record.dest, &record.dest_message_id)
                })
                .await;
            match result {
                Ok(()) => {
                    deleted += 1;
                    debug!(key = %key, dest = %record.dest, "Deleted relayed copy");
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to delete relayed copy"),
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl LaneHandler<Work> for Dispatcher {
    async fn handle(&self, lane: &LaneKey, work: Work) -> RelayResult<()> {
        let (conversation, direction) = lane;
        match work {
            Work::Message { key, message } => {
                self.dispatch(key, *direction, Outbound::single(message))
                    .await?;
            }
            Work::Album { group_token, flush } => {
                let Ok(flush) = flush.await else {
                    debug!(conversation = %conversation, group_token = %group_token, "Album dropped before flush");
                    return Ok(());
                };
                let key = IdempotencyKey::for_album(*direction, conversation, &group_token);
                if self.guard.admit(&key) == Admission::Duplicate {
                    return Ok(());
                }
                debug!(
                    key = %key,
                    items = flush.items.len(),
                    reason = ?flush.reason,
                    waited_ms = (flush.flushed_at - flush.opened_at).as_millis() as u64,
                    "Album ready"
                );
                match Outbound::album(flush.items) {
                    Some(outbound) => {
                        self.dispatch(key, *direction, outbound).await?;
                    }
                    None => self.guard.failed(&key),
                }
            }
            Work::Deletion { message_ids } => {
                self.relay_deletions(*direction, conversation, &message_ids)
                    .await?;
            }
        }
        Ok(())
    }
}
