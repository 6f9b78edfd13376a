//! Event normalization and relay-level filters.
//!
//! Decides, per raw platform event, whether anything should be relayed and
//! whether the source message gets a read receipt. Runs before any
//! translation or media work.

use tracing::info;

use crate::common::messages::IdempotencyKey;
use crate::common::types::{ConversationId, ConversationKind, Direction, MessageId, Platform};
use crate::config::types::Config;
use crate::platform::{IncomingMessage, PlatformEvent};

use super::filter::MessageFilter;

/// What ingest does with one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Relay a single message.
    Message {
        direction: Direction,
        key: IdempotencyKey,
        message: IncomingMessage,
    },
    /// Add a message to an album buffer.
    AlbumItem {
        direction: Direction,
        album: String,
        message: IncomingMessage,
    },
    /// The album is complete.
    AlbumComplete { album: String },
    /// Delete the relayed copies of these messages.
    Deletion {
        direction: Direction,
        conversation: ConversationId,
        message_ids: Vec<MessageId>,
    },
    Ignored(&'static str),
}

/// Relay-level switches applied at ingest.
#[derive(Debug, Clone)]
pub struct IngestPolicy {
    bidirectional: bool,
    forward_channels: bool,
    relay_deletions: bool,
    receipts_for_messages: bool,
    receipts_for_channels: bool,
    content: MessageFilter,
}

impl IngestPolicy {
    pub fn from_config(config: &Config) -> Self {
        let content = MessageFilter::new(config.filters.as_ref());
        if content.has_patterns() {
            info!("Content filter enabled");
        }
        Self {
            bidirectional: config.relay.bidirectional,
            forward_channels: config.relay.forward_channels,
            relay_deletions: config.relay.relay_deletions,
            receipts_for_messages: config.relay.read_receipts.messages,
            receipts_for_channels: config.relay.read_receipts.channels,
            content,
        }
    }

    /// Whether a Telegram message should be marked read.
    ///
    /// Applies whether or not the message itself is relayed.
    pub fn marks_read(&self, platform: Platform, kind: ConversationKind) -> bool {
        match (platform, kind) {
            (Platform::Telegram, ConversationKind::Channel) => self.receipts_for_channels,
            (Platform::Telegram, _) => self.receipts_for_messages,
            (Platform::Signal, _) => false,
        }
    }

    /// Whether messages relayed out of `platform` are acknowledged after delivery.
    pub fn acknowledges_delivery(&self, platform: Platform) -> bool {
        platform == Platform::Signal
    }

    /// Attribution is added for Telegram group chats only.
    pub fn attribution_for<'a>(
        &self,
        direction: Direction,
        kind: ConversationKind,
        sender: Option<&'a str>,
    ) -> Option<&'a str> {
        match (direction, kind) {
            (Direction::TelegramToSignal, ConversationKind::Group) => {
                sender.filter(|name| !name.is_empty())
            }
            _ => None,
        }
    }

    /// Classify one event from `platform`.
    pub fn route(&self, platform: Platform, event: PlatformEvent) -> Routed {
        let direction = Direction::from_source(platform);
        if direction == Direction::SignalToTelegram && !self.bidirectional {
            return Routed::Ignored("bidirectional relay disabled");
        }

        match event {
            PlatformEvent::NewMessage(message) => self.route_message(direction, message),
            PlatformEvent::AlbumComplete {
                conversation,
                group_token,
            } => Routed::AlbumComplete {
                album: album_key(&conversation, &group_token),
            },
            PlatformEvent::Deletion {
                conversation,
                message_ids,
            } => {
                if !self.relay_deletions {
                    return Routed::Ignored("deletion relay disabled");
                }
                Routed::Deletion {
                    direction,
                    conversation,
                    message_ids,
                }
            }
            PlatformEvent::ReadReceipt { .. } => Routed::Ignored("read receipt"),
            PlatformEvent::Typing { .. } => Routed::Ignored("typing"),
        }
    }

    fn route_message(&self, direction: Direction, message: IncomingMessage) -> Routed {
        if message.is_empty() {
            return Routed::Ignored("empty message");
        }
        if direction == Direction::TelegramToSignal
            && message.kind == ConversationKind::Channel
            && !self.forward_channels
        {
            return Routed::Ignored("channel forwarding disabled");
        }
        if !message.text.is_empty() && self.content.should_filter(&message.text.text) {
            return Routed::Ignored("matched content filter");
        }

        if let Some(token) = &message.group_token {
            return Routed::AlbumItem {
                direction,
                album: album_key(&message.conversation, token),
                message,
            };
        }

        Routed::Message {
            direction,
            key: IdempotencyKey::derive(direction, &message.conversation, &message.message_id),
            message,
        }
    }
}

/// Album buffers are keyed per conversation.
pub fn album_key(conversation: &ConversationId, group_token: &str) -> String {
    format!("{}/{}", conversation, group_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::messages::{Attachment, MediaKind};
    use crate::common::types::WireText;
    use crate::config::parser::load_config_str;

    fn policy(extra: &str) -> IngestPolicy {
        let config = load_config_str(&format!(
            r#"
            relay {{
                state_dir = "/tmp/ferryman"
                {}
            }}
            filters {{ patterns = ["(?i)giveaway"] }}
            platforms {{
                telegram {{ command = "tg" }}
                signal {{ command = "sg" }}
            }}
        "#,
            extra
        ))
        .unwrap();
        IngestPolicy::from_config(&config)
    }

    fn message(kind: ConversationKind, text: &str) -> IncomingMessage {
        IncomingMessage {
            conversation: "-100".into(),
            message_id: "7".into(),
            kind,
            sender_name: Some("Alice".into()),
            text: WireText::plain(text),
            attachments: Vec::new(),
            group_token: None,
        }
    }

    #[test]
    fn test_group_message_is_relayed() {
        let routed = policy("").route(
            Platform::Telegram,
            PlatformEvent::NewMessage(message(ConversationKind::Group, "hi")),
        );
        let Routed::Message { direction, key, .. } = routed else {
            panic!("expected a message, got {:?}", routed);
        };
        assert_eq!(direction, Direction::TelegramToSignal);
        assert_eq!(key.as_str(), "tg>sg/-100/7");
    }

    #[test]
    fn test_channels_need_forwarding_enabled() {
        let event = PlatformEvent::NewMessage(message(ConversationKind::Channel, "news"));
        assert_eq!(
            policy("").route(Platform::Telegram, event.clone()),
            Routed::Ignored("channel forwarding disabled")
        );
        assert!(matches!(
            policy("forward_channels = true").route(Platform::Telegram, event),
            Routed::Message { .. }
        ));
    }

    #[test]
    fn test_signal_needs_bidirectional() {
        let event = PlatformEvent::NewMessage(message(ConversationKind::Group, "reply"));
        assert_eq!(
            policy("").route(Platform::Signal, event.clone()),
            Routed::Ignored("bidirectional relay disabled")
        );
        assert!(matches!(
            policy("bidirectional = true").route(Platform::Signal, event),
            Routed::Message {
                direction: Direction::SignalToTelegram,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_and_filtered_messages_are_dropped() {
        let p = policy("");
        assert_eq!(
            p.route(
                Platform::Telegram,
                PlatformEvent::NewMessage(message(ConversationKind::Group, ""))
            ),
            Routed::Ignored("empty message")
        );
        assert_eq!(
            p.route(
                Platform::Telegram,
                PlatformEvent::NewMessage(message(ConversationKind::Group, "Big GIVEAWAY"))
            ),
            Routed::Ignored("matched content filter")
        );
    }

    #[test]
    fn test_album_items_are_keyed_per_conversation() {
        let mut msg = message(ConversationKind::Group, "");
        msg.attachments.push(Attachment::new("/tmp/a.jpg", MediaKind::Photo));
        msg.group_token = Some("g1".into());

        let routed = policy("").route(Platform::Telegram, PlatformEvent::NewMessage(msg));
        assert!(matches!(routed, Routed::AlbumItem { ref album, .. } if album == "-100/g1"));

        let complete = policy("").route(
            Platform::Telegram,
            PlatformEvent::AlbumComplete {
                conversation: "-100".into(),
                group_token: "g1".into(),
            },
        );
        assert_eq!(
            complete,
            Routed::AlbumComplete {
                album: "-100/g1".into()
            }
        );
    }

    #[test]
    fn test_deletions_need_opt_in() {
        let event = PlatformEvent::Deletion {
            conversation: "-100".into(),
            message_ids: vec!["7".into()],
        };
        assert_eq!(
            policy("").route(Platform::Telegram, event.clone()),
            Routed::Ignored("deletion relay disabled")
        );
        assert!(matches!(
            policy("relay_deletions = true").route(Platform::Telegram, event),
            Routed::Deletion { .. }
        ));
    }

    #[test]
    fn test_read_receipt_policy() {
        let p = policy("read_receipts { channels = false }");
        assert!(p.marks_read(Platform::Telegram, ConversationKind::Group));
        assert!(!p.marks_read(Platform::Telegram, ConversationKind::Channel));
        assert!(!p.marks_read(Platform::Signal, ConversationKind::Group));
    }

    #[test]
    fn test_attribution_only_for_telegram_groups() {
        use ConversationKind::*;
        let p = policy("");
        let alice = Some("Alice");
        assert_eq!(
            p.attribution_for(Direction::TelegramToSignal, Group, alice),
            Some("Alice")
        );
        assert_eq!(p.attribution_for(Direction::TelegramToSignal, Private, alice), None);
        assert_eq!(p.attribution_for(Direction::TelegramToSignal, Channel, alice), None);
        assert_eq!(p.attribution_for(Direction::SignalToTelegram, Group, alice), None);
        assert_eq!(p.attribution_for(Direction::TelegramToSignal, Group, Some("")), None);
    }
}
