//! Canonical relay message types.
//!
//! A [`RelayMessage`] tracks one unit of forwarded content through the
//! status machine; attachments describe media already downloaded by a transport.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::error::{ErrorClass, RelayError};
use crate::common::types::{ConversationId, Direction, MessageId};

/// Processing status of a relay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Translating,
    Dispatching,
    Delivered,
    Failed,
}

impl MessageStatus {
    /// Whether the status machine has an edge from `self` to `to`.
    ///
    /// `Failed -> Dispatching` exists only for retryable failures; the caller
    /// checks retryability and the attempt bound.
    pub fn can_transition(&self, to: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, to) {
            (Pending, Translating) | (Translating, Dispatching) | (Dispatching, Delivered) => true,
            (Pending | Translating | Dispatching, Failed) => true,
            (Failed, Dispatching) => true,
            _ => false,
        }
    }
}

/// Deterministic dedup key for one message in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key from the direction, source conversation and source message.
    ///
    /// Platform message ids are only unique within a conversation, so the
    /// conversation is part of the key.
    pub fn derive(
        direction: Direction,
        conversation: &ConversationId,
        source_message: &MessageId,
    ) -> Self {
        Self(format!("{}/{}/{}", direction.tag(), conversation, source_message))
    }

    /// Key for an album, correlated by the platform's group token.
    pub fn for_album(direction: Direction, conversation: &ConversationId, group_token: &str) -> Self {
        Self(format!("{}/{}/album:{}", direction.tag(), conversation, group_token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of forwarded content.
#[derive(Debug, Clone)]
pub struct RelayMessage {
    pub source_message_id: MessageId,
    /// Set once the destination accepted the message.
    pub dest_message_id: Option<MessageId>,
    /// Source conversation; the mapping is resolved through the store on demand.
    pub conversation: ConversationId,
    pub direction: Direction,
    pub status: MessageStatus,
    /// Number of dispatch attempts started so far.
    pub attempt: u32,
    pub key: IdempotencyKey,
    /// Class of the most recent failure, if any.
    pub failure: Option<ErrorClass>,
}

impl RelayMessage {
    pub fn new(
        conversation: ConversationId,
        source_message_id: MessageId,
        direction: Direction,
    ) -> Self {
        let key = IdempotencyKey::derive(direction, &conversation, &source_message_id);
        Self::with_key(conversation, source_message_id, direction, key)
    }

    pub fn with_key(
        conversation: ConversationId,
        source_message_id: MessageId,
        direction: Direction,
        key: IdempotencyKey,
    ) -> Self {
        Self {
            source_message_id,
            dest_message_id: None,
            conversation,
            direction,
            status: MessageStatus::Pending,
            attempt: 0,
            key,
            failure: None,
        }
    }

    /// Move to `to`, rejecting edges the status machine does not have.
    pub fn advance(&mut self, to: MessageStatus) -> Result<(), RelayError> {
        if !self.status.can_transition(to) {
            return Err(RelayError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        if self.status == MessageStatus::Failed && self.failure != Some(ErrorClass::Transient) {
            return Err(RelayError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        if to == MessageStatus::Dispatching {
            self.attempt += 1;
        }
        self.status = to;
        Ok(())
    }

    /// Record a failure of the given class.
    ///
    /// A message that is already Failed keeps its status and takes the new class.
    pub fn fail(&mut self, class: ErrorClass) -> Result<(), RelayError> {
        if self.status != MessageStatus::Failed {
            self.advance(MessageStatus::Failed)?;
        }
        self.failure = Some(class);
        Ok(())
    }

    /// Record a successful dispatch.
    pub fn deliver(&mut self, dest_message_id: MessageId) -> Result<(), RelayError> {
        self.advance(MessageStatus::Delivered)?;
        self.dest_message_id = Some(dest_message_id);
        self.failure = None;
        Ok(())
    }
}

/// What kind of media an attachment is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    /// Recorded voice message.
    Voice,
    /// Round video message.
    VideoNote,
    Document,
}

/// Container/codec of an attachment file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    /// Opus audio in an Ogg container (Telegram voice notes).
    OggOpus,
    /// AAC audio in an MPEG-4 container (Signal voice notes).
    M4a,
    Mp4,
    Webm,
    Jpeg,
    Png,
    Other(String),
}

impl MediaFormat {
    /// Guess the format from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "ogg" | "oga" | "opus" => MediaFormat::OggOpus,
            "m4a" | "aac" => MediaFormat::M4a,
            "mp4" | "m4v" => MediaFormat::Mp4,
            "webm" => MediaFormat::Webm,
            "jpg" | "jpeg" => MediaFormat::Jpeg,
            "png" => MediaFormat::Png,
            other => MediaFormat::Other(other.to_string()),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(MediaFormat::from_extension)
            .unwrap_or_else(|| MediaFormat::Other(String::new()))
    }

    pub fn extension(&self) -> &str {
        match self {
            MediaFormat::OggOpus => "ogg",
            MediaFormat::M4a => "m4a",
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Webm => "webm",
            MediaFormat::Jpeg => "jpg",
            MediaFormat::Png => "png",
            MediaFormat::Other(ext) => ext,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaFormat::Other(ext) if ext.is_empty() => f.write_str("unknown"),
            other => f.write_str(other.extension()),
        }
    }
}

/// A media file attached to a message, already on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub format: MediaFormat,
    /// Playback duration in seconds for audio and video.
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Attachment {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        let path = path.into();
        let format = MediaFormat::from_path(&path);
        Self {
            path,
            kind,
            format,
            duration_secs: None,
            file_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> RelayMessage {
        RelayMessage::new("chat-1".into(), "42".into(), Direction::TelegramToSignal)
    }

    #[test]
    fn test_success_path() {
        let mut msg = message();
        msg.advance(MessageStatus::Translating).unwrap();
        msg.advance(MessageStatus::Dispatching).unwrap();
        msg.deliver("1700000000".into()).unwrap();

        assert_eq!(msg.status, MessageStatus::Delivered);
        assert_eq!(msg.attempt, 1);
        assert_eq!(msg.dest_message_id, Some(MessageId::new("1700000000")));
    }

    #[test]
    fn test_cannot_skip_translation() {
        let mut msg = message();
        let err = msg.advance(MessageStatus::Dispatching).unwrap_err();
        assert!(matches!(err, RelayError::InvalidTransition { .. }));
    }

    #[test]
    fn test_transient_failure_can_be_redispatched() {
        let mut msg = message();
        msg.advance(MessageStatus::Translating).unwrap();
        msg.advance(MessageStatus::Dispatching).unwrap();
        msg.fail(ErrorClass::Transient).unwrap();
        msg.advance(MessageStatus::Dispatching).unwrap();

        assert_eq!(msg.attempt, 2);
    }

    #[test]
    fn test_permanent_failure_is_final() {
        let mut msg = message();
        msg.advance(MessageStatus::Translating).unwrap();
        msg.fail(ErrorClass::Data).unwrap();

        assert!(msg.advance(MessageStatus::Dispatching).is_err());
        assert!(msg.advance(MessageStatus::Delivered).is_err());
    }

    #[test]
    fn test_repeated_failure_updates_class() {
        let mut msg = message();
        msg.advance(MessageStatus::Translating).unwrap();
        msg.fail(ErrorClass::Transient).unwrap();
        msg.fail(ErrorClass::Permanent).unwrap();

        assert_eq!(msg.status, MessageStatus::Failed);
        assert_eq!(msg.failure, Some(ErrorClass::Permanent));
        assert!(msg.advance(MessageStatus::Dispatching).is_err());
    }

    #[test]
    fn test_delivered_is_terminal() {
        assert!(!MessageStatus::Delivered.can_transition(MessageStatus::Failed));
        assert!(!MessageStatus::Delivered.can_transition(MessageStatus::Dispatching));
    }

    #[test]
    fn test_idempotency_key_is_deterministic() {
        let a = IdempotencyKey::derive(
            Direction::TelegramToSignal,
            &"chat".into(),
            &"7".into(),
        );
        let b = IdempotencyKey::derive(
            Direction::TelegramToSignal,
            &"chat".into(),
            &"7".into(),
        );
        let reverse = IdempotencyKey::derive(
            Direction::SignalToTelegram,
            &"chat".into(),
            &"7".into(),
        );
        assert_eq!(a, b);
        assert_ne!(a, reverse);
        assert_eq!(a.as_str(), "tg>sg/chat/7");
    }

    #[test]
    fn test_media_format_from_path() {
        assert_eq!(
            MediaFormat::from_path(Path::new("/media/voice.OGG")),
            MediaFormat::OggOpus
        );
        assert_eq!(MediaFormat::from_path(Path::new("a.m4a")), MediaFormat::M4a);
        assert_eq!(
            MediaFormat::from_path(Path::new("noext")),
            MediaFormat::Other(String::new())
        );
    }
}
