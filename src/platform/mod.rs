//! Platform seam: what the relay needs from each chat platform.
//!
//! Transports are external helpers; [`process::ProcessClient`] talks to one
//! over JSON lines. Tests substitute in-memory fakes.

pub mod process;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::error::PlatformResult;
use crate::common::messages::Attachment;
use crate::common::types::{
    ConversationId, ConversationKind, ExpirationPolicy, GroupId, MessageId, WireText,
};

pub use process::ProcessClient;

/// A new message as delivered by a platform's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub conversation: ConversationId,
    pub message_id: MessageId,
    #[serde(default)]
    pub kind: ConversationKind,
    /// Sender display name; used for attribution in groups.
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub text: WireText,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Correlates the parts of a grouped-media send.
    #[serde(default)]
    pub group_token: Option<String>,
}

impl IncomingMessage {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.attachments.is_empty()
    }
}

/// Typed event from a platform's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    NewMessage(IncomingMessage),
    Deletion {
        conversation: ConversationId,
        message_ids: Vec<MessageId>,
    },
    /// Seen by the other side. Never relayed.
    ReadReceipt {
        conversation: ConversationId,
        message_ids: Vec<MessageId>,
    },
    /// Never relayed.
    Typing { conversation: ConversationId },
    /// All parts of a grouped-media send have arrived.
    AlbumComplete {
        conversation: ConversationId,
        group_token: String,
    },
}

/// What provisioning needs to know about a source conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub title: String,
    #[serde(default)]
    pub kind: ConversationKind,
    /// Public handle, used for the group description.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, with = "base64_bytes")]
    pub avatar: Option<Bytes>,
}

/// Parameters for creating a destination group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub description: String,
    #[serde(default, with = "base64_bytes")]
    pub avatar: Option<Bytes>,
    pub expiration: ExpirationPolicy,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Operations the relay performs against a platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Send a message, returning the platform's id for it.
    async fn send_message(
        &self,
        target: &ConversationId,
        text: &WireText,
        attachments: &[Attachment],
    ) -> PlatformResult<MessageId>;

    async fn create_group(&self, spec: &GroupSpec) -> PlatformResult<GroupId>;

    async fn set_group_avatar(&self, group: &GroupId, avatar: &Bytes) -> PlatformResult<()>;

    async fn conversation_info(&self, conversation: &ConversationId)
        -> PlatformResult<ConversationInfo>;

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        messages: &[MessageId],
    ) -> PlatformResult<()>;

    async fn delete_message(&self, target: &ConversationId, message: &MessageId)
        -> PlatformResult<()>;
}

/// Optional binary payloads travel as base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map(Bytes::from).map_err(serde::de::Error::custom))
            .transpose()
    }
}
