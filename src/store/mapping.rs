//! Conversation mapping model and storage trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::StorageResult;
use crate::common::types::{ConversationId, ExpirationPolicy, GroupId, RouteDirection};

/// One relay pairing between a source conversation and a destination group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMapping {
    pub source_conversation_id: ConversationId,
    /// Unset until the destination group has been created.
    #[serde(default)]
    pub dest_group_id: Option<GroupId>,
    /// Source title at provisioning time.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub name_prefix: String,
    /// Hex SHA-256 of the last avatar pushed to the destination group.
    #[serde(default)]
    pub avatar_hash: Option<String>,
    #[serde(default)]
    pub expiration: ExpirationPolicy,
    #[serde(default)]
    pub direction: RouteDirection,
    pub created_at: DateTime<Utc>,
}

impl ConversationMapping {
    /// A fresh, not yet provisioned mapping.
    pub fn new(
        source_conversation_id: ConversationId,
        title: impl Into<String>,
        name_prefix: impl Into<String>,
        expiration: ExpirationPolicy,
        direction: RouteDirection,
    ) -> Self {
        Self {
            source_conversation_id,
            dest_group_id: None,
            title: title.into(),
            name_prefix: name_prefix.into(),
            avatar_hash: None,
            expiration,
            direction,
            created_at: Utc::now(),
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.dest_group_id.is_some()
    }

    /// Destination group name: prefix, a space, then the source title.
    pub fn group_name(&self) -> String {
        if self.name_prefix.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.name_prefix, self.title)
        }
    }
}

/// Durable mapping between source conversations and destination groups.
///
/// All mutation goes through these atomic operations; callers never keep a
/// mapping across calls without re-reading it.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get(&self, source: &ConversationId) -> StorageResult<Option<ConversationMapping>>;

    /// Insert `mapping` unless one already exists for its source conversation.
    ///
    /// Returns the stored mapping and whether this call created it.
    async fn create_if_absent(
        &self,
        mapping: ConversationMapping,
    ) -> StorageResult<(ConversationMapping, bool)>;

    /// Replace an existing mapping.
    ///
    /// Fails with `GroupAlreadyAssigned` if the stored destination group is
    /// set and `mapping` names a different one.
    async fn update(&self, mapping: &ConversationMapping) -> StorageResult<()>;

    /// Remove a mapping, used to roll back a failed provisioning.
    async fn remove(&self, source: &ConversationId) -> StorageResult<Option<ConversationMapping>>;

    /// Reverse lookup by destination group.
    async fn find_by_dest(&self, group: &GroupId) -> StorageResult<Option<ConversationMapping>>;

    async fn list(&self) -> StorageResult<Vec<ConversationMapping>>;
}
