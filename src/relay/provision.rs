//! Destination group provisioning and avatar sync.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::common::error::{Classify, ErrorClass, RelayError, RelayResult};
use crate::common::types::{ConversationId, Direction, ExpirationPolicy, GroupId, RouteDirection};
use crate::config::types::Config;
use crate::platform::{ConversationInfo, GroupSpec, PlatformClient};
use crate::store::{ConversationMapping, MappingStore};

/// Hex SHA-256 of avatar bytes, stored to detect changes.
pub fn avatar_hash(avatar: &[u8]) -> String {
    hex::encode(Sha256::digest(avatar))
}

/// Creates one destination group per source conversation.
///
/// The mapping store's `create_if_absent` is the provisioning gate. Callers
/// for the same conversation are additionally serialized so a second caller
/// waits for the first one's group instead of seeing a half-provisioned mapping.
pub struct GroupProvisioner {
    store: Arc<dyn MappingStore>,
    source: Arc<dyn PlatformClient>,
    dest: Arc<dyn PlatformClient>,
    name_prefix: String,
    expiration: ExpirationPolicy,
    default_member: Option<String>,
    direction: RouteDirection,
    in_flight: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl GroupProvisioner {
    pub fn new(
        config: &Config,
        store: Arc<dyn MappingStore>,
        source: Arc<dyn PlatformClient>,
        dest: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            store,
            source,
            dest,
            name_prefix: config.groups.name_prefix.clone(),
            expiration: ExpirationPolicy::from_days(config.groups.retention_days),
            default_member: config.groups.default_member.clone(),
            direction: RouteDirection::from_bidirectional(config.relay.bidirectional),
            in_flight: DashMap::new(),
        }
    }

    /// Return the provisioned mapping for `conversation`, creating the group if needed.
    ///
    /// If group creation fails the mapping is rolled back to absent so a
    /// later message can try again.
    pub async fn ensure(&self, conversation: &ConversationId) -> RelayResult<ConversationMapping> {
        if let Some(mapping) = self.store.get(conversation).await? {
            if mapping.is_provisioned() {
                return Ok(mapping);
            }
        }

        let lock = self.in_flight.entry(conversation.clone()).or_default().clone();
        let _held = lock.lock().await;

        if let Some(mapping) = self.store.get(conversation).await? {
            if mapping.is_provisioned() {
                return Ok(mapping);
            }
        }

        let info = self.source.conversation_info(conversation).await?;
        let draft = ConversationMapping::new(
            conversation.clone(),
            info.title.clone(),
            self.name_prefix.clone(),
            self.expiration,
            self.direction,
        );
        let (mut mapping, _) = self.store.create_if_absent(draft).await?;
        if mapping.is_provisioned() {
            return Ok(mapping);
        }

        let spec = self.group_spec(&mapping, &info);
        let group = match self.dest.create_group(&spec).await {
            Ok(group) => group,
            Err(e) => {
                warn!(
                    conversation = %conversation,
                    error = %e,
                    "Group creation failed, rolling back mapping"
                );
                self.store.remove(conversation).await?;
                return Err(e.into());
            }
        };

        mapping.dest_group_id = Some(group.clone());
        mapping.avatar_hash = info.avatar.as_deref().map(avatar_hash);
        if let Err(e) = self.store.update(&mapping).await {
            error!(
                conversation = %conversation,
                group = %group,
                error = %e,
                "Group was created but its mapping could not be saved"
            );
            return Err(e.into());
        }

        info!(
            conversation = %conversation,
            group = %group,
            name = %spec.name,
            "Provisioned destination group"
        );
        Ok(mapping)
    }

    fn group_spec(&self, mapping: &ConversationMapping, info: &ConversationInfo) -> GroupSpec {
        let description = match &info.username {
            Some(username) => format!("Telegram: https://t.me/{}", username),
            None => info.title.clone(),
        };
        GroupSpec {
            name: mapping.group_name(),
            description,
            avatar: info.avatar.clone(),
            expiration: mapping.expiration,
            members: self.default_member.iter().cloned().collect(),
        }
    }

    /// Mapping whose destination group is `group`, if it relays back.
    pub async fn reverse(&self, group: &GroupId) -> RelayResult<Option<ConversationMapping>> {
        Ok(self
            .store
            .find_by_dest(group)
            .await?
            .filter(|m| m.direction.allows(Direction::SignalToTelegram)))
    }

    /// Push the source avatar to the destination group if it changed.
    ///
    /// Returns whether the avatar was updated.
    pub async fn sync_avatar(&self, conversation: &ConversationId) -> RelayResult<bool> {
        let Some(mut mapping) = self.store.get(conversation).await? else {
            return Ok(false);
        };
        let Some(group) = mapping.dest_group_id.clone() else {
            return Ok(false);
        };

        let info = self.source.conversation_info(conversation).await?;
        let Some(avatar) = info.avatar else {
            return Ok(false);
        };
        let hash = avatar_hash(&avatar);
        if mapping.avatar_hash.as_deref() == Some(hash.as_str()) {
            return Ok(false);
        }

        self.dest.set_group_avatar(&group, &avatar).await?;
        mapping.avatar_hash = Some(hash);
        self.store.update(&mapping).await?;
        debug!(conversation = %conversation, group = %group, "Avatar updated");
        Ok(true)
    }

    /// Re-check avatars of every provisioned mapping.
    ///
    /// Platform failures are logged per conversation; storage failures abort.
    pub async fn resync_all(&self) -> RelayResult<usize> {
        let mut updated = 0;
        for mapping in self.store.list().await? {
            if !mapping.is_provisioned() {
                continue;
            }
            match self.sync_avatar(&mapping.source_conversation_id).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) if e.class() == ErrorClass::Fatal => return Err(e),
                Err(e) => warn!(
                    conversation = %mapping.source_conversation_id,
                    error = %e,
                    "Avatar sync failed"
                ),
            }
        }
        if updated > 0 {
            info!(updated, "Synced group avatars");
        }
        Ok(updated)
    }

    /// Destination group of `conversation`, provisioning it if needed.
    pub async fn destination(&self, conversation: &ConversationId) -> RelayResult<GroupId> {
        self.ensure(conversation)
            .await?
            .dest_group_id
            .ok_or_else(|| RelayError::NotMapped {
                conversation: conversation.clone(),
            })
    }
}
