//! In-memory fakes for relay tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::common::error::{
    MediaError, MediaResult, PlatformError, PlatformResult, StorageError, StorageResult,
};
use crate::common::messages::Attachment;
use crate::common::types::{ConversationId, ConversationKind, GroupId, MessageId, Platform, WireText};
use crate::config::parser::load_config_str;
use crate::config::types::Config;
use crate::media::{ConversionPlan, Transcoder};
use crate::platform::{ConversationInfo, GroupSpec, PlatformClient};
use crate::store::{ConversationMapping, MappingStore};

/// Parse a test config rooted at `state_dir`, with extra HOCON appended.
pub fn config(state_dir: &Path, extra: &str) -> Config {
    load_config_str(&format!(
        r#"
        relay {{ state_dir = "{}" }}
        platforms {{
            telegram {{ command = "tg-transport" }}
            signal {{ command = "signal-transport" }}
        }}
        {}
        "#,
        state_dir.display(),
        extra
    ))
    .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub target: ConversationId,
    pub text: WireText,
    pub attachments: Vec<Attachment>,
    pub id: MessageId,
}

/// Records every call; failures and delays are scripted up front.
pub struct FakePlatform {
    platform: Platform,
    pub sent: Mutex<Vec<SentMessage>>,
    pub groups: Mutex<Vec<GroupSpec>>,
    pub avatars: Mutex<Vec<(GroupId, Bytes)>>,
    pub read: Mutex<Vec<(ConversationId, Vec<MessageId>)>>,
    pub deleted: Mutex<Vec<(ConversationId, MessageId)>>,
    conversations: Mutex<HashMap<ConversationId, ConversationInfo>>,
    send_failures: Mutex<VecDeque<PlatformError>>,
    create_failures: Mutex<VecDeque<PlatformError>>,
    create_delay: Duration,
    next_id: AtomicU64,
}

impl FakePlatform {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            sent: Mutex::default(),
            groups: Mutex::default(),
            avatars: Mutex::default(),
            read: Mutex::default(),
            deleted: Mutex::default(),
            conversations: Mutex::default(),
            send_failures: Mutex::default(),
            create_failures: Mutex::default(),
            create_delay: Duration::ZERO,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_conversation(self, id: &str, title: &str, avatar: Option<&'static [u8]>) -> Self {
        self.set_conversation(
            id,
            ConversationInfo {
                title: title.to_string(),
                kind: ConversationKind::Group,
                username: None,
                avatar: avatar.map(Bytes::from_static),
            },
        );
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn set_conversation(&self, id: &str, info: ConversationInfo) {
        self.conversations.lock().unwrap().insert(id.into(), info);
    }

    /// The next sends fail with these errors, in order.
    pub fn fail_sends(&self, errors: impl IntoIterator<Item = PlatformError>) {
        self.send_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_creates(&self, errors: impl IntoIterator<Item = PlatformError>) {
        self.create_failures.lock().unwrap().extend(errors);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.text.text).collect()
    }

    pub fn groups(&self) -> Vec<GroupSpec> {
        self.groups.lock().unwrap().clone()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn send_message(
        &self,
        target: &ConversationId,
        text: &WireText,
        attachments: &[Attachment],
    ) -> PlatformResult<MessageId> {
        if let Some(e) = self.send_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        let id = MessageId::new(format!("{}-{}", self.platform, self.next_id()));
        self.sent.lock().unwrap().push(SentMessage {
            target: target.clone(),
            text: text.clone(),
            attachments: attachments.to_vec(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn create_group(&self, spec: &GroupSpec) -> PlatformResult<GroupId> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(e) = self.create_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.groups.lock().unwrap().push(spec.clone());
        Ok(GroupId::new(format!("group-{}", self.next_id())))
    }

    async fn set_group_avatar(&self, group: &GroupId, avatar: &Bytes) -> PlatformResult<()> {
        self.avatars
            .lock()
            .unwrap()
            .push((group.clone(), avatar.clone()));
        Ok(())
    }

    async fn conversation_info(
        &self,
        conversation: &ConversationId,
    ) -> PlatformResult<ConversationInfo> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                what: conversation.to_string(),
            })
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        messages: &[MessageId],
    ) -> PlatformResult<()> {
        self.read
            .lock()
            .unwrap()
            .push((conversation.clone(), messages.to_vec()));
        Ok(())
    }

    async fn delete_message(
        &self,
        target: &ConversationId,
        message: &MessageId,
    ) -> PlatformResult<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((target.clone(), message.clone()));
        Ok(())
    }
}

/// Copies input to output after a per-file delay; listed files fail as corrupt.
#[derive(Default)]
pub struct SlowTranscoder {
    delays: HashMap<String, Duration>,
    corrupt: HashSet<String>,
}

impl SlowTranscoder {
    pub fn delay(mut self, file_name: &str, delay: Duration) -> Self {
        self.delays.insert(file_name.to_string(), delay);
        self
    }

    pub fn corrupt(mut self, file_name: &str) -> Self {
        self.corrupt.insert(file_name.to_string());
        self
    }
}

#[async_trait]
impl Transcoder for SlowTranscoder {
    async fn convert(&self, input: &Path, output: &Path, _plan: &ConversionPlan) -> MediaResult<()> {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }
        if self.corrupt.contains(&name) {
            return Err(MediaError::ConversionFailed {
                input: input.to_path_buf(),
                message: "Invalid data found when processing input".to_string(),
            });
        }
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| MediaError::Io {
                path: input.to_path_buf(),
                source: e,
            })?;
        Ok(())
    }
}

/// A mapping store whose backing storage is gone.
pub struct BrokenStore;

impl BrokenStore {
    fn error() -> StorageError {
        StorageError::io(
            PathBuf::from("/unreachable/mappings.json"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only file system"),
        )
    }
}

#[async_trait]
impl MappingStore for BrokenStore {
    async fn get(&self, _source: &ConversationId) -> StorageResult<Option<ConversationMapping>> {
        Err(Self::error())
    }

    async fn create_if_absent(
        &self,
        _mapping: ConversationMapping,
    ) -> StorageResult<(ConversationMapping, bool)> {
        Err(Self::error())
    }

    async fn update(&self, _mapping: &ConversationMapping) -> StorageResult<()> {
        Err(Self::error())
    }

    async fn remove(&self, _source: &ConversationId) -> StorageResult<Option<ConversationMapping>> {
        Err(Self::error())
    }

    async fn find_by_dest(&self, _group: &GroupId) -> StorageResult<Option<ConversationMapping>> {
        Err(Self::error())
    }

    async fn list(&self) -> StorageResult<Vec<ConversationMapping>> {
        Err(Self::error())
    }
}
