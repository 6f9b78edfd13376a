//! File-backed mapping store.
//!
//! The whole table lives in `mappings.json` and is rewritten atomically on
//! every mutation; mappings change rarely so a full rewrite is cheap.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::error::{StorageError, StorageResult};
use crate::common::types::{ConversationId, GroupId};
use crate::store::mapping::{ConversationMapping, MappingStore};

const MAPPINGS_FILE: &str = "mappings.json";

type Table = BTreeMap<ConversationId, ConversationMapping>;

/// `MappingStore` persisted as a JSON object keyed by source conversation.
pub struct FileMappingStore {
    path: PathBuf,
    table: Mutex<Table>,
}

impl FileMappingStore {
    /// Open (or create) the mapping file under `state_dir`.
    pub async fn open(state_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let state_dir = state_dir.as_ref();
        fs::create_dir_all(state_dir)
            .await
            .map_err(|e| StorageError::io(state_dir, e))?;

        let path = state_dir.join(MAPPINGS_FILE);
        let table: Table = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Table::new(),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| StorageError::corrupt(&path, e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Table::new(),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        info!(path = %path.display(), mappings = table.len(), "Mapping store opened");

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, table: &Table) -> StorageResult<()> {
        let content = serde_json::to_vec_pretty(table)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        super::atomic_write_file(&tmp, &self.path, &content).await
    }
}

#[async_trait]
impl MappingStore for FileMappingStore {
    async fn get(&self, source: &ConversationId) -> StorageResult<Option<ConversationMapping>> {
        Ok(self.table.lock().await.get(source).cloned())
    }

    async fn create_if_absent(
        &self,
        mapping: ConversationMapping,
    ) -> StorageResult<(ConversationMapping, bool)> {
        let mut table = self.table.lock().await;
        if let Some(existing) = table.get(&mapping.source_conversation_id) {
            return Ok((existing.clone(), false));
        }

        let source = mapping.source_conversation_id.clone();
        table.insert(source.clone(), mapping.clone());
        if let Err(e) = self.persist(&table).await {
            table.remove(&source);
            return Err(e);
        }

        debug!(conversation = %source, "Mapping created");
        Ok((mapping, true))
    }

    async fn update(&self, mapping: &ConversationMapping) -> StorageResult<()> {
        let mut table = self.table.lock().await;
        let source = &mapping.source_conversation_id;
        let Some(existing) = table.get(source) else {
            return Err(StorageError::NotFound {
                conversation: source.clone(),
            });
        };

        if let Some(group) = &existing.dest_group_id {
            if mapping.dest_group_id.as_ref() != Some(group) {
                return Err(StorageError::GroupAlreadyAssigned {
                    conversation: source.clone(),
                    existing: group.to_string(),
                });
            }
        }

        let previous = table.insert(source.clone(), mapping.clone());
        if let Err(e) = self.persist(&table).await {
            if let Some(previous) = previous {
                table.insert(source.clone(), previous);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, source: &ConversationId) -> StorageResult<Option<ConversationMapping>> {
        let mut table = self.table.lock().await;
        let Some(removed) = table.remove(source) else {
            return Ok(None);
        };
        if let Err(e) = self.persist(&table).await {
            table.insert(source.clone(), removed);
            return Err(e);
        }
        debug!(conversation = %source, "Mapping removed");
        Ok(Some(removed))
    }

    async fn find_by_dest(&self, group: &GroupId) -> StorageResult<Option<ConversationMapping>> {
        Ok(self
            .table
            .lock()
            .await
            .values()
            .find(|m| m.dest_group_id.as_ref() == Some(group))
            .cloned())
    }

    async fn list(&self) -> StorageResult<Vec<ConversationMapping>> {
        Ok(self.table.lock().await.values().cloned().collect())
    }
}
