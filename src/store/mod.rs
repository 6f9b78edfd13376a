//! Durable relay state.
//!
//! - `mappings.json` - source conversation to destination group mappings
//! - `delivered.jsonl` - delivered idempotency keys, append-only
//!
//! Rewrites go through a temp file and a rename so a crash never leaves a
//! half-written file behind.

mod delivered;
mod file;
mod mapping;

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::common::error::{StorageError, StorageResult};

pub use delivered::{DeliveredLog, DeliveredRecord};
pub use file::FileMappingStore;
pub use mapping::{ConversationMapping, MappingStore};

/// Write `content` to `tmp`, sync it, then rename it over `path`.
async fn atomic_write_file(tmp: &Path, path: &Path, content: &[u8]) -> StorageResult<()> {
    let mut file = fs::File::create(tmp)
        .await
        .map_err(|e| StorageError::io(tmp, e))?;
    file.write_all(content)
        .await
        .map_err(|e| StorageError::io(tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::io(tmp, e))?;
    drop(file);

    fs::rename(tmp, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}
