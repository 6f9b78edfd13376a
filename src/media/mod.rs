//! Media pipeline: attachment conversion and album aggregation.
//!
//! Conversions run on a [`WorkerPool`] sized independently of ingest, so a
//! burst of large files queues here instead of stalling event streams.

mod album;
mod convert;
mod plan;
mod pool;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tracing::{debug, warn};

use crate::common::error::{MediaError, MediaResult};
use crate::common::messages::{Attachment, MediaFormat, MediaKind};
use crate::common::types::Direction;
use crate::config::types::MediaConfig;

pub use album::{AlbumAggregator, AlbumFlush};
pub use convert::{FfmpegTranscoder, Transcoder};
pub use plan::ConversionPlan;

use pool::{MediaJob, WorkerPool};

/// Attachments ready for the destination, plus the scratch files backing them.
#[derive(Debug, Default)]
pub struct PreparedMedia {
    pub attachments: Vec<Attachment>,
    jobs: Vec<MediaJob>,
}

impl PreparedMedia {
    /// Number of attachments that went through a conversion.
    pub fn converted(&self) -> usize {
        self.jobs.len()
    }
}

/// Converts attachments for the destination platform.
pub struct MediaPipeline {
    pool: WorkerPool,
    scratch_dir: PathBuf,
    send_video_as_note: bool,
}

impl MediaPipeline {
    pub fn new(
        config: &MediaConfig,
        scratch_dir: impl Into<PathBuf>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(
                transcoder,
                config.workers,
                config.queue_capacity,
                Duration::from_millis(config.queue_wait_ms),
            ),
            scratch_dir: scratch_dir.into(),
            send_video_as_note: config.send_video_as_note,
        }
    }

    /// Convert what needs converting; everything else passes through.
    ///
    /// On failure every scratch file produced so far is removed.
    pub async fn prepare(
        &self,
        direction: Direction,
        attachments: &[Attachment],
    ) -> MediaResult<PreparedMedia> {
        let mut prepared = PreparedMedia::default();

        for attachment in attachments {
            let attachment = self.present(direction, attachment);
            let Some(plan) = plan::plan(direction, &attachment) else {
                prepared.attachments.push(attachment);
                continue;
            };

            match self.convert(&attachment, plan).await {
                Ok((converted, job)) => {
                    prepared.attachments.push(converted);
                    prepared.jobs.push(job);
                }
                Err(e) => {
                    self.discard(prepared).await;
                    return Err(e);
                }
            }
        }

        Ok(prepared)
    }

    /// Signal videos may be shown as round video notes on Telegram.
    fn present(&self, direction: Direction, attachment: &Attachment) -> Attachment {
        let mut attachment = attachment.clone();
        if direction == Direction::SignalToTelegram
            && self.send_video_as_note
            && attachment.kind == MediaKind::Video
        {
            attachment.kind = MediaKind::VideoNote;
        }
        attachment
    }

    async fn convert(
        &self,
        attachment: &Attachment,
        plan: ConversionPlan,
    ) -> MediaResult<(Attachment, MediaJob)> {
        if let MediaFormat::Other(ext) = &attachment.format {
            if ext.is_empty() {
                return Err(MediaError::Unsupported {
                    format: attachment.path.display().to_string(),
                });
            }
        }

        fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| MediaError::Io {
                path: self.scratch_dir.clone(),
                source: e,
            })?;

        let output = self.scratch_path(&attachment.path, &plan.target);
        let target = plan.target.clone();
        let job = self
            .pool
            .submit(attachment.path.clone(), output, plan)
            .await?;

        let result = job.result.clone().ok_or_else(|| MediaError::ConversionFailed {
            input: attachment.path.clone(),
            message: "no output produced".to_string(),
        })?;

        let converted = Attachment {
            path: result,
            kind: attachment.kind,
            format: target,
            duration_secs: attachment.duration_secs,
            file_name: attachment.file_name.as_ref().map(|name| {
                Path::new(name)
                    .with_extension(job.target_format.extension())
                    .to_string_lossy()
                    .into_owned()
            }),
        };
        Ok((converted, job))
    }

    /// Unique scratch path keeping the input's stem.
    fn scratch_path(&self, input: &Path, target: &MediaFormat) -> PathBuf {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("media");
        let suffix = hex::encode(rand::random::<[u8; 4]>());
        self.scratch_dir
            .join(format!("{}-{}.{}", stem, suffix, target.extension()))
    }

    /// Remove converted files once their message is terminal.
    pub async fn discard(&self, prepared: PreparedMedia) {
        for job in prepared.jobs {
            let Some(path) = job.result else {
                continue;
            };
            match fs::remove_file(&path).await {
                Ok(()) => debug!("File {} was deleted", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove scratch file"),
            }
        }
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
