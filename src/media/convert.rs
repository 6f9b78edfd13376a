//! Media transcoding through an external ffmpeg binary.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::common::error::{MediaError, MediaResult};

use super::plan::ConversionPlan;

/// Longest stderr excerpt kept in a conversion error.
const STDERR_TAIL: usize = 512;

/// Converts one file according to a plan.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path, plan: &ConversionPlan) -> MediaResult<()>;
}

/// Runs `ffmpeg -y -i <input> <codec args> -map_metadata 0 <output>`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, input: &Path, output: &Path, plan: &ConversionPlan) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-y")
            .arg("-hide_banner")
            .arg("-i")
            .arg(input)
            .args(plan.codec_args)
            .arg("-map_metadata")
            .arg("0")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(&self, input: &Path, output: &Path, plan: &ConversionPlan) -> MediaResult<()> {
        if !input.exists() {
            return Err(MediaError::Io {
                path: input.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "input file missing"),
            });
        }

        debug!(input = %input.display(), target = %plan.target, "Starting conversion");

        let result = self.command(input, output, plan).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::ToolMissing {
                    tool: self.program.clone(),
                }
            } else {
                MediaError::Io {
                    path: input.to_path_buf(),
                    source: e,
                }
            }
        })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr_tail(&stderr);
            let _ = tokio::fs::remove_file(output).await;
            return Err(MediaError::ConversionFailed {
                input: input.to_path_buf(),
                message: format!("{} ({})", tail, result.status),
            });
        }

        info!("Converted {} to {}", input.display(), output.display());
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim_end();
    if trimmed.len() <= STDERR_TAIL {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::messages::MediaFormat;
    use crate::common::types::Direction;
    use crate::common::messages::{Attachment, MediaKind};
    use crate::media::plan::plan;

    fn voice_plan() -> ConversionPlan {
        plan(
            Direction::TelegramToSignal,
            &Attachment::new("/tmp/v.ogg", MediaKind::Voice),
        )
        .unwrap()
    }

    #[test]
    fn test_command_line() {
        let cmd = FfmpegTranscoder::new("ffmpeg").command(
            Path::new("/in/v.ogg"),
            Path::new("/out/v.m4a"),
            &voice_plan(),
        );
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-y",
                "-hide_banner",
                "-i",
                "/in/v.ogg",
                "-c:a",
                "aac",
                "-b:a",
                "64k",
                "-map_metadata",
                "0",
                "/out/v.m4a"
            ]
        );
        assert_eq!(voice_plan().target, MediaFormat::M4a);
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("v.ogg");
        std::fs::write(&input, b"OggS").unwrap();

        let err = FfmpegTranscoder::new("definitely-not-a-real-ffmpeg-binary")
            .convert(&input, &dir.path().join("v.m4a"), &voice_plan())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn test_missing_input_is_data_error() {
        use crate::common::error::{Classify, ErrorClass};

        let err = FfmpegTranscoder::new("ffmpeg")
            .convert(Path::new("/nonexistent/v.ogg"), Path::new("/tmp/x.m4a"), &voice_plan())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Data);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = "x".repeat(2_000);
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL);
        assert_eq!(stderr_tail("short\n"), "short");
    }
}
