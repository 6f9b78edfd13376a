//! Which attachments need converting, and how.

use crate::common::messages::{Attachment, MediaFormat, MediaKind};
use crate::common::types::{Direction, Platform};

/// A single ffmpeg conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    pub source: MediaFormat,
    pub target: MediaFormat,
    /// Codec arguments placed between the input and the output path.
    pub codec_args: &'static [&'static str],
}

const VOICE_TO_AAC: &[&str] = &["-c:a", "aac", "-b:a", "64k"];
const VOICE_TO_OPUS: &[&str] = &["-c:a", "libopus", "-b:a", "64k"];
const VIDEO_TO_MP4: &[&str] = &[
    "-c:v",
    "libx264",
    "-c:a",
    "aac",
    "-movflags",
    "+faststart",
];

/// Voice note container each platform plays inline.
pub fn voice_format(platform: Platform) -> MediaFormat {
    match platform {
        Platform::Telegram => MediaFormat::OggOpus,
        Platform::Signal => MediaFormat::M4a,
    }
}

/// Plan the conversion `attachment` needs to play on the destination, if any.
///
/// Voice notes switch container; video notes become MP4. Everything else
/// passes through untouched.
pub fn plan(direction: Direction, attachment: &Attachment) -> Option<ConversionPlan> {
    match attachment.kind {
        MediaKind::Voice => {
            let target = voice_format(direction.destination());
            if attachment.format == target {
                return None;
            }
            let codec_args = match target {
                MediaFormat::M4a => VOICE_TO_AAC,
                _ => VOICE_TO_OPUS,
            };
            Some(ConversionPlan {
                source: attachment.format.clone(),
                target,
                codec_args,
            })
        }
        MediaKind::VideoNote if attachment.format != MediaFormat::Mp4 => Some(ConversionPlan {
            source: attachment.format.clone(),
            target: MediaFormat::Mp4,
            codec_args: VIDEO_TO_MP4,
        }),
        _ => None,
    }
}
