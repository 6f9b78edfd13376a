//! Configuration type definitions.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    #[serde(default)]
    pub groups: GroupsConfig,
    #[serde(default)]
    pub formatting: FormattingConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub filters: Option<FiltersConfig>,
    pub platforms: PlatformsConfig,
}

impl Config {
    /// Directory for converted media, defaulting to `<state_dir>/media`.
    pub fn scratch_dir(&self) -> PathBuf {
        self.media
            .scratch_dir
            .clone()
            .unwrap_or_else(|| self.relay.state_dir.join("media"))
    }
}

/// Relay-wide switches.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Directory holding the mapping file and the dedup log.
    pub state_dir: PathBuf,
    /// Relay Signal group messages back into their Telegram chats.
    #[serde(default)]
    pub bidirectional: bool,
    /// Relay Telegram channels, not only chats.
    #[serde(default)]
    pub forward_channels: bool,
    /// Delete the destination copy when the source message is deleted.
    #[serde(default)]
    pub relay_deletions: bool,
    #[serde(default)]
    pub read_receipts: ReadReceiptsConfig,
    /// Messages buffered per (conversation, direction) before ingest blocks.
    #[serde(default = "default_pair_queue_capacity")]
    pub pair_queue_capacity: usize,
}

fn default_pair_queue_capacity() -> usize {
    64
}

/// Which source messages get marked as read.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadReceiptsConfig {
    #[serde(default = "default_true")]
    pub messages: bool,
    #[serde(default = "default_true")]
    pub channels: bool,
}

impl Default for ReadReceiptsConfig {
    fn default() -> Self {
        Self {
            messages: true,
            channels: true,
        }
    }
}

/// Settings for groups created on the destination platform.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupsConfig {
    /// Prepended to the source title, e.g. "(Telegram)".
    #[serde(default)]
    pub name_prefix: String,
    /// Disappearing-message retention; zero disables it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Member added to every new group.
    #[serde(default)]
    pub default_member: Option<String>,
    /// How often a mapped conversation's avatar is re-checked; zero disables it.
    #[serde(default = "default_avatar_refresh_mins")]
    pub avatar_refresh_mins: u64,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            name_prefix: String::new(),
            retention_days: default_retention_days(),
            default_member: None,
            avatar_refresh_mins: default_avatar_refresh_mins(),
        }
    }
}

fn default_retention_days() -> u32 {
    31
}

fn default_avatar_refresh_mins() -> u64 {
    60
}

/// Message formatting.
#[derive(Debug, Clone, Deserialize)]
pub struct FormattingConfig {
    /// Sender attribution template with `%user` and `%message` placeholders.
    #[serde(default = "default_attribution")]
    pub attribution: String,
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            attribution: default_attribution(),
        }
    }
}

fn default_attribution() -> String {
    "%user: %message".to_string()
}

/// Media pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Concurrent conversions.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs waiting for a worker before producers block.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a producer blocks on a full queue before failing retryably.
    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
    /// Album flush deadline measured from the first item.
    #[serde(default = "default_album_flush_ms")]
    pub album_flush_ms: u64,
    /// Present Signal videos as Telegram round video notes.
    #[serde(default = "default_true")]
    pub send_video_as_note: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            scratch_dir: None,
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            queue_wait_ms: default_queue_wait_ms(),
            album_flush_ms: default_album_flush_ms(),
            send_video_as_note: true,
        }
    }
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    16
}

fn default_queue_wait_ms() -> u64 {
    5_000
}

fn default_album_flush_ms() -> u64 {
    1_500
}

/// Retry policy for remote calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f32,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            jitter: true,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_factor() -> f32 {
    2.0
}

/// Dedup index retention.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// How long delivered keys are remembered.
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            horizon_hours: default_horizon_hours(),
        }
    }
}

fn default_horizon_hours() -> u64 {
    72
}

/// Message filtering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FiltersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Regex patterns; a matching message is not relayed.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Transport helpers for both platforms.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformsConfig {
    pub telegram: TransportConfig,
    pub signal: TransportConfig,
}

/// A transport helper process speaking JSON lines on stdio.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}
