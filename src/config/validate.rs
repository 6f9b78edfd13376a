//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.relay.state_dir.as_os_str().is_empty() {
        errors.push("relay.state_dir is required".to_string());
    }
    if config.relay.pair_queue_capacity == 0 {
        errors.push("relay.pair_queue_capacity must be non-zero".to_string());
    }

    if config.formatting.attribution.is_empty() {
        errors.push("formatting.attribution must not be empty".to_string());
    } else if !config.formatting.attribution.contains("%message") {
        errors.push("formatting.attribution must contain %message".to_string());
    }

    if config.media.ffmpeg.is_empty() {
        errors.push("media.ffmpeg is required".to_string());
    }
    if config.media.workers == 0 {
        errors.push("media.workers must be non-zero".to_string());
    }
    if config.media.queue_capacity == 0 {
        errors.push("media.queue_capacity must be non-zero".to_string());
    }
    if config.media.album_flush_ms == 0 {
        errors.push("media.album_flush_ms must be non-zero".to_string());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if config.retry.factor < 1.0 {
        errors.push(format!(
            "retry.factor must be >= 1.0 (got {})",
            config.retry.factor
        ));
    }
    if config.retry.initial_delay_ms > config.retry.max_delay_ms {
        errors.push("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
    }

    if config.dedup.horizon_hours == 0 {
        errors.push("dedup.horizon_hours must be non-zero".to_string());
    }

    if config.platforms.telegram.command.is_empty() {
        errors.push("platforms.telegram.command is required".to_string());
    }
    if config.platforms.signal.command.is_empty() {
        errors.push("platforms.signal.command is required".to_string());
    }

    // Validate filter patterns (try to compile them)
    if let Some(ref filters) = config.filters {
        for (i, pattern) in filters.patterns.iter().enumerate() {
            if fancy_regex::Regex::new(pattern).is_err() {
                errors.push(format!(
                    "filters.patterns[{}] is not a valid regex: '{}'",
                    i, pattern
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
