//! Configuration file parsing (HOCON format).

use std::path::Path;

use hocon::HoconLoader;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
#[cfg(test)]
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        relay {
            state_dir = "/var/lib/ferryman"
        }
        platforms {
            telegram { command = "tg-transport" }
            signal { command = "signal-transport", args = ["--account", "+15550100"] }
        }
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_str(MINIMAL).unwrap();

        assert!(!config.relay.bidirectional);
        assert!(!config.relay.forward_channels);
        assert!(config.relay.read_receipts.messages);
        assert_eq!(config.groups.retention_days, 31);
        assert_eq!(config.groups.name_prefix, "");
        assert_eq!(config.formatting.attribution, "%user: %message");
        assert_eq!(config.media.album_flush_ms, 1_500);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.dedup.horizon_hours, 72);
        assert!(config.filters.is_none());
        assert_eq!(config.platforms.signal.args, vec!["--account", "+15550100"]);
        assert_eq!(
            config.scratch_dir(),
            std::path::PathBuf::from("/var/lib/ferryman/media")
        );
    }

    #[test]
    fn test_overrides_are_read() {
        let config = load_config_str(
            r#"
            relay {
                state_dir = "/tmp/state"
                bidirectional = true
                forward_channels = true
                read_receipts { channels = false }
            }
            groups {
                name_prefix = "(Relay)"
                retention_days = 7
                default_member = "+15550199"
            }
            media { workers = 4, album_flush_ms = 900 }
            retry { max_attempts = 3 }
            platforms {
                telegram { command = "tg" }
                signal { command = "sg" }
            }
        "#,
        )
        .unwrap();

        assert!(config.relay.bidirectional);
        assert!(config.relay.read_receipts.messages);
        assert!(!config.relay.read_receipts.channels);
        assert_eq!(config.groups.name_prefix, "(Relay)");
        assert_eq!(config.groups.default_member.as_deref(), Some("+15550199"));
        assert_eq!(config.media.workers, 4);
        assert_eq!(config.media.album_flush_ms, 900);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_missing_platforms_fails() {
        let result = load_config_str(r#"relay { state_dir = "/tmp" }"#);
        assert!(result.is_err());
    }
}
