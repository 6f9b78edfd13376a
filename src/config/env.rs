//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `FERRYMAN_STATE_DIR` - Directory for mappings and the dedup log
//! - `FERRYMAN_GROUP_NAME_PREFIX` - Prefix for created group names
//! - `FERRYMAN_RETENTION_DAYS` - Disappearing-message retention for new groups
//! - `FERRYMAN_DEFAULT_MEMBER` - Member added to every new group
//! - `FERRYMAN_FORWARD_CHANNELS` - `1` to relay Telegram channels
//! - `FERRYMAN_BIDIRECTIONAL` - `1` to relay Signal replies back to Telegram

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "FERRYMAN";

/// Apply environment variable overrides to a config.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(dir) = env::var(format!("{}_STATE_DIR", ENV_PREFIX)) {
        config.relay.state_dir = dir.into();
    }

    if let Ok(prefix) = env::var(format!("{}_GROUP_NAME_PREFIX", ENV_PREFIX)) {
        config.groups.name_prefix = prefix.trim().to_string();
    }
    if let Ok(days) = env::var(format!("{}_RETENTION_DAYS", ENV_PREFIX)) {
        if let Ok(days) = days.parse() {
            config.groups.retention_days = days;
        }
    }
    if let Ok(member) = env::var(format!("{}_DEFAULT_MEMBER", ENV_PREFIX)) {
        if !member.is_empty() {
            config.groups.default_member = Some(member);
        }
    }

    if let Ok(flag) = env::var(format!("{}_FORWARD_CHANNELS", ENV_PREFIX)) {
        config.relay.forward_channels = parse_flag(&flag);
    }
    if let Ok(flag) = env::var(format!("{}_BIDIRECTIONAL", ENV_PREFIX)) {
        config.relay.bidirectional = parse_flag(&flag);
    }

    config
}

/// `1`, `true`, `yes` and `on` enable a flag; anything else disables it.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Get the config file path from environment or use default.
///
/// Checks `FERRYMAN_CONFIG` environment variable, otherwise returns "ferryman.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "ferryman.conf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::load_config_str;

    fn make_test_config() -> Config {
        load_config_str(
            r#"
            relay { state_dir = "/original" }
            groups { name_prefix = "(Telegram)" }
            platforms {
                telegram { command = "tg" }
                signal { command = "sg" }
            }
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "FERRYMAN");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" on "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_apply_env_overrides_no_vars() {
        env::remove_var("FERRYMAN_STATE_DIR");
        env::remove_var("FERRYMAN_GROUP_NAME_PREFIX");

        let result = apply_env_overrides(make_test_config());

        assert_eq!(result.relay.state_dir, std::path::PathBuf::from("/original"));
        assert_eq!(result.groups.name_prefix, "(Telegram)");
    }
}
