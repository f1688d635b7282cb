//! Startup settings read from the environment (or a `.env` file).

use std::time::Duration;

use crate::error::BotError;
use crate::gateway::DEFAULT_GATEWAY_URL;
use crate::http::DEFAULT_API_BASE_URL;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 15;

#[derive(Clone)]
pub struct BotConfig {
    pub token: String,
    pub application_id: String,
    pub guild_id: String,
    pub gateway_url: String,
    pub api_base_url: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub log_level: String,
}

impl BotConfig {
    /// Read the process environment. Call `dotenv::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Result<Self, BotError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BotError> {
        let optional = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            optional(key).ok_or_else(|| BotError::Configuration(format!("{} is not set", key)))
        };
        let seconds = |key: &str, default: u64| -> Result<Duration, BotError> {
            match optional(key) {
                None => Ok(Duration::from_secs(default)),
                Some(raw) => match raw.parse::<u64>() {
                    Ok(0) | Err(_) => Err(BotError::Configuration(format!(
                        "{} must be a positive number of seconds, got {:?}",
                        key, raw
                    ))),
                    Ok(secs) => Ok(Duration::from_secs(secs)),
                },
            }
        };

        Ok(Self {
            token: required("DISCORD_BOT_TOKEN")?,
            application_id: required("DISCORD_CLIENT_ID")?,
            guild_id: required("DISCORD_GUILD_ID")?,
            gateway_url: optional("DISCORD_GATEWAY_URL")
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            api_base_url: optional("DISCORD_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            connect_timeout: seconds("DISCORD_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
            command_timeout: seconds("DISCORD_COMMAND_TIMEOUT_SECS", DEFAULT_COMMAND_TIMEOUT_SECS)?,
            log_level: optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

impl std::fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("application_id", &self.application_id)
            .field("guild_id", &self.guild_id)
            .field("gateway_url", &self.gateway_url)
            .field("api_base_url", &self.api_base_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<BotConfig, BotError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| env.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DISCORD_BOT_TOKEN", "secret-token"),
        ("DISCORD_CLIENT_ID", "42"),
        ("DISCORD_GUILD_ID", "7"),
    ];

    #[test]
    fn defaults_fill_optional_settings() {
        let config = config(&REQUIRED).unwrap();
        assert_eq!(config.application_id, "42");
        assert_eq!(config.guild_id, "7");
        assert_eq!(config.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.command_timeout, Duration::from_secs(15));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_or_blank_required_values_fail() {
        for key in ["DISCORD_BOT_TOKEN", "DISCORD_CLIENT_ID", "DISCORD_GUILD_ID"] {
            let without: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != key).collect();
            let err = config(&without).unwrap_err();
            assert!(
                matches!(err, BotError::Configuration(ref m) if m.contains(key)),
                "{key}"
            );

            let mut blank = without.clone();
            blank.push((key, "   "));
            assert!(matches!(config(&blank), Err(BotError::Configuration(_))));
        }
    }

    #[test]
    fn timeouts_are_parsed_and_validated() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DISCORD_CONNECT_TIMEOUT_SECS", "5"));
        pairs.push(("DISCORD_COMMAND_TIMEOUT_SECS", "60"));
        let parsed = config(&pairs).unwrap();
        assert_eq!(parsed.connect_timeout, Duration::from_secs(5));
        assert_eq!(parsed.command_timeout, Duration::from_secs(60));

        for bad in ["soon", "0", "-1"] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push(("DISCORD_CONNECT_TIMEOUT_SECS", bad));
            assert!(matches!(config(&pairs), Err(BotError::Configuration(_))));
        }
    }

    #[test]
    fn debug_output_redacts_the_token() {
        let config = config(&REQUIRED).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }
}
