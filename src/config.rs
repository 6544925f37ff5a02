//! Bot configuration
//!
//! Tunables live in `config/bot_config.yaml`, secrets come from the environment.

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::link::Endpoints;

/// Default location of the configuration file
pub const CONFIG_FILE: &str = "config/bot_config.yaml";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} must be set")]
    MissingVar(&'static str),

    #[error("Environment variable {name} is invalid: {reason}")]
    InvalidVar { name: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Role names used for the leaderboard tiers, best tier first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRoleNames {
    pub top_10: String,
    pub top_25: String,
    pub top_50: String,
    pub top_75: String,
    pub top_100: String,
}

impl Default for TierRoleNames {
    fn default() -> Self {
        Self {
            top_10: "Top 10".to_string(),
            top_25: "Top 25".to_string(),
            top_50: "Top 50".to_string(),
            top_75: "Top 75".to_string(),
            top_100: "Top 100".to_string(),
        }
    }
}

/// Bot configuration file contents. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Age after which an unanswered link request expires
    pub link_check_timeout: u64,
    /// Period of the link reconciliation loop
    pub link_check_attempt_delay: u64,
    /// How long a denied member may not request again
    pub ban_duration: u64,
    /// Period of the ban sweeper
    pub unban_check_delay: u64,
    /// Period of the leaderboard role update
    pub top_players_update_delay: u64,
    /// Client-side timeout for calls to the Catastrophia API
    pub request_timeout_secs: u64,
    /// Usernames that can never be linked
    pub confidential_usernames: Vec<String>,
    pub link_endpoint: String,
    pub all_links_endpoint: String,
    pub top_times_endpoint: String,
    pub playtime_endpoint: String,
    /// Number of leaderboard entries requested
    pub leaderboard_size: u32,
    pub linked_role_name: String,
    pub tier_role_names: TierRoleNames,
    /// Channel the leaderboard is posted to, if any
    pub top_players_channel: Option<u64>,
    /// Channel internal failures are reported to, if any
    pub error_channel: Option<u64>,
    /// Member pinged with each failure report
    pub error_ping_user: Option<u64>,
    /// File holding the username <-> member links
    pub linked_users_file: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            link_check_timeout: 300,
            link_check_attempt_delay: 10,
            ban_duration: 86_400,
            unban_check_delay: 43_200,
            top_players_update_delay: 3_600,
            request_timeout_secs: 5,
            confidential_usernames: Vec::new(),
            link_endpoint: "/link".to_string(),
            all_links_endpoint: "/links".to_string(),
            top_times_endpoint: "/toptimes".to_string(),
            playtime_endpoint: "/playtime".to_string(),
            leaderboard_size: 100,
            linked_role_name: "linked".to_string(),
            tier_role_names: TierRoleNames::default(),
            top_players_channel: None,
            error_channel: None,
            error_ping_user: None,
            linked_users_file: "data/linked_users.yaml".to_string(),
        }
    }
}

impl BotConfig {
    /// Load the configuration from a YAML file
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse the configuration from YAML text
    ///
    /// # Errors
    /// Returns an error if the text is not valid configuration YAML
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Catastrophia API endpoint paths
    #[must_use]
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            link: self.link_endpoint.clone(),
            all_links: self.all_links_endpoint.clone(),
            top_times: self.top_times_endpoint.clone(),
            playtime: self.playtime_endpoint.clone(),
        }
    }

    /// Settings handed to the link engine
    #[must_use]
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            connection_timeout: seconds(self.link_check_timeout),
            attempt_delay: period(self.link_check_attempt_delay),
            ban_duration: seconds(self.ban_duration),
            unban_check_delay: period(self.unban_check_delay),
            leaderboard_delay: period(self.top_players_update_delay),
            leaderboard_size: self.leaderboard_size,
            confidential_usernames: self
                .confidential_usernames
                .iter()
                .map(|name| name.to_lowercase())
                .collect(),
        }
    }
}

// A zero period would make the task interval panic.
fn period(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}

// Out-of-range values are capped at a century so timestamp arithmetic cannot overflow.
fn seconds(value: u64) -> TimeDelta {
    let cap = TimeDelta::days(36_500);
    i64::try_from(value)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .map_or(cap, |delta| delta.min(cap))
}

/// Timing and policy values used by the link engine
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub connection_timeout: TimeDelta,
    pub attempt_delay: Duration,
    pub ban_duration: TimeDelta,
    pub unban_check_delay: Duration,
    pub leaderboard_delay: Duration,
    pub leaderboard_size: u32,
    /// Lowercased
    pub confidential_usernames: HashSet<String>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        BotConfig::default().link_settings()
    }
}

impl LinkSettings {
    /// Case-insensitive check against the confidential username list
    #[must_use]
    pub fn is_confidential(&self, username: &str) -> bool {
        self.confidential_usernames
            .contains(&username.to_lowercase())
    }
}

/// Values read from the environment
#[derive(Clone)]
pub struct Secrets {
    pub discord_token: String,
    pub guild_id: u64,
    pub api_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("guild_id", &self.guild_id)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    /// Read secrets from the environment
    ///
    /// # Errors
    /// Returns an error if a variable is missing or `GUILD_ID` is not a number
    pub fn from_env() -> Result<Self, ConfigError> {
        let guild_id = require("GUILD_ID")?;
        Ok(Self {
            discord_token: require("DISCORD_TOKEN")?,
            guild_id: guild_id.parse().map_err(|e| ConfigError::InvalidVar {
                name: "GUILD_ID",
                reason: format!("{e}"),
            })?,
            api_url: require("CATASTROPHIA_API_URL")?,
            api_key: require("API_KEY")?,
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.link_check_attempt_delay, 10);
        assert_eq!(config.unban_check_delay, 43_200);
        assert_eq!(config.linked_role_name, "linked");
        assert!(config.top_players_channel.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "link_check_timeout: 120\nconfidential_usernames:\n  - Admin_Acct\n  - builderman\n";
        let config = BotConfig::from_yaml(yaml).expect("Failed to parse");
        assert_eq!(config.link_check_timeout, 120);
        assert_eq!(config.ban_duration, 86_400);
        assert_eq!(config.all_links_endpoint, "/links");

        let settings = config.link_settings();
        assert_eq!(settings.connection_timeout, TimeDelta::seconds(120));
        assert!(settings.is_confidential("admin_acct"));
        assert!(settings.is_confidential("BUILDERMAN"));
        assert!(!settings.is_confidential("steve123"));
    }

    #[test]
    fn test_zero_period_is_clamped() {
        let config = BotConfig::from_yaml("link_check_attempt_delay: 0").expect("Failed to parse");
        assert_eq!(config.link_settings().attempt_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_endpoints_and_error_channel() {
        let yaml = "playtime_endpoint: /time\nerror_channel: 55\n";
        let config = BotConfig::from_yaml(yaml).expect("Failed to parse");
        let endpoints = config.endpoints();
        assert_eq!(endpoints.playtime, "/time");
        assert_eq!(endpoints.link, "/link");
        assert_eq!(config.error_channel, Some(55));
        assert_eq!(config.error_ping_user, None);
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        let result = BotConfig::from_yaml("link_check_timeout: [not, a, number]");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let config = BotConfig::load("config/does_not_exist.yaml")
            .await
            .expect("Missing file should not be an error");
        assert_eq!(config.link_check_timeout, 300);
    }

    #[test]
    fn test_secrets_debug_hides_values() {
        let secrets = Secrets {
            discord_token: "token-value".to_string(),
            guild_id: 1,
            api_url: "https://api.example".to_string(),
            api_key: "key-value".to_string(),
        };
        let output = format!("{secrets:?}");
        assert!(!output.contains("token-value"));
        assert!(!output.contains("key-value"));
        assert!(!output.contains("api.example"));
    }
}
