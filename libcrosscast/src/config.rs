//! Configuration management for Crosscast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Process-wide secret for the token vault. The `CROSSCAST_VAULT_SECRET`
/// environment variable takes precedence over the config file so the
/// secret can stay out of it entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    pub secret: Option<String>,
}

impl VaultConfig {
    pub fn resolve_secret(&self) -> Result<String> {
        if let Ok(secret) = std::env::var("CROSSCAST_VAULT_SECRET") {
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
        self.secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingField("vault.secret".to_string()).into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Fan-out width: how many account attempts run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Overall cap per account attempt so one slow platform cannot stall
    /// the whole fan-out.
    #[serde(default = "default_account_timeout_secs")]
    pub account_timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            account_timeout_secs: default_account_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub x: XConfig,
    #[serde(default)]
    pub pinterest: PinterestConfig,
    #[serde(default)]
    pub bluesky: BlueskyConfig,
    #[serde(default)]
    pub facebook: FacebookConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
    #[serde(default)]
    pub reddit: RedditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XConfig {
    #[serde(default = "default_x_api_base")]
    pub api_base: String,
    /// Equivalent media upload hosts, tried in order.
    #[serde(default = "default_x_upload_bases")]
    pub upload_bases: Vec<String>,
    /// OAuth2 client id, required for token refresh.
    pub client_id: Option<String>,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            api_base: default_x_api_base(),
            upload_bases: default_x_upload_bases(),
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinterestConfig {
    #[serde(default = "default_pinterest_api_base")]
    pub api_base: String,
}

impl Default for PinterestConfig {
    fn default() -> Self {
        Self {
            api_base: default_pinterest_api_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    /// Personal data server spoken to over XRPC.
    #[serde(default = "default_bluesky_service_base")]
    pub service_base: String,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service_base: default_bluesky_service_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacebookConfig {
    #[serde(default = "default_facebook_graph_base")]
    pub graph_base: String,
    /// App credentials, required for long-lived token exchange.
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            graph_base: default_facebook_graph_base(),
            app_id: None,
            app_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    #[serde(default = "default_facebook_graph_base")]
    pub graph_base: String,
    #[serde(default = "default_instagram_refresh_base")]
    pub refresh_base: String,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            graph_base: default_facebook_graph_base(),
            refresh_base: default_instagram_refresh_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_reddit_oauth_base")]
    pub oauth_base: String,
    #[serde(default = "default_reddit_auth_base")]
    pub auth_base: String,
    /// App credentials, required for token refresh.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default = "default_reddit_user_agent")]
    pub user_agent: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            oauth_base: default_reddit_oauth_base(),
            auth_base: default_reddit_auth_base(),
            client_id: None,
            client_secret: None,
            user_agent: default_reddit_user_agent(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_account_timeout_secs() -> u64 {
    120
}

fn default_session_capacity() -> usize {
    64
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_x_api_base() -> String {
    "https://api.x.com".to_string()
}

fn default_x_upload_bases() -> Vec<String> {
    vec![
        "https://upload.twitter.com".to_string(),
        "https://upload.x.com".to_string(),
    ]
}

fn default_pinterest_api_base() -> String {
    "https://api.pinterest.com/v5".to_string()
}

fn default_bluesky_service_base() -> String {
    "https://bsky.social".to_string()
}

fn default_facebook_graph_base() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

fn default_instagram_refresh_base() -> String {
    "https://graph.instagram.com".to_string()
}

fn default_reddit_oauth_base() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_reddit_auth_base() -> String {
    "https://www.reddit.com".to_string()
}

fn default_reddit_user_agent() -> String {
    "crosscast/0.2".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/crosscast/crosscast.db".to_string(),
            },
            vault: VaultConfig::default(),
            publish: PublishConfig::default(),
            sessions: SessionConfig::default(),
            platforms: PlatformsConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosscast").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("crosscast"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = ":memory:"
            "#,
        )
        .unwrap();

        assert_eq!(config.publish.concurrency, 4);
        assert_eq!(config.publish.account_timeout_secs, 120);
        assert_eq!(config.sessions.capacity, 64);
        assert_eq!(config.platforms.x.api_base, "https://api.x.com");
        assert_eq!(config.platforms.x.upload_bases.len(), 2);
        assert_eq!(config.platforms.bluesky.service_base, "https://bsky.social");
        assert!(config.platforms.reddit.client_id.is_none());
    }

    #[test]
    fn test_partial_platform_section_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = ":memory:"

            [platforms.x]
            client_id = "client-123"
            "#,
        )
        .unwrap();

        assert_eq!(config.platforms.x.client_id.as_deref(), Some("client-123"));
        assert_eq!(config.platforms.x.api_base, "https://api.x.com");
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let result: std::result::Result<Config, _> = toml::from_str("database = 12");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_vault_secret_env_override() {
        std::env::set_var("CROSSCAST_VAULT_SECRET", "from-env");
        let vault = VaultConfig {
            secret: Some("from-file".to_string()),
        };
        assert_eq!(vault.resolve_secret().unwrap(), "from-env");
        std::env::remove_var("CROSSCAST_VAULT_SECRET");
    }

    #[test]
    #[serial]
    fn test_vault_secret_from_file_field() {
        std::env::remove_var("CROSSCAST_VAULT_SECRET");
        let vault = VaultConfig {
            secret: Some("from-file".to_string()),
        };
        assert_eq!(vault.resolve_secret().unwrap(), "from-file");
    }

    #[test]
    #[serial]
    fn test_vault_secret_missing() {
        std::env::remove_var("CROSSCAST_VAULT_SECRET");
        let vault = VaultConfig { secret: None };
        let error = vault.resolve_secret().unwrap_err();
        assert!(error.to_string().contains("vault.secret"));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env_override() {
        std::env::set_var("CROSSCAST_CONFIG", "/tmp/crosscast-test.toml");
        let path = resolve_config_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/crosscast-test.toml"));
        std::env::remove_var("CROSSCAST_CONFIG");
    }
}
