use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tickets: TicketsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub bot_token: String,
    #[serde(default = "default_use_privileged_intents")]
    pub use_privileged_intents: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Milliseconds to wait between consecutive Discord sends.
    #[serde(default = "default_discord_send_delay")]
    pub discord_send_delay: u64,
    /// Milliseconds between a ticket closing and its channel being deleted,
    /// so the closing confirmation stays readable.
    #[serde(default = "default_delete_channel_delay")]
    pub delete_channel_delay: u64,
    /// Milliseconds to wait for a QR code before reporting a timeout.
    #[serde(default = "default_qr_timeout")]
    pub qr_timeout: u64,
    /// Milliseconds before an abandoned interactive setup draft is discarded.
    #[serde(default = "default_setup_ttl")]
    pub setup_ttl: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            discord_send_delay: default_discord_send_delay(),
            delete_channel_delay: default_delete_channel_delay(),
            qr_timeout: default_qr_timeout(),
            setup_ttl: default_setup_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TicketsConfig {
    /// Fallback template used when an instance has no new-ticket message.
    #[serde(default = "default_new_ticket_template")]
    pub new_ticket_template: String,
    /// Fallback template used when an instance has no welcome message.
    #[serde(default = "default_welcome_template")]
    pub welcome_template: String,
    /// Fallback template used when an instance has no closing message.
    #[serde(default = "default_closing_template")]
    pub closing_template: String,
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            new_ticket_template: default_new_ticket_template(),
            welcome_template: default_welcome_template(),
            closing_template: default_closing_template(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH")
            .ok()
            .unwrap_or_else(|| "config.yaml".to_string());

        Self::load_from_file(&config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token cannot be empty".to_string(),
            ));
        }

        if self.storage.data_dir.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage.data_dir cannot be empty".to_string(),
            ));
        }

        if self.limits.qr_timeout == 0 {
            return Err(ConfigError::InvalidConfig(
                "limits.qr_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("WA_BRIDGE_AUTH_BOT_TOKEN") {
            self.auth.bot_token = value;
        }
        if let Ok(value) = std::env::var("WA_BRIDGE_STORAGE_DATA_DIR") {
            self.storage.data_dir = value;
        }
    }
}

fn default_use_privileged_intents() -> bool {
    false
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_discord_send_delay() -> u64 {
    1500
}

fn default_delete_channel_delay() -> u64 {
    5000
}

fn default_qr_timeout() -> u64 {
    60_000
}

fn default_setup_ttl() -> u64 {
    15 * 60 * 1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_new_ticket_template() -> String {
    "New ticket opened for {name} ({phoneNumber})".to_string()
}

fn default_welcome_template() -> String {
    "Hello {name}! A member of our team will be with you shortly.".to_string()
}

fn default_closing_template() -> String {
    "This conversation has been closed. Thank you for contacting us!".to_string()
}
