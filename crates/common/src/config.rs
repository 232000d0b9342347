use std::path::PathBuf;

use serde::Deserialize;

/// Default maximum accepted archive upload (10 MiB).
const DEFAULT_MAX_ARCHIVE_BYTES: usize = 10 * 1024 * 1024;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Address the API server binds to (default: 0.0.0.0:3000)
    pub bind_addr: String,

    /// Filesystem root that archive extractions are written under
    pub media_root: PathBuf,

    /// Public URL prefix that maps onto `media_root` (default: /media/)
    pub media_url: String,

    /// Largest archive upload accepted, in bytes
    pub max_archive_bytes: usize,

    /// Whether the WhatsApp channel may send at all (default: true)
    pub whatsapp_enabled: bool,

    /// Messaging provider account identifier
    pub whatsapp_account_sid: Option<String>,

    /// Messaging provider auth token
    pub whatsapp_auth_token: Option<String>,

    /// Sender number messages are sent from
    pub whatsapp_sender: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            media_root: std::env::var("MEDIA_ROOT")
                .unwrap_or_else(|_| "./media".to_string())
                .into(),
            media_url: std::env::var("MEDIA_URL").unwrap_or_else(|_| "/media/".to_string()),
            max_archive_bytes: match std::env::var("MAX_ARCHIVE_BYTES") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| anyhow::anyhow!("MAX_ARCHIVE_BYTES must be a valid usize"))?,
                Err(_) => DEFAULT_MAX_ARCHIVE_BYTES,
            },
            whatsapp_enabled: match std::env::var("WHATSAPP_ENABLED") {
                Ok(v) => parse_flag(&v)
                    .ok_or_else(|| anyhow::anyhow!("WHATSAPP_ENABLED must be true or false"))?,
                Err(_) => true,
            },
            whatsapp_account_sid: std::env::var("WHATSAPP_ACCOUNT_SID").ok(),
            whatsapp_auth_token: std::env::var("WHATSAPP_AUTH_TOKEN").ok(),
            whatsapp_sender: std::env::var("WHATSAPP_SENDER").unwrap_or_default(),
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Credentials for a messaging channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChannelCredentials {
    pub account_id: String,
    pub auth_token: String,
    pub sender_address: String,
}

/// Source of channel configuration (admin settings, environment, ...).
pub trait ConfigSource: Send + Sync {
    /// Whether the channel is administratively enabled.
    fn is_channel_enabled(&self) -> bool;

    /// Credentials used to talk to the provider.
    fn credentials(&self) -> ChannelCredentials;
}

impl ConfigSource for AppConfig {
    fn is_channel_enabled(&self) -> bool {
        self.whatsapp_enabled
    }

    fn credentials(&self) -> ChannelCredentials {
        ChannelCredentials {
            account_id: self.whatsapp_account_sid.clone().unwrap_or_default(),
            auth_token: self.whatsapp_auth_token.clone().unwrap_or_default(),
            sender_address: self.whatsapp_sender.clone(),
        }
    }
}

/// Channel configuration captured once when a dispatcher is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub credentials: ChannelCredentials,
}

impl ChannelSettings {
    /// Read `source` once. With no source the channel is enabled with empty
    /// credentials.
    pub fn snapshot(source: Option<&dyn ConfigSource>) -> Self {
        match source {
            Some(source) => Self {
                enabled: source.is_channel_enabled(),
                credentials: source.credentials(),
            },
            None => Self::default(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            credentials: ChannelCredentials::default(),
        }
    }
}
