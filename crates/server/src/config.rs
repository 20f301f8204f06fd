use std::{collections::HashMap, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use server_api::ChatLimits;
use storage::StoreConfig;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    #[serde(default)]
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    #[serde(default)]
    pub document_path: Option<PathBuf>,
    pub jwt_secret: String,
    pub socket_messages_per_minute: u32,
    pub http_messages_per_minute: u32,
    pub dedup_window_secs: u64,
}

impl Settings {
    /// Relational when a database url is configured, documents otherwise.
    pub fn store_config(&self) -> StoreConfig {
        match self
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            Some(url) => StoreConfig::Relational {
                database_url: normalize_database_url(url),
                max_connections: self.database_max_connections.max(1),
            },
            None => StoreConfig::Document {
                snapshot_path: self.document_path.clone(),
            },
        }
    }

    pub fn chat_limits(&self) -> ChatLimits {
        ChatLimits {
            socket_messages_per_minute: self.socket_messages_per_minute,
            http_messages_per_minute: self.http_messages_per_minute,
            dedup_window: Duration::from_secs(self.dedup_window_secs),
        }
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(SETTINGS_FILE, None)
}

/// Defaults, then the optional settings file, then `APP__*` variables.
/// `env` replaces the process environment when given.
pub(crate) fn load_settings_from(
    settings_file: &str,
    env: Option<HashMap<String, String>>,
) -> anyhow::Result<Settings> {
    let settings: Settings = Config::builder()
        .set_default("bind_addr", "127.0.0.1:5000")?
        .set_default("database_max_connections", 10)?
        .set_default("socket_messages_per_minute", 40)?
        .set_default("http_messages_per_minute", 20)?
        .set_default("dedup_window_secs", 30)?
        .add_source(File::new(settings_file, FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()
        .context("failed to read server settings")?
        .try_deserialize()
        .context("invalid server settings (is APP__JWT_SECRET set?)")?;

    if settings.jwt_secret.trim().is_empty() {
        bail!("jwt_secret must not be empty");
    }
    Ok(settings)
}

pub(crate) fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        if has_windows_drive(&path) {
            return format!("sqlite:{path}");
        }
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn has_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
