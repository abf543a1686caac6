//! Configuration management

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub jellyfin: Option<JellyfinConfig>,

    /// Reconciliation poll cadence while connected
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Health probe cadence while connected/degraded
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// How long an entity survives its session's absence before going idle
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_grace_secs() -> u64 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct JellyfinConfig {
    /// Server URL; a bare host gets an http:// scheme prepended
    pub url: String,
    pub username: String,
    pub password: String,
    /// One-shot two-factor code consumed during authentication
    #[serde(default)]
    pub two_factor_code: Option<String>,
    /// Servers below this version are rejected at login
    #[serde(default = "default_min_server_version")]
    pub min_server_version: String,
    #[serde(default = "default_artwork_max_width")]
    pub artwork_max_width: u32,
}

fn default_min_server_version() -> String {
    "10.8.0".to_string()
}

fn default_artwork_max_width() -> u32 {
    600
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("JRB_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home)
                .join("Library/Application Support/jellyfin-remote-bridge");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg).join("jellyfin-remote-bridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config/jellyfin-remote-bridge");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata).join("jellyfin-remote-bridge");
        }
    }

    // Fallback to current directory
    std::path::PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (JRB_JELLYFIN__URL, etc.)
        .add_source(
            ::config::Environment::with_prefix("JRB")
                .separator("__")
                .try_parsing(true),
        );

    // Support plain JELLYFIN_* env vars (used by the Docker image and the
    // integration launcher scripts)
    if let Ok(url) = std::env::var("JELLYFIN_URL") {
        builder = builder.set_override("jellyfin.url", url)?;
    }
    if let Ok(username) = std::env::var("JELLYFIN_USERNAME") {
        builder = builder.set_override("jellyfin.username", username)?;
    }
    if let Ok(password) = std::env::var("JELLYFIN_PASSWORD") {
        builder = builder.set_override("jellyfin.password", password)?;
    }
    if let Ok(code) = std::env::var("JELLYFIN_TWO_FACTOR_CODE") {
        builder = builder.set_override("jellyfin.two_factor_code", code)?;
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
