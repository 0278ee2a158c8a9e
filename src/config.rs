use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
///
/// Every section falls back to its defaults, so an empty environment yields
/// a working local setup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub allocator: AllocatorConfig,
    pub autosave: AutosaveConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub uri: String,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            name: "quire".to_string(),
        }
    }
}

/// Identifier allocation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Random candidates checked before the timestamp fallback.
    pub max_attempts: u32,
    /// Length of the random suffix appended to the slug base.
    pub suffix_len: usize,
    /// Base used when a title normalizes to nothing.
    pub placeholder_base: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            suffix_len: 6,
            placeholder_base: "untitled".to_string(),
        }
    }
}

/// Editor-side autosave timing, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before an autosave fires.
    pub debounce_ms: u64,
    /// How long "saved" / "error" stays visible before returning to idle.
    pub status_display_ms: u64,
    /// Request timeout for background autosaves.
    pub autosave_timeout_ms: u64,
    /// Request timeout for explicit saves and publishing.
    pub manual_timeout_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 30_000,
            status_display_ms: 2_000,
            autosave_timeout_ms: 10_000,
            manual_timeout_ms: 20_000,
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn status_display(&self) -> Duration {
        Duration::from_millis(self.status_display_ms)
    }

    pub fn autosave_timeout(&self) -> Duration {
        Duration::from_millis(self.autosave_timeout_ms)
    }

    pub fn manual_timeout(&self) -> Duration {
        Duration::from_millis(self.manual_timeout_ms)
    }
}

/// Local backup settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Well-known slot the backup record lives under.
    pub slot: String,
    /// Records older than this are treated as absent.
    pub staleness_hours: i64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            slot: "quire:draft-backup".to_string(),
            staleness_hours: 24,
        }
    }
}

#[cfg(feature = "server")]
impl AppConfig {
    /// Load configuration from an optional file, then `QUIRE_*` environment
    /// variables (`__` separates sections, e.g. `QUIRE_DATABASE__URI`).
    pub fn load(path: Option<&str>) -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix("QUIRE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| crate::error::AppError::Internal(format!("Invalid configuration: {e}")))
    }
}
