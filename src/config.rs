// Process configuration, read once at startup from the environment (after
// `.env` has been loaded by main).

use std::env;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_SQLITE_PATH: &str = "data/marketplace.db";
const DEFAULT_MODERATOR_NAME: &str = "Platform Admin";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown STORAGE_BACKEND '{0}' (expected supabase, sqlite or memory)")]
    UnknownBackend(String),

    #[error("Missing {0} environment variable")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Supabase,
    Sqlite,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(StorageBackend::Supabase),
            "sqlite" => Ok(StorageBackend::Sqlite),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: StorageBackend,
    /// Empty strings are kept as-is; the gateway reports them as misconfigured
    /// on first use.
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub sqlite_path: String,
    /// JSON file of `{ "table": [rows] }` loaded into the memory backend.
    pub memory_seed_path: Option<String>,
    pub moderator_id: Option<String>,
    pub moderator_name: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match non_empty("STORAGE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StorageBackend::Supabase,
        };

        Ok(Self {
            backend,
            supabase_url: lookup("SUPABASE_URL").unwrap_or_default(),
            supabase_service_key: lookup("SUPABASE_SERVICE_ROLE_KEY").unwrap_or_default(),
            sqlite_path: non_empty("SQLITE_PATH").unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string()),
            memory_seed_path: non_empty("MEMORY_SEED_PATH"),
            moderator_id: non_empty("MODERATOR_ID"),
            moderator_name: non_empty("MODERATOR_NAME")
                .unwrap_or_else(|| DEFAULT_MODERATOR_NAME.to_string()),
        })
    }

    /// Moderator identity for replies. Only commands that write as the
    /// moderator need it.
    pub fn moderator_id(&self) -> Result<&str, ConfigError> {
        self.moderator_id
            .as_deref()
            .ok_or(ConfigError::Missing("MODERATOR_ID"))
    }
}
