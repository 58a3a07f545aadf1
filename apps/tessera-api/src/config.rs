//! # API Configuration
//!
//! Layered configuration for the server binary.
//!
//! ## Load Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TESSERA__SERVER__PORT=9000                                         │
//! │     TESSERA__DATABASE__PATH=/var/lib/tessera/data.db                   │
//! │                                                                         │
//! │  2. Config File (tessera.toml)                                         │
//! │     --config <path>, else $TESSERA_CONFIG, else the platform config    │
//! │     directory (~/.config/tessera/tessera.toml on Linux)                │
//! │                                                                         │
//! │  3. Defaults (lowest priority)                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example File
//! ```toml
//! [server]
//! port = 8080
//!
//! [database]
//! backend = "sqlite"
//! path = "tessera.db"
//!
//! [naming]
//! table_prefix = "app_"
//!
//! [logging]
//! filter = "info,tessera=debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_core::schema::NamingStrategy;
use tessera_db::DbConfig;
use thiserror::Error;
use tracing::debug;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TESSERA_CONFIG";

/// Prefix of per-key environment overrides (`TESSERA__SECTION__KEY`).
const ENV_PREFIX: &str = "TESSERA";
const ENV_SEPARATOR: &str = "__";

/// Backends the engine can run on.
const SUPPORTED_BACKENDS: &[&str] = &["sqlite"];

// =============================================================================
// Settings
// =============================================================================

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub naming: NamingStrategy,
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Largest request body accepted, in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 8080,
            body_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Only `sqlite` is accepted.
    pub backend: String,

    /// Database file, or `:memory:`.
    pub path: PathBuf,

    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            backend: "sqlite".to_string(),
            path: PathBuf::from("tessera.db"),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 30,
        }
    }
}

/// Logging settings. `RUST_LOG` takes precedence over `filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: "info,tessera=debug,sqlx=warn".to_string(),
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl ApiConfig {
    /// Loads configuration from defaults, file and environment.
    ///
    /// An explicit path (argument or `TESSERA_CONFIG`) must exist; the
    /// platform default file is optional.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let explicit = config_path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let (file, required) = match explicit {
            Some(path) => (Some(path), true),
            None => (Self::default_config_path(), false),
        };

        let mut builder = config::Config::builder().add_source(config::Config::try_from(&ApiConfig::default())?);

        if let Some(path) = file {
            debug!(?path, required, "Reading config file");
            builder = builder.add_source(config::File::from(path.as_path()).required(required));
        }

        let config: ApiConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_BACKENDS.contains(&self.database.backend.as_str()) {
            return Err(ConfigError::UnsupportedBackend(self.database.backend.clone()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be greater than 0".into()));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }
        if self.server.body_limit_bytes == 0 {
            return Err(ConfigError::Invalid("server.body_limit_bytes must be greater than 0".into()));
        }
        Ok(())
    }

    /// Pool settings for [`tessera_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        let db = &self.database;
        if db.path == Path::new(":memory:") {
            return DbConfig::in_memory();
        }
        DbConfig::new(&db.path)
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .connect_timeout(Duration::from_secs(db.acquire_timeout_secs))
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "tessera", "tessera")
            .map(|dirs| dirs.config_dir().join("tessera.toml"))
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Unsupported database backend '{0}' (only sqlite is available)")]
    UnsupportedBackend(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tessera-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ApiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.backend, "sqlite");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let path = temp_file(
            "[database]\nmax_connections = 12\n\n[naming]\ntable_prefix = \"app_\"\nsingular_tables = true\n",
        );
        let config = ApiConfig::load(Some(path.clone())).unwrap();
        std::fs::remove_file(path).ok();

        assert_eq!(config.database.max_connections, 12);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.naming.table_prefix, "app_");
        assert!(config.naming.singular_tables);
    }

    #[test]
    fn test_unsupported_backend_is_rejected() {
        let path = temp_file("[database]\nbackend = \"postgres\"\n");
        let result = ApiConfig::load(Some(path.clone()));
        std::fs::remove_file(path).ok();

        assert!(matches!(result, Err(ConfigError::UnsupportedBackend(b)) if b == "postgres"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("tessera-does-not-exist.toml");
        assert!(matches!(ApiConfig::load(Some(path)), Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_zero_pool_is_invalid() {
        let mut config = ApiConfig::default();
        config.database.max_connections = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_memory_path_selects_in_memory_pool() {
        let mut config = ApiConfig::default();
        config.database.path = PathBuf::from(":memory:");
        assert_eq!(config.db_config().max_connections, 1);
    }
}
