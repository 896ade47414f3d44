// ⚙️ Configuration - TOML file, environment, defaults
//
// Loaded from `config.toml` in the platform config directory
// (e.g. `~/.config/killua-t/config.toml` on Linux).
//
// Precedence: CLI flags (applied by the binary) > environment > file > defaults.
//
// Environment:
// - KILLUA_CONFIG            config file path
// - KILLUA_DB_BACKEND        sqlite | memory | mysql (KILLUA_DB_TYPE also accepted)
// - KILLUA_DB_PATH           SQLite database file
// - KILLUA_DB_HOST / KILLUA_DB_PORT / KILLUA_DB_USER / KILLUA_DB_PASS / KILLUA_DB_NAME
//                            MySQL connection
// - DEFAULT_MERALCO_RATE     rate used when the history is empty
// - KILLUA_LOG               log level filter (e.g. debug)

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::db::Backend;
use crate::entities::DEFAULT_RATE;
use crate::error::{KilluaError, Result};
use crate::logging::LogFormat;

pub const ENV_CONFIG: &str = "KILLUA_CONFIG";
pub const ENV_DB_BACKEND: &str = "KILLUA_DB_BACKEND";
pub const ENV_DB_TYPE: &str = "KILLUA_DB_TYPE";
pub const ENV_DB_PATH: &str = "KILLUA_DB_PATH";
pub const ENV_DB_HOST: &str = "KILLUA_DB_HOST";
pub const ENV_DB_PORT: &str = "KILLUA_DB_PORT";
pub const ENV_DB_USER: &str = "KILLUA_DB_USER";
pub const ENV_DB_PASS: &str = "KILLUA_DB_PASS";
pub const ENV_DB_NAME: &str = "KILLUA_DB_NAME";
pub const ENV_DEFAULT_RATE: &str = "DEFAULT_MERALCO_RATE";
pub const ENV_LOG: &str = "KILLUA_LOG";

/// Database file name inside the data directory.
pub const DB_FILE_NAME: &str = "killua_t.db";

// ============================================================================
// Paths
// ============================================================================

/// Platform directories for config and data.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config: PathBuf,
    pub data: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        match ProjectDirs::from("ph", "killua", "killua-t") {
            Some(dirs) => AppPaths {
                config: dirs.config_dir().to_path_buf(),
                data: dirs.data_dir().to_path_buf(),
            },
            None => AppPaths {
                config: PathBuf::from("."),
                data: PathBuf::from("."),
            },
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    pub fn database_file(&self) -> PathBuf {
        self.data.join(DB_FILE_NAME)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Config File
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub rates: RateConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: Backend,

    /// SQLite file. Defaults to `<data dir>/killua_t.db`
    pub path: Option<PathBuf>,

    // MySQL connection, used when backend = "mysql"
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            backend: Backend::Sqlite,
            path: None,
            host: "localhost".to_string(),
            port: 3306,
            user: "killua_user".to_string(),
            password: String::new(),
            name: "killua_t".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// SQLite file, falling back to the platform data directory.
    pub fn sqlite_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppPaths::new().database_file())
    }

    /// Where the data lives, for logs and error messages. Never includes
    /// the password.
    pub fn location(&self) -> String {
        match self.backend {
            Backend::Sqlite => self.sqlite_path().display().to_string(),
            Backend::Memory => ":memory:".to_string(),
            Backend::Mysql => format!("mysql://{}@{}:{}/{}", self.user, self.host, self.port, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// PHP per kWh when no rate has been recorded
    pub default_rate: f64,
    /// Insert `default_rate` into an empty history on startup
    pub seed_default: bool,
}

impl Default for RateConfig {
    fn default() -> Self {
        RateConfig {
            default_rate: DEFAULT_RATE,
            seed_default: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "warn".to_string(),
            format: LogFormat::Human,
        }
    }
}

impl Config {
    /// Load from `KILLUA_CONFIG` or the default location, then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = match std::env::var(ENV_CONFIG) {
            Ok(path) => PathBuf::from(path),
            Err(_) => AppPaths::new().config_file(),
        };
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| KilluaError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| KilluaError::Config(e.to_string()))
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // KILLUA_DB_BACKEND wins over the older KILLUA_DB_TYPE
        if let Some(backend) = lookup(ENV_DB_BACKEND).or_else(|| lookup(ENV_DB_TYPE)) {
            self.database.backend = backend.parse()?;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(host) = lookup(ENV_DB_HOST) {
            self.database.host = host;
        }
        if let Some(port) = lookup(ENV_DB_PORT) {
            self.database.port = port.trim().parse().map_err(|_| {
                KilluaError::Config(format!("{} is not a port number: {}", ENV_DB_PORT, port))
            })?;
        }
        if let Some(user) = lookup(ENV_DB_USER) {
            self.database.user = user;
        }
        if let Some(password) = lookup(ENV_DB_PASS) {
            self.database.password = password;
        }
        if let Some(name) = lookup(ENV_DB_NAME) {
            self.database.name = name;
        }
        if let Some(rate) = lookup(ENV_DEFAULT_RATE) {
            self.rates.default_rate = rate.trim().parse().map_err(|_| {
                KilluaError::Config(format!("{} is not a number: {}", ENV_DEFAULT_RATE, rate))
            })?;
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let rate = self.rates.default_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(KilluaError::Config(format!(
                "default rate must be greater than 0, got {}",
                rate
            )));
        }
        if self.database.backend == Backend::Mysql {
            if self.database.host.trim().is_empty() || self.database.name.trim().is_empty() {
                return Err(KilluaError::Config(
                    "mysql backend needs a host and a database name".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// SQLite database file, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.sqlite_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.backend, Backend::Sqlite);
        assert_eq!(config.rates.default_rate, 12.64);
        assert!(config.rates.seed_default);
        assert_eq!(config.logging.level, "warn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            [database]
            backend = "memory"

            [rates]
            default_rate = 11.25
            "#,
        )
        .unwrap();

        assert_eq!(config.database.backend, Backend::Memory);
        assert_eq!(config.rates.default_rate, 11.25);
        // Unspecified keys keep defaults
        assert!(config.rates.seed_default);
        assert_eq!(config.logging.format, LogFormat::Human);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(Config::from_toml("[database]\nbackend = 3").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DB_PATH, "/tmp/killua-test.db"),
            (ENV_DEFAULT_RATE, "13.5"),
            (ENV_LOG, "debug"),
        ]);

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/killua-test.db"));
        assert_eq!(config.rates.default_rate, 13.5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_mysql_selected_from_toml() {
        let config = Config::from_toml(
            r#"
            [database]
            backend = "mysql"
            host = "db.local"
            port = 3307
            user = "meter"
            password = "s3cret"
            name = "killua_prod"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.backend, Backend::Mysql);
        assert_eq!(config.database.port, 3307);
        assert!(config.validate().is_ok());
        assert_eq!(config.database.location(), "mysql://meter@db.local:3307/killua_prod");
    }

    #[test]
    fn test_mysql_selected_from_env() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DB_TYPE, "mysql"),
            (ENV_DB_HOST, "127.0.0.1"),
            (ENV_DB_PORT, "3310"),
            (ENV_DB_USER, "killua_user"),
            (ENV_DB_PASS, "pw"),
            (ENV_DB_NAME, "killua_t"),
        ]);

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.backend, Backend::Mysql);
        assert_eq!(config.database.host, "127.0.0.1");
        assert_eq!(config.database.port, 3310);
        assert_eq!(config.database.password, "pw");

        // KILLUA_DB_BACKEND overrides KILLUA_DB_TYPE
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                ENV_DB_BACKEND => Some("sqlite".to_string()),
                ENV_DB_TYPE => Some("mysql".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.database.backend, Backend::Sqlite);
    }

    #[test]
    fn test_mysql_config_validation() {
        let mut config = Config::default();
        assert!(config
            .apply_env(|key| (key == ENV_DB_PORT).then(|| "not-a-port".to_string()))
            .is_err());

        config.database.backend = Backend::Mysql;
        config.database.host = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_env_rate() {
        let mut config = Config::default();
        let result = config.apply_env(|key| (key == ENV_DEFAULT_RATE).then(|| "cheap".to_string()));
        assert!(result.is_err());

        config.rates.default_rate = -1.0;
        assert!(config.validate().is_err());
    }
}
