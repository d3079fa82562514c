//! Application Configuration
//!
//! Layers, lowest precedence first: built-in defaults, the TOML file, then
//! `IDASEN_`-prefixed environment variables (`IDASEN_SERVER__PORT=9000`).
//! A missing file is not an error.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use desk_runtime::{DeskOptions, MAX_DESK_HEIGHT, MIN_DESK_HEIGHT};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "idasen.toml";

/// Errors while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub desk: DeskConfig,
    pub logging: LoggingConfig,
    pub simulator: SimulatorConfig,
}

/// HTTP listener and authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Tokens accepted on `/v1` routes; empty disables authentication
    pub auth_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_tokens: Vec::new(),
        }
    }
}

/// Desk actor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub margin_mm: i32,
    pub min_height_mm: i32,
    pub max_height_mm: i32,
    pub poll_interval_ms: u64,
    pub move_timeout_ms: u64,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            margin_mm: 10,
            min_height_mm: MIN_DESK_HEIGHT,
            max_height_mm: MAX_DESK_HEIGHT,
            poll_interval_ms: 100,
            move_timeout_ms: 30_000,
        }
    }
}

impl DeskConfig {
    /// Actor options described by this section
    pub fn to_options(&self) -> DeskOptions {
        DeskOptions::default()
            .with_margin(self.margin_mm)
            .with_height_range(self.min_height_mm, self.max_height_mm)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_move_timeout(Duration::from_millis(self.move_timeout_ms))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Tracing setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Behaviour of the simulated desk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub initial_height_mm: i32,
    /// Distance travelled per physics tick while the motor runs
    pub speed_mm_per_tick: i32,
    pub tick_ms: u64,
    /// How long the motor keeps running after a single move command
    pub motion_burst_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_height_mm: 7000,
            speed_mm_per_tick: 4,
            tick_ms: 50,
            motion_burst_ms: 500,
        }
    }
}

impl AppConfig {
    /// Layered sources for `path`
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("IDASEN_").split("__"))
    }

    /// Load and validate configuration
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    /// Extract and validate from an already layered figment
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let desk = &self.desk;

        if desk.min_height_mm >= desk.max_height_mm {
            return Err(ConfigError::Invalid(format!(
                "desk.min_height_mm ({}) must be below desk.max_height_mm ({})",
                desk.min_height_mm, desk.max_height_mm
            )));
        }
        if desk.margin_mm < 0 {
            return Err(ConfigError::Invalid("desk.margin_mm must not be negative".to_string()));
        }
        if desk.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("desk.poll_interval_ms must be positive".to_string()));
        }
        if self.simulator.tick_ms == 0 {
            return Err(ConfigError::Invalid("simulator.tick_ms must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.path().join("absent.toml")));

        let config = AppConfig::from_figment(figment).unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
            [server]
            port = 9100
            auth_tokens = ["secret"]

            [desk]
            margin_mm = 5
            move_timeout_ms = 10000

            [logging]
            format = "json"
            "#,
        );

        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file.path()));
        let config = AppConfig::from_figment(figment).unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.auth_tokens, vec!["secret".to_string()]);
        assert_eq!(config.desk.margin_mm, 5);
        assert_eq!(config.desk.poll_interval_ms, 100);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_PATH,
                r#"
                [server]
                port = 9100

                [desk]
                margin_mm = 5
                "#,
            )?;
            jail.set_env("IDASEN_SERVER__PORT", "9200");
            jail.set_env("IDASEN_DESK__MOVE_TIMEOUT_MS", "5000");
            jail.set_env("IDASEN_LOGGING__FORMAT", "json");

            let config = AppConfig::load(Path::new(DEFAULT_CONFIG_PATH)).map_err(|e| e.to_string())?;

            assert_eq!(config.server.port, 9200);
            assert_eq!(config.desk.margin_mm, 5);
            assert_eq!(config.desk.move_timeout_ms, 5000);
            assert_eq!(config.logging.format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_desk_section_maps_to_options() {
        let desk = DeskConfig {
            margin_mm: 15,
            min_height_mm: 6500,
            max_height_mm: 12000,
            poll_interval_ms: 250,
            move_timeout_ms: 5000,
        };

        let options = desk.to_options();

        assert_eq!(options.margin, 15);
        assert_eq!(options.min_height, 6500);
        assert_eq!(options.max_height, 12000);
        assert_eq!(options.poll_interval, Duration::from_millis(250));
        assert_eq!(options.move_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_inverted_height_range_is_rejected() {
        let file = write_config(
            r#"
            [desk]
            min_height_mm = 9000
            max_height_mm = 8000
            "#,
        );

        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file.path()));

        assert!(matches!(AppConfig::from_figment(figment), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_file_is_a_load_error() {
        let file = write_config("[server]\nport = \"not a number\"\n");

        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file.path()));

        assert!(matches!(AppConfig::from_figment(figment), Err(ConfigError::Load(_))));
    }
}
