//! Engine configuration loaded from TOML

use crate::logging::{LogConfig, LogFormat, Level};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarshalConfig {
    #[serde(default)]
    pub invoke: InvokeConfig,

    #[serde(default)]
    pub containers: ContainerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeConfig {
    /// Promote resource-leak warnings to argument errors
    #[serde(default = "default_false")]
    pub leak_warnings_as_errors: bool,

    /// Drop the script lock while native code runs
    #[serde(default = "default_true")]
    pub release_lock_during_call: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Return numeric sized arrays as zero-copy views instead of lists
    #[serde(default = "default_false")]
    pub array_views: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            leak_warnings_as_errors: false,
            release_lock_during_call: true,
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self { array_views: false }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            filter: None,
        }
    }
}

impl LoggingConfig {
    /// Logger settings; an unknown level name falls back to INFO
    pub fn to_log_config(&self) -> LogConfig {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);
        let mut config = LogConfig::new().with_level(level).with_format(self.format);
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }
}

/// Failure to load a configuration file
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read config: {}", e),
            Self::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

impl MarshalConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MarshalConfig::default();
        assert!(!config.invoke.leak_warnings_as_errors);
        assert!(config.invoke.release_lock_during_call);
        assert!(!config.containers.array_views);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml() {
        let config = MarshalConfig::from_toml_str(
            r#"
            [invoke]
            leak_warnings_as_errors = true

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert!(config.invoke.leak_warnings_as_errors);
        assert!(config.invoke.release_lock_during_call);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[containers]\narray_views = true").unwrap();
        let config = MarshalConfig::from_file(file.path()).unwrap();
        assert!(config.containers.array_views);
    }

    #[test]
    fn test_malformed_file() {
        let err = MarshalConfig::from_toml_str("[invoke\nbroken").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(MarshalConfig::from_file("/nonexistent/gimarshal.toml").is_err());
    }

    #[test]
    fn test_log_config_conversion() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            filter: Some("invoke=trace".to_string()),
        };
        let config = logging.to_log_config();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Pretty);
    }
}
