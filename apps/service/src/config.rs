use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::{DetectorPolicy, ProbePolicy, SchedulerSettings};

/// Environment variable that overrides the default config location
pub const CONFIG_ENV: &str = "UPTIME_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config path available, set {CONFIG_ENV} or HOME")]
    ConfigPathUnavailable,

    #[error("database.path is not set")]
    MissingDatabasePath,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    #[serde(default = "default_open_attempts")]
    pub open_attempts: u32,
    #[serde(default = "default_open_backoff", with = "humantime_serde")]
    pub open_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_pause: Duration,
    #[serde(with = "humantime_serde")]
    pub suppression_window: Duration,
    pub cert_expiry_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<path::PathBuf>,
}

fn default_open_attempts() -> u32 {
    5
}

fn default_open_backoff() -> Duration {
    Duration::from_secs(1)
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            default_timeout: Duration::from_secs(60),
            retry_attempts: 3,
            retry_pause: Duration::from_secs(1),
            suppression_window: Duration::from_secs(3600),
            cert_expiry_days: 10,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age: Duration::from_secs(365 * 86_400),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptime/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("uptime/config.toml"))
}

/// Get default database path ($XDG_DATA_HOME/uptime/uptime.db or
/// $HOME/.local/share/...), empty when neither is known
fn default_database_path() -> path::PathBuf {
    if let Ok(data_home) = env::var("XDG_DATA_HOME") {
        path::PathBuf::from(data_home).join("uptime/uptime.db")
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".local/share/uptime/uptime.db")
    } else {
        path::PathBuf::new()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: default_database_path(),
                open_attempts: default_open_attempts(),
                open_backoff: default_open_backoff(),
            },
            monitoring: MonitoringConfig::default(),
            retention: RetentionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let duration = |d: Duration| humantime::format_duration(d).to_string();

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Open Attempts", &self.database.open_attempts)?;
        write_1(f, "Open Backoff", &duration(self.database.open_backoff))?;

        write_title_1(f, "Monitoring")?;
        write_1(f, "Initial Delay", &duration(self.monitoring.initial_delay))?;
        write_1(f, "Default Timeout", &duration(self.monitoring.default_timeout))?;
        write_1(f, "Retry Attempts", &self.monitoring.retry_attempts)?;
        write_1(f, "Retry Pause", &duration(self.monitoring.retry_pause))?;
        write_1(f, "Suppression Window", &duration(self.monitoring.suppression_window))?;
        write_1(f, "Certificate Expiry Days", &self.monitoring.cert_expiry_days)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Enabled", &self.retention.enabled)?;
        write_1(f, "Max Age", &duration(self.retention.max_age))?;
        write_1(f, "Interval", &duration(self.retention.interval))?;

        write_title_1(f, "Log")?;
        match &self.log.file {
            Some(file) => write_1(f, "File", &file.display())?,
            None => write_1(f, "File", &"stderr only")?,
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Uses the given path, then `$UPTIME_CONFIG`, then
    /// ~/.config/uptime/config.toml. A default config is written there if
    /// none exists.
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else if let Ok(path) = env::var(CONFIG_ENV) {
            normalize_toml_path(path::Path::new(&path))
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        let write_failed = |source| ConfigError::WriteFailed { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingDatabasePath);
        }
        Ok(())
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            default_timeout: self.monitoring.default_timeout,
            attempts: self.monitoring.retry_attempts.max(1),
            retry_pause: self.monitoring.retry_pause,
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            initial_delay: self.monitoring.initial_delay,
            detector: DetectorPolicy {
                suppression_window: self.monitoring.suppression_window,
                cert_expiry_days: self.monitoring.cert_expiry_days,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sparse_file_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = "/var/lib/uptime/uptime.db"

            [monitoring]
            suppression_window = "30m"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.open_attempts, 5);
        assert_eq!(config.database.open_backoff, Duration::from_secs(1));
        assert_eq!(config.monitoring.suppression_window, Duration::from_secs(1800));
        assert_eq!(config.monitoring.default_timeout, Duration::from_secs(60));
        assert_eq!(config.monitoring.retry_attempts, 3);
        assert!(!config.retention.enabled);
        assert_eq!(config.log.file, None);
        assert_eq!(config.scheduler_settings().detector.cert_expiry_days, 10);
    }

    #[test]
    fn test_missing_database_section_fails_to_parse() {
        assert!(toml::from_str::<Config>("[monitoring]\n").is_err());
    }

    #[test]
    fn test_empty_database_path_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[database]\npath = \"\"\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::MissingDatabasePath)));
    }

    #[test]
    fn test_written_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let mut config = Config::default();
        config.database.path = dir.path().join("uptime.db");
        config.write_config(&normalize_toml_path(&path)).unwrap();

        let loaded = Config::from_config(Some(&path)).unwrap();
        assert_eq!(loaded, config);
        assert!(dir.path().join("nested/config.toml").exists());
        assert!(loaded.to_string().contains("Suppression Window: 1h"));
    }
}
