use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cooldown::CooldownConfig;
use crate::history::LearnerConfig;
use crate::logging::LogConfig;
use crate::metrics::StabilityThresholds;
use crate::training_load::LoadConfig;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Analysis windows
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Bands inside which a metric delta reads as stable
    #[serde(default)]
    pub thresholds: StabilityThresholds,

    /// Training load factors
    #[serde(default)]
    pub load: LoadConfig,

    /// Post-activity cooldown model
    #[serde(default)]
    pub cooldown: CooldownConfig,

    /// Periodic recomputation
    #[serde(default)]
    pub refresh: RefreshSettings,

    /// Persistence of the cooldown state
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// Window sizes, in days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Trailing biometric window requested from providers
    pub biometric_window_days: u16,

    /// Activity history mined by the recovery learner
    pub history_days: u16,

    /// Window of the published training load
    pub load_window_days: u16,
}

/// Refresh cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSettings {
    /// Seconds between periodic refreshes
    pub interval_seconds: u64,

    /// Learned recovery tables older than this are rebuilt
    pub table_max_age_hours: u16,

    /// Only an activity that ended within this many hours starts a cooldown
    #[serde(default = "default_cooldown_lookback_hours")]
    pub cooldown_lookback_hours: u16,
}

fn default_cooldown_lookback_hours() -> u16 {
    24
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database holding the cooldown state
    pub database_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            analysis: AnalysisSettings::default(),
            thresholds: StabilityThresholds::default(),
            load: LoadConfig::default(),
            cooldown: CooldownConfig::default(),
            refresh: RefreshSettings::default(),
            storage: StorageSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        AnalysisSettings {
            biometric_window_days: 7,
            history_days: 30,
            load_window_days: 7,
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        RefreshSettings {
            interval_seconds: 60,
            table_max_age_hours: 24,
            cooldown_lookback_hours: default_cooldown_lookback_hours(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: AppConfig::config_dir().join("recovery.db"),
        }
    }
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Directory holding the configuration and the default database
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".recoveryrs")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from `path`, falling back to defaults when the file does not exist.
    /// A file that exists but cannot be parsed is an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Learner settings derived from the analysis and refresh sections
    pub fn learner(&self) -> LearnerConfig {
        LearnerConfig {
            history_days: self.analysis.history_days,
            table_max_age_hours: self.refresh.table_max_age_hours,
            ..LearnerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.metadata.version, deserialized.metadata.version);
        assert_eq!(config.cooldown, deserialized.cooldown);
        assert_eq!(deserialized.load.recency_floor, dec!(0.7));
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original_config = AppConfig::default();
        original_config.refresh.interval_seconds = 300;
        original_config.analysis.history_days = 21;
        original_config.storage.database_path = temp_dir.path().join("state.db");

        original_config.save_to_file(&config_path).unwrap();
        let loaded_config = AppConfig::load_from_file(&config_path).unwrap();

        assert_eq!(loaded_config.refresh.interval(), Duration::from_secs(300));
        assert_eq!(loaded_config.learner().history_days, 21);
        assert_eq!(
            loaded_config.storage.database_path,
            temp_dir.path().join("state.db")
        );
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let toml_str = r#"
            [metadata]
            version = "1.0"
            created_at = "2024-09-01T00:00:00Z"
            updated_at = "2024-09-01T00:00:00Z"

            [refresh]
            interval_seconds = 120
            table_max_age_hours = 12
        "#;

        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.refresh.interval_seconds, 120);
        assert_eq!(config.learner().table_max_age_hours, 12);
        assert_eq!(config.refresh.cooldown_lookback_hours, 24);
        assert_eq!(config.analysis, AnalysisSettings::default());
        assert_eq!(config.cooldown.max_reduction_pct, 80.0);
    }

    #[test]
    fn test_invalid_file_reports_context() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "not = [valid").unwrap();

        let err = AppConfig::load_from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML"));
    }

    #[test]
    fn test_load_or_default() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config = AppConfig::load_or_default(&config_path).unwrap();
        assert_eq!(config.refresh, RefreshSettings::default());

        fs::write(&config_path, "not = [valid").unwrap();
        assert!(AppConfig::load_or_default(&config_path).is_err());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let settings = RefreshSettings {
            interval_seconds: 0,
            ..RefreshSettings::default()
        };
        assert_eq!(settings.interval(), Duration::from_secs(1));
    }
}
