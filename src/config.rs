//! Configuration management for suitey
//!
//! Settings are loaded from environment variables with sensible defaults; command-line
//! flags override them afterwards.
//!
//! # Environment Variables
//!
//! - `SUITEY_LOG_LEVEL`: Logging level - default: "info"
//! - `SUITEY_GRACE_PERIOD`: Seconds a container gets to stop after the first interrupt
//!   (1-300) - default: "10"
//! - `SUITEY_MAX_PARALLEL`: Test suites run at once - default: number of CPU cores
//! - `SUITEY_BUILD_CPUS`: CPU cores given to each build container - default: all cores
//! - `SUITEY_TEMP_DIR`: Parent of the per-run temporary directory - default: system temp dir
//! - `SUITEY_DETECT_CONCURRENTLY`: Run module detection probes concurrently (true|false) -
//!   default: "true"
//! - `SUITEY_KEEP_IMAGES`: Keep test images after the run (true|false) - default: "false"
//!
//! # Example
//!
//! ```no_run
//! use suitey::SuiteyConfig;
//!
//! let config = SuiteyConfig::default();
//! config.validate().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use crate::util::hardware;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;
const MAX_GRACE_PERIOD_SECS: u64 = 300;
const DEFAULT_DETECT_CONCURRENTLY: bool = true;
const DEFAULT_KEEP_IMAGES: bool = false;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Runtime settings of one suitey invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteyConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Grace period for stopping containers on the first interrupt, in seconds
    pub grace_period_secs: u64,

    /// Maximum number of test suites running at once
    pub max_parallel: usize,

    /// CPU cores per build container
    pub build_cpus: usize,

    /// Parent directory of the process-scoped temporary root
    pub temp_dir: Option<PathBuf>,

    /// Probe modules concurrently during platform detection
    pub detect_concurrently: bool,

    /// Keep test images once the test phase is over
    pub keep_images: bool,
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Default for SuiteyConfig {
    /// Loads `SUITEY_*` environment variables, falling back to defaults for anything
    /// missing or unparseable
    fn default() -> Self {
        let cores = hardware::cpu_cores();

        let log_level = env::var("SUITEY_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            log_level,
            grace_period_secs: env_parsed("SUITEY_GRACE_PERIOD")
                .unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
            max_parallel: env_parsed("SUITEY_MAX_PARALLEL").unwrap_or(cores),
            build_cpus: env_parsed("SUITEY_BUILD_CPUS").unwrap_or(cores),
            temp_dir: env::var("SUITEY_TEMP_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            detect_concurrently: env_parsed("SUITEY_DETECT_CONCURRENTLY")
                .unwrap_or(DEFAULT_DETECT_CONCURRENTLY),
            keep_images: env_parsed("SUITEY_KEEP_IMAGES").unwrap_or(DEFAULT_KEEP_IMAGES),
        }
    }
}

impl SuiteyConfig {
    /// Checks value ranges and the log level
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grace_period_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Grace period must be at least 1 second".to_string(),
            ));
        }
        if self.grace_period_secs > MAX_GRACE_PERIOD_SECS {
            return Err(ConfigError::ValidationFailed(format!(
                "Grace period cannot exceed {} seconds",
                MAX_GRACE_PERIOD_SECS
            )));
        }
        if self.max_parallel == 0 {
            return Err(ConfigError::ValidationFailed(
                "Max parallel suites must be at least 1".to_string(),
            ));
        }
        if self.build_cpus == 0 {
            return Err(ConfigError::ValidationFailed(
                "Build CPUs must be at least 1".to_string(),
            ));
        }
        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Temporary directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Converts configuration to a display map for output formatting
    pub fn to_display_map(&self) -> std::collections::BTreeMap<String, String> {
        let mut map = std::collections::BTreeMap::new();
        map.insert("log_level".to_string(), self.log_level.clone());
        map.insert(
            "grace_period_secs".to_string(),
            self.grace_period_secs.to_string(),
        );
        map.insert("max_parallel".to_string(), self.max_parallel.to_string());
        map.insert("build_cpus".to_string(), self.build_cpus.to_string());
        if let Some(ref dir) = self.temp_dir {
            map.insert("temp_dir".to_string(), dir.display().to_string());
        }
        map.insert(
            "detect_concurrently".to_string(),
            self.detect_concurrently.to_string(),
        );
        map.insert("keep_images".to_string(), self.keep_images.to_string());
        map
    }
}

impl fmt::Display for SuiteyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Suitey Configuration:")?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        writeln!(f, "  Grace Period: {}s", self.grace_period_secs)?;
        writeln!(f, "  Max Parallel Suites: {}", self.max_parallel)?;
        writeln!(f, "  Build CPUs: {}", self.build_cpus)?;
        if let Some(ref dir) = self.temp_dir {
            writeln!(f, "  Temp Dir: {}", dir.display())?;
        }
        writeln!(f, "  Detect Concurrently: {}", self.detect_concurrently)?;
        writeln!(f, "  Keep Images: {}", self.keep_images)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = vec![
            EnvGuard::unset("SUITEY_LOG_LEVEL"),
            EnvGuard::unset("SUITEY_GRACE_PERIOD"),
            EnvGuard::unset("SUITEY_MAX_PARALLEL"),
            EnvGuard::unset("SUITEY_BUILD_CPUS"),
            EnvGuard::unset("SUITEY_TEMP_DIR"),
            EnvGuard::unset("SUITEY_DETECT_CONCURRENTLY"),
            EnvGuard::unset("SUITEY_KEEP_IMAGES"),
        ];

        let config = SuiteyConfig::default();

        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.grace_period_secs, DEFAULT_GRACE_PERIOD_SECS);
        assert_eq!(config.max_parallel, hardware::cpu_cores());
        assert_eq!(config.build_cpus, hardware::cpu_cores());
        assert!(config.temp_dir.is_none());
        assert!(config.detect_concurrently);
        assert!(!config.keep_images);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let temp = tempfile::TempDir::new().unwrap();
        let _guards = vec![
            EnvGuard::set("SUITEY_LOG_LEVEL", "DEBUG"),
            EnvGuard::set("SUITEY_GRACE_PERIOD", "30"),
            EnvGuard::set("SUITEY_MAX_PARALLEL", "3"),
            EnvGuard::set("SUITEY_BUILD_CPUS", "2"),
            EnvGuard::set("SUITEY_TEMP_DIR", temp.path().to_str().unwrap()),
            EnvGuard::set("SUITEY_DETECT_CONCURRENTLY", "false"),
            EnvGuard::set("SUITEY_KEEP_IMAGES", "true"),
        ];

        let config = SuiteyConfig::default();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.grace_period(), Duration::from_secs(30));
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.build_cpus, 2);
        assert_eq!(config.temp_dir.as_deref(), Some(temp.path()));
        assert!(!config.detect_concurrently);
        assert!(config.keep_images);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_unparseable_values_fall_back() {
        let _guards = vec![
            EnvGuard::set("SUITEY_GRACE_PERIOD", "soon"),
            EnvGuard::set("SUITEY_KEEP_IMAGES", "maybe"),
        ];

        let config = SuiteyConfig::default();
        assert_eq!(config.grace_period_secs, DEFAULT_GRACE_PERIOD_SECS);
        assert!(!config.keep_images);
    }

    #[test]
    #[serial]
    fn test_configuration_validation_grace_period() {
        let mut config = SuiteyConfig::default();
        config.grace_period_secs = 0;
        assert!(config.validate().is_err());

        config.grace_period_secs = MAX_GRACE_PERIOD_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_configuration_validation_invalid_log_level() {
        let mut config = SuiteyConfig::default();
        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_configuration_validation_missing_temp_dir() {
        let mut config = SuiteyConfig::default();
        config.temp_dir = Some(PathBuf::from("/definitely/not/here"));
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_config_display() {
        let display = format!("{}", SuiteyConfig::default());
        assert!(display.contains("Suitey Configuration:"));
        assert!(display.contains("Grace Period:"));
    }
}
