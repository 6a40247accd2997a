//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with `RUST_CAL_`, sections split on `__`)
//!
//! # Example
//! ```no_run
//! use rust_cal::config::CalConfig;
//!
//! let config = CalConfig::load_from("config/cal.toml")?;
//! config.validate()?;
//! println!("Chunk size: {}", config.module.max_calibrate_pixels);
//! # Ok::<(), rust_cal::error::CalError>(())
//! ```

use crate::dispatch::DispatchMode;
use crate::error::{CalError, CalResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Calibration module parameters shared by every particle
    #[serde(default)]
    pub module: ModuleParameters,
    /// Particle execution settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Working directories
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Calibration module parameters.
///
/// These are embedded in every packaged engine input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleParameters {
    /// Soft upper bound on pixels per target/background particle
    #[serde(default = "default_max_calibrate_pixels")]
    pub max_calibrate_pixels: usize,
    /// Upper bound on identifiers per store read (0 = unbounded)
    #[serde(default = "default_max_read_ids")]
    pub max_read_ids: usize,
    /// Count coarse-point cadences as valid data
    #[serde(default)]
    pub enable_coarse_point_processing: bool,
    /// Resolve dynamic black blobs for the unit of work
    #[serde(default)]
    pub dynablack_enabled: bool,
    /// Resolve full-frame images as supplementary context
    #[serde(default)]
    pub enable_ffi_inform: bool,
    /// Requested black algorithm; the engine reports what it actually applied
    #[serde(default = "default_black_algorithm")]
    pub black_algorithm: String,
}

impl Default for ModuleParameters {
    fn default() -> Self {
        Self {
            max_calibrate_pixels: default_max_calibrate_pixels(),
            max_read_ids: default_max_read_ids(),
            enable_coarse_point_processing: false,
            dynablack_enabled: false,
            enable_ffi_inform: false,
            black_algorithm: default_black_algorithm(),
        }
    }
}

/// Particle execution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Sequential or pooled execution within a stage
    #[serde(default)]
    pub mode: DispatchMode,
    /// Worker count for pooled execution (defaults to available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Persist packaged inputs to `storage.input_dir` and release their samples
    #[serde(default)]
    pub persist_inputs: bool,
}

impl DispatchConfig {
    /// Worker count to use for pooled execution.
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Working directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the engine writes blob files into
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    /// Directory packaged inputs are persisted to
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            input_dir: default_input_dir(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "rust-cal".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_calibrate_pixels() -> usize {
    25_000
}

fn default_max_read_ids() -> usize {
    5_000
}

fn default_black_algorithm() -> String {
    "exponentialOneDBlack".to_string()
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("blobs")
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("inputs")
}

impl CalConfig {
    /// Load configuration from a specific file path plus `RUST_CAL_` environment overrides
    ///
    /// Example: `RUST_CAL_MODULE__MAX_CALIBRATE_PIXELS=1000`
    pub fn load_from<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        let config = Figment::from(Serialized::defaults(CalConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_CAL_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Load defaults plus environment overrides, without a file.
    pub fn from_env() -> CalResult<Self> {
        let config = Figment::from(Serialized::defaults(CalConfig::default()))
            .merge(Env::prefixed("RUST_CAL_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> CalResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(CalError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.dispatch.workers == Some(0) {
            return Err(CalError::Configuration(
                "dispatch.workers must be at least 1".to_string(),
            ));
        }

        if self.storage.blob_dir.as_os_str().is_empty() {
            return Err(CalError::Configuration(
                "storage.blob_dir cannot be empty".to_string(),
            ));
        }
        if self.storage.input_dir.as_os_str().is_empty() {
            return Err(CalError::Configuration(
                "storage.input_dir cannot be empty".to_string(),
            ));
        }

        if self.module.black_algorithm.trim().is_empty() {
            return Err(CalError::Configuration(
                "module.black_algorithm cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = CalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.mode, DispatchMode::Sequential);
        assert!(config.dispatch.effective_workers() >= 1);
    }

    #[test]
    #[serial]
    fn loads_partial_toml_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[module]
max_calibrate_pixels = 1200
enable_coarse_point_processing = true

[dispatch]
mode = "pooled"
workers = 4
"#
        )
        .unwrap();

        let config = CalConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "rust-cal");
        assert_eq!(config.module.max_calibrate_pixels, 1200);
        assert!(config.module.enable_coarse_point_processing);
        assert_eq!(config.module.max_read_ids, 5_000);
        assert_eq!(config.dispatch.mode, DispatchMode::Pooled);
        assert_eq!(config.dispatch.effective_workers(), 4);
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[module]\nmax_calibrate_pixels = 1200").unwrap();

        std::env::set_var("RUST_CAL_MODULE__MAX_CALIBRATE_PIXELS", "77");
        let loaded = CalConfig::load_from(file.path());
        std::env::remove_var("RUST_CAL_MODULE__MAX_CALIBRATE_PIXELS");

        assert_eq!(loaded.unwrap().module.max_calibrate_pixels, 77);
    }

    #[test]
    fn invalid_log_level() {
        let mut config = CalConfig::default();
        config.application.log_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level 'loud'"));
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = CalConfig::default();
        config.dispatch.workers = Some(0);
        assert!(config.validate().is_err());
    }
}
