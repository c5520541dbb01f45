//! # Host Configuration
//!
//! Settings for the printer host, loaded from a TOML file.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [printer]
//! name = "prusa-mk3"
//!
//! [serial]
//! port = "/dev/ttyACM0"
//! baud = 115200
//!
//! [job]
//! pause_lift_mm = 5.0
//! stop_lift_mm = 10.0
//! ```
//!
//! Every table and field is optional; missing values fall back to the defaults below.
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use krusty_printjob::config::Config;
//! let toml_str = r#"
//! [job]
//! pause_lift_mm = 2.5
//! "#;
//! let config: Config = toml::from_str(toml_str).unwrap();
//! assert_eq!(config.job.pause_lift_mm, 2.5);
//! assert_eq!(config.job.stop_lift_mm, 10.0);
//! assert!(config.job.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the printer, its serial link and job behaviour.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub job: JobConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default = "default_printer_name")]
    pub name: String,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            name: default_printer_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
        }
    }
}

/// Head withdrawal distances used by the pause, resume and stop sequences.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobConfig {
    /// Z lift applied on pause and undone on resume, in millimetres.
    #[serde(default = "default_pause_lift")]
    pub pause_lift_mm: f64,
    /// Z lift applied after a stop, in millimetres.
    #[serde(default = "default_stop_lift")]
    pub stop_lift_mm: f64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            pause_lift_mm: default_pause_lift(),
            stop_lift_mm: default_stop_lift(),
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("pause_lift_mm", self.pause_lift_mm), ("stop_lift_mm", self.stop_lift_mm)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("job.{} must be a positive distance, got {}", field, value)));
            }
        }
        Ok(())
    }
}

fn default_printer_name() -> String { "printer".to_string() }
fn default_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud() -> u32 { 115200 }
fn default_pause_lift() -> f64 { 5.0 }
fn default_stop_lift() -> f64 { 10.0 }

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.job.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.printer.name, "printer");
        assert_eq!(config.serial.baud, 115200);
        assert_eq!(config.job, JobConfig::default());
    }

    #[test]
    fn rejects_non_positive_lift() {
        let job = JobConfig { pause_lift_mm: 0.0, ..JobConfig::default() };
        assert!(matches!(job.validate(), Err(ConfigError::Invalid(_))));
        let job = JobConfig { stop_lift_mm: f64::NAN, ..JobConfig::default() };
        assert!(job.validate().is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[printer]\nname = \"mk3\"\n[serial]\nport = \"/dev/ttyACM0\"\nbaud = 250000").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.printer.name, "mk3");
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud, 250000);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config("/nonexistent/printer.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn load_config_rejects_invalid_lift() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[job]\npause_lift_mm = -1.0").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Invalid(_))));
    }
}
