/// Configuration for the assembly pipeline: a single optional `config.toml`
/// layered under defaults, the way the rest of the ambient stack does it.
use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub logging: LoggingConfig,
    pub assembly: AssemblyConfig,
    pub io: IoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub app_name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_logging: bool,
    pub log_dir: String,
    pub max_file_size: usize,
    pub max_files: usize,
}

/// Policy resolving Open Question #1: what to do with ACK residue still
/// sitting in a batch's bucket at eviction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateAckPolicy {
    /// Run `try_match_everything` against the evicted batch once more
    /// before dropping it, trading a little extra CPU per eviction for
    /// catching acks that arrived just after the batch closed.
    RetryOnEvict,
    /// Accept the loss; an ack that arrives after its batch closes never
    /// gets matched.
    DropOnEvict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    pub probe_timeout_secs: u64,
    pub phase_timeout_secs: u64,
    pub confirmation_load_threshold_secs: u64,
    /// Open Question #2: how many batches a retransmit signature survives.
    /// The original hard-codes 2; exposed here as a tunable.
    pub retransmit_window_batches: u32,
    pub late_ack_policy: LateAckPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    pub compressed: bool,
    pub read_csv: bool,
    pub out_dir: String,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        debug!("loading configuration from {}", path_str);

        let config = Config::builder()
            .add_source(File::with_name(&path_str))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        info!("configuration loaded from {}", path_str);
        Ok(app_config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::from_file(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                debug!("failed to load config file ({}), using defaults", e);
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Message(format!(
                "invalid logging level: {}. must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::Message(format!(
                "invalid logging format: {}. must be one of: {:?}",
                self.logging.format, valid_formats
            )));
        }

        if self.assembly.probe_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "assembly.probe_timeout_secs must be positive".to_string(),
            ));
        }

        if self.assembly.phase_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "assembly.phase_timeout_secs must be positive".to_string(),
            ));
        }

        if self.assembly.retransmit_window_batches == 0 {
            return Err(ConfigError::Message(
                "assembly.retransmit_window_batches must be positive".to_string(),
            ));
        }

        info!("configuration validation successful");
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                app_name: "spoki-assemble".to_string(),
                version: "0.1.0".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                file_logging: false,
                log_dir: "./logs".to_string(),
                max_file_size: 10,
                max_files: 5,
            },
            assembly: AssemblyConfig {
                probe_timeout_secs: 5 * 60,
                phase_timeout_secs: 600,
                confirmation_load_threshold_secs: 30 * 60,
                retransmit_window_batches: 2,
                late_ack_policy: LateAckPolicy::RetryOnEvict,
            },
            io: IoConfig {
                compressed: false,
                read_csv: true,
                out_dir: "./out".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_probe_timeout() {
        let mut config = AppConfig::default();
        config.assembly.probe_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let config = AppConfig::load_or_default("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.general.app_name, "spoki-assemble");
    }

    #[test]
    fn loads_from_file_and_overrides_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[general]
app_name = "custom"
version = "9.9.9"

[logging]
level = "debug"
format = "json"
file_logging = false
log_dir = "./logs"
max_file_size = 10
max_files = 5

[assembly]
probe_timeout_secs = 120
phase_timeout_secs = 300
confirmation_load_threshold_secs = 600
retransmit_window_batches = 3
late_ack_policy = "drop_on_evict"

[io]
compressed = true
read_csv = false
out_dir = "./custom_out"
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&config_path).unwrap();
        assert_eq!(config.general.app_name, "custom");
        assert_eq!(config.assembly.probe_timeout_secs, 120);
        assert_eq!(config.assembly.late_ack_policy, LateAckPolicy::DropOnEvict);
        assert!(config.io.compressed);
    }
}
