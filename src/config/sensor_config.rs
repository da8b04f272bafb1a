use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::core::bluetooth::constants::{DEFAULT_SERVICE_FILTER, KNOWN_DEVICES_FILE_NAME};
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "sensor_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Services a peripheral must advertise to show up in scans.
    /// Empty means no filtering.
    pub service_filter: Vec<Uuid>,

    /// File holding the known-device roster, relative to the config directory.
    pub known_devices_file: String,

    /// Reconnect to known devices whenever they are seen in a scan.
    pub auto_reconnect: bool,

    /// Read device information, locations and battery once after discovery.
    pub read_on_connect: bool,

    /// `error`, `warn`, `info`, `debug` or `trace`
    pub log_level: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            service_filter: DEFAULT_SERVICE_FILTER.to_vec(),
            known_devices_file: KNOWN_DEVICES_FILE_NAME.to_string(),
            auto_reconnect: true,
            read_on_connect: true,
            log_level: "info".to_string(),
        }
    }
}

impl SensorConfig {
    /// Loads the config from `config_dir`, or the default if there is no file yet.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config to `config_dir`, creating the directory if needed.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;
        let file_path = config_dir.join(CONFIG_FILE_NAME);

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize sensor config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Sensor config saved to {:?}.", file_path);
        Ok(())
    }

    /// Where the known-device roster lives for this config.
    pub fn known_devices_path(&self, config_dir: &Path) -> PathBuf {
        config_dir.join(&self.known_devices_file)
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level {:?}, using info", self.log_level);
            log::LevelFilter::Info
        })
    }
}
