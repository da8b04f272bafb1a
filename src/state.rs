//! Application state management
//! This module wires configuration, the known-device file, the manager and the
//! controller loop together for an embedder.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::info;
use tokio::task::JoinHandle;

use crate::config::sensor_config::SensorConfig;
use crate::core::bluetooth::manager::BluetoothManager;
use crate::core::bluetooth::platform::BlePlatform;
use crate::core::bluetooth::store::FileStore;
use crate::core::event_loop::{ControllerHandle, ControllerInbox};
use crate::logging::{self, LogSink};

/// Global application state
pub struct AppState {
    pub config: SensorConfig,
    config_dir: PathBuf,
    /// Handle to the running controller loop
    pub controller: ControllerHandle,
    loop_task: JoinHandle<Option<BluetoothManager>>,
}

impl AppState {
    /// Loads the config from `config_dir`, sets up logging at its
    /// `log_level` and starts the controller loop.
    /// `make_platform` receives a handle for delivering platform events.
    pub async fn new<F>(
        config_dir: impl Into<PathBuf>,
        log_sink: Option<LogSink>,
        make_platform: F,
    ) -> Result<Self>
    where
        F: FnOnce(ControllerHandle) -> Box<dyn BlePlatform>,
    {
        let config_dir = config_dir.into();
        let config = SensorConfig::load_config(&config_dir).await?;
        logging::init(config.level_filter(), log_sink);
        let (controller, inbox) = ControllerHandle::channel();
        let platform = make_platform(controller.clone());
        Ok(Self::assemble(config_dir, config, controller, inbox, platform))
    }

    /// Same as [`new`](Self::new) with the system Bluetooth adapter.
    #[cfg(feature = "bluest")]
    pub async fn with_system_adapter(
        config_dir: impl Into<PathBuf>,
        log_sink: Option<LogSink>,
    ) -> Result<Self> {
        use crate::core::bluetooth::bluest_backend::BluestPlatform;

        let config_dir = config_dir.into();
        let config = SensorConfig::load_config(&config_dir).await?;
        logging::init(config.level_filter(), log_sink);
        let (controller, inbox) = ControllerHandle::channel();
        let platform = BluestPlatform::new(controller.clone()).await?;
        Ok(Self::assemble(
            config_dir,
            config,
            controller,
            inbox,
            Box::new(platform),
        ))
    }

    fn assemble(
        config_dir: PathBuf,
        config: SensorConfig,
        controller: ControllerHandle,
        inbox: ControllerInbox,
        platform: Box<dyn BlePlatform>,
    ) -> Self {
        let store = FileStore::new(config.known_devices_path(&config_dir));
        info!("Initializing BluetoothManager...");
        let manager = BluetoothManager::new(&config, platform, Box::new(store));
        let loop_task = inbox.spawn(manager);
        Self {
            config,
            config_dir,
            controller,
            loop_task,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub async fn save_config(&self) -> Result<()> {
        self.config.save_config(&self.config_dir).await
    }

    /// Stops the controller loop and returns the manager.
    pub async fn shutdown(self) -> Result<BluetoothManager> {
        let manager = self.controller.shutdown().await?;
        self.loop_task
            .await
            .map_err(|e| anyhow!("Controller loop task failed: {}", e))?;
        info!("Application state shut down.");
        Ok(manager)
    }
}
