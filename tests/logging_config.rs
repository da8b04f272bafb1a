use std::sync::{Arc, Mutex};

use ble_sensor_core::config::SensorConfig;
use ble_sensor_core::core::bluetooth::{BlePlatform, DeviceIdentity};
use ble_sensor_core::logging::LogMessage;
use ble_sensor_core::state::AppState;
use log::LevelFilter;
use uuid::Uuid;

struct IdlePlatform;

impl BlePlatform for IdlePlatform {
    fn start_scan(&mut self, _: &[Uuid]) {}
    fn stop_scan(&mut self) {}
    fn connect(&mut self, _: &DeviceIdentity) {}
    fn cancel_connect(&mut self, _: &DeviceIdentity) {}
    fn discover_services(&mut self, _: &DeviceIdentity, _: &[Uuid]) {}
    fn discover_characteristics(&mut self, _: &DeviceIdentity, _: &Uuid) {}
    fn subscribe(&mut self, _: &DeviceIdentity, _: &Uuid) {}
    fn read_value(&mut self, _: &DeviceIdentity, _: &Uuid) {}
}

// The logger is process-wide, so this binary holds a single test.
#[tokio::test]
async fn configured_log_level_is_installed_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = SensorConfig {
        log_level: "debug".to_string(),
        ..SensorConfig::default()
    };
    config.save_config(dir.path()).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::<LogMessage>::new()));
    let sink_seen = seen.clone();
    let state = AppState::new(
        dir.path(),
        Some(Box::new(move |m: &LogMessage| sink_seen.lock().unwrap().push(m.clone()))),
        |_| Box::new(IdlePlatform) as Box<dyn BlePlatform>,
    )
    .await
    .unwrap();

    assert_eq!(log::max_level(), LevelFilter::Debug);
    assert!(seen.lock().unwrap().iter().any(|m| m.level == "DEBUG"));
    state.shutdown().await.unwrap();
}
