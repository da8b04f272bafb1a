pub mod sensor_config;

pub use sensor_config::SensorConfig;
