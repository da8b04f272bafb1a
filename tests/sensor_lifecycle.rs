use std::sync::{Arc, Mutex};

use ble_sensor_core::config::SensorConfig;
use ble_sensor_core::core::bluetooth::constants::*;
use ble_sensor_core::core::bluetooth::{
    Advertisement, BlePlatform, BluetoothManager, ConnectionEvent, ConnectionState,
    DeviceIdentity, DeviceRecord, DeviceRegistry, FileStore, MemoryStore, PlatformEvent,
    RegistryError, Roster,
};
use ble_sensor_core::core::decoder::{Characteristic, CharacteristicReading};
use ble_sensor_core::core::decoder::cycling_power::CyclingPowerField;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(DeviceIdentity),
    Cancel(DeviceIdentity),
    DiscoverServices(DeviceIdentity),
    DiscoverCharacteristics(DeviceIdentity, Uuid),
    Subscribe(DeviceIdentity, Uuid),
    Read(DeviceIdentity, Uuid),
}

/// Platform that only records what it was asked to do.
#[derive(Clone, Default)]
struct RecordingPlatform {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingPlatform {
    fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl BlePlatform for RecordingPlatform {
    fn start_scan(&mut self, service_filter: &[Uuid]) {
        self.record(Call::StartScan(service_filter.to_vec()));
    }
    fn stop_scan(&mut self) {
        self.record(Call::StopScan);
    }
    fn connect(&mut self, id: &DeviceIdentity) {
        self.record(Call::Connect(*id));
    }
    fn cancel_connect(&mut self, id: &DeviceIdentity) {
        self.record(Call::Cancel(*id));
    }
    fn discover_services(&mut self, id: &DeviceIdentity, _: &[Uuid]) {
        self.record(Call::DiscoverServices(*id));
    }
    fn discover_characteristics(&mut self, id: &DeviceIdentity, service: &Uuid) {
        self.record(Call::DiscoverCharacteristics(*id, *service));
    }
    fn subscribe(&mut self, id: &DeviceIdentity, characteristic: &Uuid) {
        self.record(Call::Subscribe(*id, *characteristic));
    }
    fn read_value(&mut self, id: &DeviceIdentity, characteristic: &Uuid) {
        self.record(Call::Read(*id, *characteristic));
    }
}

fn device(n: u128) -> DeviceIdentity {
    DeviceIdentity::new(Uuid::from_u128(n))
}

fn start(store: MemoryStore) -> (BluetoothManager, RecordingPlatform) {
    let platform = RecordingPlatform::default();
    let manager = BluetoothManager::new(
        &SensorConfig::default(),
        Box::new(platform.clone()),
        Box::new(store),
    );
    (manager, platform)
}

fn pair_and_connect(manager: &mut BluetoothManager, id: DeviceIdentity, services: Vec<Uuid>) {
    manager.start_discovery_session();
    manager.handle_event(PlatformEvent::ScanResult(
        Advertisement::new(id).with_name("Sensor").with_services(services.clone()),
    ));
    manager.connect(&id);
    manager.stop_discovery_session();
    manager.handle_event(PlatformEvent::Connected(id));
    manager.handle_event(PlatformEvent::ServicesDiscovered { id, services });
}

#[test]
fn forget_known_connectable_connected_device() {
    let mut registry = DeviceRegistry::new(Box::new(MemoryStore::new()));
    let id = device(1);
    registry.add(Roster::Known, DeviceRecord::new(id, "Strap"));
    assert!(registry.add(Roster::Connectable, DeviceRecord::new(id, "Strap")));
    registry.apply_event(&id, ConnectionEvent::ConnectIssued);
    registry.apply_event(&id, ConnectionEvent::ConnectSucceeded);
    assert_eq!(registry.connection_state(&id), Some(ConnectionState::Connected));

    assert_eq!(registry.forget(&id), Some(ConnectionState::Connected));
    assert!(!registry.contains(Roster::Known, &id));
    assert!(!registry.contains(Roster::Connectable, &id));
    assert!(registry.contains(Roster::Discovered, &id));
    assert_eq!(registry.connection_state(&id), Some(ConnectionState::Disconnected));
}

#[test]
fn paired_sensor_streams_heart_rate() {
    let (mut manager, platform) = start(MemoryStore::new());
    let bpm = Arc::new(Mutex::new(Vec::new()));
    {
        let bpm = bpm.clone();
        manager.register_characteristic_callback(Characteristic::HeartRateMeasurement, move |r| {
            if let CharacteristicReading::HeartRate(hr) = r {
                bpm.lock().unwrap().push(hr.beats_per_minute);
            }
        });
    }

    let id = device(1);
    pair_and_connect(&mut manager, id, vec![UUID_HEART_RATE_SERVICE]);
    manager.handle_event(PlatformEvent::CharacteristicsDiscovered {
        id,
        service: UUID_HEART_RATE_SERVICE,
        characteristics: vec![UUID_HEART_RATE_MEASUREMENT],
    });
    assert!(platform
        .take()
        .contains(&Call::Subscribe(id, UUID_HEART_RATE_MEASUREMENT)));

    for value in [vec![0x00, 0x4B], vec![0x01, 0x4B, 0x00], vec![0x01, 0x00, 0x01]] {
        manager.handle_event(PlatformEvent::CharacteristicValue {
            id,
            characteristic: UUID_HEART_RATE_MEASUREMENT,
            value,
        });
    }
    assert_eq!(*bpm.lock().unwrap(), vec![75, 75, 256]);
}

#[test]
fn power_meter_readings_carry_only_flagged_fields() {
    let (mut manager, _) = start(MemoryStore::new());
    let readings = Arc::new(Mutex::new(Vec::new()));
    {
        let readings = readings.clone();
        manager.register_characteristic_callback(
            Characteristic::CyclingPowerMeasurement,
            move |r| readings.lock().unwrap().push(r.clone()),
        );
    }
    let id = device(2);
    pair_and_connect(&mut manager, id, vec![UUID_CYCLING_POWER_SERVICE]);

    manager.handle_event(PlatformEvent::CharacteristicValue {
        id,
        characteristic: UUID_CYCLING_POWER_MEASUREMENT,
        value: vec![0x00, 0x00, 0xC8, 0x00],
    });
    // Crank revolution data present (bit 5) but truncated: dropped.
    manager.handle_event(PlatformEvent::CharacteristicValue {
        id,
        characteristic: UUID_CYCLING_POWER_MEASUREMENT,
        value: vec![0x20, 0x00, 0xC8, 0x00, 0x01],
    });
    manager.handle_event(PlatformEvent::CharacteristicValue {
        id,
        characteristic: UUID_CYCLING_POWER_MEASUREMENT,
        value: vec![0x20, 0x00, 0xFA, 0x00, 0x0A, 0x00, 0x00, 0x04],
    });

    let readings = readings.lock().unwrap();
    assert_eq!(readings.len(), 2);
    let CharacteristicReading::CyclingPower(first) = &readings[0] else {
        panic!("expected cycling power, got {:?}", readings[0]);
    };
    assert_eq!(first.instantaneous_watts, 200);
    assert_eq!(first.present_fields().count(), 0);

    let CharacteristicReading::CyclingPower(second) = &readings[1] else {
        panic!("expected cycling power, got {:?}", readings[1]);
    };
    assert_eq!(second.instantaneous_watts, 250);
    assert!(second.contains(CyclingPowerField::CrankRevolutionData));
    assert_eq!(second.present_fields().count(), 1);
}

#[test]
fn dropped_link_reconnects_on_next_sighting() {
    let (mut manager, platform) = start(MemoryStore::new());
    let id = device(3);
    pair_and_connect(&mut manager, id, vec![UUID_HEART_RATE_SERVICE]);
    platform.take();

    manager.handle_event(PlatformEvent::Disconnected(id));
    assert_eq!(manager.connection_state(&id), Some(ConnectionState::Disconnected));
    assert_eq!(manager.connectable_devices().len(), 1);
    assert_eq!(
        platform.take(),
        vec![Call::StartScan(DEFAULT_SERVICE_FILTER.to_vec())]
    );

    manager.handle_event(PlatformEvent::ScanResult(Advertisement::new(id)));
    manager.handle_event(PlatformEvent::ScanResult(Advertisement::new(id)));
    assert_eq!(platform.take(), vec![Call::Connect(id)]);

    manager.handle_event(PlatformEvent::Connected(id));
    assert_eq!(manager.connection_state(&id), Some(ConnectionState::Connected));
    assert!(!manager.is_scanning());
}

#[test]
fn known_roster_survives_restart() {
    let store = MemoryStore::new();
    let id = device(4);
    {
        let (mut manager, _) = start(store.clone());
        pair_and_connect(&mut manager, id, vec![UUID_HEART_RATE_SERVICE, UUID_BATTERY_SERVICE]);
        manager.handle_event(PlatformEvent::CharacteristicValue {
            id,
            characteristic: UUID_MANUFACTURER_NAME,
            value: b"Polar\0".to_vec(),
        });
        manager.handle_event(PlatformEvent::CharacteristicValue {
            id,
            characteristic: UUID_BATTERY_LEVEL,
            value: vec![150],
        });
    }

    let (manager, platform) = start(store);
    let record = manager.device(&id).expect("known device reloaded");
    assert_eq!(record.name, "Sensor");
    assert_eq!(record.state, ConnectionState::Disconnected);
    assert_eq!(record.battery_level, Some(100));
    assert_eq!(record.info.get("manufacturer").map(String::as_str), Some("Polar"));
    assert!(record.offers(&UUID_BATTERY_SERVICE));
    assert!(manager.discovered_devices().is_empty());
    assert_eq!(
        platform.take(),
        vec![Call::StartScan(DEFAULT_SERVICE_FILTER.to_vec())]
    );
}

#[test]
fn corrupt_roster_is_reported_and_replaced() {
    let mut registry = DeviceRegistry::new(Box::new(MemoryStore::with_contents(b"{\"version\":".to_vec())));
    assert!(matches!(
        registry.load_known(),
        Err(RegistryError::CorruptPersistedState(_))
    ));
    assert!(registry.is_empty(Roster::Known));

    let store = MemoryStore::with_contents(b"not json".to_vec());
    let (mut manager, _) = start(store.clone());
    assert!(manager.known_devices().is_empty());
    pair_and_connect(&mut manager, device(5), vec![UUID_HEART_RATE_SERVICE]);
    let (manager, _) = start(store);
    assert_eq!(manager.known_devices().len(), 1);
}

#[test]
fn discovery_session_lists_only_new_devices() {
    let (mut manager, platform) = start(MemoryStore::new());
    let known = device(6);
    pair_and_connect(&mut manager, known, vec![UUID_HEART_RATE_SERVICE]);
    platform.take();

    manager.start_discovery_session();
    assert!(manager.is_discovery_active());
    assert!(manager.discovered_devices().is_empty());
    manager.handle_event(PlatformEvent::ScanResult(Advertisement::new(known)));
    manager.handle_event(PlatformEvent::ScanResult(
        Advertisement::new(device(7)).with_name("Cadence"),
    ));
    let discovered: Vec<&str> = manager
        .discovered_devices()
        .iter()
        .map(|record| record.name.as_str())
        .collect();
    assert_eq!(discovered, vec!["Cadence"]);
    assert_eq!(manager.connection_state(&device(7)), Some(ConnectionState::Discovering));

    manager.stop_discovery_session();
    assert!(!manager.is_scanning());
    assert_eq!(
        platform.take(),
        vec![Call::StartScan(DEFAULT_SERVICE_FILTER.to_vec()), Call::StopScan]
    );
}

#[test]
fn user_disconnect_cancels_and_waits_for_platform() {
    let (mut manager, platform) = start(MemoryStore::new());
    let id = device(8);
    pair_and_connect(&mut manager, id, vec![UUID_HEART_RATE_SERVICE]);
    platform.take();

    manager.disconnect(&id);
    assert_eq!(platform.take(), vec![Call::Cancel(id)]);
    assert_eq!(manager.connection_state(&id), Some(ConnectionState::Connected));

    manager.handle_event(PlatformEvent::Disconnected(id));
    assert_eq!(manager.connection_state(&id), Some(ConnectionState::Disconnected));
    manager.disconnect(&id);
    assert!(!platform.take().contains(&Call::Cancel(id)));
}

#[test]
fn file_store_round_trips_roster() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join(KNOWN_DEVICES_FILE_NAME);
    let id = device(9);
    {
        let platform = RecordingPlatform::default();
        let mut manager = BluetoothManager::new(
            &SensorConfig::default(),
            Box::new(platform),
            Box::new(FileStore::new(&path)),
        );
        pair_and_connect(&mut manager, id, vec![UUID_CYCLING_POWER_SERVICE]);
    }
    let document: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(document["version"], 1);
    assert_eq!(document["devices"].as_array().map(Vec::len), Some(1));

    let manager = BluetoothManager::new(
        &SensorConfig::default(),
        Box::new(RecordingPlatform::default()),
        Box::new(FileStore::new(&path)),
    );
    assert!(manager.registry().contains(Roster::Known, &id));
}
