//! Bluetooth manager for the sensor core
//! This module provides the main interface for bluetooth operations: it owns
//! the registry, the scan coordinator and the subscriptions, receives platform
//! events and fans decoded readings out to registered callbacks.
//!
//! Everything here runs on one logical thread. Embedders with several threads
//! must funnel calls through a single context, see [`crate::core::event_loop`].

use std::collections::{BTreeSet, HashMap};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::sensor_config::SensorConfig;
use crate::core::bluetooth::connection::{ConnectionEvent, ConnectionState};
use crate::core::bluetooth::constants::UUID_DEVICE_INFORMATION_SERVICE;
use crate::core::bluetooth::notification::{NotificationHandler, SubscriptionId};
use crate::core::bluetooth::platform::{BlePlatform, PlatformEvent};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::{ScanCoordinator, ScanDecision};
use crate::core::bluetooth::store::KnownStore;
use crate::core::bluetooth::types::{Advertisement, DeviceIdentity, DeviceRecord, Roster};
use crate::core::decoder::{self, Characteristic, CharacteristicReading, DecodeError};

/// Composition root of the sensor core.
pub struct BluetoothManager {
    /// Device records and roster membership
    registry: DeviceRegistry,
    /// Scan and reconnect policy
    coordinator: ScanCoordinator,
    /// Host Bluetooth stack
    platform: Box<dyn BlePlatform>,
    /// Embedder callbacks
    notification_handler: NotificationHandler,
    /// Read static characteristics once they are discovered
    read_on_connect: bool,
    /// Services already reported as connected on the current link
    announced: HashMap<DeviceIdentity, BTreeSet<Uuid>>,
}

impl BluetoothManager {
    /// Creates a manager, loads the known roster from `store` and starts
    /// scanning if there are devices to reconnect to.
    ///
    /// A corrupt stored roster is logged and replaced by an empty one.
    pub fn new(
        config: &SensorConfig,
        platform: Box<dyn BlePlatform>,
        store: Box<dyn KnownStore>,
    ) -> Self {
        let mut registry = DeviceRegistry::new(store);
        match registry.load_known() {
            Ok(count) => info!("Bluetooth manager starting with {} known devices.", count),
            Err(e) => error!("Could not load known devices, starting with an empty roster: {}", e),
        }

        let coordinator = ScanCoordinator::new(config.service_filter.clone(), config.auto_reconnect);
        let seeded = coordinator.seed_connectable(&mut registry);
        debug!("{} devices marked connectable", seeded);

        let mut manager = Self {
            registry,
            coordinator,
            platform,
            notification_handler: NotificationHandler::new(),
            read_on_connect: config.read_on_connect,
            announced: HashMap::new(),
        };
        manager.sync_scan();
        manager
    }

    pub fn register_characteristic_callback(
        &mut self,
        characteristic: Characteristic,
        callback: impl FnMut(&CharacteristicReading) + Send + 'static,
    ) -> SubscriptionId {
        self.notification_handler
            .register_characteristic_callback(characteristic, callback)
    }

    pub fn register_connection_callback(
        &mut self,
        service: Uuid,
        callback: impl FnMut(bool) + Send + 'static,
    ) -> SubscriptionId {
        self.notification_handler
            .register_connection_callback(service, callback)
    }

    pub fn register_battery_callback(
        &mut self,
        service: Uuid,
        callback: impl FnMut(u8) + Send + 'static,
    ) -> SubscriptionId {
        self.notification_handler
            .register_battery_callback(service, callback)
    }

    pub fn unregister(&mut self, subscription: SubscriptionId) -> bool {
        self.notification_handler.unregister(subscription)
    }

    /// Connects to a device. A discovered device is paired (added to the known
    /// roster) first. Re-issuing while a connect is pending asks the platform
    /// again without changing state.
    pub fn connect(&mut self, id: &DeviceIdentity) {
        if self.registry.record(id).is_none() {
            debug!("connect: device {} is not tracked", id);
            return;
        }
        if self.registry.promote(Roster::Known, id) {
            info!("Paired device {}", id);
        }
        self.begin_connect(id);
    }

    /// Drops the link to a device, or cancels a pending connect.
    pub fn disconnect(&mut self, id: &DeviceIdentity) {
        match self.registry.connection_state(id) {
            Some(state) if state.is_linked() => {
                info!("Disconnecting from device {}", id);
                self.platform.cancel_connect(id);
            }
            Some(_) => info!("Device {} not connected", id),
            None => debug!("disconnect: device {} is not tracked", id),
        }
    }

    /// Forgets a device: no more reconnects, and it shows up as discovered.
    pub fn forget_device(&mut self, id: &DeviceIdentity) {
        let Some(previous) = self.registry.forget(id) else {
            debug!("forget: device {} is not tracked", id);
            return;
        };
        if previous.is_linked() {
            self.platform.cancel_connect(id);
        }
        if previous.is_connected() {
            self.notify_services_connection(id, false);
        }
        self.announced.remove(id);
        self.sync_scan();
    }

    pub fn start_discovery_session(&mut self) {
        self.coordinator
            .start_discovery_session(&mut self.registry, self.platform.as_mut());
    }

    pub fn stop_discovery_session(&mut self) {
        self.coordinator
            .stop_discovery_session(&mut self.registry, self.platform.as_mut());
    }

    /// Entry point for every callback of the host stack.
    pub fn handle_event(&mut self, event: PlatformEvent) {
        if !matches!(event, PlatformEvent::ScanResult(_))
            && self.registry.record(event.device()).is_none()
        {
            debug!("Dropping {:?}: device {} is not tracked", event, event.device());
            return;
        }
        match event {
            PlatformEvent::ScanResult(advertisement) => self.on_scan_result(&advertisement),
            PlatformEvent::Connected(id) => self.on_connected(&id),
            PlatformEvent::ConnectFailed(id) => self.on_connect_failed(&id),
            PlatformEvent::Disconnected(id) => self.on_disconnected(&id),
            PlatformEvent::ServicesDiscovered { id, services } => {
                self.on_services_discovered(&id, &services)
            }
            PlatformEvent::CharacteristicsDiscovered {
                id,
                service,
                characteristics,
            } => self.on_characteristics_discovered(&id, &service, &characteristics),
            PlatformEvent::CharacteristicValue {
                id,
                characteristic,
                value,
            } => self.on_characteristic_value(&id, &characteristic, &value),
        }
    }

    pub fn devices(&self, roster: Roster) -> impl Iterator<Item = &DeviceRecord> + '_ {
        self.registry.iter(roster)
    }

    pub fn known_devices(&self) -> Vec<&DeviceRecord> {
        self.devices(Roster::Known).collect()
    }

    pub fn discovered_devices(&self) -> Vec<&DeviceRecord> {
        self.devices(Roster::Discovered).collect()
    }

    pub fn connectable_devices(&self) -> Vec<&DeviceRecord> {
        self.devices(Roster::Connectable).collect()
    }

    pub fn device(&self, id: &DeviceIdentity) -> Option<&DeviceRecord> {
        self.registry.record(id)
    }

    pub fn connection_state(&self, id: &DeviceIdentity) -> Option<ConnectionState> {
        self.registry.connection_state(id)
    }

    pub fn is_scanning(&self) -> bool {
        self.coordinator.is_scanning()
    }

    pub fn is_discovery_active(&self) -> bool {
        self.coordinator.is_discovery_active()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn sync_scan(&mut self) {
        self.coordinator
            .sync_scan(&self.registry, self.platform.as_mut());
    }

    fn begin_connect(&mut self, id: &DeviceIdentity) {
        match self.registry.connection_state(id) {
            Some(ConnectionState::Connected) => {
                info!("Device {} already connected.", id);
            }
            Some(ConnectionState::Connecting) => {
                debug!("Connect to {} still pending, asking the platform again", id);
                self.platform.connect(id);
            }
            Some(_) => {
                if self
                    .registry
                    .apply_event(id, ConnectionEvent::ConnectIssued)
                    .is_some()
                {
                    info!("Initiating connection to {}...", id);
                    self.platform.connect(id);
                }
            }
            None => {}
        }
    }

    fn on_scan_result(&mut self, advertisement: &Advertisement) {
        if let ScanDecision::Connect(id) = self
            .coordinator
            .on_scan_result(&mut self.registry, advertisement)
        {
            self.begin_connect(&id);
        }
    }

    fn on_connected(&mut self, id: &DeviceIdentity) {
        if self
            .registry
            .apply_event(id, ConnectionEvent::ConnectSucceeded)
            .is_none()
        {
            debug!("Ignoring connection report for {}", id);
            return;
        }
        info!("Connection to {} successful, discovering services...", id);
        self.coordinator
            .on_connected(&mut self.registry, self.platform.as_mut(), id);
        let mut filter = self.coordinator.service_filter().to_vec();
        if !filter.is_empty() && !filter.contains(&UUID_DEVICE_INFORMATION_SERVICE) {
            filter.push(UUID_DEVICE_INFORMATION_SERVICE);
        }
        self.platform.discover_services(id, &filter);
    }

    fn on_connect_failed(&mut self, id: &DeviceIdentity) {
        if self
            .registry
            .apply_event(id, ConnectionEvent::ConnectFailed)
            .is_none()
        {
            debug!("Ignoring connection failure for {}", id);
            return;
        }
        warn!("Connection to {} failed", id);
        self.coordinator
            .on_disconnected(&mut self.registry, self.platform.as_mut(), id);
    }

    fn on_disconnected(&mut self, id: &DeviceIdentity) {
        let Some(transition) = self.registry.apply_event(id, ConnectionEvent::Disconnected) else {
            debug!("Ignoring disconnection report for {}", id);
            return;
        };
        info!("Device {} disconnected", id);
        if transition.from == ConnectionState::Connected {
            self.notify_services_connection(id, false);
        }
        self.announced.remove(id);
        self.coordinator
            .on_disconnected(&mut self.registry, self.platform.as_mut(), id);
    }

    fn on_services_discovered(&mut self, id: &DeviceIdentity, services: &[Uuid]) {
        if self.registry.connection_state(id) != Some(ConnectionState::Connected) {
            debug!("Ignoring services of {}: not connected", id);
            return;
        }
        for service in services {
            info!("Found service {} on {}", service, id);
            self.registry.add_service(id, *service);
            if self.announced.entry(*id).or_default().insert(*service) {
                self.notification_handler.notify_connection(service, true);
            }
            self.platform.discover_characteristics(id, service);
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        id: &DeviceIdentity,
        service: &Uuid,
        characteristics: &[Uuid],
    ) {
        if self.registry.connection_state(id) != Some(ConnectionState::Connected) {
            debug!("Ignoring characteristics of {}: not connected", id);
            return;
        }
        for uuid in characteristics {
            let Some(characteristic) = Characteristic::from_uuid(uuid) else {
                debug!("Skipping characteristic {} of service {}", uuid, service);
                continue;
            };
            if characteristic.notifies() {
                debug!("Subscribing to {:?} on {}", characteristic, id);
                self.platform.subscribe(id, uuid);
            }
            if self.read_on_connect && characteristic.read_once() {
                self.platform.read_value(id, uuid);
            }
        }
    }

    fn on_characteristic_value(&mut self, id: &DeviceIdentity, uuid: &Uuid, value: &[u8]) {
        if self.registry.connection_state(id) != Some(ConnectionState::Connected) {
            debug!("Ignoring value of {} from {}: not connected", uuid, id);
            return;
        }
        let Some(characteristic) = Characteristic::from_uuid(uuid) else {
            warn!("{} (from {})", DecodeError::UnknownCharacteristic(*uuid), id);
            return;
        };
        let reading = match decoder::decode(characteristic, value) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Dropping {:?} value from {}: {} ({:02x?})", characteristic, id, e, value);
                return;
            }
        };
        debug!("{} {:?}: {:?}", id, characteristic, reading);

        match &reading {
            CharacteristicReading::BatteryLevel(percent) => {
                self.registry.set_battery_level(id, *percent);
                for service in self.services_of(id) {
                    self.notification_handler.notify_battery(&service, *percent);
                }
            }
            CharacteristicReading::InfoString(text) => {
                if let Some(field) = characteristic.info_field() {
                    self.registry.set_info(id, field.key(), text);
                }
            }
            _ => {}
        }
        self.notification_handler
            .notify_reading(characteristic, &reading);
    }

    fn services_of(&self, id: &DeviceIdentity) -> Vec<Uuid> {
        self.registry
            .record(id)
            .map(|record| record.services.iter().copied().collect())
            .unwrap_or_default()
    }

    fn notify_services_connection(&mut self, id: &DeviceIdentity, connected: bool) {
        for service in self.services_of(id) {
            self.notification_handler
                .notify_connection(&service, connected);
        }
    }
}
