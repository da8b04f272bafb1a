//! Scan and reconnect coordination.
//!
//! The platform scan runs while there is a device to reconnect to or an
//! explicit discovery session is active. Scan results for connectable
//! devices turn into connect attempts. Unknown devices land in *discovered*
//! only while a discovery session is active.

use log::{debug, info};
use uuid::Uuid;

use crate::core::bluetooth::connection::ConnectionEvent;
use crate::core::bluetooth::platform::BlePlatform;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{Advertisement, DeviceIdentity, Roster};

/// What the coordinator made of a scan result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    /// A connectable device showed up; the caller should connect now.
    Connect(DeviceIdentity),
    /// Device is tracked in *discovered*; `new` is true on first sighting.
    Discovered { id: DeviceIdentity, new: bool },
    /// Known device not waiting for a reconnect, a connect already in flight,
    /// or an unknown device seen outside a discovery session.
    Ignored,
}

/// Decides when to scan and whom to connect.
#[derive(Debug, Clone)]
pub struct ScanCoordinator {
    service_filter: Vec<Uuid>,
    auto_reconnect: bool,
    discovery_active: bool,
    scanning: bool,
}

impl ScanCoordinator {
    pub fn new(service_filter: Vec<Uuid>, auto_reconnect: bool) -> Self {
        Self {
            service_filter,
            auto_reconnect,
            discovery_active: false,
            scanning: false,
        }
    }

    pub fn service_filter(&self) -> &[Uuid] {
        &self.service_filter
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_discovery_active(&self) -> bool {
        self.discovery_active
    }

    pub fn should_scan(&self, registry: &DeviceRegistry) -> bool {
        self.discovery_active || !registry.is_empty(Roster::Connectable)
    }

    /// Starts or stops the platform scan to match [`should_scan`](Self::should_scan).
    pub fn sync_scan(&mut self, registry: &DeviceRegistry, platform: &mut dyn BlePlatform) {
        let wanted = self.should_scan(registry);
        if wanted && !self.scanning {
            info!(
                "Starting scan (discovery: {}, connectable: {})",
                self.discovery_active,
                registry.len(Roster::Connectable)
            );
            platform.start_scan(&self.service_filter);
            self.scanning = true;
        } else if !wanted && self.scanning {
            info!("Stopping scan.");
            platform.stop_scan();
            self.scanning = false;
        }
    }

    /// Marks every known, unlinked device connectable. Returns how many were added.
    pub fn seed_connectable(&self, registry: &mut DeviceRegistry) -> usize {
        if !self.auto_reconnect {
            return 0;
        }
        let candidates: Vec<DeviceIdentity> = registry
            .iter(Roster::Known)
            .filter(|record| !record.state.is_linked())
            .map(|record| record.identity)
            .collect();
        let mut added = 0;
        for id in &candidates {
            if registry.promote(Roster::Connectable, id) {
                added += 1;
            }
        }
        added
    }

    pub fn on_scan_result(
        &mut self,
        registry: &mut DeviceRegistry,
        advertisement: &Advertisement,
    ) -> ScanDecision {
        let id = advertisement.identity;

        if registry.contains(Roster::Known, &id) {
            if let Some(name) = &advertisement.name {
                if registry.set_name(&id, name) {
                    info!("Known device {} now advertises as {:?}", id, name);
                }
            }
        }

        if let Some(record) = registry.get(Roster::Connectable, &id) {
            if record.state.is_linked() {
                return ScanDecision::Ignored;
            }
            debug!("Connectable device {} seen, connecting", id);
            return ScanDecision::Connect(id);
        }

        if registry.contains(Roster::Known, &id) {
            return ScanDecision::Ignored;
        }

        if !self.discovery_active {
            return ScanDecision::Ignored;
        }

        let new = !registry.contains(Roster::Discovered, &id);
        let record = match registry.get(Roster::Discovered, &id) {
            Some(existing) => {
                let mut record = existing.clone();
                if let Some(name) = &advertisement.name {
                    record.name = name.clone();
                }
                record.services.extend(advertisement.services.iter().copied());
                record
            }
            None => advertisement.to_record(),
        };
        registry.add(Roster::Discovered, record);
        if new {
            registry.apply_event(&id, ConnectionEvent::Observed);
            info!(
                "Discovered device {} ({:?}), RSSI: {:?}",
                id, advertisement.name, advertisement.rssi
            );
        }
        ScanDecision::Discovered { id, new }
    }

    /// Connection succeeded: the device no longer needs a reconnect.
    pub fn on_connected(
        &mut self,
        registry: &mut DeviceRegistry,
        platform: &mut dyn BlePlatform,
        id: &DeviceIdentity,
    ) {
        registry.remove(Roster::Connectable, id);
        self.sync_scan(registry, platform);
    }

    /// Link dropped: known devices become connectable again.
    pub fn on_disconnected(
        &mut self,
        registry: &mut DeviceRegistry,
        platform: &mut dyn BlePlatform,
        id: &DeviceIdentity,
    ) {
        if self.auto_reconnect && registry.promote(Roster::Connectable, id) {
            debug!("{} is connectable again", id);
        }
        self.sync_scan(registry, platform);
    }

    pub fn start_discovery_session(
        &mut self,
        registry: &mut DeviceRegistry,
        platform: &mut dyn BlePlatform,
    ) {
        registry.reset_discovered();
        self.discovery_active = true;
        info!("Discovery session started.");
        self.sync_scan(registry, platform);
    }

    pub fn stop_discovery_session(
        &mut self,
        registry: &mut DeviceRegistry,
        platform: &mut dyn BlePlatform,
    ) {
        self.discovery_active = false;
        info!("Discovery session stopped.");
        self.sync_scan(registry, platform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::connection::ConnectionState;
    use crate::core::bluetooth::store::MemoryStore;
    use crate::core::bluetooth::types::DeviceRecord;

    #[derive(Default)]
    struct ScanCounter {
        starts: usize,
        stops: usize,
    }

    impl BlePlatform for ScanCounter {
        fn start_scan(&mut self, _: &[Uuid]) {
            self.starts += 1;
        }
        fn stop_scan(&mut self) {
            self.stops += 1;
        }
        fn connect(&mut self, _: &DeviceIdentity) {}
        fn cancel_connect(&mut self, _: &DeviceIdentity) {}
        fn discover_services(&mut self, _: &DeviceIdentity, _: &[Uuid]) {}
        fn discover_characteristics(&mut self, _: &DeviceIdentity, _: &Uuid) {}
        fn subscribe(&mut self, _: &DeviceIdentity, _: &Uuid) {}
        fn read_value(&mut self, _: &DeviceIdentity, _: &Uuid) {}
    }

    fn id(n: u128) -> DeviceIdentity {
        DeviceIdentity::new(Uuid::from_u128(n))
    }

    fn setup() -> (ScanCoordinator, DeviceRegistry, ScanCounter) {
        (
            ScanCoordinator::new(vec![Uuid::from_u128(0x180D)], true),
            DeviceRegistry::new(Box::new(MemoryStore::new())),
            ScanCounter::default(),
        )
    }

    #[test]
    fn discovery_session_drives_scan() {
        let (mut coord, mut reg, mut platform) = setup();
        coord.sync_scan(&reg, &mut platform);
        assert_eq!(platform.starts, 0);

        coord.start_discovery_session(&mut reg, &mut platform);
        assert!(coord.is_scanning());
        coord.start_discovery_session(&mut reg, &mut platform);
        assert_eq!(platform.starts, 1);

        coord.stop_discovery_session(&mut reg, &mut platform);
        assert!(!coord.is_scanning());
        assert_eq!(platform.stops, 1);
    }

    #[test]
    fn scan_keeps_running_for_connectable_devices() {
        let (mut coord, mut reg, mut platform) = setup();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Strap"));
        assert_eq!(coord.seed_connectable(&mut reg), 1);

        coord.start_discovery_session(&mut reg, &mut platform);
        coord.stop_discovery_session(&mut reg, &mut platform);
        assert!(coord.is_scanning());
        assert_eq!(platform.stops, 0);
    }

    #[test]
    fn unknown_devices_are_discovered_once() {
        let (mut coord, mut reg, mut platform) = setup();
        coord.start_discovery_session(&mut reg, &mut platform);
        let adv = Advertisement::new(id(7)).with_name("HRM-Pro");
        assert_eq!(
            coord.on_scan_result(&mut reg, &adv),
            ScanDecision::Discovered { id: id(7), new: true }
        );
        assert_eq!(
            coord.on_scan_result(&mut reg, &adv),
            ScanDecision::Discovered { id: id(7), new: false }
        );
        assert_eq!(reg.len(Roster::Discovered), 1);
        assert_eq!(reg.connection_state(&id(7)), Some(ConnectionState::Discovering));
    }

    #[test]
    fn reconnect_scan_does_not_collect_strangers() {
        let (mut coord, mut reg, mut platform) = setup();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Strap"));
        coord.seed_connectable(&mut reg);
        coord.sync_scan(&reg, &mut platform);
        assert!(coord.is_scanning());

        for n in 10..20 {
            let adv = Advertisement::new(id(n)).with_name("Neighbour");
            assert_eq!(coord.on_scan_result(&mut reg, &adv), ScanDecision::Ignored);
        }
        assert!(reg.is_empty(Roster::Discovered));
        assert_eq!(reg.connection_state(&id(10)), None);
    }

    #[test]
    fn known_device_picks_up_advertised_name() {
        let (mut coord, mut reg, _) = setup();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Old"));
        let adv = Advertisement::new(id(1)).with_name("Renamed");
        assert_eq!(coord.on_scan_result(&mut reg, &adv), ScanDecision::Ignored);
        assert_eq!(reg.record(&id(1)).map(|r| r.name.as_str()), Some("Renamed"));

        coord.on_scan_result(&mut reg, &Advertisement::new(id(1)));
        assert_eq!(reg.record(&id(1)).map(|r| r.name.as_str()), Some("Renamed"));
    }

    #[test]
    fn known_devices_are_not_shown_as_new() {
        let (mut coord, mut reg, _) = setup();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Paired"));
        let adv = Advertisement::new(id(1));
        assert_eq!(coord.on_scan_result(&mut reg, &adv), ScanDecision::Ignored);
        assert!(reg.is_empty(Roster::Discovered));
    }

    #[test]
    fn connectable_devices_connect_until_linked() {
        let (mut coord, mut reg, _) = setup();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Power"));
        coord.seed_connectable(&mut reg);
        let adv = Advertisement::new(id(1));
        assert_eq!(coord.on_scan_result(&mut reg, &adv), ScanDecision::Connect(id(1)));

        reg.apply_event(&id(1), ConnectionEvent::ConnectIssued);
        assert_eq!(coord.on_scan_result(&mut reg, &adv), ScanDecision::Ignored);

        // A failed connect leaves the device connectable for the next result.
        reg.apply_event(&id(1), ConnectionEvent::ConnectFailed);
        assert_eq!(coord.on_scan_result(&mut reg, &adv), ScanDecision::Connect(id(1)));
    }

    #[test]
    fn connect_and_disconnect_cycle_connectable_membership() {
        let (mut coord, mut reg, mut platform) = setup();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Power"));
        coord.seed_connectable(&mut reg);
        coord.sync_scan(&reg, &mut platform);
        assert!(coord.is_scanning());

        coord.on_connected(&mut reg, &mut platform, &id(1));
        assert!(!reg.contains(Roster::Connectable, &id(1)));
        assert!(!coord.is_scanning());

        coord.on_disconnected(&mut reg, &mut platform, &id(1));
        assert!(reg.contains(Roster::Connectable, &id(1)));
        assert!(coord.is_scanning());
        assert_eq!(platform.starts, 2);
    }

    #[test]
    fn auto_reconnect_off_never_seeds() {
        let mut coord = ScanCoordinator::new(Vec::new(), false);
        let mut reg = DeviceRegistry::new(Box::new(MemoryStore::new()));
        let mut platform = ScanCounter::default();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Power"));
        assert_eq!(coord.seed_connectable(&mut reg), 0);
        coord.on_disconnected(&mut reg, &mut platform, &id(1));
        assert!(reg.is_empty(Roster::Connectable));
        assert!(!coord.is_scanning());
    }
}
