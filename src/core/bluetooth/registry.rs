//! Device registry for the sensor core
//!
//! Every tracked peripheral has exactly one [`DeviceRecord`]; membership in the
//! *known*, *discovered* and *connectable* rosters is a set of flags on that
//! single entry, so the rosters cannot drift apart. A device can only be
//! connectable while it is known.
//!
//! Lookups of identities that are not tracked are no-ops: platform callbacks
//! routinely race with the user forgetting a device.

use std::collections::HashMap;
use std::io;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::connection::{self, ConnectionEvent, ConnectionState, Transition};
use crate::core::bluetooth::constants::KNOWN_ROSTER_VERSION;
use crate::core::bluetooth::store::KnownStore;
use crate::core::bluetooth::types::{DeviceIdentity, DeviceRecord, Roster};

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Stored roster bytes could not be deserialized.
    #[error("persisted known-device roster is corrupt: {0}")]
    CorruptPersistedState(#[from] serde_json::Error),

    /// The backing store failed to read or write.
    #[error("known-device storage failed: {0}")]
    Storage(#[from] io::Error),

    /// Identity is not tracked. Only used internally as a no-op signal.
    #[error("device {0} is not tracked")]
    IdentityNotFound(DeviceIdentity),
}

/// On-disk layout of the known roster.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRoster {
    version: u32,
    #[serde(default)]
    saved_at: Option<String>,
    devices: Vec<DeviceRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Membership {
    known: bool,
    discovered: bool,
    connectable: bool,
}

impl Membership {
    fn get(&self, roster: Roster) -> bool {
        match roster {
            Roster::Known => self.known,
            Roster::Discovered => self.discovered,
            Roster::Connectable => self.connectable,
        }
    }

    fn set(&mut self, roster: Roster, value: bool) {
        match roster {
            Roster::Known => self.known = value,
            Roster::Discovered => self.discovered = value,
            Roster::Connectable => self.connectable = value,
        }
    }

    fn is_empty(&self) -> bool {
        !(self.known || self.discovered || self.connectable)
    }
}

#[derive(Debug)]
struct Entry {
    record: DeviceRecord,
    roles: Membership,
}

/// Identity-keyed store of device records and their roster membership.
pub struct DeviceRegistry {
    entries: HashMap<DeviceIdentity, Entry>,
    /// Identities in the order they were first tracked.
    order: Vec<DeviceIdentity>,
    store: Box<dyn KnownStore>,
}

impl DeviceRegistry {
    /// Creates an empty registry backed by `store`. Call [`load_known`](Self::load_known)
    /// to populate the known roster.
    pub fn new(store: Box<dyn KnownStore>) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            store,
        }
    }

    /// Adds `record` to `roster`, or updates the attributes of the tracked record.
    ///
    /// Name, services, info fields and battery level are taken from `record`;
    /// the connection state of an already tracked device is left to the state
    /// machine. Returns `true` if the device was not yet in `roster`.
    /// Adding to *connectable* is refused for devices that are not known.
    pub fn add(&mut self, roster: Roster, record: DeviceRecord) -> bool {
        let id = record.identity;
        if roster == Roster::Connectable && !self.contains(Roster::Known, &id) {
            debug!("Refusing to mark {} connectable: device is not known", id);
            return false;
        }

        let inserted = match self.entries.get_mut(&id) {
            Some(entry) => {
                let existing = &mut entry.record;
                existing.name = record.name;
                existing.services = record.services;
                existing.info = record.info;
                existing.battery_level = record.battery_level;
                let newly = !entry.roles.get(roster);
                entry.roles.set(roster, true);
                newly
            }
            None => {
                let mut roles = Membership::default();
                roles.set(roster, true);
                self.entries.insert(id, Entry { record, roles });
                self.order.push(id);
                true
            }
        };

        if self.contains(Roster::Known, &id) {
            self.persist_or_log();
        }
        inserted
    }

    /// Puts an already tracked device into `roster` without touching its
    /// attributes. Same rules as [`add`](Self::add); returns `true` if it was
    /// not yet in `roster`.
    pub fn promote(&mut self, roster: Roster, id: &DeviceIdentity) -> bool {
        if roster == Roster::Connectable && !self.contains(Roster::Known, id) {
            return false;
        }
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.roles.get(roster) {
            return false;
        }
        entry.roles.set(roster, true);
        if roster == Roster::Known {
            self.persist_or_log();
        }
        true
    }

    /// Removes `id` from `roster`. Removing from *known* also removes from
    /// *connectable*. Returns `true` if the device was in `roster`.
    pub fn remove(&mut self, roster: Roster, id: &DeviceIdentity) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if !entry.roles.get(roster) {
            return false;
        }
        entry.roles.set(roster, false);
        if roster == Roster::Known {
            entry.roles.connectable = false;
        }
        self.drop_if_untracked(id);
        if roster == Roster::Known {
            self.persist_or_log();
        }
        true
    }

    pub fn contains(&self, roster: Roster, id: &DeviceIdentity) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.roles.get(roster))
    }

    pub fn get(&self, roster: Roster, id: &DeviceIdentity) -> Option<&DeviceRecord> {
        self.entries
            .get(id)
            .filter(|entry| entry.roles.get(roster))
            .map(|entry| &entry.record)
    }

    /// The record for `id` whatever roster it is in.
    pub fn record(&self, id: &DeviceIdentity) -> Option<&DeviceRecord> {
        self.entries.get(id).map(|entry| &entry.record)
    }

    /// Records in `roster`, in the order they were first tracked.
    pub fn iter(&self, roster: Roster) -> impl Iterator<Item = &DeviceRecord> + '_ {
        self.order.iter().filter_map(move |id| self.get(roster, id))
    }

    pub fn identities(&self, roster: Roster) -> Vec<DeviceIdentity> {
        self.iter(roster).map(|record| record.identity).collect()
    }

    pub fn len(&self, roster: Roster) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.roles.get(roster))
            .count()
    }

    pub fn is_empty(&self, roster: Roster) -> bool {
        !self.entries.values().any(|entry| entry.roles.get(roster))
    }

    pub fn connection_state(&self, id: &DeviceIdentity) -> Option<ConnectionState> {
        self.record(id).map(|record| record.state)
    }

    /// Moves a known device to `state` if the transition is legal.
    /// Ignored for identities that are not known.
    pub fn set_connection_state(
        &mut self,
        id: &DeviceIdentity,
        state: ConnectionState,
    ) -> Option<Transition> {
        let entry = self.entries.get_mut(id).filter(|entry| entry.roles.known)?;
        let transition = connection::transition_to(&mut entry.record.state, state);
        if transition.is_none() {
            debug!(
                "Ignoring transition {} -> {} for {}",
                entry.record.state, state, id
            );
        }
        transition
    }

    /// Applies a state machine event to any tracked device.
    pub fn apply_event(
        &mut self,
        id: &DeviceIdentity,
        event: ConnectionEvent,
    ) -> Option<Transition> {
        let entry = self.entries.get_mut(id)?;
        let transition = connection::apply(&mut entry.record.state, event);
        match transition {
            Some(t) => debug!("{}: {} -> {} ({:?})", id, t.from, t.to, event),
            None => debug!("{}: ignoring {:?} in state {}", id, event, entry.record.state),
        }
        transition
    }

    /// Records a service offered by the device. Returns `true` if it was new.
    pub fn add_service(&mut self, id: &DeviceIdentity, service: Uuid) -> bool {
        self.mutate(id, |record| record.services.insert(service))
            .unwrap_or(false)
    }

    /// Stores an information string (firmware revision, manufacturer, ...).
    pub fn set_info(&mut self, id: &DeviceIdentity, key: &str, value: &str) -> bool {
        self.mutate(id, |record| {
            if record.info.get(key).map(String::as_str) == Some(value) {
                return false;
            }
            record.info.insert(key.to_string(), value.to_string());
            true
        })
        .unwrap_or(false)
    }

    pub fn set_battery_level(&mut self, id: &DeviceIdentity, percent: u8) -> bool {
        self.mutate(id, |record| {
            let changed = record.battery_level != Some(percent);
            record.battery_level = Some(percent);
            changed
        })
        .unwrap_or(false)
    }

    pub fn set_name(&mut self, id: &DeviceIdentity, name: &str) -> bool {
        self.mutate(id, |record| {
            if record.name == name {
                return false;
            }
            record.name = name.to_string();
            true
        })
        .unwrap_or(false)
    }

    /// Forgets a device: it leaves *known* and *connectable*, is forced to
    /// `Disconnected` and stays visible in *discovered*.
    /// Returns the state the device was in, or `None` if it was not tracked.
    pub fn forget(&mut self, id: &DeviceIdentity) -> Option<ConnectionState> {
        let entry = self.entries.get_mut(id)?;
        let previous = entry.record.state;
        let was_known = entry.roles.known;
        connection::apply(&mut entry.record.state, ConnectionEvent::Forgotten);
        entry.roles = Membership {
            known: false,
            discovered: true,
            connectable: false,
        };
        if was_known {
            info!("Forgot device {}", id);
            self.persist_or_log();
        }
        Some(previous)
    }

    /// Clears the *discovered* roster. Devices that are also known stay tracked.
    pub fn reset_discovered(&mut self) {
        let ids: Vec<DeviceIdentity> = self.order.clone();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.roles.discovered = false;
            }
            self.drop_if_untracked(&id);
        }
    }

    /// Writes the whole *known* roster to the store.
    pub fn persist_known(&mut self) -> Result<(), RegistryError> {
        let roster = PersistedRoster {
            version: KNOWN_ROSTER_VERSION,
            saved_at: Some(chrono::Utc::now().to_rfc3339()),
            devices: self.iter(Roster::Known).cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&roster)?;
        self.store.save(&bytes)?;
        debug!("Persisted {} known devices", roster.devices.len());
        Ok(())
    }

    /// Replaces the *known* roster with the stored one and returns how many
    /// devices were loaded. Empty storage yields an empty roster.
    ///
    /// On [`RegistryError::CorruptPersistedState`] the known roster is left empty.
    pub fn load_known(&mut self) -> Result<usize, RegistryError> {
        for id in self.identities(Roster::Known) {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.roles.known = false;
                entry.roles.connectable = false;
            }
            self.drop_if_untracked(&id);
        }

        let Some(bytes) = self.store.load()? else {
            info!("No stored known devices, starting with an empty roster.");
            return Ok(0);
        };
        let roster: PersistedRoster = serde_json::from_slice(&bytes).map_err(|e| {
            error!("Failed to deserialize known devices: {}", e);
            RegistryError::CorruptPersistedState(e)
        })?;
        if roster.version != KNOWN_ROSTER_VERSION {
            warn!(
                "Known devices stored with version {}, expected {}",
                roster.version, KNOWN_ROSTER_VERSION
            );
        }

        let count = roster.devices.len();
        for mut record in roster.devices {
            record.state = ConnectionState::Disconnected;
            let id = record.identity;
            match self.entries.get_mut(&id) {
                Some(entry) => {
                    entry.record = record;
                    entry.roles.known = true;
                }
                None => {
                    let roles = Membership {
                        known: true,
                        ..Membership::default()
                    };
                    self.entries.insert(id, Entry { record, roles });
                    self.order.push(id);
                }
            }
        }
        info!("Loaded {} known devices", count);
        Ok(count)
    }

    /// Runs `f` on the record and persists if it reported a change to a known device.
    fn mutate(
        &mut self,
        id: &DeviceIdentity,
        f: impl FnOnce(&mut DeviceRecord) -> bool,
    ) -> Result<bool, RegistryError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or(RegistryError::IdentityNotFound(*id))?;
        let changed = f(&mut entry.record);
        if changed && entry.roles.known {
            self.persist_or_log();
        }
        Ok(changed)
    }

    fn persist_or_log(&mut self) {
        if let Err(e) = self.persist_known() {
            warn!("Failed to persist known devices: {}", e);
        }
    }

    fn drop_if_untracked(&mut self, id: &DeviceIdentity) {
        if self.entries.get(id).is_some_and(|entry| entry.roles.is_empty()) {
            self.entries.remove(id);
            self.order.retain(|other| other != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::store::MemoryStore;

    fn id(n: u128) -> DeviceIdentity {
        DeviceIdentity::new(Uuid::from_u128(n))
    }

    fn registry() -> (DeviceRegistry, MemoryStore) {
        let store = MemoryStore::new();
        (DeviceRegistry::new(Box::new(store.clone())), store)
    }

    #[test]
    fn adding_twice_keeps_one_record_with_latest_attributes() {
        let (mut reg, _) = registry();
        for roster in [Roster::Known, Roster::Discovered] {
            assert!(reg.add(roster, DeviceRecord::new(id(1), "First")));
            assert!(!reg.add(roster, DeviceRecord::new(id(1), "Second")));
            assert_eq!(reg.len(roster), 1);
            assert_eq!(reg.get(roster, &id(1)).unwrap().name, "Second");
        }
        assert!(reg.add(Roster::Connectable, DeviceRecord::new(id(1), "Third")));
        assert!(!reg.add(Roster::Connectable, DeviceRecord::new(id(1), "Fourth")));
        assert_eq!(reg.len(Roster::Connectable), 1);
        assert_eq!(reg.get(Roster::Connectable, &id(1)).unwrap().name, "Fourth");
    }

    #[test]
    fn connectable_requires_known() {
        let (mut reg, _) = registry();
        assert!(!reg.add(Roster::Connectable, DeviceRecord::new(id(1), "Stray")));
        assert!(reg.is_empty(Roster::Connectable));

        reg.add(Roster::Known, DeviceRecord::new(id(1), "Strap"));
        reg.add(Roster::Connectable, DeviceRecord::new(id(1), "Strap"));
        reg.remove(Roster::Known, &id(1));
        assert!(!reg.contains(Roster::Connectable, &id(1)));
        assert!(reg.record(&id(1)).is_none());
    }

    #[test]
    fn connectable_stays_subset_of_known_under_mixed_operations() {
        let (mut reg, _) = registry();
        for step in 0u128..60 {
            let target = id(step % 5);
            match step % 6 {
                0 => {
                    reg.add(Roster::Known, DeviceRecord::new(target, "k"));
                }
                1 => {
                    reg.add(Roster::Connectable, DeviceRecord::new(target, "c"));
                }
                2 => {
                    reg.remove(Roster::Known, &target);
                }
                3 => {
                    reg.forget(&target);
                }
                4 => {
                    reg.add(Roster::Discovered, DeviceRecord::new(target, "d"));
                }
                _ => {
                    reg.remove(Roster::Connectable, &target);
                }
            }
            for c in reg.identities(Roster::Connectable) {
                assert!(reg.contains(Roster::Known, &c), "step {step}");
            }
        }
    }

    #[test]
    fn set_connection_state_ignores_unknown_devices() {
        let (mut reg, _) = registry();
        reg.add(Roster::Discovered, DeviceRecord::new(id(2), "Seen"));
        assert_eq!(reg.set_connection_state(&id(2), ConnectionState::Connecting), None);
        assert_eq!(reg.set_connection_state(&id(9), ConnectionState::Connecting), None);
        assert_eq!(reg.connection_state(&id(2)), Some(ConnectionState::Disconnected));

        reg.add(Roster::Known, DeviceRecord::new(id(3), "Paired"));
        assert!(reg.set_connection_state(&id(3), ConnectionState::Connecting).is_some());
        assert!(reg.set_connection_state(&id(3), ConnectionState::Discovering).is_none());
        assert_eq!(reg.connection_state(&id(3)), Some(ConnectionState::Connecting));
    }

    #[test]
    fn mutations_on_known_devices_persist() {
        let (mut reg, store) = registry();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Power"));
        let writes = store.write_count();

        assert!(reg.add_service(&id(1), Uuid::from_u128(0x1818)));
        assert!(reg.set_info(&id(1), "firmware_revision", "1.2.3"));
        assert_eq!(store.write_count(), writes + 2);

        // Unchanged values do not rewrite the roster.
        assert!(!reg.add_service(&id(1), Uuid::from_u128(0x1818)));
        assert!(!reg.set_info(&id(1), "firmware_revision", "1.2.3"));
        assert_eq!(store.write_count(), writes + 2);

        // Unknown identities are silently ignored.
        assert!(!reg.add_service(&id(42), Uuid::from_u128(1)));
    }

    #[test]
    fn discovered_mutations_are_not_persisted() {
        let (mut reg, store) = registry();
        reg.add(Roster::Discovered, DeviceRecord::new(id(1), "Seen"));
        reg.add_service(&id(1), Uuid::from_u128(0x180D));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn persisted_roster_round_trips_without_transient_state() {
        let (mut reg, store) = registry();
        let mut record = DeviceRecord::new(id(5), "HRM").with_services([Uuid::from_u128(0x180D)]);
        record.info.insert("manufacturer".into(), "Acme".into());
        record.battery_level = Some(80);
        reg.add(Roster::Known, record);
        reg.set_connection_state(&id(5), ConnectionState::Connecting);
        reg.add(Roster::Discovered, DeviceRecord::new(id(6), "Not persisted"));

        let mut reloaded = DeviceRegistry::new(Box::new(store.clone()));
        assert_eq!(reloaded.load_known().unwrap(), 1);
        let loaded = reloaded.get(Roster::Known, &id(5)).unwrap();
        assert_eq!(loaded.name, "HRM");
        assert_eq!(loaded.state, ConnectionState::Disconnected);
        assert_eq!(loaded.info.get("manufacturer").map(String::as_str), Some("Acme"));
        assert_eq!(loaded.battery_level, Some(80));
        assert!(loaded.offers(&Uuid::from_u128(0x180D)));
        assert!(reloaded.is_empty(Roster::Discovered));
    }

    #[test]
    fn empty_storage_loads_empty_roster() {
        let (mut reg, _) = registry();
        assert_eq!(reg.load_known().unwrap(), 0);
        assert!(reg.is_empty(Roster::Known));
    }

    #[test]
    fn corrupt_storage_is_reported() {
        let store = MemoryStore::with_contents(b"{not json".to_vec());
        let mut reg = DeviceRegistry::new(Box::new(store));
        assert!(matches!(
            reg.load_known(),
            Err(RegistryError::CorruptPersistedState(_))
        ));
        assert!(reg.is_empty(Roster::Known));
    }

    #[test]
    fn forget_moves_device_to_discovered() {
        let (mut reg, _) = registry();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Strap"));
        reg.add(Roster::Connectable, DeviceRecord::new(id(1), "Strap"));
        reg.apply_event(&id(1), ConnectionEvent::ConnectIssued);
        reg.apply_event(&id(1), ConnectionEvent::ConnectSucceeded);

        assert_eq!(reg.forget(&id(1)), Some(ConnectionState::Connected));
        assert!(!reg.contains(Roster::Known, &id(1)));
        assert!(!reg.contains(Roster::Connectable, &id(1)));
        assert!(reg.contains(Roster::Discovered, &id(1)));
        assert_eq!(reg.connection_state(&id(1)), Some(ConnectionState::Disconnected));
        assert_eq!(reg.forget(&id(99)), None);
    }

    #[test]
    fn reset_discovered_keeps_known_devices() {
        let (mut reg, _) = registry();
        reg.add(Roster::Known, DeviceRecord::new(id(1), "Paired"));
        reg.add(Roster::Discovered, DeviceRecord::new(id(1), "Paired"));
        reg.add(Roster::Discovered, DeviceRecord::new(id(2), "Passing by"));
        reg.reset_discovered();
        assert!(reg.is_empty(Roster::Discovered));
        assert!(reg.contains(Roster::Known, &id(1)));
        assert!(reg.record(&id(2)).is_none());
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let (mut reg, _) = registry();
        for n in [3, 1, 2] {
            reg.add(Roster::Known, DeviceRecord::new(id(n), "x"));
        }
        assert_eq!(reg.identities(Roster::Known), vec![id(3), id(1), id(2)]);
    }
}
