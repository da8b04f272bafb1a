//! Subscriptions for decoded readings and connection changes
//! Callbacks run synchronously on the context that delivered the platform
//! event. An identifier nobody registered for is simply not dispatched.

use std::collections::HashMap;
use std::hash::Hash;

use log::debug;
use uuid::Uuid;

use crate::core::decoder::{Characteristic, CharacteristicReading};

pub type ReadingCallback = Box<dyn FnMut(&CharacteristicReading) + Send>;
pub type ConnectionCallback = Box<dyn FnMut(bool) + Send>;
pub type BatteryCallback = Box<dyn FnMut(u8) + Send>;

/// Handle returned by every registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscribers<K, F> {
    by_key: HashMap<K, Vec<(SubscriptionId, F)>>,
}

impl<K: Eq + Hash, F> Default for Subscribers<K, F> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, F> Subscribers<K, F> {
    fn insert(&mut self, key: K, id: SubscriptionId, callback: F) {
        self.by_key.entry(key).or_default().push((id, callback));
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for list in self.by_key.values_mut() {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
        }
        self.by_key.retain(|_, list| !list.is_empty());
        removed
    }

    /// Calls `invoke` for every callback under `key`; returns how many ran.
    fn dispatch(&mut self, key: &K, mut invoke: impl FnMut(&mut F)) -> usize {
        match self.by_key.get_mut(key) {
            Some(list) => {
                for (_, callback) in list.iter_mut() {
                    invoke(callback);
                }
                list.len()
            }
            None => 0,
        }
    }

    fn len(&self) -> usize {
        self.by_key.values().map(Vec::len).sum()
    }
}

/// Registry of embedder callbacks.
#[derive(Default)]
pub struct NotificationHandler {
    next_id: u64,
    readings: Subscribers<Characteristic, ReadingCallback>,
    connections: Subscribers<Uuid, ConnectionCallback>,
    batteries: Subscribers<Uuid, BatteryCallback>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    /// Called with every successfully decoded value of `characteristic`.
    pub fn register_characteristic_callback(
        &mut self,
        characteristic: Characteristic,
        callback: impl FnMut(&CharacteristicReading) + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate();
        self.readings.insert(characteristic, id, Box::new(callback));
        id
    }

    /// Called with `true`/`false` when a device offering `service` connects or drops.
    pub fn register_connection_callback(
        &mut self,
        service: Uuid,
        callback: impl FnMut(bool) + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate();
        self.connections.insert(service, id, Box::new(callback));
        id
    }

    /// Called with the battery percentage of devices offering `service`.
    pub fn register_battery_callback(
        &mut self,
        service: Uuid,
        callback: impl FnMut(u8) + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate();
        self.batteries.insert(service, id, Box::new(callback));
        id
    }

    /// Removes a subscription of any kind. Returns `false` if it was unknown.
    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        self.readings.remove(id) || self.connections.remove(id) || self.batteries.remove(id)
    }

    pub fn notify_reading(
        &mut self,
        characteristic: Characteristic,
        reading: &CharacteristicReading,
    ) -> usize {
        let count = self
            .readings
            .dispatch(&characteristic, |callback| callback(reading));
        if count == 0 {
            debug!("No subscribers for {:?}", characteristic);
        }
        count
    }

    pub fn notify_connection(&mut self, service: &Uuid, connected: bool) -> usize {
        self.connections
            .dispatch(service, |callback| callback(connected))
    }

    pub fn notify_battery(&mut self, service: &Uuid, percent: u8) -> usize {
        self.batteries.dispatch(service, |callback| callback(percent))
    }

    /// Total number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.readings.len() + self.connections.len() + self.batteries.len()
    }
}
