//! Boundary to the host Bluetooth stack.
//!
//! Calls into the platform are fire-and-forget: their outcome arrives later as
//! a [`PlatformEvent`] delivered to the manager on the same serialized context.

use uuid::Uuid;

use crate::core::bluetooth::types::{Advertisement, DeviceIdentity};

/// Central-role operations the sensor core needs from the host.
pub trait BlePlatform: Send {
    fn start_scan(&mut self, service_filter: &[Uuid]);
    fn stop_scan(&mut self);
    fn connect(&mut self, id: &DeviceIdentity);
    /// Cancels a pending connect or drops an established link.
    fn cancel_connect(&mut self, id: &DeviceIdentity);
    fn discover_services(&mut self, id: &DeviceIdentity, service_filter: &[Uuid]);
    fn discover_characteristics(&mut self, id: &DeviceIdentity, service: &Uuid);
    fn subscribe(&mut self, id: &DeviceIdentity, characteristic: &Uuid);
    fn read_value(&mut self, id: &DeviceIdentity, characteristic: &Uuid);
}

/// Callbacks delivered by the host stack.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    ScanResult(Advertisement),
    Connected(DeviceIdentity),
    ConnectFailed(DeviceIdentity),
    Disconnected(DeviceIdentity),
    ServicesDiscovered {
        id: DeviceIdentity,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        id: DeviceIdentity,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    CharacteristicValue {
        id: DeviceIdentity,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl PlatformEvent {
    /// Device the event concerns.
    pub fn device(&self) -> &DeviceIdentity {
        match self {
            PlatformEvent::ScanResult(adv) => &adv.identity,
            PlatformEvent::Connected(id)
            | PlatformEvent::ConnectFailed(id)
            | PlatformEvent::Disconnected(id) => id,
            PlatformEvent::ServicesDiscovered { id, .. }
            | PlatformEvent::CharacteristicsDiscovered { id, .. }
            | PlatformEvent::CharacteristicValue { id, .. } => id,
        }
    }
}
