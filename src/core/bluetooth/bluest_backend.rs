//! [`BlePlatform`] implementation on top of the system Bluetooth stack.
//!
//! Every request spawns a task on the tokio runtime; results come back to the
//! controller as [`PlatformEvent`]s through a [`ControllerHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bluest::{Adapter, Characteristic, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::platform::{BlePlatform, PlatformEvent};
use crate::core::bluetooth::types::{Advertisement, DeviceIdentity};
use crate::core::event_loop::ControllerHandle;

const LINK_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Platform objects looked up by identity.
#[derive(Default)]
struct Handles {
    devices: HashMap<DeviceIdentity, Device>,
    services: HashMap<(DeviceIdentity, Uuid), Service>,
    characteristics: HashMap<(DeviceIdentity, Uuid), Characteristic>,
}

impl Handles {
    fn device(&self, id: &DeviceIdentity) -> Result<Device> {
        self.devices
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found with ID: {}", id))
    }

    fn forget_gatt(&mut self, id: &DeviceIdentity) {
        self.services.retain(|(device, _), _| device != id);
        self.characteristics.retain(|(device, _), _| device != id);
    }
}

pub struct BluestPlatform {
    adapter: Adapter,
    runtime: Handle,
    controller: ControllerHandle,
    handles: Arc<Mutex<Handles>>,
    scan_token: Option<CancellationToken>,
    /// One token per link. Cancelling it ends the connect attempt, the link
    /// watcher and every notification stream of that device.
    links: HashMap<DeviceIdentity, CancellationToken>,
}

impl BluestPlatform {
    /// Opens the default adapter and waits for it to become available.
    pub async fn new(controller: ControllerHandle) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            runtime: Handle::current(),
            controller,
            handles: Arc::new(Mutex::new(Handles::default())),
            scan_token: None,
            links: HashMap::new(),
        })
    }

    fn link_token(&mut self, id: &DeviceIdentity) -> CancellationToken {
        self.links
            .entry(*id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    async fn scan_task(
        adapter: Adapter,
        filter: Vec<Uuid>,
        handles: Arc<Mutex<Handles>>,
        controller: ControllerHandle,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&filter).await?;
        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    let Some(discovered) = result else {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    };
                    let device = discovered.device;
                    let id = DeviceIdentity::from_platform_id(&device.id().to_string());
                    let name = discovered
                        .adv_data
                        .local_name
                        .or_else(|| device.name().ok());
                    debug!("Found device - {}: {:?}, RSSI: {:?}", id, name, discovered.rssi);

                    handles.lock().await.devices.insert(id, device);
                    let advertisement = Advertisement {
                        identity: id,
                        name,
                        services: discovered.adv_data.services,
                        rssi: discovered.rssi,
                    };
                    if controller.platform_event(PlatformEvent::ScanResult(advertisement)).is_err() {
                        break;
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        Ok(())
    }

    async fn connect_task(
        adapter: Adapter,
        id: DeviceIdentity,
        handles: Arc<Mutex<Handles>>,
        controller: ControllerHandle,
        link: CancellationToken,
    ) -> Result<()> {
        let device = handles.lock().await.device(&id)?;
        if !device.is_connected().await {
            info!("Initiating connection to {}...", id);
            tokio::select! {
                result = adapter.connect_device(&device) => result?,
                _ = link.cancelled() => return Ok(()),
            }
        }
        let _ = controller.platform_event(PlatformEvent::Connected(id));

        let mut ticker = tokio::time::interval(LINK_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !device.is_connected().await {
                        warn!("Device {} dropped the link", id);
                        handles.lock().await.forget_gatt(&id);
                        let _ = controller.platform_event(PlatformEvent::Disconnected(id));
                        break;
                    }
                }
                _ = link.cancelled() => break,
            }
        }
        Ok(())
    }

    async fn notify_task(
        characteristic: Characteristic,
        id: DeviceIdentity,
        controller: ControllerHandle,
        link: CancellationToken,
    ) -> Result<()> {
        let uuid = characteristic.uuid();
        info!("Subscribing to notifications of {} on {}", uuid, id);
        let mut notification_stream = characteristic.notify().await?;
        loop {
            tokio::select! {
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => {
                        let event = PlatformEvent::CharacteristicValue {
                            id,
                            characteristic: uuid,
                            value,
                        };
                        if controller.platform_event(event).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = link.cancelled() => break,
            }
        }
        info!("Notification stream for {} ended", uuid);
        Ok(())
    }

    fn spawn_logged(
        &self,
        what: &'static str,
        task: impl Future<Output = Result<()>> + Send + 'static,
    ) {
        self.runtime.spawn(async move {
            if let Err(e) = task.await {
                error!("{} failed: {:?}", what, e);
            }
        });
    }
}

impl BlePlatform for BluestPlatform {
    fn start_scan(&mut self, service_filter: &[Uuid]) {
        if let Some(previous) = self.scan_token.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        self.scan_token = Some(token.clone());
        let task = Self::scan_task(
            self.adapter.clone(),
            service_filter.to_vec(),
            self.handles.clone(),
            self.controller.clone(),
            token,
        );
        self.spawn_logged("Scan", task);
    }

    fn stop_scan(&mut self) {
        info!("Stopping Bluetooth scan.");
        if let Some(token) = self.scan_token.take() {
            token.cancel();
        }
    }

    fn connect(&mut self, id: &DeviceIdentity) {
        let link = CancellationToken::new();
        if let Some(previous) = self.links.insert(*id, link.clone()) {
            debug!("Restarting connect to {}", id);
            previous.cancel();
        }
        let id = *id;
        let adapter = self.adapter.clone();
        let handles = self.handles.clone();
        let controller = self.controller.clone();
        self.runtime.spawn(async move {
            if let Err(e) = Self::connect_task(adapter, id, handles, controller.clone(), link).await {
                warn!("Connection attempt to {} failed: {}", id, e);
                let _ = controller.platform_event(PlatformEvent::ConnectFailed(id));
            }
        });
    }

    fn cancel_connect(&mut self, id: &DeviceIdentity) {
        if let Some(link) = self.links.remove(id) {
            link.cancel();
        }
        let id = *id;
        let adapter = self.adapter.clone();
        let handles = self.handles.clone();
        let controller = self.controller.clone();
        self.spawn_logged("Disconnect", async move {
            let device = {
                let mut handles = handles.lock().await;
                handles.forget_gatt(&id);
                handles.device(&id)?
            };
            if device.is_connected().await {
                info!("Disconnecting from device {}", id);
                adapter.disconnect_device(&device).await?;
            }
            let _ = controller.platform_event(PlatformEvent::Disconnected(id));
            Ok(())
        });
    }

    fn discover_services(&mut self, id: &DeviceIdentity, service_filter: &[Uuid]) {
        let id = *id;
        let filter = service_filter.to_vec();
        let handles = self.handles.clone();
        let controller = self.controller.clone();
        self.spawn_logged("Service discovery", async move {
            let device = handles.lock().await.device(&id)?;
            let services = device.discover_services().await?;
            let mut found = Vec::new();
            {
                let mut handles = handles.lock().await;
                for service in services {
                    let uuid = service.uuid();
                    if !filter.is_empty() && !filter.contains(&uuid) {
                        debug!("Available service: {}", uuid);
                        continue;
                    }
                    handles.services.insert((id, uuid), service);
                    found.push(uuid);
                }
            }
            let _ = controller.platform_event(PlatformEvent::ServicesDiscovered { id, services: found });
            Ok(())
        });
    }

    fn discover_characteristics(&mut self, id: &DeviceIdentity, service: &Uuid) {
        let id = *id;
        let service_uuid = *service;
        let handles = self.handles.clone();
        let controller = self.controller.clone();
        self.spawn_logged("Characteristic discovery", async move {
            let service = handles
                .lock()
                .await
                .services
                .get(&(id, service_uuid))
                .cloned()
                .ok_or_else(|| anyhow!("Service {} not found on {}", service_uuid, id))?;
            let characteristics = service.discover_characteristics().await?;
            let mut found = Vec::with_capacity(characteristics.len());
            {
                let mut handles = handles.lock().await;
                for characteristic in characteristics {
                    let uuid = characteristic.uuid();
                    handles.characteristics.insert((id, uuid), characteristic);
                    found.push(uuid);
                }
            }
            let _ = controller.platform_event(PlatformEvent::CharacteristicsDiscovered {
                id,
                service: service_uuid,
                characteristics: found,
            });
            Ok(())
        });
    }

    fn subscribe(&mut self, id: &DeviceIdentity, characteristic: &Uuid) {
        let link = self.link_token(id).child_token();
        let id = *id;
        let uuid = *characteristic;
        let handles = self.handles.clone();
        let controller = self.controller.clone();
        self.spawn_logged("Subscription", async move {
            let characteristic = handles
                .lock()
                .await
                .characteristics
                .get(&(id, uuid))
                .cloned()
                .ok_or_else(|| anyhow!("Characteristic {} not found on {}", uuid, id))?;
            Self::notify_task(characteristic, id, controller, link).await
        });
    }

    fn read_value(&mut self, id: &DeviceIdentity, characteristic: &Uuid) {
        let id = *id;
        let uuid = *characteristic;
        let handles = self.handles.clone();
        let controller = self.controller.clone();
        self.spawn_logged("Read", async move {
            let characteristic = handles
                .lock()
                .await
                .characteristics
                .get(&(id, uuid))
                .cloned()
                .ok_or_else(|| anyhow!("Characteristic {} not found on {}", uuid, id))?;
            let value = characteristic.read().await?;
            let _ = controller.platform_event(PlatformEvent::CharacteristicValue {
                id,
                characteristic: uuid,
                value,
            });
            Ok(())
        });
    }
}
