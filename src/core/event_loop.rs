//! Serialized controller context.
//!
//! The [`BluetoothManager`] is not thread-safe. It lives on a single tokio task
//! that drains a request queue; platform callbacks and embedder calls from any
//! thread reach it through a clonable [`ControllerHandle`].

use log::{debug, info};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::bluetooth::manager::BluetoothManager;
use crate::core::bluetooth::platform::PlatformEvent;
use crate::core::bluetooth::types::DeviceIdentity;

type ManagerJob = Box<dyn FnOnce(&mut BluetoothManager) + Send>;

enum ControllerRequest {
    Platform(PlatformEvent),
    Connect(DeviceIdentity),
    Disconnect(DeviceIdentity),
    Forget(DeviceIdentity),
    StartDiscovery,
    StopDiscovery,
    Run(ManagerJob),
    Shutdown(oneshot::Sender<BluetoothManager>),
}

/// The controller loop is gone; the request was not delivered.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("controller event loop has stopped")]
pub struct ControllerClosed;

/// A clonable handle that sends requests to the controller loop.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerRequest>,
}

/// Receiving end of the request queue. Run it with a manager to start the loop.
pub struct ControllerInbox {
    rx: mpsc::UnboundedReceiver<ControllerRequest>,
}

impl ControllerHandle {
    /// Creates a handle and the inbox it feeds. The manager can be built in
    /// between, so a platform adapter can hold a handle of its own.
    pub fn channel() -> (Self, ControllerInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, ControllerInbox { rx })
    }

    fn send(&self, request: ControllerRequest) -> Result<(), ControllerClosed> {
        self.tx.send(request).map_err(|_| ControllerClosed)
    }

    /// Queues a host stack callback.
    pub fn platform_event(&self, event: PlatformEvent) -> Result<(), ControllerClosed> {
        self.send(ControllerRequest::Platform(event))
    }

    pub fn connect(&self, id: DeviceIdentity) -> Result<(), ControllerClosed> {
        self.send(ControllerRequest::Connect(id))
    }

    pub fn disconnect(&self, id: DeviceIdentity) -> Result<(), ControllerClosed> {
        self.send(ControllerRequest::Disconnect(id))
    }

    pub fn forget_device(&self, id: DeviceIdentity) -> Result<(), ControllerClosed> {
        self.send(ControllerRequest::Forget(id))
    }

    pub fn start_discovery_session(&self) -> Result<(), ControllerClosed> {
        self.send(ControllerRequest::StartDiscovery)
    }

    pub fn stop_discovery_session(&self) -> Result<(), ControllerClosed> {
        self.send(ControllerRequest::StopDiscovery)
    }

    /// Runs `f` on the controller context and returns its result. Use this
    /// for queries and for registering callbacks.
    pub async fn with_manager<R, F>(&self, f: F) -> Result<R, ControllerClosed>
    where
        R: Send + 'static,
        F: FnOnce(&mut BluetoothManager) -> R + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.send(ControllerRequest::Run(Box::new(move |manager| {
            let _ = reply.send(f(manager));
        })))?;
        response.await.map_err(|_| ControllerClosed)
    }

    /// Stops the loop after the requests queued so far and hands the manager back.
    pub async fn shutdown(&self) -> Result<BluetoothManager, ControllerClosed> {
        let (reply, response) = oneshot::channel();
        self.send(ControllerRequest::Shutdown(reply))?;
        response.await.map_err(|_| ControllerClosed)
    }
}

impl ControllerInbox {
    /// Drains requests until a shutdown or until every handle is dropped.
    ///
    /// Returns the manager when the loop ended because the handles went away;
    /// after a shutdown it has been handed to the requester instead.
    pub async fn run(mut self, mut manager: BluetoothManager) -> Option<BluetoothManager> {
        info!("Controller loop started.");
        while let Some(request) = self.rx.recv().await {
            match request {
                ControllerRequest::Platform(event) => manager.handle_event(event),
                ControllerRequest::Connect(id) => manager.connect(&id),
                ControllerRequest::Disconnect(id) => manager.disconnect(&id),
                ControllerRequest::Forget(id) => manager.forget_device(&id),
                ControllerRequest::StartDiscovery => manager.start_discovery_session(),
                ControllerRequest::StopDiscovery => manager.stop_discovery_session(),
                ControllerRequest::Run(job) => job(&mut manager),
                ControllerRequest::Shutdown(reply) => {
                    info!("Controller loop shutting down.");
                    return match reply.send(manager) {
                        Ok(()) => None,
                        Err(manager) => {
                            debug!("Shutdown requester went away");
                            Some(manager)
                        }
                    };
                }
            }
        }
        info!("All controller handles dropped.");
        Some(manager)
    }

    /// Runs the loop on its own tokio task.
    pub fn spawn(self, manager: BluetoothManager) -> JoinHandle<Option<BluetoothManager>> {
        tokio::spawn(self.run(manager))
    }
}
