// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! BlueZ platform backend.
//!
//! Implements the adapter and broadcast traits on top of `bluer`. The trait
//! methods are synchronous and are called from the control thread or from the
//! blocking pool, so async BlueZ calls are driven with `Handle::block_on`.

mod host;

use anyhow::Result;
use bluer::rfcomm::{ConnectRequest, Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use host::DesktopHost;

use crate::bluetooth::{DiscoveryEvent, SPP_UUID};
use crate::config::Config;
use crate::events::{ControlHandle, HostEvent};
use crate::platform::{
    BluetoothAdapter, DiscoveryAction, Platform, ReceiverRegistry, RemoteDevice, RfcommSocket,
    SubscriptionId,
};

/// Build a [`Platform`] backed by BlueZ. A missing adapter is not an error;
/// the platform then reports no adapter.
pub async fn platform(config: &Config, runtime: Handle, control: ControlHandle) -> Platform {
    let receivers = Arc::new(Receivers::new(control.clone()));

    let adapter = match BluezAdapter::open(
        runtime,
        config.bluetooth.adapter.as_deref(),
        config.bluetooth.discovery_duration(),
        receivers.clone(),
    )
    .await
    {
        Ok(adapter) => Some(Arc::new(adapter) as Arc<dyn BluetoothAdapter>),
        Err(e) => {
            warn!("No Bluetooth adapter available: {}", e);
            None
        }
    };

    let host = Arc::new(DesktopHost::new(control));
    Platform {
        version: config.platform.version(),
        adapter,
        permissions: host.clone(),
        location: host.clone(),
        receivers,
        prompt: host,
    }
}

/// Discovery broadcast subscriptions. Events are forwarded to the control
/// thread tagged with every registered subscription.
pub struct Receivers {
    control: ControlHandle,
    next_id: AtomicU64,
    active: Mutex<Vec<SubscriptionId>>,
}

impl Receivers {
    pub fn new(control: ControlHandle) -> Self {
        Self {
            control,
            next_id: AtomicU64::new(1),
            active: Mutex::new(Vec::new()),
        }
    }

    fn dispatch(&self, event: DiscoveryEvent) {
        let active = self.active.lock().clone();
        if active.is_empty() {
            debug!("No discovery receiver registered, dropping {:?}", event);
        }
        for subscription in active {
            self.control.send(HostEvent::Discovery {
                subscription,
                event: event.clone(),
            });
        }
    }
}

impl ReceiverRegistry for Receivers {
    fn register(&self, actions: &[DiscoveryAction]) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.active.lock().push(id);
        debug!("Registered discovery receiver {} for {:?}", id, actions);
        Ok(id)
    }

    fn unregister(&self, subscription: SubscriptionId) -> Result<()> {
        let mut active = self.active.lock();
        let before = active.len();
        active.retain(|s| *s != subscription);
        if active.len() == before {
            anyhow::bail!("receiver {} not registered", subscription);
        }
        debug!("Unregistered discovery receiver {}", subscription);
        Ok(())
    }
}

/// BlueZ adapter.
pub struct BluezAdapter {
    runtime: Handle,
    _session: Session,
    adapter: Adapter,
    profile: Option<Arc<ProfileRouter>>,
    discovery_duration: Duration,
    receivers: Arc<Receivers>,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezAdapter {
    /// Open adapter `name`, or the default adapter.
    pub async fn open(
        runtime: Handle,
        name: Option<&str>,
        discovery_duration: Duration,
        receivers: Arc<Receivers>,
    ) -> Result<Self> {
        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        let profile = match ProfileRouter::register(&session, SPP_UUID).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Failed to register RFCOMM client profile: {}", e);
                None
            }
        };

        Ok(Self {
            runtime,
            _session: session,
            adapter,
            profile,
            discovery_duration,
            receivers,
            discovery: Mutex::new(None),
        })
    }
}

impl BluetoothAdapter for BluezAdapter {
    fn is_enabled(&self) -> bool {
        match self.runtime.block_on(self.adapter.is_powered()) {
            Ok(powered) => powered,
            Err(e) => {
                warn!("Failed to read adapter power state: {}", e);
                false
            }
        }
    }

    /// Tracks the discovery this process started, not the adapter's own
    /// `Discovering` property.
    fn is_discovering(&self) -> bool {
        self.discovery
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn start_discovery(&self) -> bool {
        let (started_tx, started_rx) = oneshot::channel();
        let task = self.runtime.spawn(run_discovery(
            self.adapter.clone(),
            self.discovery_duration,
            self.receivers.clone(),
            started_tx,
        ));

        let started = started_rx.blocking_recv().unwrap_or(false);
        if let Some(previous) = self.discovery.lock().replace(task) {
            previous.abort();
        }
        started
    }

    fn cancel_discovery(&self) {
        let Some(task) = self.discovery.lock().take() else {
            return;
        };
        if !task.is_finished() {
            info!("Canceling discovery");
            task.abort();
            // Cancelling still concludes the discovery for its receivers.
            self.receivers.dispatch(DiscoveryEvent::DiscoveryFinished);
        }
    }

    fn remote_device(&self, address: &str) -> Box<dyn RemoteDevice> {
        Box::new(BluezDevice {
            runtime: self.runtime.clone(),
            adapter: self.adapter.clone(),
            profile: self.profile.clone(),
            address: address.to_string(),
        })
    }
}

/// Stream adapter events until the discovery window closes.
async fn run_discovery(
    adapter: Adapter,
    duration: Duration,
    receivers: Arc<Receivers>,
    started: oneshot::Sender<bool>,
) {
    let events = match adapter.discover_devices().await {
        Ok(events) => {
            let _ = started.send(true);
            events
        }
        Err(e) => {
            warn!("Failed to start discovery: {}", e);
            let _ = started.send(false);
            return;
        }
    };
    info!("Discovery started for {:?}", duration);

    tokio::pin!(events);
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.next() => match event {
                Some(AdapterEvent::DeviceAdded(address)) => {
                    let name = device_name(&adapter, address).await;
                    receivers.dispatch(DiscoveryEvent::DeviceFound {
                        name,
                        address: address.to_string(),
                    });
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    receivers.dispatch(DiscoveryEvent::DiscoveryFinished);
}

async fn device_name(adapter: &Adapter, address: Address) -> Option<String> {
    let device = adapter.device(address).ok()?;
    device.name().await.ok().flatten()
}

/// The SPP client profile, registered once per adapter.
///
/// BlueZ hands every outgoing connection for the profile to one handle, so
/// requests are routed to the connect waiting on that device. Waiters for
/// the same device are served in order.
struct ProfileRouter {
    service: Uuid,
    waiters: Mutex<HashMap<Address, VecDeque<oneshot::Sender<ConnectRequest>>>>,
}

impl ProfileRouter {
    async fn register(session: &Session, service: Uuid) -> bluer::Result<Arc<Self>> {
        let profile = Profile {
            uuid: service,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let handle = session.register_profile(profile).await?;
        info!("RFCOMM client profile registered for {}", service);

        let router = Arc::new(Self {
            service,
            waiters: Mutex::new(HashMap::new()),
        });
        tokio::spawn(route_requests(handle, router.clone()));
        Ok(router)
    }

    fn wait_for(&self, address: Address) -> oneshot::Receiver<ConnectRequest> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let queue = waiters.entry(address).or_default();
        queue.retain(|waiter| !waiter.is_closed());
        queue.push_back(tx);
        rx
    }

    /// Hand `request` to the oldest live waiter for its device.
    fn route(&self, mut request: ConnectRequest) {
        let address = request.device();
        let mut waiters = self.waiters.lock();
        let Some(queue) = waiters.get_mut(&address) else {
            debug!("Dropping unsolicited RFCOMM request from {}", address);
            return;
        };

        while let Some(waiter) = queue.pop_front() {
            match waiter.send(request) {
                Ok(()) => {
                    if queue.is_empty() {
                        waiters.remove(&address);
                    }
                    return;
                }
                Err(returned) => request = returned,
            }
        }
        waiters.remove(&address);
        debug!("No connect waiting for {}, dropping RFCOMM request", address);
    }
}

async fn route_requests(mut handle: ProfileHandle, router: Arc<ProfileRouter>) {
    while let Some(request) = handle.next().await {
        router.route(request);
    }
    warn!("RFCOMM profile handle closed");
}

/// Remote device resolved through BlueZ.
struct BluezDevice {
    runtime: Handle,
    adapter: Adapter,
    profile: Option<Arc<ProfileRouter>>,
    address: String,
}

impl RemoteDevice for BluezDevice {
    fn address(&self) -> &str {
        &self.address
    }

    fn create_rfcomm_socket(&self, service: Uuid) -> io::Result<Box<dyn RfcommSocket>> {
        let address = Address::from_str(&self.address).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid Bluetooth address '{}': {}", self.address, e),
            )
        })?;

        let profile = match &self.profile {
            Some(profile) if profile.service == service => profile.clone(),
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("No RFCOMM client profile for {}", service),
                ))
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "RFCOMM client profile not registered",
                ))
            }
        };

        Ok(Box::new(BluezSocket {
            runtime: self.runtime.clone(),
            adapter: self.adapter.clone(),
            profile,
            address,
            _stream: None,
        }))
    }
}

/// Whichever side of a profile connect finishes first.
enum First {
    Connected(bluer::Result<()>),
    Request(Option<ConnectRequest>),
}

/// RFCOMM client socket connected through the shared client profile.
struct BluezSocket {
    runtime: Handle,
    adapter: Adapter,
    profile: Arc<ProfileRouter>,
    address: Address,
    _stream: Option<Stream>,
}

impl RfcommSocket for BluezSocket {
    fn connect(&mut self) -> io::Result<()> {
        let adapter = self.adapter.clone();
        let address = self.address;
        let service = self.profile.service;
        let mut request = self.profile.wait_for(address);

        let stream = self.runtime.block_on(async move {
            let device = adapter.device(address).map_err(io::Error::other)?;
            let connect = device.connect_profile(&service);
            tokio::pin!(connect);

            // BlueZ hands the socket to the profile before ConnectProfile returns.
            let first = tokio::select! {
                result = &mut connect => First::Connected(result),
                routed = &mut request => First::Request(routed.ok()),
            };
            let (routed, connected) = match first {
                First::Connected(result) => {
                    result.map_err(io::Error::other)?;
                    (request.await.ok(), true)
                }
                First::Request(routed) => (routed, false),
            };
            let routed = routed.ok_or_else(|| {
                io::Error::new(io::ErrorKind::BrokenPipe, "Profile handle closed")
            })?;

            let stream = routed.accept().map_err(io::Error::other)?;
            if !connected {
                connect.await.map_err(io::Error::other)?;
            }
            Ok::<_, io::Error>(stream)
        })?;

        info!("RFCOMM connected to {} ({})", self.address, service);
        self._stream = Some(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::control_channel;

    #[test]
    fn test_receivers_forward_to_registered_subscriptions() {
        let (control, mut events) = control_channel();
        let receivers = Receivers::new(control);

        receivers.dispatch(DiscoveryEvent::DiscoveryFinished);
        assert!(events.try_recv().is_err());

        let id = receivers
            .register(&[DiscoveryAction::DeviceFound, DiscoveryAction::DiscoveryFinished])
            .unwrap();
        receivers.dispatch(DiscoveryEvent::DiscoveryFinished);
        match events.try_recv() {
            Ok(HostEvent::Discovery {
                subscription,
                event,
            }) => {
                assert_eq!(subscription, id);
                assert_eq!(event, DiscoveryEvent::DiscoveryFinished);
            }
            _ => panic!("expected discovery event"),
        }

        receivers.unregister(id).unwrap();
        assert!(receivers.unregister(id).is_err());
    }

    #[test]
    fn test_profile_waiters_are_queued_per_device() {
        let router = ProfileRouter {
            service: SPP_UUID,
            waiters: Mutex::new(HashMap::new()),
        };
        let first = Address::from_str("00:11:22:33:44:55").unwrap();
        let second = Address::from_str("66:77:88:99:AA:BB").unwrap();

        let abandoned = router.wait_for(first);
        drop(abandoned);
        let _waiting = router.wait_for(first);
        let _other = router.wait_for(second);

        let waiters = router.waiters.lock();
        assert_eq!(waiters.len(), 2);
        assert_eq!(waiters[&first].len(), 1);
        assert_eq!(waiters[&second].len(), 1);
    }
}
