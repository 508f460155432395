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

//! Discovery and connection orchestration.
//!
//! [`BluetoothHandler`] is owned by the control thread. Every entry point takes
//! `&mut self`; platform callbacks (grant results, discovery broadcasts, prompt
//! choices) are fed back in through the `on_*` methods.

use tracing::{debug, info, warn};

use super::connection::{ConnectCallback, Connector};
use super::discovery::{
    Device, DiscoveryEvent, DiscoverySession, ScanCallback, SessionPhase, DISCOVERY_ACTIONS,
};
use super::permissions::{Decision, Ensure, GrantResult, PermissionGate};
use crate::platform::{LocationChoice, Platform, SubscriptionId};

/// Action parked behind the permission gate.
enum GatedAction {
    Scan(ScanCallback),
    Connect {
        address: String,
        on_complete: ConnectCallback,
    },
}

impl GatedAction {
    /// Deliver the negative outcome.
    fn deny(self) {
        match self {
            GatedAction::Scan(on_result) => on_result(Vec::new()),
            GatedAction::Connect { on_complete, .. } => on_complete(false),
        }
    }
}

/// Bluetooth session manager.
pub struct BluetoothHandler {
    platform: Platform,
    gate: PermissionGate<GatedAction>,
    discovery: Option<DiscoverySession>,
    connector: Connector,
}

impl BluetoothHandler {
    pub fn new(platform: Platform, connector: Connector) -> Self {
        let gate = PermissionGate::new(platform.version);
        Self {
            platform,
            gate,
            discovery: None,
            connector,
        }
    }

    /// Whether an adapter is present and enabled.
    pub fn check_status(&self) -> bool {
        self.platform
            .adapter
            .as_ref()
            .map(|adapter| adapter.is_enabled())
            .unwrap_or(false)
    }

    /// Discover nearby devices. `on_result` is invoked exactly once.
    pub fn scan_for_devices(&mut self, on_result: ScanCallback) {
        self.gated(GatedAction::Scan(on_result));
    }

    /// Attempt an RFCOMM connection to `address`. `on_complete` is invoked
    /// exactly once: synchronously when denied or without an adapter, from a
    /// worker otherwise.
    pub fn connect_to_device(&mut self, address: String, on_complete: ConnectCallback) {
        self.gated(GatedAction::Connect {
            address,
            on_complete,
        });
    }

    /// Feed a grant result from the platform.
    pub fn on_request_permissions_result(&mut self, request_code: i32, grants: &[GrantResult]) {
        match self.gate.on_request_permissions_result(request_code, grants) {
            Some(Decision::Granted(action)) => self.run(action),
            Some(Decision::Denied(action)) => {
                debug!("Permissions denied");
                action.deny();
            }
            None => {}
        }
    }

    /// Feed a discovery broadcast. Broadcasts for anything but the active
    /// subscription are dropped.
    pub fn on_discovery_event(&mut self, subscription: SubscriptionId, event: DiscoveryEvent) {
        let Some(session) = self.discovery.as_mut() else {
            debug!("Discovery event for {} with no active session", subscription);
            return;
        };
        if session.subscription() != subscription {
            debug!(
                "Dropping discovery event for stale subscription {} (active {})",
                subscription,
                session.subscription()
            );
            return;
        }

        match event {
            DiscoveryEvent::DeviceFound { name, address } => {
                session.push(Device::new(name, address));
            }
            DiscoveryEvent::DiscoveryFinished => {
                if let Some(session) = self.discovery.take() {
                    info!(
                        "Discovery finished. Found {} devices",
                        session.devices().len()
                    );
                    session.finish(self.platform.receivers.as_ref());
                }
            }
        }
    }

    /// Feed the user's answer to the location-required prompt.
    pub fn on_location_choice(&mut self, choice: LocationChoice) {
        let awaiting = matches!(
            self.discovery.as_ref().map(DiscoverySession::phase),
            Some(SessionPhase::AwaitingLocationChoice)
        );
        if !awaiting {
            debug!("Ignoring location choice {:?} with no pending prompt", choice);
            return;
        }

        if choice == LocationChoice::OpenSettings {
            self.platform.prompt.open_location_settings();
        }
        if let Some(session) = self.discovery.take() {
            session.abandon(self.platform.receivers.as_ref());
        }
    }

    /// Whether a discovery session is active.
    pub fn is_scanning(&self) -> bool {
        self.discovery.is_some()
    }

    /// Number of connection attempts spawned so far.
    pub fn connect_attempts(&self) -> usize {
        self.connector.spawned()
    }

    fn gated(&mut self, action: GatedAction) {
        match self.gate.ensure(self.platform.permissions.as_ref(), action) {
            Ensure::Ready(action) => self.run(action),
            Ensure::Deferred => debug!("Action deferred until permissions are answered"),
        }
    }

    fn run(&mut self, action: GatedAction) {
        match action {
            GatedAction::Scan(on_result) => self.start_scan(on_result),
            GatedAction::Connect {
                address,
                on_complete,
            } => self.start_connect(address, on_complete),
        }
    }

    fn start_scan(&mut self, on_result: ScanCallback) {
        let Some(adapter) = self.platform.adapter.clone() else {
            debug!("Adapter is null");
            on_result(Vec::new());
            return;
        };

        if adapter.is_discovering() {
            debug!("Canceling existing discovery");
            adapter.cancel_discovery();
        }

        if let Some(previous) = self.discovery.take() {
            debug!(
                "Superseding discovery session {} with {} devices",
                previous.subscription(),
                previous.devices().len()
            );
            previous.finish(self.platform.receivers.as_ref());
        }

        let subscription = match self.platform.receivers.register(&DISCOVERY_ACTIONS) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Failed to register discovery receiver: {}", e);
                on_result(Vec::new());
                return;
            }
        };
        let mut session = DiscoverySession::new(subscription, on_result);

        let location_enabled = self.platform.is_location_enabled();
        debug!("Location Services Enabled: {}", location_enabled);
        debug!("Bluetooth Adapter Enabled: {}", adapter.is_enabled());

        if !location_enabled {
            info!("Location services disabled, prompting user");
            session.set_phase(SessionPhase::AwaitingLocationChoice);
            self.discovery = Some(session);
            self.platform.prompt.show_location_required();
            return;
        }

        let started = adapter.start_discovery();
        debug!("startDiscovery returned: {}", started);
        if started {
            self.discovery = Some(session);
        } else {
            warn!("Failed to start discovery");
            session.abandon(self.platform.receivers.as_ref());
        }
    }

    fn start_connect(&mut self, address: String, on_complete: ConnectCallback) {
        let Some(adapter) = self.platform.adapter.clone() else {
            debug!("Adapter is null");
            on_complete(false);
            return;
        };

        let device = adapter.remote_device(&address);
        self.connector.spawn(adapter, device, on_complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{Permission, PERMISSION_REQUEST_CODE};
    use crate::platform::mock::MockHost;
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio::runtime::Handle;

    type Results<T> = (mpsc::Sender<T>, mpsc::Receiver<T>);

    fn handler(host: &MockHost) -> BluetoothHandler {
        let connector = Connector::new(Handle::current(), 2, Duration::from_secs(5));
        BluetoothHandler::new(host.platform(33), connector)
    }

    fn scan(handler: &mut BluetoothHandler) -> mpsc::Receiver<Vec<Device>> {
        let (tx, rx): Results<Vec<Device>> = mpsc::channel();
        handler.scan_for_devices(Box::new(move |devices| tx.send(devices).unwrap()));
        rx
    }

    fn found(name: Option<&str>, address: &str) -> DiscoveryEvent {
        DiscoveryEvent::DeviceFound {
            name: name.map(str::to_string),
            address: address.to_string(),
        }
    }

    #[tokio::test]
    async fn test_check_status() {
        let host = MockHost::new();
        assert!(handler(&host).check_status());

        host.set_enabled(false);
        assert!(!handler(&host).check_status());

        let host = MockHost::without_adapter();
        assert!(!handler(&host).check_status());
    }

    #[tokio::test]
    async fn test_scan_collects_until_finished() {
        let host = MockHost::new();
        let mut handler = handler(&host);
        let rx = scan(&mut handler);

        let subscription = host.active_subscriptions()[0];
        handler.on_discovery_event(subscription, found(Some("Speaker"), "A"));
        handler.on_discovery_event(subscription, found(None, "B"));
        handler.on_discovery_event(subscription, found(Some("Speaker"), "A"));
        assert!(rx.try_recv().is_err());

        handler.on_discovery_event(subscription, DiscoveryEvent::DiscoveryFinished);
        let devices = rx.recv().unwrap();
        assert_eq!(
            devices,
            vec![
                Device::new(Some("Speaker".into()), "A"),
                Device::new(Some("Unknown".into()), "B"),
                Device::new(Some("Speaker".into()), "A"),
            ]
        );
        assert!(!handler.is_scanning());
        assert!(host.active_subscriptions().is_empty());

        // Exactly once: a late finish delivers nothing.
        handler.on_discovery_event(subscription, DiscoveryEvent::DiscoveryFinished);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scan_without_adapter_is_empty() {
        let host = MockHost::without_adapter();
        let mut handler = handler(&host);

        assert!(scan(&mut handler).recv().unwrap().is_empty());
        assert!(host.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_scan_denied_is_empty() {
        let host = MockHost::new();
        host.set_granted(&[Permission::AccessFineLocation]);
        let mut handler = handler(&host);

        let rx = scan(&mut handler);
        assert!(rx.try_recv().is_err());

        handler.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[GrantResult::Denied]);
        assert!(rx.recv().unwrap().is_empty());
        assert!(!host.log().iter().any(|e| e == "start_discovery"));
    }

    #[tokio::test]
    async fn test_scan_runs_after_grant() {
        let host = MockHost::new();
        host.set_granted(&[]);
        let mut handler = handler(&host);

        let rx = scan(&mut handler);
        assert!(host.active_subscriptions().is_empty());

        handler.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[GrantResult::Granted; 3]);
        let subscription = host.active_subscriptions()[0];
        handler.on_discovery_event(subscription, DiscoveryEvent::DiscoveryFinished);
        assert!(rx.recv().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_is_empty() {
        let host = MockHost::new();
        host.set_start_discovery(false);
        let mut handler = handler(&host);

        assert!(scan(&mut handler).recv().unwrap().is_empty());
        assert!(!handler.is_scanning());
        assert!(host.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_registration_is_empty() {
        let host = MockHost::new();
        host.fail_register();
        let mut handler = handler(&host);

        let rx = scan(&mut handler);
        assert!(rx.recv().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
        assert!(!handler.is_scanning());
        assert!(!host.log().iter().any(|e| e == "start_discovery"));
    }

    #[tokio::test]
    async fn test_scan_cancels_discovery_started_elsewhere() {
        let host = MockHost::new();
        host.set_discovering(true);
        let mut handler = handler(&host);

        let _rx = scan(&mut handler);
        let log = host.log();
        assert_eq!(log[0], "cancel_discovery");
        assert_eq!(log[1], "register:1");
        assert_eq!(log[2], "start_discovery");
        assert!(handler.is_scanning());
    }

    #[tokio::test]
    async fn test_location_disabled_prompts_then_settings() {
        let host = MockHost::new();
        host.set_location(false, false);
        let mut handler = handler(&host);

        let rx = scan(&mut handler);
        assert_eq!(host.location_prompts(), 1);
        assert!(rx.try_recv().is_err());

        handler.on_location_choice(LocationChoice::OpenSettings);
        assert!(rx.recv().unwrap().is_empty());
        assert_eq!(host.settings_opened(), 1);
        assert!(!host.log().iter().any(|e| e == "start_discovery"));

        // No pending prompt anymore.
        handler.on_location_choice(LocationChoice::Cancel);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_location_disabled_prompts_then_cancel() {
        let host = MockHost::new();
        host.set_location(false, false);
        let mut handler = handler(&host);

        let rx = scan(&mut handler);
        handler.on_location_choice(LocationChoice::Cancel);
        assert!(rx.recv().unwrap().is_empty());
        assert_eq!(host.settings_opened(), 0);
    }

    #[tokio::test]
    async fn test_network_provider_satisfies_location() {
        let host = MockHost::new();
        host.set_location(false, true);
        let mut handler = handler(&host);

        let _rx = scan(&mut handler);
        assert_eq!(host.location_prompts(), 0);
        assert!(host.log().iter().any(|e| e == "start_discovery"));
    }

    #[tokio::test]
    async fn test_second_scan_supersedes_first() {
        let host = MockHost::new();
        let mut handler = handler(&host);

        let first = scan(&mut handler);
        let first_subscription = host.active_subscriptions()[0];
        handler.on_discovery_event(first_subscription, found(Some("Old"), "A"));
        host.clear_log();

        let second = scan(&mut handler);
        let log = host.log();
        let cancel = log.iter().position(|e| e == "cancel_discovery").unwrap();
        let unregister = log
            .iter()
            .position(|e| *e == format!("unregister:{}", first_subscription.0))
            .unwrap();
        let register = log.iter().position(|e| e.starts_with("register:")).unwrap();
        assert!(cancel < unregister && unregister < register);

        // Superseded caller still gets its answer.
        assert_eq!(first.recv().unwrap().len(), 1);

        // Stale broadcasts no longer reach the new session.
        let second_subscription = host.active_subscriptions()[0];
        assert_ne!(first_subscription, second_subscription);
        handler.on_discovery_event(first_subscription, found(Some("Old"), "B"));
        handler.on_discovery_event(first_subscription, DiscoveryEvent::DiscoveryFinished);
        assert!(second.try_recv().is_err());

        handler.on_discovery_event(second_subscription, DiscoveryEvent::DiscoveryFinished);
        assert!(second.recv().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_without_adapter_does_not_spawn() {
        let host = MockHost::without_adapter();
        let mut handler = handler(&host);
        let (tx, rx) = mpsc::channel();

        handler.connect_to_device("00:11:22:33:44:55".into(), Box::new(move |c| tx.send(c).unwrap()));
        assert!(!rx.try_recv().unwrap());
        assert_eq!(handler.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_connect_denied_does_not_spawn() {
        let host = MockHost::new();
        host.set_granted(&[]);
        let mut handler = handler(&host);
        let (tx, rx) = mpsc::channel();

        handler.connect_to_device("00:11:22:33:44:55".into(), Box::new(move |c| tx.send(c).unwrap()));
        handler.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[GrantResult::Denied; 3]);
        assert!(!rx.try_recv().unwrap());
        assert_eq!(handler.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_connect_spawns_attempt() {
        let host = MockHost::new();
        let mut handler = handler(&host);
        let (tx, rx) = tokio::sync::oneshot::channel();

        handler.connect_to_device(
            "00:11:22:33:44:55".into(),
            Box::new(move |c| {
                let _ = tx.send(c);
            }),
        );
        assert_eq!(handler.connect_attempts(), 1);
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_connect_discarded_by_later_scan() {
        let host = MockHost::new();
        host.set_granted(&[]);
        let mut handler = handler(&host);
        let (tx, rx) = mpsc::channel::<bool>();

        handler.connect_to_device("00:11:22:33:44:55".into(), Box::new(move |c| tx.send(c).unwrap()));
        let scan_rx = scan(&mut handler);
        handler.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[GrantResult::Denied]);

        assert!(scan_rx.recv().unwrap().is_empty());
        // Discarded without being invoked.
        assert!(matches!(rx.try_recv(), Err(mpsc::TryRecvError::Disconnected)));
    }
}
