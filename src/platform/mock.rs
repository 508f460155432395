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

//! Scripted platform for tests.
//!
//! [`MockHost`] implements every platform trait against shared in-memory
//! state. Side effects are appended to a log (`"cancel_discovery"`,
//! `"register:1"`, `"unregister:1"`, `"start_discovery"`, `"connect:<addr>"`)
//! so tests can assert on ordering.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    BluetoothAdapter, DiscoveryAction, LocationProvider, LocationServices, PermissionHost,
    Platform, ReceiverRegistry, RemoteDevice, RfcommSocket, SubscriptionId, UserPrompt,
};
use crate::bluetooth::{Permission, PlatformVersion};

struct MockState {
    adapter_present: bool,
    enabled: bool,
    discovering: bool,
    start_discovery_ok: bool,
    granted: HashSet<Permission>,
    permission_requests: Vec<(Vec<Permission>, i32)>,
    gps_enabled: bool,
    network_enabled: bool,
    location_prompts: usize,
    settings_opened: usize,
    register_ok: bool,
    next_subscription: u64,
    subscriptions: Vec<SubscriptionId>,
    socket_error: Option<io::ErrorKind>,
    connect_error: Option<io::ErrorKind>,
    connect_delay: Duration,
    log: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            adapter_present: true,
            enabled: true,
            discovering: false,
            start_discovery_ok: true,
            granted: [
                Permission::BluetoothScan,
                Permission::BluetoothConnect,
                Permission::AccessFineLocation,
            ]
            .into_iter()
            .collect(),
            permission_requests: Vec::new(),
            gps_enabled: true,
            network_enabled: true,
            location_prompts: 0,
            settings_opened: 0,
            register_ok: true,
            next_subscription: 1,
            subscriptions: Vec::new(),
            socket_error: None,
            connect_error: None,
            connect_delay: Duration::ZERO,
            log: Vec::new(),
        }
    }
}

/// In-memory platform. Clones share state.
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl MockHost {
    /// A host with an enabled adapter, all permissions granted and location on.
    pub fn new() -> Self {
        Self::default()
    }

    /// A host with no Bluetooth adapter.
    pub fn without_adapter() -> Self {
        let host = Self::default();
        host.state.lock().adapter_present = false;
        host
    }

    /// Build a [`Platform`] whose collaborators are all this host.
    pub fn platform(&self, api_level: u32) -> Platform {
        let adapter_present = self.state.lock().adapter_present;
        let adapter: Option<Arc<dyn BluetoothAdapter>> = if adapter_present {
            Some(Arc::new(self.clone()))
        } else {
            None
        };

        Platform {
            version: PlatformVersion(api_level),
            adapter,
            permissions: Arc::new(self.clone()),
            location: Arc::new(self.clone()),
            receivers: Arc::new(self.clone()),
            prompt: Arc::new(self.clone()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn set_discovering(&self, discovering: bool) {
        self.state.lock().discovering = discovering;
    }

    /// Make receiver registration fail.
    pub fn fail_register(&self) {
        self.state.lock().register_ok = false;
    }

    pub fn set_start_discovery(&self, ok: bool) {
        self.state.lock().start_discovery_ok = ok;
    }

    /// Replace the set of granted permissions.
    pub fn set_granted(&self, permissions: &[Permission]) {
        self.state.lock().granted = permissions.iter().copied().collect();
    }

    pub fn set_location(&self, gps: bool, network: bool) {
        let mut state = self.state.lock();
        state.gps_enabled = gps;
        state.network_enabled = network;
    }

    /// Make socket creation fail with `kind`.
    pub fn fail_socket_creation(&self, kind: io::ErrorKind) {
        self.state.lock().socket_error = Some(kind);
    }

    /// Make the connect handshake fail with `kind`.
    pub fn fail_connect(&self, kind: io::ErrorKind) {
        self.state.lock().connect_error = Some(kind);
    }

    /// Make the connect handshake block for `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    pub fn permission_requests(&self) -> Vec<(Vec<Permission>, i32)> {
        self.state.lock().permission_requests.clone()
    }

    pub fn location_prompts(&self) -> usize {
        self.state.lock().location_prompts
    }

    pub fn settings_opened(&self) -> usize {
        self.state.lock().settings_opened
    }

    /// Currently registered subscriptions, oldest first.
    pub fn active_subscriptions(&self) -> Vec<SubscriptionId> {
        self.state.lock().subscriptions.clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    fn record(&self, entry: String) {
        self.state.lock().log.push(entry);
    }
}

impl BluetoothAdapter for MockHost {
    fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    fn is_discovering(&self) -> bool {
        self.state.lock().discovering
    }

    fn start_discovery(&self) -> bool {
        let mut state = self.state.lock();
        state.log.push("start_discovery".to_string());
        state.discovering = state.start_discovery_ok;
        state.start_discovery_ok
    }

    fn cancel_discovery(&self) {
        let mut state = self.state.lock();
        state.log.push("cancel_discovery".to_string());
        state.discovering = false;
    }

    fn remote_device(&self, address: &str) -> Box<dyn RemoteDevice> {
        Box::new(MockDevice {
            host: self.clone(),
            address: address.to_string(),
        })
    }
}

impl PermissionHost for MockHost {
    fn is_granted(&self, permission: Permission) -> bool {
        self.state.lock().granted.contains(&permission)
    }

    fn request_permissions(&self, permissions: &[Permission], request_code: i32) {
        self.state
            .lock()
            .permission_requests
            .push((permissions.to_vec(), request_code));
    }
}

impl LocationServices for MockHost {
    fn is_provider_enabled(&self, provider: LocationProvider) -> bool {
        let state = self.state.lock();
        match provider {
            LocationProvider::Gps => state.gps_enabled,
            LocationProvider::Network => state.network_enabled,
        }
    }
}

impl ReceiverRegistry for MockHost {
    fn register(&self, _actions: &[DiscoveryAction]) -> Result<SubscriptionId> {
        let mut state = self.state.lock();
        if !state.register_ok {
            return Err(anyhow!("receiver registration refused"));
        }
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.subscriptions.push(id);
        state.log.push(format!("register:{}", id.0));
        Ok(id)
    }

    fn unregister(&self, subscription: SubscriptionId) -> Result<()> {
        let mut state = self.state.lock();
        let index = state
            .subscriptions
            .iter()
            .position(|s| *s == subscription)
            .ok_or_else(|| anyhow!("receiver {} not registered", subscription))?;
        state.subscriptions.remove(index);
        state.log.push(format!("unregister:{}", subscription.0));
        Ok(())
    }
}

impl UserPrompt for MockHost {
    fn show_location_required(&self) {
        self.state.lock().location_prompts += 1;
    }

    fn open_location_settings(&self) {
        self.state.lock().settings_opened += 1;
    }
}

struct MockDevice {
    host: MockHost,
    address: String,
}

impl RemoteDevice for MockDevice {
    fn address(&self) -> &str {
        &self.address
    }

    fn create_rfcomm_socket(&self, _service: Uuid) -> io::Result<Box<dyn RfcommSocket>> {
        if let Some(kind) = self.host.state.lock().socket_error {
            return Err(io::Error::new(kind, "socket creation failed"));
        }
        Ok(Box::new(MockSocket {
            host: self.host.clone(),
            address: self.address.clone(),
        }))
    }
}

struct MockSocket {
    host: MockHost,
    address: String,
}

impl RfcommSocket for MockSocket {
    fn connect(&mut self) -> io::Result<()> {
        let (delay, error) = {
            let state = self.host.state.lock();
            (state.connect_delay, state.connect_error)
        };
        self.host.record(format!("connect:{}", self.address));
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        match error {
            Some(kind) => Err(io::Error::new(kind, "handshake failed")),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let host = MockHost::new();
        let first = host.register(&[DiscoveryAction::DeviceFound]).unwrap();
        let second = host.register(&[DiscoveryAction::DeviceFound]).unwrap();
        assert_ne!(first, second);

        host.unregister(first).unwrap();
        assert_eq!(host.active_subscriptions(), vec![second]);
        assert!(host.unregister(first).is_err());
    }

    #[test]
    fn test_platform_without_adapter() {
        let platform = MockHost::without_adapter().platform(33);
        assert!(platform.adapter.is_none());
        assert!(platform.is_location_enabled());
    }

    #[test]
    fn test_start_discovery_failure() {
        let host = MockHost::new();
        host.set_start_discovery(false);
        assert!(!host.start_discovery());
        assert!(!host.is_discovering());
    }
}
