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

//! Device discovery session state.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::platform::{DiscoveryAction, ReceiverRegistry, SubscriptionId};

/// Name reported for devices that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Broadcasts a discovery session subscribes to.
pub const DISCOVERY_ACTIONS: [DiscoveryAction; 2] =
    [DiscoveryAction::DeviceFound, DiscoveryAction::DiscoveryFinished];

/// Callback receiving the result of a scan.
pub type ScanCallback = Box<dyn FnOnce(Vec<Device>) + Send>;

/// A discovered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub address: String,
}

impl Device {
    pub fn new(name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            address: address.into(),
        }
    }
}

/// Discovery broadcast delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceFound {
        name: Option<String>,
        address: String,
    },
    DiscoveryFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Platform discovery requested (or about to be).
    Discovering,
    /// Blocked on the location-required prompt.
    AwaitingLocationChoice,
}

/// One active discovery: its subscription, the devices seen so far and the
/// caller waiting for them.
pub struct DiscoverySession {
    subscription: SubscriptionId,
    phase: SessionPhase,
    devices: Vec<Device>,
    on_result: ScanCallback,
}

impl DiscoverySession {
    pub fn new(subscription: SubscriptionId, on_result: ScanCallback) -> Self {
        Self {
            subscription,
            phase: SessionPhase::Discovering,
            devices: Vec::new(),
            on_result,
        }
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Record a found device. Duplicates are kept in encounter order.
    pub fn push(&mut self, device: Device) {
        debug!("Device found: {} - {}", device.name, device.address);
        self.devices.push(device);
    }

    /// Unregister the subscription and deliver the accumulated devices.
    pub fn finish(self, receivers: &dyn ReceiverRegistry) {
        Self::release(self.subscription, receivers);
        (self.on_result)(self.devices);
    }

    /// Unregister the subscription and deliver an empty result.
    pub fn abandon(self, receivers: &dyn ReceiverRegistry) {
        Self::release(self.subscription, receivers);
        (self.on_result)(Vec::new());
    }

    fn release(subscription: SubscriptionId, receivers: &dyn ReceiverRegistry) {
        if let Err(e) = receivers.unregister(subscription) {
            warn!("Failed to unregister discovery receiver {}: {}", subscription, e);
        }
    }
}
