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

//! Platform collaborators.
//!
//! Everything the bridge needs from the host operating system sits behind the
//! traits in this module: the Bluetooth adapter, runtime permissions, location
//! providers, broadcast subscriptions and the user prompt. The BlueZ backend
//! lives in [`crate::bluez`], the scripted test double in [`mock`].

use anyhow::Result;
use std::fmt;
use std::io;
use std::sync::Arc;
use uuid::Uuid;

use crate::bluetooth::{Permission, PlatformVersion};

pub mod mock;

/// Local Bluetooth adapter.
pub trait BluetoothAdapter: Send + Sync {
    /// Whether the adapter reports itself powered on.
    fn is_enabled(&self) -> bool;

    /// Whether a device discovery is currently running.
    fn is_discovering(&self) -> bool;

    /// Start device discovery. Returns `false` if the platform refused.
    fn start_discovery(&self) -> bool;

    /// Cancel a running discovery. No-op when idle.
    fn cancel_discovery(&self);

    /// Resolve a remote device handle. Performs no validation of `address`.
    fn remote_device(&self, address: &str) -> Box<dyn RemoteDevice>;
}

/// Handle to a remote device, resolved by hardware address.
pub trait RemoteDevice: Send {
    /// Hardware address this handle was resolved from.
    fn address(&self) -> &str;

    /// Create an RFCOMM socket targeting the service record `service`.
    fn create_rfcomm_socket(&self, service: Uuid) -> io::Result<Box<dyn RfcommSocket>>;
}

/// Unconnected RFCOMM client socket.
pub trait RfcommSocket: Send {
    /// Blocking connect handshake.
    fn connect(&mut self) -> io::Result<()>;
}

/// Runtime permission checks and requests.
pub trait PermissionHost: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;

    /// Ask the user for `permissions`. The answer arrives later as a grant
    /// result tagged with `request_code`.
    fn request_permissions(&self, permissions: &[Permission], request_code: i32);
}

/// Location providers that may satisfy the discovery precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationProvider {
    Gps,
    Network,
}

pub trait LocationServices: Send + Sync {
    fn is_provider_enabled(&self, provider: LocationProvider) -> bool;
}

/// Identifier of a registered discovery broadcast subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Broadcast kinds a discovery subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryAction {
    DeviceFound,
    DiscoveryFinished,
}

/// Broadcast subscription management.
///
/// Events for a subscription are delivered to the control thread as
/// [`crate::events::HostEvent::Discovery`], tagged with the id returned here.
pub trait ReceiverRegistry: Send + Sync {
    fn register(&self, actions: &[DiscoveryAction]) -> Result<SubscriptionId>;

    /// Fails if `subscription` is not registered.
    fn unregister(&self, subscription: SubscriptionId) -> Result<()>;
}

/// Answer to the location-required prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationChoice {
    OpenSettings,
    Cancel,
}

/// User-facing prompts.
pub trait UserPrompt: Send + Sync {
    /// Ask the user to enable location services. The choice arrives later as
    /// [`crate::events::HostEvent::LocationChoice`].
    fn show_location_required(&self);

    /// Navigate to the system location settings.
    fn open_location_settings(&self);
}

/// The full set of collaborators a [`crate::bluetooth::BluetoothHandler`] runs against.
#[derive(Clone)]
pub struct Platform {
    pub version: PlatformVersion,
    /// `None` when the host has no Bluetooth adapter.
    pub adapter: Option<Arc<dyn BluetoothAdapter>>,
    pub permissions: Arc<dyn PermissionHost>,
    pub location: Arc<dyn LocationServices>,
    pub receivers: Arc<dyn ReceiverRegistry>,
    pub prompt: Arc<dyn UserPrompt>,
}

impl Platform {
    /// Whether either location provider is enabled.
    pub fn is_location_enabled(&self) -> bool {
        self.location.is_provider_enabled(LocationProvider::Gps)
            || self.location.is_provider_enabled(LocationProvider::Network)
    }
}
