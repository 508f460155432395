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

//! Bluetooth session management.
//!
//! Permission gating, device discovery and RFCOMM connection attempts.

mod connection;
mod discovery;
mod handler;
mod permissions;

pub use connection::{ConnectCallback, Connector, SPP_UUID};
pub use discovery::{
    Device, DiscoveryEvent, DiscoverySession, ScanCallback, SessionPhase, DISCOVERY_ACTIONS,
    UNKNOWN_DEVICE_NAME,
};
pub use handler::BluetoothHandler;
pub use permissions::{
    Decision, Ensure, GrantResult, Permission, PermissionGate, PermissionSet, PlatformVersion,
    MODERN_PERMISSIONS_API_LEVEL, PERMISSION_REQUEST_CODE,
};
