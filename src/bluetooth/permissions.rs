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

//! Runtime permission gate.
//!
//! Gated actions run immediately when every required permission is already
//! granted. Otherwise the action is parked in a single pending slot until the
//! platform answers the permission request.

use std::fmt;
use tracing::{debug, info};

use crate::platform::PermissionHost;

/// Request code attached to every permission request issued by the gate.
pub const PERMISSION_REQUEST_CODE: i32 = 881;

/// API level from which Bluetooth scan/connect are separate runtime permissions.
pub const MODERN_PERMISSIONS_API_LEVEL: u32 = 31;

/// Runtime permission identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    AccessFineLocation,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Permission::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
            Permission::AccessFineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform API level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlatformVersion(pub u32);

impl PlatformVersion {
    pub fn has_modern_bluetooth_permissions(&self) -> bool {
        self.0 >= MODERN_PERMISSIONS_API_LEVEL
    }
}

/// Ordered set of permissions required for discovery and connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSet(Vec<Permission>);

impl PermissionSet {
    /// Required permissions for `version`.
    pub fn for_version(version: PlatformVersion) -> Self {
        if version.has_modern_bluetooth_permissions() {
            Self(vec![
                Permission::BluetoothScan,
                Permission::BluetoothConnect,
                Permission::AccessFineLocation,
            ])
        } else {
            Self(vec![Permission::AccessFineLocation])
        }
    }

    pub fn as_slice(&self) -> &[Permission] {
        &self.0
    }

    pub fn is_granted_by(&self, host: &dyn PermissionHost) -> bool {
        self.0.iter().all(|p| host.is_granted(*p))
    }
}

/// Answer for a single permission in a grant result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantResult {
    Granted,
    Denied,
}

/// Outcome of [`PermissionGate::ensure`].
#[derive(Debug)]
pub enum Ensure<T> {
    /// Permissions already held; run the action now.
    Ready(T),
    /// A request was issued; the action is parked until the grant result.
    Deferred,
}

/// Resolution of a parked action.
#[derive(Debug, PartialEq, Eq)]
pub enum Decision<T> {
    Granted(T),
    Denied(T),
}

/// Single-slot permission gate. A new deferred action replaces the parked one.
pub struct PermissionGate<T> {
    required: PermissionSet,
    pending: Option<T>,
}

impl<T> PermissionGate<T> {
    pub fn new(version: PlatformVersion) -> Self {
        Self {
            required: PermissionSet::for_version(version),
            pending: None,
        }
    }

    pub fn required(&self) -> &PermissionSet {
        &self.required
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Run `action` now if permitted, otherwise park it and ask the platform.
    pub fn ensure(&mut self, host: &dyn PermissionHost, action: T) -> Ensure<T> {
        if self.required.is_granted_by(host) {
            return Ensure::Ready(action);
        }

        if self.pending.replace(action).is_some() {
            debug!("Discarding previously pending permission request");
        }
        info!(
            "Requesting permissions: {:?}",
            self.required.as_slice().iter().map(Permission::as_str).collect::<Vec<_>>()
        );
        host.request_permissions(self.required.as_slice(), PERMISSION_REQUEST_CODE);
        Ensure::Deferred
    }

    /// Resolve the parked action. Returns `None` for foreign request codes or
    /// when nothing is parked.
    pub fn on_request_permissions_result(
        &mut self,
        request_code: i32,
        grants: &[GrantResult],
    ) -> Option<Decision<T>> {
        if request_code != PERMISSION_REQUEST_CODE {
            debug!("Ignoring grant result for request code {}", request_code);
            return None;
        }

        let action = self.pending.take()?;
        let granted = !grants.is_empty() && grants.iter().all(|g| *g == GrantResult::Granted);
        if granted {
            info!("Permissions granted");
            Some(Decision::Granted(action))
        } else {
            info!("Permissions denied");
            Some(Decision::Denied(action))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockHost;

    #[test]
    fn test_modern_platform_requires_scan_connect_and_location() {
        for level in [31, 33, 34] {
            let set = PermissionSet::for_version(PlatformVersion(level));
            assert_eq!(
                set.as_slice(),
                &[
                    Permission::BluetoothScan,
                    Permission::BluetoothConnect,
                    Permission::AccessFineLocation
                ]
            );
        }
    }

    #[test]
    fn test_legacy_platform_requires_location_only() {
        for level in [23, 29, 30] {
            let set = PermissionSet::for_version(PlatformVersion(level));
            assert_eq!(set.as_slice(), &[Permission::AccessFineLocation]);
        }
    }

    #[test]
    fn test_permission_identifiers() {
        assert_eq!(
            Permission::BluetoothScan.to_string(),
            "android.permission.BLUETOOTH_SCAN"
        );
        assert_eq!(
            Permission::AccessFineLocation.as_str(),
            "android.permission.ACCESS_FINE_LOCATION"
        );
    }

    #[test]
    fn test_ensure_ready_when_granted() {
        let host = MockHost::new();
        let mut gate = PermissionGate::new(PlatformVersion(33));

        assert!(matches!(gate.ensure(&host, "scan"), Ensure::Ready("scan")));
        assert!(!gate.has_pending());
        assert!(host.permission_requests().is_empty());
    }

    #[test]
    fn test_ensure_defers_and_requests() {
        let host = MockHost::new();
        host.set_granted(&[Permission::AccessFineLocation]);
        let mut gate = PermissionGate::new(PlatformVersion(33));

        assert!(matches!(gate.ensure(&host, "scan"), Ensure::Deferred));
        assert!(gate.has_pending());

        let requests = host.permission_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, PERMISSION_REQUEST_CODE);
        assert_eq!(requests[0].0.len(), 3);
    }

    #[test]
    fn test_grant_result_resolves_once() {
        let host = MockHost::new();
        host.set_granted(&[]);
        let mut gate = PermissionGate::new(PlatformVersion(30));
        gate.ensure(&host, 7);

        let decision =
            gate.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[GrantResult::Granted]);
        assert_eq!(decision, Some(Decision::Granted(7)));

        // One-shot: a duplicate callback resolves nothing.
        let again =
            gate.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[GrantResult::Granted]);
        assert_eq!(again, None);
    }

    #[test]
    fn test_partial_or_empty_grant_is_denial() {
        let host = MockHost::new();
        host.set_granted(&[]);
        let mut gate = PermissionGate::new(PlatformVersion(33));

        gate.ensure(&host, 1);
        let decision = gate.on_request_permissions_result(
            PERMISSION_REQUEST_CODE,
            &[GrantResult::Granted, GrantResult::Denied, GrantResult::Granted],
        );
        assert_eq!(decision, Some(Decision::Denied(1)));
        assert!(!gate.has_pending());

        gate.ensure(&host, 2);
        let decision = gate.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[]);
        assert_eq!(decision, Some(Decision::Denied(2)));
    }

    #[test]
    fn test_foreign_request_code_is_ignored() {
        let host = MockHost::new();
        host.set_granted(&[]);
        let mut gate = PermissionGate::new(PlatformVersion(33));
        gate.ensure(&host, "connect");

        assert_eq!(
            gate.on_request_permissions_result(42, &[GrantResult::Granted]),
            None
        );
        assert!(gate.has_pending());
    }

    #[test]
    fn test_last_caller_wins() {
        let host = MockHost::new();
        host.set_granted(&[]);
        let mut gate = PermissionGate::new(PlatformVersion(33));

        gate.ensure(&host, "first");
        gate.ensure(&host, "second");
        assert_eq!(host.permission_requests().len(), 2);

        let decision =
            gate.on_request_permissions_result(PERMISSION_REQUEST_CODE, &[GrantResult::Granted; 3]);
        assert_eq!(decision, Some(Decision::Granted("second")));
    }
}
