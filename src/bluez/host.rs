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

//! Desktop host services.
//!
//! A Linux desktop has no runtime Bluetooth permissions and no location
//! precondition for classic discovery.

use tracing::{info, warn};

use crate::bluetooth::{GrantResult, Permission};
use crate::events::{ControlHandle, HostEvent};
use crate::platform::{LocationChoice, LocationProvider, LocationServices, PermissionHost, UserPrompt};

pub struct DesktopHost {
    control: ControlHandle,
}

impl DesktopHost {
    pub fn new(control: ControlHandle) -> Self {
        Self { control }
    }
}

impl PermissionHost for DesktopHost {
    fn is_granted(&self, _permission: Permission) -> bool {
        true
    }

    fn request_permissions(&self, permissions: &[Permission], request_code: i32) {
        info!("Granting {} permissions on desktop", permissions.len());
        self.control.send(HostEvent::PermissionsResult {
            request_code,
            grants: vec![GrantResult::Granted; permissions.len()],
        });
    }
}

impl LocationServices for DesktopHost {
    fn is_provider_enabled(&self, _provider: LocationProvider) -> bool {
        true
    }
}

impl UserPrompt for DesktopHost {
    fn show_location_required(&self) {
        warn!("Location services required but no prompt is available");
        self.control
            .send(HostEvent::LocationChoice(LocationChoice::Cancel));
    }

    fn open_location_settings(&self) {
        info!("No location settings to open on desktop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::PERMISSION_REQUEST_CODE;
    use crate::events::control_channel;

    #[test]
    fn test_request_is_answered_with_grants() {
        let (control, mut events) = control_channel();
        let host = DesktopHost::new(control);

        host.request_permissions(
            &[Permission::BluetoothScan, Permission::AccessFineLocation],
            PERMISSION_REQUEST_CODE,
        );
        match events.try_recv() {
            Ok(HostEvent::PermissionsResult {
                request_code,
                grants,
            }) => {
                assert_eq!(request_code, PERMISSION_REQUEST_CODE);
                assert_eq!(grants, vec![GrantResult::Granted; 2]);
            }
            _ => panic!("expected grant result"),
        }
    }

    #[test]
    fn test_prompt_cancels() {
        let (control, mut events) = control_channel();
        DesktopHost::new(control).show_location_required();

        assert!(matches!(
            events.try_recv(),
            Ok(HostEvent::LocationChoice(LocationChoice::Cancel))
        ));
    }
}
