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

//! Control thread event processing.
//!
//! Everything that touches [`BluetoothHandler`] state is funneled through one
//! queue and processed in order on a dedicated thread: method calls, grant
//! results, discovery broadcasts, prompt choices and closures posted back by
//! connection workers.

use std::io;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bluetooth::{DiscoveryEvent, GrantResult};
use crate::channel::{MethodCall, MethodChannel, ReplyFn};
use crate::platform::{LocationChoice, SubscriptionId};

/// Name of the control thread.
pub const CONTROL_THREAD_NAME: &str = "bt-control";

/// Events processed on the control thread.
pub enum HostEvent {
    /// Method call from the caller.
    MethodCall { call: MethodCall, reply: ReplyFn },
    /// Platform answer to a permission request.
    PermissionsResult {
        request_code: i32,
        grants: Vec<GrantResult>,
    },
    /// Discovery broadcast for a subscription.
    Discovery {
        subscription: SubscriptionId,
        event: DiscoveryEvent,
    },
    /// User answered the location-required prompt.
    LocationChoice(LocationChoice),
    /// Closure to run on the control thread.
    RunOnControl(Box<dyn FnOnce() + Send>),
    /// Stop processing.
    Shutdown,
}

/// Create the control queue.
pub fn control_channel() -> (ControlHandle, mpsc::UnboundedReceiver<HostEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, rx)
}

/// Cloneable sender into the control queue.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ControlHandle {
    /// Queue an event. Returns `false` once the control thread has stopped.
    pub fn send(&self, event: HostEvent) -> bool {
        if self.tx.send(event).is_err() {
            warn!("Control thread is gone, dropping event");
            return false;
        }
        true
    }

    pub fn call(&self, call: MethodCall, reply: ReplyFn) -> bool {
        self.send(HostEvent::MethodCall { call, reply })
    }

    pub fn run_on_control(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.send(HostEvent::RunOnControl(Box::new(f)))
    }

    pub fn shutdown(&self) -> bool {
        self.send(HostEvent::Shutdown)
    }
}

/// Owns the method channel and drains the control queue.
pub struct EventProcessor {
    channel: MethodChannel,
    events: mpsc::UnboundedReceiver<HostEvent>,
}

impl EventProcessor {
    pub fn new(channel: MethodChannel, events: mpsc::UnboundedReceiver<HostEvent>) -> Self {
        Self { channel, events }
    }

    /// Process a single event. Returns `false` on shutdown.
    pub fn process_event(&mut self, event: HostEvent) -> bool {
        match event {
            HostEvent::MethodCall { call, reply } => {
                self.channel.handle(call, reply);
            }
            HostEvent::PermissionsResult {
                request_code,
                grants,
            } => {
                debug!("Grant result for request {}: {:?}", request_code, grants);
                self.channel
                    .handler_mut()
                    .on_request_permissions_result(request_code, &grants);
            }
            HostEvent::Discovery {
                subscription,
                event,
            } => {
                debug!("Discovery event for {}: {:?}", subscription, event);
                self.channel
                    .handler_mut()
                    .on_discovery_event(subscription, event);
            }
            HostEvent::LocationChoice(choice) => {
                info!("Location prompt answered: {:?}", choice);
                self.channel.handler_mut().on_location_choice(choice);
            }
            HostEvent::RunOnControl(f) => f(),
            HostEvent::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    /// Block the current thread draining events until shutdown or until every
    /// sender is dropped. Must not be called from within an async context.
    pub fn run(mut self) {
        info!("Control loop started");
        while let Some(event) = self.events.blocking_recv() {
            if !self.process_event(event) {
                break;
            }
        }
        info!("Control loop stopped");
    }

    /// Run the loop on a dedicated control thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(CONTROL_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }
}
