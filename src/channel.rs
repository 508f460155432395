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

//! Method channel dispatch.
//!
//! Maps named method calls onto [`BluetoothHandler`] operations and turns
//! their callbacks into replies.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bluetooth::BluetoothHandler;
use crate::events::ControlHandle;

/// Name of the channel the bridge answers on.
pub const CHANNEL_NAME: &str = "bluetooth_channel";

pub const METHOD_CHECK_STATUS: &str = "checkBluetoothStatus";
pub const METHOD_SCAN: &str = "scanForDevices";
pub const METHOD_CONNECT: &str = "connectToDevice";

/// Incoming method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Correlation id echoed in the reply.
    #[serde(default)]
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: &str, arguments: Value) -> Self {
        Self {
            id: 0,
            method: method.to_string(),
            arguments,
        }
    }

    /// String argument `key`, if present and a string.
    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Reply to a method call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Success { result: Value },
    Error { code: String, message: String },
    NotImplemented,
}

impl Reply {
    pub fn success(result: Value) -> Self {
        Reply::Success { result }
    }
}

/// Errors signalled to the caller as error replies.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MethodError {
    #[error("Address cannot be null")]
    InvalidArgument,
    #[error("Unable to connect")]
    ConnectFailed,
}

impl MethodError {
    pub fn code(&self) -> &'static str {
        match self {
            MethodError::InvalidArgument => "INVALID_ARGUMENT",
            MethodError::ConnectFailed => "CONNECT_FAILED",
        }
    }
}

impl From<MethodError> for Reply {
    fn from(e: MethodError) -> Self {
        Reply::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Sink for a single reply.
pub type ReplyFn = Box<dyn FnOnce(Reply) + Send>;

/// Dispatches method calls to the handler. Lives on the control thread.
pub struct MethodChannel {
    handler: BluetoothHandler,
    control: ControlHandle,
}

impl MethodChannel {
    pub fn new(handler: BluetoothHandler, control: ControlHandle) -> Self {
        Self { handler, control }
    }

    pub fn handler(&self) -> &BluetoothHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut BluetoothHandler {
        &mut self.handler
    }

    /// Handle one call. `reply` is invoked exactly once, possibly later.
    pub fn handle(&mut self, call: MethodCall, reply: ReplyFn) {
        debug!("Method call {}: {}", call.id, call.method);

        match call.method.as_str() {
            METHOD_CHECK_STATUS => {
                reply(Reply::success(json!(self.handler.check_status())));
            }
            METHOD_SCAN => {
                self.handler
                    .scan_for_devices(Box::new(move |devices| reply(Reply::success(json!(devices)))));
            }
            METHOD_CONNECT => {
                let Some(address) = call.argument_str("address") else {
                    reply(Reply::from(MethodError::InvalidArgument));
                    return;
                };

                let control = self.control.clone();
                self.handler.connect_to_device(
                    address.to_string(),
                    Box::new(move |connected| {
                        // Replies always leave from the control thread.
                        control.run_on_control(move || {
                            if connected {
                                reply(Reply::success(json!(true)));
                            } else {
                                reply(Reply::from(MethodError::ConnectFailed));
                            }
                        });
                    }),
                );
            }
            other => {
                warn!("Method not implemented: {}", other);
                reply(Reply::NotImplemented);
            }
        }
    }
}
