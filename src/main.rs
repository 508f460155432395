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

//! Bluetooth Bridge
//!
//! Reads method calls as JSON lines on stdin and writes replies as JSON lines
//! on stdout. Logs go to stderr.

use anyhow::Result;
use serde::Serialize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluetooth_bridge::bluetooth::{BluetoothHandler, Connector};
use bluetooth_bridge::bluez;
use bluetooth_bridge::channel::{MethodCall, MethodChannel, Reply, CHANNEL_NAME};
use bluetooth_bridge::config::Config;
use bluetooth_bridge::events::{control_channel, ControlHandle, EventProcessor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bluetooth_bridge=info".parse()?),
        )
        .init();

    info!(
        "Starting Bluetooth bridge v{}...",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let (control, events) = control_channel();
    let runtime = Handle::current();

    let platform = bluez::platform(&config, runtime.clone(), control.clone()).await;
    let connector = Connector::new(
        runtime,
        config.bluetooth.max_concurrent_connects(),
        config.bluetooth.connect_timeout(),
    );
    let handler = BluetoothHandler::new(platform, connector);
    let channel = MethodChannel::new(handler, control.clone());
    let control_thread = EventProcessor::new(channel, events).spawn()?;

    info!("Ready. Listening on channel '{}'", CHANNEL_NAME);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => dispatch_line(&control, &line),
                None => {
                    info!("Input closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    control.shutdown();
    if control_thread.join().is_err() {
        error!("Control thread panicked");
    }

    info!("Bluetooth bridge stopped");
    Ok(())
}

/// Parse one request line and queue it on the control thread.
fn dispatch_line(control: &ControlHandle, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let call: MethodCall = match serde_json::from_str(line) {
        Ok(call) => call,
        Err(e) => {
            warn!("Ignoring malformed method call: {}", e);
            return;
        }
    };

    let id = call.id;
    control.call(call, Box::new(move |reply| write_reply(id, reply)));
}

#[derive(Serialize)]
struct Envelope {
    id: u64,
    #[serde(flatten)]
    reply: Reply,
}

fn write_reply(id: u64, reply: Reply) {
    let json = match serde_json::to_string(&Envelope { id, reply }) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to encode reply {}: {}", id, e);
            return;
        }
    };

    let mut out = std::io::stdout().lock();
    if let Err(e) = writeln!(out, "{}", json).and_then(|_| out.flush()) {
        error!("Failed to write reply {}: {}", id, e);
    }
}
