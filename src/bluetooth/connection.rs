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

//! RFCOMM connection attempts.
//!
//! Every attempt is one task on the tokio runtime. The blocking handshake runs
//! on the blocking pool while holding a semaphore permit, so the number of
//! threads stuck in a handshake is bounded. The caller-visible result is
//! bounded by a timeout.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::platform::{BluetoothAdapter, RemoteDevice};

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Callback receiving the outcome of a connection attempt.
pub type ConnectCallback = Box<dyn FnOnce(bool) + Send>;

/// Spawns bounded, time-limited connection attempts.
pub struct Connector {
    runtime: Handle,
    permits: Arc<Semaphore>,
    timeout: Duration,
    spawned: Arc<AtomicUsize>,
}

impl Connector {
    pub fn new(runtime: Handle, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of attempts spawned so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Spawn an attempt. `on_complete` runs on a runtime worker thread.
    pub fn spawn(
        &self,
        adapter: Arc<dyn BluetoothAdapter>,
        device: Box<dyn RemoteDevice>,
        on_complete: ConnectCallback,
    ) {
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let permits = self.permits.clone();
        let timeout = self.timeout;
        self.runtime.spawn(async move {
            let connected = attempt(permits, timeout, adapter, device).await;
            on_complete(connected);
        });
    }
}

async fn attempt(
    permits: Arc<Semaphore>,
    timeout: Duration,
    adapter: Arc<dyn BluetoothAdapter>,
    device: Box<dyn RemoteDevice>,
) -> bool {
    let address = device.address().to_string();

    // Waiting for a permit counts against the timeout too.
    let target = address.clone();
    let handshake = async move {
        let permit = permits.acquire_owned().await.map_err(io::Error::other)?;

        debug!("Connecting to {}", target);
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            // Held until the handshake really returns, even past the timeout.
            let _permit = permit;
            let mut socket = device.create_rfcomm_socket(SPP_UUID)?;
            adapter.cancel_discovery();
            socket.connect()
        })
        .await
        .map_err(io::Error::other)?
    };

    match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(())) => {
            info!("Connected to {}", address);
            true
        }
        Ok(Err(e)) => {
            warn!("Connection to {} failed: {}", address, e);
            false
        }
        Err(_) => {
            warn!("Connection to {} timed out after {:?}", address, timeout);
            false
        }
    }
}
