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

//! Configuration module.
//!
//! Handles loading and saving bridge settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::{PlatformVersion, MODERN_PERMISSIONS_API_LEVEL};

const APP_DIR: &str = "bluetooth-bridge";

/// Bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Platform settings.
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// BlueZ adapter name (e.g. "hci0"). The default adapter when unset.
    pub adapter: Option<String>,

    /// How long a discovery runs before it reports completion.
    pub discovery_duration_secs: u64,

    /// Upper bound on a single connection attempt.
    pub connect_timeout_secs: u64,

    /// Connection attempts allowed to run at once.
    pub max_concurrent_connects: usize,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            discovery_duration_secs: 12,
            connect_timeout_secs: 30,
            max_concurrent_connects: 4,
        }
    }
}

impl BluetoothConfig {
    pub fn discovery_duration(&self) -> Duration {
        Duration::from_secs(self.discovery_duration_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn max_concurrent_connects(&self) -> usize {
        self.max_concurrent_connects.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// API level used to pick the required permission set.
    pub api_level: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_level: MODERN_PERMISSIONS_API_LEVEL,
        }
    }
}

impl PlatformConfig {
    pub fn version(&self) -> PlatformVersion {
        PlatformVersion(self.api_level)
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from the default location or create it.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
