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
//! Handles loading and saving client settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::hfp::constants::{at, timeouts, LocalFeatures};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hands-Free client behaviour.
    pub client: ClientConfig,

    /// RFCOMM settings.
    pub transport: TransportConfig,

    /// In-process audio gateway used for bench runs.
    pub simulator: SimulatorConfig,
}

/// Settings read by the protocol core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Features advertised in `AT+BRSF`.
    pub features: LocalFeatures,

    /// Offer and accept mSBC wide-band speech.
    pub msbc_enabled: bool,

    /// How long to wait for a terminal result.
    pub response_timeout_ms: u64,

    /// Quiet period after codec selection before queued commands resume.
    pub hold_timeout_ms: u64,

    /// Delay before retrying an open that collided with an inbound link.
    pub collision_timeout_ms: u64,

    /// Receive accumulator size in bytes.
    pub parser_capacity: usize,

    /// Concurrent audio gateway links.
    pub max_sessions: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            features: LocalFeatures::ECNR
                | LocalFeatures::THREE_WAY
                | LocalFeatures::CLI
                | LocalFeatures::VOICE_RECOGNITION
                | LocalFeatures::REMOTE_VOLUME
                | LocalFeatures::ENHANCED_CALL_STATUS
                | LocalFeatures::CODEC_NEGOTIATION,
            msbc_enabled: true,
            response_timeout_ms: timeouts::RESPONSE_MS,
            hold_timeout_ms: timeouts::HOLD_MS,
            collision_timeout_ms: timeouts::COLLISION_MS,
            parser_capacity: at::PARSER_CAPACITY,
            max_sessions: 2,
        }
    }
}

impl ClientConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn hold_timeout(&self) -> Duration {
        Duration::from_millis(self.hold_timeout_ms)
    }

    pub fn collision_timeout(&self) -> Duration {
        Duration::from_millis(self.collision_timeout_ms)
    }

    /// Clamp values the core cannot work with.
    pub fn validated(mut self) -> Self {
        if self.parser_capacity < at::MIN_PARSER_CAPACITY {
            warn!(
                "parser_capacity {} too small, using {}",
                self.parser_capacity,
                at::MIN_PARSER_CAPACITY
            );
            self.parser_capacity = at::MIN_PARSER_CAPACITY;
        }
        if self.max_sessions == 0 {
            warn!("max_sessions must be at least 1");
            self.max_sessions = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local RFCOMM channel for inbound audio gateway connections.
    pub server_channel: u8,

    /// Channel used when discovery does not report one.
    pub default_ag_channel: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_channel: 7,
            default_ag_channel: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// `+BRSF` value the simulated gateway reports.
    pub ag_features: u32,

    /// Profile version in the simulated service record.
    pub version: u16,

    /// Split responses into chunks of this many bytes; 0 sends them whole.
    pub chunk_size: usize,

    /// Synchronous link packet length reported on audio link-up.
    pub audio_packet_len: u16,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            ag_features: 0x3ef,
            version: 0x0107,
            chunk_size: 0,
            audio_packet_len: 60,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hfp-client")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path();
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        config.client = config.client.validated();
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
