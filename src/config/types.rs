// Copyright 2025 coScene
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

// Configuration types for the batch client

use crate::protocol::ProtocolVersion;
use crate::query::{QueryOptions, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub query: QuerySettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            bucket: default_bucket(),
            batch: BatchSettings::default(),
            query: QuerySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// ReductStore server connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_token: None,
            timeout_seconds: default_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

/// Batch protocol and advisory flush thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSettings {
    #[serde(default)]
    pub protocol: ProtocolVersion,

    #[serde(default = "default_max_records")]
    pub max_records: usize,

    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::default(),
            max_records: default_max_records(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuerySettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub head: bool,

    #[serde(default)]
    pub continuous: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            head: false,
            continuous: false,
        }
    }
}

impl QuerySettings {
    pub fn to_options(&self) -> QueryOptions {
        QueryOptions {
            continuous: self.continuous,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            head: self.head,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,  // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String,  // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_url() -> String { "http://localhost:8383".to_string() }
fn default_bucket() -> String { "default".to_string() }
fn default_timeout() -> u64 { 300 }
fn default_pool_max_idle() -> usize { 10 }
fn default_max_records() -> usize { 80 }
fn default_max_size_bytes() -> u64 { 8 * 1024 * 1024 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_queue_capacity() -> usize { DEFAULT_QUEUE_CAPACITY }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
