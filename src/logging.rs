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

// Tracing setup for applications embedding the client

use crate::config::LoggingConfig;
use anyhow::{anyhow, bail, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Map a configured level name, falling back to `info`
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global fmt subscriber in the configured format (`text` or
/// `json`). `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(&config.level).to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "text" => builder.try_init(),
        other => bail!("Unknown log format '{}'. Supported: text, json", other),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
