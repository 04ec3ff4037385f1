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

// Configuration module for the batch client
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
    let mut config = load_config(path)?;

    // Allow environment variables to override config values
    if let Ok(url) = std::env::var("REDUCTSTORE_URL") {
        config.server.url = url;
    }

    if let Ok(api_token) = std::env::var("REDUCT_API_TOKEN") {
        config.server.api_token = Some(api_token);
    }

    if let Ok(bucket) = std::env::var("REDUCT_BUCKET") {
        config.bucket = bucket;
    }

    ConfigLoader::validate(&config).context("Invalid configuration after environment overrides")?;

    Ok(config)
}
