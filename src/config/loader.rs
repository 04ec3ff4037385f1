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

// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;
        Self::parse(&content)
    }

    /// Parse YAML text, substituting and validating as `load` does
    pub fn parse(content: &str) -> Result<ClientConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: ClientConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${REDUCT_BUCKET:-telemetry} -> telemetry (if REDUCT_BUCKET not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        let output = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });
        Ok(output.to_string())
    }

    /// Validate configuration
    pub fn validate(config: &ClientConfig) -> Result<()> {
        if config.server.url.trim().is_empty() {
            bail!("server.url cannot be empty");
        }

        if config.server.timeout_seconds == 0 {
            bail!("server.timeout_seconds must be > 0");
        }

        if config.bucket.trim().is_empty() {
            bail!("bucket cannot be empty");
        }

        if config.batch.max_records == 0 {
            bail!("batch.max_records must be > 0");
        }

        if config.query.queue_capacity == 0 {
            bail!("query.queue_capacity must be > 0");
        }

        if config.query.poll_interval_ms == 0 {
            bail!("query.poll_interval_ms must be > 0");
        }

        match config.logging.format.to_lowercase().as_str() {
            "text" | "json" => {}
            unknown => bail!("Unknown logging.format: '{}'. Supported: text, json", unknown),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("REDUCT_BATCH_TEST_VAR", "test_value");

        let input = "url: ${REDUCT_BATCH_TEST_VAR}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "url: test_value");

        std::env::remove_var("REDUCT_BATCH_TEST_VAR");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("REDUCT_BATCH_TEST_VAR2");

        let input = "bucket: ${REDUCT_BATCH_TEST_VAR2:-telemetry}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "bucket: telemetry");
    }

    #[test]
    fn test_unset_var_without_default_is_kept() {
        std::env::remove_var("REDUCT_BATCH_TEST_VAR3");

        let output = ConfigLoader::substitute_env_vars("token: ${REDUCT_BATCH_TEST_VAR3}").unwrap();
        assert_eq!(output, "token: ${REDUCT_BATCH_TEST_VAR3}");
    }

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let config = ConfigLoader::parse("bucket: robots\n").unwrap();
        assert_eq!(config.bucket, "robots");
        assert_eq!(config.server.url, "http://localhost:8383");
        assert_eq!(config.batch.protocol, ProtocolVersion::V2);
        assert_eq!(config.query.queue_capacity, 100);
    }

    #[test]
    fn test_parse_protocol_v1() {
        let config = ConfigLoader::parse("batch:\n  protocol: v1\n").unwrap();
        assert_eq!(config.batch.protocol, ProtocolVersion::V1);
    }

    #[test]
    fn test_validation_empty_bucket() {
        let mut config = ClientConfig::default();
        config.bucket = String::new();

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("bucket"));
    }

    #[test]
    fn test_validation_zero_queue_capacity() {
        let mut config = ClientConfig::default();
        config.query.queue_capacity = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_validation_zero_poll_interval() {
        let mut config = ClientConfig::default();
        config.query.poll_interval_ms = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_validation_logging_format() {
        let mut config = ClientConfig::default();
        config.logging.format = "json".to_string();
        assert!(ConfigLoader::validate(&config).is_ok());

        config.logging.format = "xml".to_string();
        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("logging.format"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigLoader::validate(&ClientConfig::default()).is_ok());
    }
}
