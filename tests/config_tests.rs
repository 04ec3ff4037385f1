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

use reduct_batch::config::{load_config, load_config_with_env};
use reduct_batch::protocol::ProtocolVersion;
use reduct_batch::{BatchClient, Transport};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
server:
  url: http://reduct.local:8383
  api_token: secret
  timeout_seconds: 30
bucket: telemetry
batch:
  protocol: v1
  max_records: 20
  max_size_bytes: 1024
query:
  poll_interval_ms: 250
  queue_capacity: 16
  continuous: true
logging:
  level: debug
"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.server.url, "http://reduct.local:8383");
    assert_eq!(config.server.api_token.as_deref(), Some("secret"));
    assert_eq!(config.server.timeout_seconds, 30);
    assert_eq!(config.bucket, "telemetry");
    assert_eq!(config.batch.protocol, ProtocolVersion::V1);
    assert_eq!(config.logging.level, "debug");

    let options = config.query.to_options();
    assert!(options.continuous);
    assert!(!options.head);
    assert_eq!(options.poll_interval, Duration::from_millis(250));
    assert_eq!(options.queue_capacity, 16);
}

#[test]
fn test_invalid_config_is_rejected() {
    let file = write_config("server:\n  timeout_seconds: 0\n");
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("timeout_seconds"));
}

#[test]
fn test_unknown_protocol_is_rejected() {
    let file = write_config("batch:\n  protocol: v3\n");
    assert!(load_config(file.path()).is_err());
}

#[test]
fn test_missing_file() {
    assert!(load_config("/nonexistent/reduct-batch.yaml").is_err());
}

#[test]
fn test_env_substitution_and_overrides() {
    std::env::set_var("REDUCT_BATCH_CFG_TEST_BUCKET", "from-file-env");
    std::env::set_var("REDUCT_API_TOKEN", "override-token");
    let file = write_config(
        "bucket: ${REDUCT_BATCH_CFG_TEST_BUCKET}\nserver:\n  url: ${REDUCT_BATCH_CFG_TEST_URL:-http://fallback:8383}\n",
    );

    let config = load_config_with_env(file.path()).unwrap();
    if std::env::var("REDUCTSTORE_URL").is_err() {
        assert_eq!(config.server.url, "http://fallback:8383");
    }
    assert_eq!(config.server.api_token.as_deref(), Some("override-token"));

    std::env::remove_var("REDUCT_BATCH_CFG_TEST_BUCKET");
    std::env::remove_var("REDUCT_API_TOKEN");

    // REDUCT_BUCKET may be set by the environment running the tests
    if std::env::var("REDUCT_BUCKET").is_err() {
        assert_eq!(config.bucket, "from-file-env");
    }
}

#[tokio::test]
async fn test_client_from_config() {
    let file = write_config("bucket: robots\nbatch:\n  max_records: 2\n");
    let config = load_config(file.path()).unwrap();
    let client = BatchClient::from_config(&config).unwrap();

    assert_eq!(client.bucket(), "robots");
    assert_eq!(client.protocol(), ProtocolVersion::V2);
    assert!(client.should_flush(0, 2));
    assert!(!client.should_flush(0, 1));
    assert_eq!(client.transport().transport_type(), "http");
}
