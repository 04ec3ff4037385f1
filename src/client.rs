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

// Batch client
//
// Entry point tying a transport to a bucket: hands out accumulators for the
// configured protocol generation and opens query streams.

use crate::batch::{Batch, RecordBatch};
use crate::config::{BatchSettings, ClientConfig};
use crate::error::{BatchError, Result};
use crate::protocol::{BatchType, ProtocolVersion};
use crate::query::{QueryOptions, QueryStream, QueryTarget};
use crate::transport::{HttpTransport, Transport};
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct BatchClient {
    transport: Arc<dyn Transport>,
    bucket: String,
    protocol: ProtocolVersion,
    query_defaults: QueryOptions,
    limits: BatchSettings,
}

impl BatchClient {
    pub fn new(transport: Arc<dyn Transport>, bucket: impl Into<String>) -> Self {
        Self {
            transport,
            bucket: bucket.into(),
            protocol: ProtocolVersion::default(),
            query_defaults: QueryOptions::default(),
            limits: BatchSettings::default(),
        }
    }

    /// Build an HTTP client from configuration
    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.server)
            .with_context(|| format!("Failed to create transport for {}", config.server.url))?;
        info!(
            "Batch client for {} (bucket '{}', protocol {:?})",
            config.server.url, config.bucket, config.batch.protocol
        );

        Ok(Self {
            transport: Arc::new(transport),
            bucket: config.bucket.clone(),
            protocol: config.batch.protocol,
            query_defaults: config.query.to_options(),
            limits: config.batch.clone(),
        })
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_query_defaults(mut self, options: QueryOptions) -> Self {
        self.query_defaults = options;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn query_defaults(&self) -> &QueryOptions {
        &self.query_defaults
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    // v1 single-entry batches

    pub fn begin_write_batch(&self, entry: &str) -> Result<Batch> {
        self.entry_batch(entry, BatchType::Write)
    }

    pub fn begin_update_batch(&self, entry: &str) -> Result<Batch> {
        self.entry_batch(entry, BatchType::Update)
    }

    pub fn begin_remove_batch(&self, entry: &str) -> Result<Batch> {
        self.entry_batch(entry, BatchType::Remove)
    }

    fn entry_batch(&self, entry: &str, batch_type: BatchType) -> Result<Batch> {
        validate_entry_name(entry)?;
        Ok(Batch::new(
            self.bucket.as_str(),
            entry,
            batch_type,
            Arc::clone(&self.transport),
        ))
    }

    /// v2 batch spanning any number of entries
    pub fn begin_record_batch(&self, batch_type: BatchType) -> RecordBatch {
        RecordBatch::new(self.bucket.as_str(), batch_type, Arc::clone(&self.transport))
    }

    /// Whether a batch with these totals reached the configured thresholds
    pub fn should_flush(&self, size: u64, record_count: usize) -> bool {
        size >= self.limits.max_size_bytes || record_count >= self.limits.max_records
    }

    /// Read an existing query with the configured protocol. `entry` is
    /// required for v1 and ignored for v2.
    pub fn query(
        &self,
        entry: Option<&str>,
        query_id: u64,
        options: Option<QueryOptions>,
        cancel: CancellationToken,
    ) -> Result<QueryStream> {
        match self.protocol {
            ProtocolVersion::V1 => {
                let entry = entry.ok_or_else(|| {
                    BatchError::validation("protocol v1 queries need an entry name")
                })?;
                self.query_entry(entry, query_id, options, cancel)
            }
            ProtocolVersion::V2 => Ok(self.query_bucket(query_id, options, cancel)),
        }
    }

    /// v1: read batches of one entry
    pub fn query_entry(
        &self,
        entry: &str,
        query_id: u64,
        options: Option<QueryOptions>,
        cancel: CancellationToken,
    ) -> Result<QueryStream> {
        validate_entry_name(entry)?;
        let target = QueryTarget::Entry {
            bucket: self.bucket.clone(),
            entry: entry.to_string(),
        };
        Ok(self.spawn_query(target, query_id, options, cancel))
    }

    /// v2: read batches across the bucket
    pub fn query_bucket(
        &self,
        query_id: u64,
        options: Option<QueryOptions>,
        cancel: CancellationToken,
    ) -> QueryStream {
        let target = QueryTarget::Bucket {
            bucket: self.bucket.clone(),
        };
        self.spawn_query(target, query_id, options, cancel)
    }

    fn spawn_query(
        &self,
        target: QueryTarget,
        query_id: u64,
        options: Option<QueryOptions>,
        cancel: CancellationToken,
    ) -> QueryStream {
        let options = options.unwrap_or_else(|| self.query_defaults.clone());
        debug!(
            "Opening query {} over {} ({:?})",
            query_id,
            self.transport.transport_type(),
            target
        );
        QueryStream::spawn(Arc::clone(&self.transport), target, query_id, options, cancel)
    }
}

fn validate_entry_name(entry: &str) -> Result<()> {
    if entry.is_empty() {
        return Err(BatchError::validation("entry name cannot be empty"));
    }
    if entry.contains('/') {
        return Err(BatchError::validation(format!(
            "entry name '{}' cannot contain '/'",
            entry
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{empty_body, HttpRequest, HttpResponse};
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;

    struct NoContentTransport;

    #[async_trait]
    impl Transport for NoContentTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), empty_body()))
        }

        fn transport_type(&self) -> &str {
            "no-content"
        }
    }

    fn client() -> BatchClient {
        BatchClient::new(Arc::new(NoContentTransport), "bucket")
    }

    #[test]
    fn test_should_flush_thresholds() {
        let client = client();
        assert!(!client.should_flush(0, 0));
        assert!(client.should_flush(8 * 1024 * 1024, 1));
        assert!(client.should_flush(10, 80));
    }

    #[test]
    fn test_entry_batch_rejects_bad_names() {
        let client = client();
        assert!(matches!(client.begin_write_batch(""), Err(BatchError::Validation(_))));
        assert!(matches!(client.begin_remove_batch("a/b"), Err(BatchError::Validation(_))));
        let batch = client.begin_update_batch("entry-1").unwrap();
        assert_eq!(batch.batch_type(), BatchType::Update);
        assert_eq!(batch.entry(), "entry-1");
    }

    #[tokio::test]
    async fn test_v1_query_requires_entry() {
        let client = client().with_protocol(ProtocolVersion::V1);
        let result = client.query(None, 1, None, CancellationToken::new());
        assert!(matches!(result, Err(BatchError::Validation(_))));
    }

    #[tokio::test]
    async fn test_query_without_content_ends_quietly() {
        let client = client();
        let mut stream = client.query(None, 1, None, CancellationToken::new()).unwrap();
        assert!(stream.next_record().await.is_none());
    }
}
