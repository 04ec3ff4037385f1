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

// Batch accumulators
//
// Records are collected from any number of call sites and sent in one
// request. All state of an accumulator sits behind one mutex; `send`
// snapshots the records under the lock and releases it before any I/O.

use crate::error::{BatchError, Result};
use crate::protocol::errors::{self, ErrorMap, RecordBatchErrorMap};
use crate::protocol::request::{self, PendingRecord};
use crate::protocol::BatchType;
use crate::record::Labels;
use crate::transport::{error_for_status, Transport};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Records keyed by `K`, with running totals
struct Pending<K: Ord> {
    records: BTreeMap<K, PendingRecord>,
    total_size: u64,
    last_access: Option<DateTime<Utc>>,
}

impl<K: Ord> Pending<K> {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            total_size: 0,
            last_access: None,
        }
    }

    fn insert(&mut self, key: K, record: PendingRecord) {
        self.total_size += record.data.len() as u64;
        if let Some(replaced) = self.records.insert(key, record) {
            self.total_size -= replaced.data.len() as u64;
        }
        self.last_access = Some(Utc::now());
    }

    fn snapshot(&self) -> Vec<PendingRecord> {
        self.records.values().cloned().collect()
    }

    fn clear(&mut self) {
        self.records.clear();
        self.total_size = 0;
        self.last_access = None;
    }
}

/// Single-entry batch sent with protocol v1
pub struct Batch {
    bucket: String,
    entry: String,
    batch_type: BatchType,
    transport: Arc<dyn Transport>,
    state: Mutex<Pending<i64>>,
}

impl Batch {
    pub fn new(
        bucket: impl Into<String>,
        entry: impl Into<String>,
        batch_type: BatchType,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            entry: entry.into(),
            batch_type,
            transport,
            state: Mutex::new(Pending::new()),
        }
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Add a record. A record with the same timestamp is replaced.
    pub fn add(&self, timestamp: i64, data: impl Into<Bytes>, content_type: &str, labels: Labels) {
        let record = PendingRecord::new(self.entry.as_str(), timestamp, data, content_type, labels);
        self.state.lock().insert(timestamp, record);
    }

    /// Add a record carrying only labels (update batches)
    pub fn add_only_labels(&self, timestamp: i64, labels: Labels) {
        self.add(timestamp, Bytes::new(), "", labels);
    }

    /// Add a bare timestamp (remove batches)
    pub fn add_only_timestamp(&self, timestamp: i64) {
        self.add(timestamp, Bytes::new(), "", Labels::new());
    }

    /// Send the batch. Failed records come back in the error map; the
    /// batch is left untouched so it can be inspected or cleared.
    pub async fn send(&self) -> Result<ErrorMap> {
        let records = self.state.lock().snapshot();
        let encoded = request::build_v1(&self.bucket, &self.entry, self.batch_type, &records)?;

        debug!(
            "Sending v1 {} batch of {} records to '{}/{}'",
            self.batch_type.as_str(),
            records.len(),
            self.bucket,
            self.entry
        );
        let response = error_for_status(self.transport.send(encoded.request).await?)?;
        let errors = errors::collect_v1(&response.headers);
        if !errors.is_empty() {
            info!(
                "{} of {} records failed in v1 batch to '{}'",
                errors.len(),
                records.len(),
                self.entry
            );
        }
        Ok(errors)
    }

    /// Total payload size in bytes
    pub fn size(&self) -> u64 {
        self.state.lock().total_size
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn last_access(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_access
    }

    pub fn clear(&self) {
        self.state.lock().clear();
    }
}

/// Multi-entry batch sent with protocol v2
pub struct RecordBatch {
    bucket: String,
    batch_type: BatchType,
    transport: Arc<dyn Transport>,
    state: Mutex<Pending<(String, i64)>>,
}

impl RecordBatch {
    pub fn new(bucket: impl Into<String>, batch_type: BatchType, transport: Arc<dyn Transport>) -> Self {
        Self {
            bucket: bucket.into(),
            batch_type,
            transport,
            state: Mutex::new(Pending::new()),
        }
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    /// Add a record to `entry`. A record with the same entry and timestamp
    /// is replaced.
    pub fn add(
        &self,
        entry: &str,
        timestamp: i64,
        data: impl Into<Bytes>,
        content_type: &str,
        labels: Labels,
    ) -> Result<()> {
        if entry.is_empty() {
            return Err(BatchError::validation("entry name must not be empty"));
        }
        let record = PendingRecord::new(entry, timestamp, data, content_type, labels);
        self.state.lock().insert((entry.to_string(), timestamp), record);
        Ok(())
    }

    pub fn add_only_labels(&self, entry: &str, timestamp: i64, labels: Labels) -> Result<()> {
        self.add(entry, timestamp, Bytes::new(), "", labels)
    }

    pub fn add_only_timestamp(&self, entry: &str, timestamp: i64) -> Result<()> {
        self.add(entry, timestamp, Bytes::new(), "", Labels::new())
    }

    pub async fn send(&self) -> Result<RecordBatchErrorMap> {
        let records = self.state.lock().snapshot();
        let encoded = request::build_v2(&self.bucket, self.batch_type, &records)?;

        debug!(
            "Sending v2 {} batch of {} records across {} entries to '{}'",
            self.batch_type.as_str(),
            records.len(),
            encoded.entries.len(),
            self.bucket
        );
        let response = error_for_status(self.transport.send(encoded.request).await?)?;
        let errors = errors::collect_v2(&response.headers, &encoded.entries, encoded.start_ts)?;
        if !errors.is_empty() {
            info!(
                "Records failed in {} entries of v2 batch to '{}'",
                errors.len(),
                self.bucket
            );
        }
        Ok(errors)
    }

    pub fn size(&self) -> u64 {
        self.state.lock().total_size
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn last_access(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_access
    }

    pub fn clear(&self) {
        self.state.lock().clear();
    }
}
