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

// Decoding of batch responses
//
// Record boundaries are declared only in headers; the payloads of all
// records arrive back to back in one body. Decoding runs in two steps:
// `BatchDescriptor` resolves every record's metadata from the headers (so a
// malformed header fails the response before anything is emitted), then
// `BatchDemuxer` cuts the body into per-record payloads.

use super::labels::{self, LabelDictionary};
use super::{
    header_list, header_str, is_last_response, parse_entry_delta, value_str, ENTRIES_HEADER,
    ERROR_HEADER_PREFIX, HEADER_PREFIX, LABELS_HEADER, LAST_HEADER, QUERY_ID_HEADER,
    START_TS_HEADER, TIME_HEADER_PREFIX,
};
use crate::error::{BatchError, Result};
use crate::record::{Labels, Payload, Record, DEFAULT_CONTENT_TYPE};
use crate::transport::BodyStream;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Metadata of one record, resolved from the response headers
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDescriptor {
    pub entry: String,
    pub timestamp: i64,
    pub size: u64,
    pub content_type: String,
    pub labels: Labels,
    pub is_last_in_batch: bool,
    pub is_last_in_query: bool,
}

impl RecordDescriptor {
    fn into_record(self, payload: Payload) -> Record {
        Record {
            entry: self.entry,
            timestamp: self.timestamp,
            size: self.size,
            content_type: self.content_type,
            labels: self.labels,
            is_last_in_batch: self.is_last_in_batch,
            is_last_in_query: self.is_last_in_query,
            payload,
        }
    }
}

/// Ordered record descriptors of one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDescriptor {
    records: Vec<RecordDescriptor>,
}

/// Last known metadata of an entry, inherited by its next record
#[derive(Debug, Clone)]
struct EntryState {
    content_type: String,
    labels: Labels,
}

impl BatchDescriptor {
    /// Parse v1 `x-reduct-time-<ts>` headers of a single-entry response.
    pub fn parse_v1(entry: &str, headers: &HeaderMap) -> Result<Self> {
        let mut rows = Vec::new();
        for (name, value) in headers.iter() {
            let Some(raw_ts) = name.as_str().strip_prefix(TIME_HEADER_PREFIX) else {
                continue;
            };
            let timestamp: i64 = raw_ts
                .parse()
                .map_err(|_| BatchError::protocol(format!("invalid timestamp {}", raw_ts)))?;
            let value = value_str(value).map_err(|_| {
                BatchError::protocol(format!("header '{}' is not valid UTF-8", name))
            })?;
            rows.push((timestamp, value));
        }

        if rows.is_empty() {
            return Err(BatchError::protocol("no records found"));
        }
        rows.sort_by_key(|(ts, _)| *ts);

        let last_in_query = is_last_response(headers);
        let total = rows.len();
        let mut records = Vec::with_capacity(total);
        for (i, (timestamp, value)) in rows.into_iter().enumerate() {
            let row = labels::parse_csv_row(value)?;
            let content_type = if row.content_type.is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                row.content_type
            };
            let is_last_in_batch = i == total - 1;
            records.push(RecordDescriptor {
                entry: entry.to_string(),
                timestamp,
                size: row.size,
                content_type,
                labels: row.labels,
                is_last_in_batch,
                is_last_in_query: last_in_query && is_last_in_batch,
            });
        }

        Ok(Self { records })
    }

    /// Parse v2 `x-reduct-<entry>-<delta>` headers of a multi-entry response.
    ///
    /// A response without record headers is a valid empty batch.
    pub fn parse_v2(headers: &HeaderMap) -> Result<Self> {
        let entries_raw = header_str(headers, ENTRIES_HEADER).ok_or_else(|| {
            BatchError::protocol(format!("{} header is required", ENTRIES_HEADER))
        })?;
        let start_raw = header_str(headers, START_TS_HEADER).ok_or_else(|| {
            BatchError::protocol(format!("{} header is required", START_TS_HEADER))
        })?;

        let entries = header_list::decode(entries_raw)?;
        let start_ts: i64 = start_raw.trim().parse().map_err(|_| {
            BatchError::protocol(format!("invalid {} header '{}'", START_TS_HEADER, start_raw))
        })?;
        let dictionary = match header_str(headers, LABELS_HEADER) {
            Some(raw) => LabelDictionary::from_names(header_list::decode(raw)?),
            None => LabelDictionary::new(),
        };
        let dictionary = (!dictionary.is_empty()).then_some(dictionary);

        let mut keyed = Vec::new();
        for (name, value) in headers.iter() {
            let Some((entry_index, delta)) = record_header_key(name.as_str())? else {
                continue;
            };
            if entry_index >= entries.len() {
                return Err(BatchError::protocol(format!(
                    "invalid header '{}{}-{}': entry index out of range",
                    HEADER_PREFIX, entry_index, delta
                )));
            }
            let value = value_str(value).map_err(|_| {
                BatchError::protocol(format!("header '{}' is not valid UTF-8", name))
            })?;
            keyed.push((entry_index, delta, value));
        }
        keyed.sort_by_key(|(entry_index, delta, _)| (*entry_index, *delta));

        let last_in_query = is_last_response(headers);
        let total = keyed.len();
        let mut states: HashMap<usize, EntryState> = HashMap::new();
        let mut records = Vec::with_capacity(total);

        for (i, (entry_index, delta, raw)) in keyed.into_iter().enumerate() {
            let (size, state) =
                resolve_v2_value(raw, states.get(&entry_index), dictionary.as_ref())?;
            let timestamp = start_ts.checked_add(delta).ok_or_else(|| {
                BatchError::protocol(format!("timestamp overflow for delta {}", delta))
            })?;
            let is_last_in_batch = i == total - 1;

            records.push(RecordDescriptor {
                entry: entries[entry_index].clone(),
                timestamp,
                size,
                content_type: state.content_type.clone(),
                labels: state.labels.clone(),
                is_last_in_batch,
                is_last_in_query: last_in_query && is_last_in_batch,
            });
            states.insert(entry_index, state);
        }

        debug!(
            "Decoded v2 batch: {} records across {} entries",
            records.len(),
            entries.len()
        );
        Ok(Self { records })
    }

    pub fn records(&self) -> &[RecordDescriptor] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of the declared content lengths; must equal the body length
    pub fn total_size(&self) -> u64 {
        self.records.iter().map(|r| r.size).sum()
    }
}

/// `Some((entry_index, delta))` for a v2 record header, `None` for headers
/// that are not record descriptors.
fn record_header_key(name: &str) -> Result<Option<(usize, i64)>> {
    let Some(suffix) = name.strip_prefix(HEADER_PREFIX) else {
        return Ok(None);
    };
    if matches!(
        name,
        ENTRIES_HEADER | START_TS_HEADER | LABELS_HEADER | LAST_HEADER | QUERY_ID_HEADER
    ) || name.starts_with(ERROR_HEADER_PREFIX)
    {
        return Ok(None);
    }
    // Other x-reduct-* headers (api version, ...) are not descriptors
    if !suffix.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(None);
    }
    parse_entry_delta(suffix)
        .map(Some)
        .ok_or_else(|| BatchError::protocol(format!("invalid record header '{}'", name)))
}

/// Resolve `contentLength[,contentType[,labelOps]]` against the previous
/// state of the same entry.
fn resolve_v2_value(
    raw: &str,
    previous: Option<&EntryState>,
    dictionary: Option<&LabelDictionary>,
) -> Result<(u64, EntryState)> {
    let (length_raw, rest) = match raw.split_once(',') {
        Some((length, rest)) => (length, Some(rest)),
        None => (raw, None),
    };
    let size: u64 = length_raw
        .trim()
        .parse()
        .map_err(|_| BatchError::protocol(format!("invalid content length '{}'", length_raw)))?;

    let Some(rest) = rest else {
        let previous = previous.ok_or_else(|| {
            BatchError::validation(
                "content-type and labels must be provided for the first record of an entry",
            )
        })?;
        return Ok((size, previous.clone()));
    };

    let (content_type_raw, labels_raw) = match rest.split_once(',') {
        Some((ct, labels)) => (ct, Some(labels)),
        None => (rest, None),
    };

    let content_type = match content_type_raw.trim() {
        "" => previous
            .map(|p| p.content_type.clone())
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        ct => ct.to_string(),
    };

    let base = previous.map(|p| p.labels.clone()).unwrap_or_default();
    let labels = match labels_raw {
        Some(raw_labels) => labels::apply_delta(raw_labels, &base, dictionary)?,
        None => base,
    };

    Ok((
        size,
        EntryState {
            content_type,
            labels,
        },
    ))
}

/// Cuts a response body into per-record payloads.
///
/// Every record but the last is read fully into memory. The last record
/// gets a payload that drains the pending bytes and then streams straight
/// from the response, so it is never buffered here.
pub struct BatchDemuxer {
    descriptors: VecDeque<RecordDescriptor>,
    body: Option<BodyStream>,
    pending: BytesMut,
    head: bool,
    finished: bool,
}

impl BatchDemuxer {
    /// `head`: metadata-only response, every payload is empty
    pub fn new(descriptor: BatchDescriptor, body: BodyStream, head: bool) -> Self {
        Self {
            descriptors: descriptor.records.into(),
            body: Some(body),
            pending: BytesMut::new(),
            head,
            finished: false,
        }
    }

    /// Records not yet emitted
    pub fn remaining(&self) -> usize {
        if self.finished {
            0
        } else {
            self.descriptors.len()
        }
    }

    /// Next record in order, `None` after the last one of the batch or
    /// after a record flagged last-in-query.
    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        if self.finished {
            return Ok(None);
        }
        let Some(descriptor) = self.descriptors.pop_front() else {
            self.finish();
            return Ok(None);
        };

        let payload = if self.head {
            Payload::empty()
        } else if descriptor.is_last_in_batch {
            let pending = std::mem::take(&mut self.pending).freeze();
            let body = self
                .body
                .take()
                .ok_or_else(|| BatchError::protocol("response body already consumed"))?;
            Payload::streaming(pending, body, descriptor.size)
        } else {
            match self.read_exact(descriptor.size).await {
                Ok(bytes) => Payload::from_bytes(bytes),
                Err(err) => {
                    self.finish();
                    return Err(err);
                }
            }
        };

        if descriptor.is_last_in_query || descriptor.is_last_in_batch {
            self.finish();
        }
        Ok(Some(descriptor.into_record(payload)))
    }

    async fn read_exact(&mut self, size: u64) -> Result<bytes::Bytes> {
        let size = usize::try_from(size)
            .map_err(|_| BatchError::protocol(format!("record size {} is too large", size)))?;

        while self.pending.len() < size {
            let body = self
                .body
                .as_mut()
                .ok_or_else(|| BatchError::protocol("response body already consumed"))?;
            match body.next().await {
                Some(chunk) => self.pending.extend_from_slice(&chunk?),
                None => {
                    return Err(BatchError::protocol(format!(
                        "response body ended after {} of {} bytes of a record",
                        self.pending.len(),
                        size
                    )))
                }
            }
        }
        Ok(self.pending.split_to(size).freeze())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.descriptors.clear();
        self.body = None;
    }
}
