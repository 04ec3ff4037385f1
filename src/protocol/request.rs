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

// Encoding of write/update/remove batches into one HTTP request

use super::labels::{self, LabelDictionary, WireLabels};
use super::{header_list, BatchType, ENTRIES_HEADER, HEADER_PREFIX, LABELS_HEADER, START_TS_HEADER, TIME_HEADER_PREFIX};
use crate::error::{BatchError, Result};
use crate::record::{Labels, DEFAULT_CONTENT_TYPE};
use crate::transport::HttpRequest;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Method;
use std::collections::HashMap;
use std::str::FromStr;

/// A record waiting in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecord {
    pub entry: String,
    pub timestamp: i64,
    pub data: Bytes,
    pub content_type: String,
    pub labels: Labels,
}

impl PendingRecord {
    pub fn new(
        entry: impl Into<String>,
        timestamp: i64,
        data: impl Into<Bytes>,
        content_type: &str,
        labels: Labels,
    ) -> Self {
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        Self {
            entry: entry.into(),
            timestamp,
            data: data.into(),
            content_type: content_type.to_string(),
            labels,
        }
    }
}

/// Encoded request plus what is needed to read per-record errors back
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub request: HttpRequest,
    /// Entry names in index order (v2); the single entry for v1
    pub entries: Vec<String>,
    /// Base timestamp of the `<entry>-<delta>` headers (v2)
    pub start_ts: i64,
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_str(name)
        .map_err(|_| BatchError::validation(format!("invalid header name '{}'", name)))?;
    let value = HeaderValue::from_str(value).map_err(|_| {
        BatchError::validation(format!("invalid value '{}' for header '{}'", value, name))
    })?;
    headers.insert(name, value);
    Ok(())
}

fn insert_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}

fn method_for(kind: BatchType) -> Method {
    match kind {
        BatchType::Write => Method::POST,
        BatchType::Update => Method::PATCH,
        BatchType::Remove => Method::DELETE,
    }
}

/// Single-entry batch (`/b/<bucket>/<entry>/batch`).
///
/// One `x-reduct-time-<ts>` header per record, payloads concatenated in
/// ascending timestamp order.
pub fn build_v1(
    bucket: &str,
    entry: &str,
    kind: BatchType,
    records: &[PendingRecord],
) -> Result<EncodedBatch> {
    let mut sorted: Vec<&PendingRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    let mut headers = HeaderMap::new();
    let mut body = BytesMut::new();
    for record in sorted {
        let meta = match kind {
            BatchType::Write => Some((record.data.len() as u64, record.content_type.as_str())),
            BatchType::Update | BatchType::Remove => None,
        };
        let value = labels::encode_csv_row(meta, &record.labels)?;
        insert_header(
            &mut headers,
            &format!("{}{}", TIME_HEADER_PREFIX, record.timestamp),
            &value,
        )?;
        if kind == BatchType::Write {
            body.extend_from_slice(&record.data);
        }
    }

    if kind == BatchType::Write {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    }
    insert_content_length(&mut headers, body.len());

    let mut request = HttpRequest::new(method_for(kind), format!("/b/{}/{}/batch", bucket, entry));
    request.headers = headers;
    request.body = body.freeze();

    Ok(EncodedBatch {
        request,
        entries: vec![entry.to_string()],
        start_ts: 0,
    })
}

/// Cross-entry batch (`/io/<bucket>/<write|update|remove>`)
pub fn build_v2(bucket: &str, kind: BatchType, records: &[PendingRecord]) -> Result<EncodedBatch> {
    let path = format!("/io/{}/{}", bucket, kind.as_str());
    let mut request = HttpRequest::new(method_for(kind), path);

    let (headers, body, entries, start_ts) = match kind {
        BatchType::Write => encode_v2_write(records)?,
        BatchType::Update => {
            let (headers, entries, start_ts) = encode_v2_metadata_only(records, true)?;
            (headers, Bytes::new(), entries, start_ts)
        }
        BatchType::Remove => {
            let (headers, entries, start_ts) = encode_v2_metadata_only(records, false)?;
            (headers, Bytes::new(), entries, start_ts)
        }
    };
    request.headers = headers;
    request.body = body;

    Ok(EncodedBatch {
        request,
        entries,
        start_ts,
    })
}

struct Indexed<'a> {
    entry_index: usize,
    delta: i64,
    record: &'a PendingRecord,
}

/// Sort by `(entry, timestamp)`, number entries in first-seen order and
/// express timestamps relative to the smallest one.
fn index_records(records: &[PendingRecord]) -> Result<(Vec<Indexed<'_>>, Vec<String>, i64)> {
    let mut sorted: Vec<&PendingRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.entry.cmp(&b.entry).then(a.timestamp.cmp(&b.timestamp)));

    let start_ts = sorted.iter().map(|r| r.timestamp).min().unwrap_or(0);
    let mut entries: Vec<String> = Vec::new();
    let mut lookup: HashMap<&str, usize> = HashMap::new();
    let mut indexed = Vec::with_capacity(sorted.len());

    for record in sorted {
        if record.entry.is_empty() {
            return Err(BatchError::validation("entry name must not be empty"));
        }
        let entry_index = *lookup.entry(record.entry.as_str()).or_insert_with(|| {
            entries.push(record.entry.clone());
            entries.len() - 1
        });
        let delta = record.timestamp.checked_sub(start_ts).ok_or_else(|| {
            BatchError::validation(format!(
                "timestamp {} is too far from batch start {}",
                record.timestamp, start_ts
            ))
        })?;
        indexed.push(Indexed {
            entry_index,
            delta,
            record,
        });
    }

    Ok((indexed, entries, start_ts))
}

fn insert_dictionaries(
    headers: &mut HeaderMap,
    entries: &[String],
    start_ts: i64,
    dictionary: &LabelDictionary,
) -> Result<()> {
    insert_header(headers, ENTRIES_HEADER, &header_list::encode(entries))?;
    insert_header(headers, START_TS_HEADER, &start_ts.to_string())?;
    if !dictionary.is_empty() {
        insert_header(headers, LABELS_HEADER, &header_list::encode(dictionary.names()))?;
    }
    Ok(())
}

struct EntryMeta {
    content_type: String,
    labels: WireLabels,
}

fn encode_v2_write(records: &[PendingRecord]) -> Result<(HeaderMap, Bytes, Vec<String>, i64)> {
    let (indexed, entries, start_ts) = index_records(records)?;

    let mut headers = HeaderMap::new();
    let mut dictionary = LabelDictionary::new();
    let mut last_meta: HashMap<usize, EntryMeta> = HashMap::new();
    let mut body = BytesMut::with_capacity(records.iter().map(|r| r.data.len()).sum());

    for item in &indexed {
        let record = item.record;
        body.extend_from_slice(&record.data);

        let content_type = if record.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            record.content_type.as_str()
        };
        let mut current = labels::to_wire(&record.labels);
        current.retain(|_, v| !v.is_empty());

        let previous = last_meta.get(&item.entry_index);
        let delta = labels::encode_delta(
            &current,
            previous.map(|m| &m.labels),
            Some(&mut dictionary),
        )?;
        let content_type_part = match previous {
            Some(prev) if prev.content_type == content_type => "",
            _ => content_type,
        };

        let mut value = record.data.len().to_string();
        if !content_type_part.is_empty() || !delta.is_empty() {
            value.push(',');
            value.push_str(content_type_part);
        }
        if !delta.is_empty() {
            value.push(',');
            value.push_str(&delta);
        }

        insert_header(
            &mut headers,
            &format!("{}{}-{}", HEADER_PREFIX, item.entry_index, item.delta),
            &value,
        )?;
        last_meta.insert(
            item.entry_index,
            EntryMeta {
                content_type: content_type.to_string(),
                labels: current,
            },
        );
    }

    insert_dictionaries(&mut headers, &entries, start_ts, &dictionary)?;
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    insert_content_length(&mut headers, body.len());

    Ok((headers, body.freeze(), entries, start_ts))
}

/// Update and remove requests carry no body and no content types. Updates
/// send each record's labels as explicit ops (`0,,<ops>`), removes send `0`.
fn encode_v2_metadata_only(
    records: &[PendingRecord],
    with_labels: bool,
) -> Result<(HeaderMap, Vec<String>, i64)> {
    let (indexed, entries, start_ts) = index_records(records)?;

    let mut headers = HeaderMap::new();
    let mut dictionary = LabelDictionary::new();

    for item in &indexed {
        let delta = if with_labels {
            let ops = labels::update_ops(&item.record.labels)?;
            labels::render_ops(&ops, Some(&mut dictionary))
        } else {
            String::new()
        };
        let value = if delta.is_empty() {
            "0".to_string()
        } else {
            format!("0,,{}", delta)
        };
        insert_header(
            &mut headers,
            &format!("{}{}-{}", HEADER_PREFIX, item.entry_index, item.delta),
            &value,
        )?;
    }

    insert_dictionaries(&mut headers, &entries, start_ts, &dictionary)?;
    insert_content_length(&mut headers, 0);

    Ok((headers, entries, start_ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header_str;
    use crate::record::labels;

    fn record(entry: &str, ts: i64, data: &'static [u8], ct: &str, pairs: &[(&str, &str)]) -> PendingRecord {
        PendingRecord::new(entry, ts, Bytes::from_static(data), ct, labels(pairs.iter().copied()))
    }

    #[test]
    fn test_v1_write_headers_and_body() {
        let records = vec![
            record("e", 2000, b"world", "text/plain", &[]),
            record("e", 1000, b"hello", "text/plain", &[("a", "1"), ("b", "x,y")]),
        ];
        let encoded = build_v1("bucket", "e", BatchType::Write, &records).unwrap();
        let req = &encoded.request;

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/b/bucket/e/batch");
        assert_eq!(req.body, Bytes::from_static(b"helloworld"));
        assert_eq!(header_str(&req.headers, "content-length"), Some("10"));
        assert_eq!(
            header_str(&req.headers, "x-reduct-time-1000"),
            Some("5,text/plain,a=1,b=\"x,y\"")
        );
        assert_eq!(header_str(&req.headers, "x-reduct-time-2000"), Some("5,text/plain"));
    }

    #[test]
    fn test_v1_update_and_remove_have_no_body() {
        let records = vec![record("e", 1000, b"ignored", "", &[("a", "1")])];

        let update = build_v1("bucket", "e", BatchType::Update, &records).unwrap().request;
        assert_eq!(update.method, Method::PATCH);
        assert!(update.body.is_empty());
        assert_eq!(header_str(&update.headers, "content-length"), Some("0"));
        assert_eq!(header_str(&update.headers, "x-reduct-time-1000"), Some("0,,a=1"));

        let remove = build_v1("bucket", "e", BatchType::Remove, &[record("e", 1000, b"", "", &[])])
            .unwrap()
            .request;
        assert_eq!(remove.method, Method::DELETE);
        assert_eq!(header_str(&remove.headers, "x-reduct-time-1000"), Some("0,"));
    }

    #[test]
    fn test_v2_write_indexes_entries_and_deltas() {
        let records = vec![
            record("entry-b", 1500, b"cc", "text/plain", &[("k", "1")]),
            record("entry-a", 1000, b"a", "text/plain", &[("k", "1")]),
            record("entry-a", 1200, b"bb", "text/plain", &[("k", "1")]),
        ];
        let encoded = build_v2("bucket", BatchType::Write, &records).unwrap();
        let req = &encoded.request;

        assert_eq!(req.path, "/io/bucket/write");
        assert_eq!(encoded.entries, vec!["entry-a", "entry-b"]);
        assert_eq!(encoded.start_ts, 1000);
        assert_eq!(req.body, Bytes::from_static(b"abbcc"));
        assert_eq!(header_str(&req.headers, "x-reduct-entries"), Some("entry-a,entry-b"));
        assert_eq!(header_str(&req.headers, "x-reduct-start-ts"), Some("1000"));
        assert_eq!(header_str(&req.headers, "x-reduct-labels"), Some("k"));
        assert_eq!(header_str(&req.headers, "x-reduct-0-0"), Some("1,text/plain,0=1"));
        assert_eq!(header_str(&req.headers, "x-reduct-0-200"), Some("2"));
        assert_eq!(header_str(&req.headers, "x-reduct-1-500"), Some("2,text/plain,0=1"));
        assert_eq!(header_str(&req.headers, "content-length"), Some("5"));
    }

    #[test]
    fn test_v2_write_label_only_change() {
        let records = vec![
            record("e", 1, b"x", "text/plain", &[("a", "1")]),
            record("e", 2, b"y", "text/plain", &[("b", "2")]),
        ];
        let req = build_v2("bucket", BatchType::Write, &records).unwrap().request;
        assert_eq!(header_str(&req.headers, "x-reduct-0-1"), Some("1,,0=,1=2"));
    }

    #[test]
    fn test_v2_update_and_remove() {
        let records = vec![
            record("e", 10, b"", "", &[("a", "1"), ("gone", "")]),
            record("e", 20, b"", "", &[]),
        ];
        let update = build_v2("bucket", BatchType::Update, &records).unwrap().request;
        assert_eq!(update.method, Method::PATCH);
        assert!(update.body.is_empty());
        assert_eq!(header_str(&update.headers, "x-reduct-0-0"), Some("0,,0=1,1="));
        assert_eq!(header_str(&update.headers, "x-reduct-0-10"), Some("0"));
        assert_eq!(header_str(&update.headers, "x-reduct-labels"), Some("a,gone"));

        let remove = build_v2("bucket", BatchType::Remove, &records).unwrap().request;
        assert_eq!(remove.method, Method::DELETE);
        assert_eq!(remove.path, "/io/bucket/remove");
        assert_eq!(header_str(&remove.headers, "x-reduct-0-0"), Some("0"));
        assert!(remove.headers.get("x-reduct-labels").is_none());
    }

    #[test]
    fn test_v2_empty_batch() {
        let encoded = build_v2("bucket", BatchType::Write, &[]).unwrap();
        let req = &encoded.request;
        assert_eq!(header_str(&req.headers, "x-reduct-entries"), Some(""));
        assert_eq!(header_str(&req.headers, "x-reduct-start-ts"), Some("0"));
        assert_eq!(header_str(&req.headers, "content-length"), Some("0"));
        assert!(encoded.entries.is_empty());
    }

    #[test]
    fn test_reserved_label_fails_encoding() {
        let records = vec![record("e", 1, b"x", "", &[("@internal", "1")])];
        assert!(matches!(
            build_v2("bucket", BatchType::Write, &records),
            Err(BatchError::Validation(_))
        ));
        assert!(matches!(
            build_v1("bucket", "e", BatchType::Write, &records),
            Err(BatchError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_entry_name_rejected() {
        let records = vec![record("", 1, b"x", "", &[])];
        assert!(build_v2("bucket", BatchType::Write, &records).is_err());
    }

    #[test]
    fn test_timestamp_span_overflow_is_rejected() {
        let records = vec![
            record("e", -10, b"a", "", &[]),
            record("e", i64::MAX, b"b", "", &[]),
        ];
        for kind in [BatchType::Write, BatchType::Update, BatchType::Remove] {
            assert!(matches!(
                build_v2("bucket", kind, &records),
                Err(BatchError::Validation(_))
            ));
        }

        let records = vec![record("e", i64::MIN, b"a", "", &[]), record("e", -1, b"b", "", &[])];
        let encoded = build_v2("bucket", BatchType::Write, &records).unwrap();
        assert_eq!(encoded.start_ts, i64::MIN);
    }
}
