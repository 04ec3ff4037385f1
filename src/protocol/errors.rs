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

// Per-record errors reported in the headers of a write/update/remove
// response. Failed records do not fail the request: the caller gets a map
// of what went wrong and everything else was applied.

use super::{parse_entry_delta, value_str, ERROR_HEADER_PREFIX};
use crate::error::{ApiError, BatchError, Result};
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use tracing::warn;

/// Errors of one entry by timestamp
pub type ErrorMap = BTreeMap<i64, ApiError>;

/// Errors by entry name, then timestamp
pub type RecordBatchErrorMap = BTreeMap<String, ErrorMap>;

/// Split `<status>,<message>`
fn parse_error_value(value: &str) -> Option<ApiError> {
    let (status, message) = value.split_once(',')?;
    let status = status.trim().parse().ok()?;
    Some(ApiError::new(status, message))
}

/// Collect v1 `x-reduct-error-<timestamp>` headers.
///
/// Headers that do not parse are skipped.
pub fn collect_v1(headers: &HeaderMap) -> ErrorMap {
    let mut errors = ErrorMap::new();
    for (name, value) in headers.iter() {
        let Some(raw_ts) = name.as_str().strip_prefix(ERROR_HEADER_PREFIX) else {
            continue;
        };
        let Ok(timestamp) = raw_ts.parse::<i64>() else {
            continue;
        };
        match value_str(value).ok().and_then(parse_error_value) {
            Some(error) => {
                warn!("Record {} failed: {}", timestamp, error);
                errors.insert(timestamp, error);
            }
            None => warn!("Skipping malformed error header '{}'", name),
        }
    }
    errors
}

/// Collect v2 `x-reduct-error-<entryIndex>-<delta>` headers against the
/// entry list and base timestamp of the request that was sent.
pub fn collect_v2(headers: &HeaderMap, entries: &[String], start_ts: i64) -> Result<RecordBatchErrorMap> {
    let mut errors = RecordBatchErrorMap::new();
    for (name, value) in headers.iter() {
        let Some(suffix) = name.as_str().strip_prefix(ERROR_HEADER_PREFIX) else {
            continue;
        };
        let invalid = || BatchError::protocol(format!("invalid error header '{}'", name));

        let (entry_index, delta) = parse_entry_delta(suffix).ok_or_else(invalid)?;
        let entry = entries.get(entry_index).ok_or_else(invalid)?;
        let error = value_str(value)
            .ok()
            .and_then(parse_error_value)
            .ok_or_else(invalid)?;
        let timestamp = start_ts.checked_add(delta).ok_or_else(invalid)?;

        warn!("Record {}/{} failed: {}", entry, timestamp, error);
        errors
            .entry(entry.clone())
            .or_default()
            .insert(timestamp, error);
    }
    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_collect_v1() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-reduct-error-1000",
            HeaderValue::from_static("409,A record with timestamp 1000 already exists"),
        );
        headers.insert("x-reduct-error-abc", HeaderValue::from_static("400,bad"));
        headers.insert("x-reduct-error-2000", HeaderValue::from_static("no-comma"));
        headers.insert("x-reduct-error", HeaderValue::from_static("whole request"));

        let errors = collect_v1(&headers);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[&1000],
            ApiError::new(409, "A record with timestamp 1000 already exists")
        );
    }

    #[test]
    fn test_collect_v2_maps_back_to_entries() {
        let mut headers = HeaderMap::new();
        headers.insert("x-reduct-error-1-25", HeaderValue::from_static("404,entry not found"));
        headers.insert("x-reduct-error-0-0", HeaderValue::from_static("409,exists, really"));

        let entries = vec!["a".to_string(), "b".to_string()];
        let errors = collect_v2(&headers, &entries, 1000).unwrap();
        assert_eq!(errors["a"][&1000], ApiError::new(409, "exists, really"));
        assert_eq!(errors["b"][&1025], ApiError::new(404, "entry not found"));
    }

    #[test]
    fn test_collect_v2_rejects_bad_headers() {
        let entries = vec!["a".to_string()];
        for (name, value) in [
            ("x-reduct-error-3-0", "404,x"),
            ("x-reduct-error-zero", "404,x"),
            ("x-reduct-error-0-0", "oops"),
        ] {
            let mut headers = HeaderMap::new();
            headers.insert(name, HeaderValue::from_static(value));
            assert!(collect_v2(&headers, &entries, 0).is_err(), "{} should fail", name);
        }
    }

    #[test]
    fn test_error_message_is_kept_verbatim() {
        let mut v1 = HeaderMap::new();
        v1.insert("x-reduct-error-7", HeaderValue::from_static("500, padded message "));
        assert_eq!(collect_v1(&v1)[&7], ApiError::new(500, " padded message "));

        let mut v2 = HeaderMap::new();
        v2.insert(
            "x-reduct-error-0-3",
            HeaderValue::from_bytes("409,Eintrag existiert: Größe".as_bytes()).unwrap(),
        );
        let errors = collect_v2(&v2, &["a".to_string()], 0).unwrap();
        assert_eq!(errors["a"][&3], ApiError::new(409, "Eintrag existiert: Größe"));
    }

    #[test]
    fn test_no_errors_is_empty_map() {
        assert!(collect_v2(&HeaderMap::new(), &[], 0).unwrap().is_empty());
        assert!(collect_v1(&HeaderMap::new()).is_empty());
    }
}
