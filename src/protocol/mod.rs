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

// Batch record protocol
//
// Wire constants and the codecs for both protocol generations:
// - v1: one entry per request, `x-reduct-time-<ts>` headers with CSV values
// - v2: many entries per request, `x-reduct-<entry>-<delta>` headers with
//   entry/label dictionaries and per-entry inheritance of metadata

pub mod errors;
pub mod header_list;
pub mod labels;
pub mod request;
pub mod response;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

pub const HEADER_PREFIX: &str = "x-reduct-";
pub const TIME_HEADER_PREFIX: &str = "x-reduct-time-";
pub const ERROR_HEADER_PREFIX: &str = "x-reduct-error-";
pub const ERROR_HEADER: &str = "x-reduct-error";
pub const ENTRIES_HEADER: &str = "x-reduct-entries";
pub const START_TS_HEADER: &str = "x-reduct-start-ts";
pub const LABELS_HEADER: &str = "x-reduct-labels";
pub const LAST_HEADER: &str = "x-reduct-last";
pub const QUERY_ID_HEADER: &str = "x-reduct-query-id";

/// Protocol generation used for batches and queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V1,
    #[default]
    V2,
}

/// Operation carried by a batch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchType {
    Write,
    Update,
    Remove,
}

impl BatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchType::Write => "write",
            BatchType::Update => "update",
            BatchType::Remove => "remove",
        }
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| value_str(v).ok())
}

/// Header value as UTF-8. `HeaderValue::to_str` only accepts visible ASCII,
/// but label values written by this client may carry any UTF-8.
pub(crate) fn value_str(value: &HeaderValue) -> std::result::Result<&str, std::str::Utf8Error> {
    std::str::from_utf8(value.as_bytes())
}

/// `x-reduct-last: true`
pub(crate) fn is_last_response(headers: &HeaderMap) -> bool {
    header_str(headers, LAST_HEADER)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Split `<entryIndex>-<delta>` into its numbers
pub(crate) fn parse_entry_delta(suffix: &str) -> Option<(usize, i64)> {
    let (entry, delta) = suffix.rsplit_once('-')?;
    if entry.is_empty() || delta.is_empty() {
        return None;
    }
    Some((entry.parse().ok()?, delta.parse().ok()?))
}
