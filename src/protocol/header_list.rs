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

// Comma-separated, percent-encoded token lists (`x-reduct-entries`,
// `x-reduct-labels`)

use crate::error::{BatchError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything outside the RFC 9110 token characters, plus `%` itself so
/// encoded lists stay decodable.
const LIST_ITEM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'*')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Percent-encode each value and join with `,`
pub fn encode<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| utf8_percent_encode(v.as_ref(), LIST_ITEM).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode a header list. An empty header is a valid empty list.
pub fn decode(header: &str) -> Result<Vec<String>> {
    let trimmed = header.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split(',')
        .map(|item| {
            let item = item.trim();
            if item.is_empty() {
                return Err(BatchError::protocol("invalid entries/labels header"));
            }
            decode_item(item)
        })
        .collect()
}

fn decode_item(item: &str) -> Result<String> {
    check_escapes(item)?;
    percent_decode_str(item)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| BatchError::protocol(format!("header item '{}' is not valid UTF-8", item)))
}

/// `percent_decode_str` passes malformed escapes through; reject them
fn check_escapes(item: &str) -> Result<()> {
    let bytes = item.as_bytes();
    for (i, _) in bytes.iter().enumerate().filter(|(_, b)| **b == b'%') {
        let valid = bytes
            .get(i + 1..i + 3)
            .map_or(false, |hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            let end = (i + 3).min(bytes.len());
            return Err(BatchError::protocol(format!(
                "invalid URL escape {:?}",
                String::from_utf8_lossy(&bytes[i..end])
            )));
        }
    }
    Ok(())
}
