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

// Label encoding for batch headers
//
// v2 sends labels as deltas against the previous record of the same entry:
// `key=value` adds or changes a label, `key=` removes it. Keys are label
// names or indexes into the `x-reduct-labels` dictionary. Values holding a
// comma are wrapped in double quotes.
//
// v1 sends the full label set of every record as a CSV row:
// `size,content_type,key=value,...`

use crate::error::{BatchError, Result};
use crate::record::{LabelValue, Labels};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Prefix of labels computed by the server
pub const RESERVED_LABEL_PREFIX: char = '@';

/// Labels rendered to their wire form, sorted by name
pub type WireLabels = BTreeMap<String, String>;

/// One label change. `value: None` removes the label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelOp {
    pub name: String,
    pub value: Option<String>,
}

/// Index <-> name table shared by all records of one request or response
#[derive(Debug, Clone, Default)]
pub struct LabelDictionary {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names(names: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            index.entry(name.clone()).or_insert(i);
        }
        Self { names, index }
    }

    /// Index of `name`, appending it if unseen
    pub fn ensure(&mut self, name: &str) -> usize {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a delta key: numeric keys are dictionary indexes, anything
    /// else is a literal label name.
    pub fn resolve(&self, raw: &str) -> Result<String> {
        if !self.is_empty() {
            if let Ok(idx) = raw.parse::<usize>() {
                return match self.name(idx).filter(|n| !n.is_empty()) {
                    Some(name) => Ok(name.to_string()),
                    None => Err(BatchError::protocol(format!(
                        "label index '{}' is out of range",
                        raw
                    ))),
                };
            }
        }
        validate_label_name(raw)?;
        Ok(raw.to_string())
    }
}

pub fn validate_label_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BatchError::validation("label name must not be empty"));
    }
    if name.starts_with(RESERVED_LABEL_PREFIX) {
        return Err(BatchError::validation(
            "label names must not start with '@': reserved for computed labels",
        ));
    }
    Ok(())
}

/// Reject values the header grammar cannot carry back unchanged: there is
/// no escape for `"` and parsers trim whitespace around values, even
/// inside quotes.
pub fn validate_label_value(name: &str, value: &str) -> Result<()> {
    if value.contains('"') {
        return Err(BatchError::validation(format!(
            "value of label '{}' must not contain '\"'",
            name
        )));
    }
    if value.trim() != value {
        return Err(BatchError::validation(format!(
            "value of label '{}' must not start or end with whitespace",
            name
        )));
    }
    Ok(())
}

/// Render labels to strings, keeping empty values
pub fn to_wire(labels: &Labels) -> WireLabels {
    labels
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

/// Quote a value if it contains a comma
pub fn quote_value(value: &str) -> Cow<'_, str> {
    if value.contains(',') {
        Cow::Owned(format!("\"{}\"", value))
    } else {
        Cow::Borrowed(value)
    }
}

fn render_op(key: &str, value: Option<&str>) -> String {
    match value {
        None | Some("") => format!("{}=", key),
        Some(v) => format!("{}={}", key, quote_value(v)),
    }
}

/// Changes turning `previous` into `current`, sorted by label name.
///
/// Without a previous state every label of `current` is an add. Empty
/// values count as absent.
pub fn diff(current: &WireLabels, previous: Option<&WireLabels>) -> Result<Vec<LabelOp>> {
    let mut keys: BTreeSet<&String> = current.keys().collect();
    if let Some(prev) = previous {
        keys.extend(prev.keys());
    }

    let mut ops = Vec::new();
    for key in keys {
        let prev = previous
            .and_then(|p| p.get(key))
            .filter(|v| !v.is_empty());
        let curr = current.get(key).filter(|v| !v.is_empty());
        match (prev, curr) {
            (Some(p), Some(c)) if p == c => {}
            (_, Some(c)) => {
                validate_label_name(key)?;
                validate_label_value(key, c)?;
                ops.push(LabelOp {
                    name: key.clone(),
                    value: Some(c.clone()),
                });
            }
            (Some(_), None) => ops.push(LabelOp {
                name: key.clone(),
                value: None,
            }),
            (None, None) => {}
        }
    }
    Ok(ops)
}

/// Explicit ops for an update request: every given label is sent, an empty
/// value removes the label on the server.
pub fn update_ops(labels: &Labels) -> Result<Vec<LabelOp>> {
    to_wire(labels)
        .into_iter()
        .map(|(name, value)| {
            validate_label_name(&name)?;
            validate_label_value(&name, &value)?;
            Ok(LabelOp {
                name,
                value: (!value.is_empty()).then_some(value),
            })
        })
        .collect()
}

/// Render ops as a header fragment. With a dictionary, keys become indexes
/// (new names are appended) and ops are ordered by index.
pub fn render_ops(ops: &[LabelOp], dictionary: Option<&mut LabelDictionary>) -> String {
    match dictionary {
        None => ops
            .iter()
            .map(|op| render_op(&op.name, op.value.as_deref()))
            .collect::<Vec<_>>()
            .join(","),
        Some(dict) => {
            let mut indexed: Vec<(usize, &LabelOp)> =
                ops.iter().map(|op| (dict.ensure(&op.name), op)).collect();
            indexed.sort_by_key(|(idx, _)| *idx);
            indexed
                .iter()
                .map(|(idx, op)| render_op(&idx.to_string(), op.value.as_deref()))
                .collect::<Vec<_>>()
                .join(",")
        }
    }
}

/// `diff` followed by `render_ops`
pub fn encode_delta(
    current: &WireLabels,
    previous: Option<&WireLabels>,
    dictionary: Option<&mut LabelDictionary>,
) -> Result<String> {
    let ops = diff(current, previous)?;
    Ok(render_ops(&ops, dictionary))
}

fn resolve_key(raw: &str, dictionary: Option<&LabelDictionary>) -> Result<String> {
    match dictionary {
        Some(dict) => dict.resolve(raw),
        None => {
            validate_label_name(raw)?;
            Ok(raw.to_string())
        }
    }
}

/// Parse a delta fragment such as `0=a,1="x,y",2=`
pub fn parse_ops(raw: &str, dictionary: Option<&LabelDictionary>) -> Result<Vec<LabelOp>> {
    let mut ops = Vec::new();
    let mut rest = raw.trim();

    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| BatchError::protocol(format!("invalid label delta '{}'", raw)))?;
        let name = resolve_key(rest[..eq].trim(), dictionary)?;
        let value_part = &rest[eq + 1..];

        let (value, next) = if let Some(quoted) = value_part.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| {
                BatchError::protocol(format!("unterminated quote in label delta '{}'", raw))
            })?;
            let after = quoted[end + 1..].trim_start();
            (quoted[..end].trim(), after.strip_prefix(',').unwrap_or(after))
        } else {
            match value_part.split_once(',') {
                Some((value, next)) => (value.trim(), next),
                None => (value_part.trim(), ""),
            }
        };

        ops.push(LabelOp {
            name,
            value: (!value.is_empty()).then(|| value.to_string()),
        });
        rest = next.trim();
    }

    Ok(ops)
}

/// Apply a delta fragment onto a copy of `base`
pub fn apply_delta(
    raw: &str,
    base: &Labels,
    dictionary: Option<&LabelDictionary>,
) -> Result<Labels> {
    let mut labels = base.clone();
    for op in parse_ops(raw, dictionary)? {
        match op.value {
            Some(value) => {
                labels.insert(op.name, LabelValue::String(value));
            }
            None => {
                labels.remove(&op.name);
            }
        }
    }
    Ok(labels)
}

/// Parsed v1 record header value
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub size: u64,
    pub content_type: String,
    pub labels: Labels,
}

/// Parse `size,content_type[,key=value]*`. A quoted segment may hold commas.
pub fn parse_csv_row(row: &str) -> Result<CsvRow> {
    let items = split_csv(row)?;
    let size_raw = items
        .first()
        .ok_or_else(|| BatchError::protocol(format!("empty record header '{}'", row)))?;
    let size = size_raw.trim().parse::<u64>().map_err(|_| {
        BatchError::protocol(format!("invalid content length '{}'", size_raw))
    })?;
    let content_type = items
        .get(1)
        .map(|ct| ct.trim().to_string())
        .unwrap_or_default();

    let mut labels = Labels::new();
    for item in items.iter().skip(2) {
        if let Some((name, value)) = item.split_once('=') {
            labels.insert(name.trim().to_string(), LabelValue::String(value.to_string()));
        }
    }

    Ok(CsvRow {
        size,
        content_type,
        labels,
    })
}

/// Split on commas outside quotes. Fields keep their position, so an empty
/// content type (`0,,a=1`) stays in the second slot.
fn split_csv(row: &str) -> Result<Vec<String>> {
    let mut items = Vec::new();
    let mut escaped: Option<String> = None;
    let mut current = String::new();
    let mut closed = false;

    for ch in row.chars() {
        match ch {
            ',' if escaped.is_none() => {
                if !closed {
                    items.push(std::mem::take(&mut current));
                }
                closed = false;
            }
            '"' => match escaped.take() {
                None => escaped = Some(std::mem::take(&mut current)),
                Some(prefix) => {
                    items.push(prefix + &std::mem::take(&mut current));
                    closed = true;
                }
            },
            _ => current.push(ch),
        }
    }

    if escaped.is_some() {
        return Err(BatchError::protocol(format!(
            "unbalanced quotes in record header '{}'",
            row
        )));
    }
    if !closed {
        items.push(current);
    }
    Ok(items)
}

/// Encode a v1 record header value. `meta` is `(size, content_type)` for
/// writes; updates and removes send `0,` instead.
pub fn encode_csv_row(meta: Option<(u64, &str)>, labels: &Labels) -> Result<String> {
    let mut value = match meta {
        Some((size, content_type)) => format!("{},{}", size, content_type),
        None => "0,".to_string(),
    };
    for (name, label) in to_wire(labels) {
        validate_label_name(&name)?;
        validate_label_value(&name, &label)?;
        value.push(',');
        value.push_str(&render_op(&name, Some(&label)));
    }
    Ok(value)
}
