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

// Records, label values and lazily readable payloads

use crate::error::{BatchError, Result};
use crate::transport::BodyStream;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Scalar label value. Always rendered to its string form on the wire,
/// so labels read back from the server are `LabelValue::String`.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelValue::String(s) => f.write_str(s),
            LabelValue::Int(i) => write!(f, "{}", i),
            LabelValue::Float(v) => write!(f, "{}", v),
            LabelValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        LabelValue::String(value.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(value: String) -> Self {
        LabelValue::String(value)
    }
}

impl From<i64> for LabelValue {
    fn from(value: i64) -> Self {
        LabelValue::Int(value)
    }
}

impl From<i32> for LabelValue {
    fn from(value: i32) -> Self {
        LabelValue::Int(value.into())
    }
}

impl From<f64> for LabelValue {
    fn from(value: f64) -> Self {
        LabelValue::Float(value)
    }
}

impl From<bool> for LabelValue {
    fn from(value: bool) -> Self {
        LabelValue::Bool(value)
    }
}

pub type Labels = HashMap<String, LabelValue>;

/// Build a label map from `(name, value)` pairs.
pub fn labels<K, V, I>(pairs: I) -> Labels
where
    K: Into<String>,
    V: Into<LabelValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A record decoded from a batch response.
///
/// Owned by the consumer once emitted. The payload of the last record in a
/// batch reads straight from the HTTP response, so it must be consumed
/// before the next batch of the same query makes progress on the wire.
#[derive(Debug)]
pub struct Record {
    pub entry: String,
    pub timestamp: i64,
    pub size: u64,
    pub content_type: String,
    pub labels: Labels,
    pub is_last_in_batch: bool,
    pub is_last_in_query: bool,
    pub payload: Payload,
}

impl Record {
    /// Read the whole payload into memory
    pub async fn read(&mut self) -> Result<Bytes> {
        self.payload.read_all().await
    }
}

/// Lazily readable record content.
pub struct Payload {
    inner: PayloadInner,
}

enum PayloadInner {
    Buffered(Option<Bytes>),
    Streaming {
        pending: Option<Bytes>,
        body: Option<BodyStream>,
        remaining: u64,
    },
}

impl Payload {
    pub fn empty() -> Self {
        Self {
            inner: PayloadInner::Buffered(None),
        }
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        let bytes = if bytes.is_empty() { None } else { Some(bytes) };
        Self {
            inner: PayloadInner::Buffered(bytes),
        }
    }

    /// Payload that drains `pending` first, then reads up to `size` bytes in
    /// total from the response body.
    pub(crate) fn streaming(pending: Bytes, body: BodyStream, size: u64) -> Self {
        Self {
            inner: PayloadInner::Streaming {
                pending: Some(pending),
                body: Some(body),
                remaining: size,
            },
        }
    }

    /// Whether reads go to the network rather than to an in-memory buffer
    pub fn is_streaming(&self) -> bool {
        matches!(self.inner, PayloadInner::Streaming { .. })
    }

    /// Next chunk of content, `None` once the payload is exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.inner {
            PayloadInner::Buffered(bytes) => Ok(bytes.take()),
            PayloadInner::Streaming {
                pending,
                body,
                remaining,
            } => {
                if let Some(bytes) = pending.take().filter(|b| !b.is_empty()) {
                    return take_bounded(bytes, remaining, body).map(Some);
                }

                let Some(stream) = body.as_mut() else {
                    return Ok(None);
                };

                while let Some(item) = stream.next().await {
                    let bytes = match item {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            *body = None;
                            return Err(err);
                        }
                    };
                    if bytes.is_empty() {
                        continue;
                    }
                    return take_bounded(bytes, remaining, body).map(Some);
                }

                *body = None;
                if *remaining > 0 {
                    let short = *remaining;
                    *remaining = 0;
                    return Err(BatchError::protocol(format!(
                        "response body ended {} bytes short of the declared record size",
                        short
                    )));
                }
                Ok(None)
            }
        }
    }

    /// Read the rest of the payload into one buffer
    pub async fn read_all(&mut self) -> Result<Bytes> {
        let Some(first) = self.chunk().await? else {
            return Ok(Bytes::new());
        };
        let Some(second) = self.chunk().await? else {
            return Ok(first);
        };

        let mut out = BytesMut::with_capacity(first.len() + second.len());
        out.extend_from_slice(&first);
        out.extend_from_slice(&second);
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Turn the payload into a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut payload = state?;
            match payload.chunk().await {
                Ok(Some(bytes)) => Some((Ok(bytes), Some(payload))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

fn take_bounded(bytes: Bytes, remaining: &mut u64, body: &mut Option<BodyStream>) -> Result<Bytes> {
    let len = bytes.len() as u64;
    if len > *remaining {
        *remaining = 0;
        *body = None;
        return Err(BatchError::protocol(
            "response body is longer than the declared record sizes",
        ));
    }
    *remaining -= len;
    Ok(bytes)
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            PayloadInner::Buffered(bytes) => f
                .debug_struct("Payload")
                .field("buffered", &bytes.as_ref().map_or(0, |b| b.len()))
                .finish(),
            PayloadInner::Streaming { remaining, .. } => f
                .debug_struct("Payload")
                .field("streaming_remaining", remaining)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::body_from_chunks;

    #[test]
    fn test_label_value_rendering() {
        assert_eq!(LabelValue::from("x").to_string(), "x");
        assert_eq!(LabelValue::from(42i64).to_string(), "42");
        assert_eq!(LabelValue::from(1.5).to_string(), "1.5");
        assert_eq!(LabelValue::from(true).to_string(), "true");
    }

    #[tokio::test]
    async fn test_buffered_payload_reads_once() {
        let mut payload = Payload::from_bytes(Bytes::from_static(b"abc"));
        assert!(!payload.is_streaming());
        assert_eq!(payload.read_all().await.unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(payload.chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_streaming_payload_drains_pending_first() {
        let body = body_from_chunks(vec![Bytes::from_static(b"cd"), Bytes::from_static(b"ef")]);
        let mut payload = Payload::streaming(Bytes::from_static(b"ab"), body, 6);
        assert!(payload.is_streaming());
        assert_eq!(payload.read_all().await.unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn test_streaming_payload_short_body() {
        let body = body_from_chunks(vec![Bytes::from_static(b"abc")]);
        let mut payload = Payload::streaming(Bytes::new(), body, 10);
        let err = payload.read_all().await.unwrap_err();
        assert!(matches!(err, BatchError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_streaming_payload_trailing_bytes() {
        let body = body_from_chunks(vec![Bytes::from_static(b"abc"), Bytes::from_static(b"xyz")]);
        let mut payload = Payload::streaming(Bytes::new(), body, 3);
        let err = payload.read_all().await.unwrap_err();
        assert!(err.to_string().contains("longer than the declared"));
    }

    #[tokio::test]
    async fn test_payload_into_stream() {
        let body = body_from_chunks(vec![Bytes::from_static(b"12"), Bytes::from_static(b"34")]);
        let payload = Payload::streaming(Bytes::new(), body, 4);
        let chunks: Vec<_> = payload.into_stream().collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.is_ok()));
    }
}
