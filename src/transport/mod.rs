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

// HTTP transport abstraction
//
// The codec never talks to the network directly. Requests are handed to a
// `Transport`, which returns the status, the header map and a streaming body.
// Base path, authentication and TLS belong to the transport.

pub mod backend;
pub mod http;

pub use backend::{HttpRequest, HttpResponse, Transport};
pub use http::HttpTransport;

use crate::error::{ApiError, BatchError, Result};
use crate::protocol::{header_str, ERROR_HEADER};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use std::pin::Pin;

/// Response body as a stream of chunks. Chunk boundaries carry no meaning.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub fn empty_body() -> BodyStream {
    futures::stream::empty().boxed()
}

pub fn body_from_bytes(bytes: Bytes) -> BodyStream {
    if bytes.is_empty() {
        return empty_body();
    }
    futures::stream::once(async move { Ok(bytes) }).boxed()
}

pub fn body_from_chunks(chunks: Vec<Bytes>) -> BodyStream {
    futures::stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// Map 204 to `NoContent` and any other non-success status to an `ApiError`
/// carrying the `x-reduct-error` message.
pub fn error_for_status(response: HttpResponse) -> Result<HttpResponse> {
    let status = response.status;
    if status == StatusCode::NO_CONTENT {
        let message = header_str(&response.headers, ERROR_HEADER)
            .filter(|m| !m.is_empty())
            .unwrap_or("No content")
            .to_string();
        return Err(BatchError::NoContent(message));
    }

    if !status.is_success() {
        let message = header_str(&response.headers, ERROR_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string()
            });
        return Err(ApiError::new(status.as_u16(), message).into());
    }

    Ok(response)
}
