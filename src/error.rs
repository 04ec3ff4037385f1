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

// Error types shared by the codec, the transport and the query driver

use thiserror::Error;

/// Error reported by the storage server, either for a whole request
/// or for a single record inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{status}] {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// Malformed or missing headers, out-of-range indexes, body length mismatch
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered 204: nothing (more) to read for now
    #[error("no content: {0}")]
    NoContent(String),

    /// Caller input or record metadata rejected before it reaches the wire
    #[error("validation error: {0}")]
    Validation(String),

    #[error("api error {0}")]
    Api(#[from] ApiError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl BatchError {
    pub fn protocol(message: impl Into<String>) -> Self {
        BatchError::Protocol(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BatchError::Validation(message.into())
    }

    /// HTTP status carried by the error, if it came from the server
    pub fn status(&self) -> Option<u16> {
        match self {
            BatchError::Api(api) => Some(api.status),
            BatchError::NoContent(_) => Some(204),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BatchError {
    fn from(err: reqwest::Error) -> Self {
        BatchError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
