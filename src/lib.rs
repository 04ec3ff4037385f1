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

// ReductStore batch record client
//
// Client-side codec for the batch record protocol:
// - Encodes batched writes, label updates and removals (v1 and v2 wire formats)
// - Decodes batched query responses into individual records
// - Streams queries as a cancellable, optionally polling sequence of records
// - Streams the trailing record of each response without buffering it

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod query;
pub mod record;
pub mod transport;

// Re-export main types
pub use batch::{Batch, RecordBatch};
pub use client::BatchClient;
pub use config::{load_config, load_config_with_env, ClientConfig};
pub use error::{ApiError, BatchError, Result};
pub use protocol::errors::{ErrorMap, RecordBatchErrorMap};
pub use protocol::{BatchType, ProtocolVersion};
pub use query::{QueryOptions, QueryStream, QueryTarget};
pub use record::{labels, LabelValue, Labels, Payload, Record};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Transport};
