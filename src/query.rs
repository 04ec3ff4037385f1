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

// Query streaming
//
// A query is read as a series of batch responses for one query id. One
// worker task drives the fetch/demux/poll cycle and feeds a bounded
// channel; the consumer reads records from the other end at its own pace.

use crate::error::{BatchError, Result};
use crate::protocol::response::{BatchDemuxer, BatchDescriptor};
use crate::protocol::{is_last_response, ProtocolVersion, QUERY_ID_HEADER};
use crate::record::Record;
use crate::transport::{error_for_status, HttpRequest, HttpResponse, Transport};
use futures::Stream;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Method;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Keep polling after the server reports no content, until cancelled
    pub continuous: bool,
    pub poll_interval: Duration,
    /// Read metadata only (HEAD); payloads are empty
    pub head: bool,
    pub queue_capacity: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            continuous: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            head: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Where the batches of a query are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// v1: `/b/<bucket>/<entry>/batch?q=<id>`
    Entry { bucket: String, entry: String },
    /// v2: `/io/<bucket>/read` with `x-reduct-query-id`
    Bucket { bucket: String },
}

impl QueryTarget {
    pub fn protocol(&self) -> ProtocolVersion {
        match self {
            QueryTarget::Entry { .. } => ProtocolVersion::V1,
            QueryTarget::Bucket { .. } => ProtocolVersion::V2,
        }
    }

    pub fn batch_request(&self, query_id: u64, head: bool) -> HttpRequest {
        let method = if head { Method::HEAD } else { Method::GET };
        let mut request = match self {
            QueryTarget::Entry { bucket, entry } => {
                HttpRequest::new(method, format!("/b/{}/{}/batch?q={}", bucket, entry, query_id))
            }
            QueryTarget::Bucket { bucket } => {
                let mut request = HttpRequest::new(method, format!("/io/{}/read", bucket));
                request
                    .headers
                    .insert(QUERY_ID_HEADER, HeaderValue::from(query_id));
                request
            }
        };
        if !head {
            request
                .headers
                .insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));
        }
        request
    }

    fn decode(&self, response: HttpResponse, head: bool) -> Result<FetchedBatch> {
        let descriptor = match self {
            QueryTarget::Entry { entry, .. } => BatchDescriptor::parse_v1(entry, &response.headers)?,
            QueryTarget::Bucket { .. } => BatchDescriptor::parse_v2(&response.headers)?,
        };
        if descriptor.is_empty() {
            if is_last_response(&response.headers) {
                return Ok(FetchedBatch::Finished);
            }
            return Ok(FetchedBatch::Empty);
        }
        Ok(FetchedBatch::Records(BatchDemuxer::new(descriptor, response.body, head)))
    }
}

enum FetchedBatch {
    Records(BatchDemuxer),
    /// No records yet, but the query is still open
    Empty,
    /// No records and flagged last
    Finished,
}

/// Records of a query, in order.
///
/// Errors other than "no content" end the stream after being yielded once.
/// Cancellation ends it silently. Dropping the stream cancels the worker.
pub struct QueryStream {
    receiver: mpsc::Receiver<Result<Record>>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    _guard: DropGuard,
}

impl QueryStream {
    /// Spawn the worker on the current tokio runtime. `cancel` stops the
    /// query from outside; a child token is used so dropping the stream
    /// does not cancel anything else.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        target: QueryTarget,
        query_id: u64,
        options: QueryOptions,
        cancel: CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let worker = QueryWorker {
            transport,
            target,
            query_id,
            options,
            cancel: cancel.clone(),
            sender,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            receiver,
            _guard: cancel.clone().drop_guard(),
            cancel,
            worker,
        }
    }

    /// Next record, `None` once the query is done
    pub async fn next_record(&mut self) -> Option<Result<Record>> {
        self.receiver.recv().await
    }

    /// Stop the query; records already queued are still delivered
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

impl Stream for QueryStream {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

enum QueryState {
    Fetching,
    Demuxing(BatchDemuxer),
    Polling,
    Done,
}

struct QueryWorker {
    transport: Arc<dyn Transport>,
    target: QueryTarget,
    query_id: u64,
    options: QueryOptions,
    cancel: CancellationToken,
    sender: mpsc::Sender<Result<Record>>,
}

impl QueryWorker {
    async fn run(self) {
        debug!("Query {} started on {:?}", self.query_id, self.target);
        let mut state = QueryState::Fetching;
        loop {
            state = match state {
                QueryState::Fetching => self.fetch().await,
                QueryState::Demuxing(demuxer) => self.drain(demuxer).await,
                QueryState::Polling => self.poll().await,
                QueryState::Done => break,
            };
        }
        // The sender drops with `self`, closing the channel once
        debug!("Query {} finished", self.query_id);
    }

    async fn fetch(&self) -> QueryState {
        let request = self.target.batch_request(self.query_id, self.options.head);
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return QueryState::Done,
            response = self.transport.send(request) => response,
        };

        let batch = response
            .and_then(error_for_status)
            .and_then(|response| self.target.decode(response, self.options.head));

        match batch {
            Ok(FetchedBatch::Records(demuxer)) => QueryState::Demuxing(demuxer),
            Ok(FetchedBatch::Finished) => QueryState::Done,
            Ok(FetchedBatch::Empty) => {
                // More batches remain for this query id; wait before asking again
                debug!("Query {}: empty batch, fetching again", self.query_id);
                QueryState::Polling
            }
            Err(BatchError::NoContent(message)) => {
                if self.options.continuous {
                    debug!("Query {}: {}, polling", self.query_id, message);
                    QueryState::Polling
                } else {
                    QueryState::Done
                }
            }
            Err(err) => {
                self.report(err).await;
                QueryState::Done
            }
        }
    }

    async fn drain(&self, mut demuxer: BatchDemuxer) -> QueryState {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return QueryState::Done,
                next = demuxer.next_record() => next,
            };
            let record = match next {
                Ok(Some(record)) => record,
                Ok(None) => return QueryState::Fetching,
                Err(err) => {
                    self.report(err).await;
                    return QueryState::Done;
                }
            };

            let last = record.is_last_in_query;
            if self.cancel.is_cancelled() {
                return QueryState::Done;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return QueryState::Done,
                sent = self.sender.send(Ok(record)) => {
                    if sent.is_err() {
                        return QueryState::Done;
                    }
                }
            }
            if last {
                return QueryState::Done;
            }
        }
    }

    async fn poll(&self) -> QueryState {
        tokio::select! {
            _ = self.cancel.cancelled() => QueryState::Done,
            _ = self.sender.closed() => QueryState::Done,
            _ = tokio::time::sleep(self.options.poll_interval) => QueryState::Fetching,
        }
    }

    async fn report(&self, err: BatchError) {
        warn!("Query {} failed: {}", self.query_id, err);
        if self.cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.sender.send(Err(err)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header_str;

    #[test]
    fn test_v1_batch_request() {
        let target = QueryTarget::Entry {
            bucket: "bucket".into(),
            entry: "entry-1".into(),
        };
        let request = target.batch_request(7, false);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path, "/b/bucket/entry-1/batch?q=7");
        assert_eq!(header_str(&request.headers, "accept"), Some("application/octet-stream"));
        assert_eq!(target.protocol(), ProtocolVersion::V1);
    }

    #[test]
    fn test_v2_head_request() {
        let target = QueryTarget::Bucket {
            bucket: "bucket".into(),
        };
        let request = target.batch_request(42, true);
        assert_eq!(request.method, Method::HEAD);
        assert_eq!(request.path, "/io/bucket/read");
        assert_eq!(header_str(&request.headers, "x-reduct-query-id"), Some("42"));
        assert!(request.headers.get("accept").is_none());
    }
}
