//! Scriptable collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use shared_types::QueuedRequest;
use tokio::sync::{watch, Notify};

use crate::store::{MemoryQueueStore, NewQueuedRequest, QueueCounts, QueueStore, StoreError};
use crate::transport::{
    OutgoingRequest, Transport, TransportError, TransportErrorKind, TransportResponse,
};

type Scripted = Result<(StatusCode, String), TransportError>;

/// Records every request and answers from a script. Answers 200 with an
/// empty body until told otherwise.
pub struct FakeTransport {
    requests: Mutex<Vec<OutgoingRequest>>,
    default: Mutex<Scripted>,
    by_path: Mutex<HashMap<String, Scripted>>,
    seen: Notify,
    paused: watch::Sender<bool>,
    panic_next: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            requests: Mutex::new(Vec::new()),
            default: Mutex::new(Ok((StatusCode::OK, String::new()))),
            by_path: Mutex::new(HashMap::new()),
            seen: Notify::new(),
            paused,
            panic_next: AtomicBool::new(false),
        }
    }

    pub fn requests(&self) -> Vec<OutgoingRequest> {
        self.requests.lock().clone()
    }

    pub fn respond_with(&self, status: StatusCode, body: &str) {
        *self.default.lock() = Ok((status, body.to_string()));
    }

    /// Overrides the answer for URLs ending in `path`.
    pub fn respond_for(&self, path: &str, status: StatusCode, body: &str) {
        self.by_path
            .lock()
            .insert(path.to_string(), Ok((status, body.to_string())));
    }

    pub fn fail_with(&self, kind: TransportErrorKind, message: &str) {
        *self.default.lock() = Err(TransportError::new(kind, message));
    }

    /// The next `send` panics instead of answering.
    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Requests are recorded but held until `resume`.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub async fn wait_for_requests(&self, n: usize) {
        loop {
            let notified = self.seen.notified();
            if self.requests.lock().len() >= n {
                return;
            }
            notified.await;
        }
    }

    fn answer_for(&self, url: &str) -> Scripted {
        let by_path = self.by_path.lock();
        by_path
            .iter()
            .find(|(path, _)| url.ends_with(path.as_str()))
            .map(|(_, scripted)| scripted.clone())
            .unwrap_or_else(|| self.default.lock().clone())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("transport blew up sending {}", request.url);
        }
        let answer = self.answer_for(&request.url);
        self.requests.lock().push(request);
        self.seen.notify_waiters();

        let mut paused = self.paused.subscribe();
        while *paused.borrow_and_update() {
            if paused.changed().await.is_err() {
                break;
            }
        }

        answer.map(|(status, body)| TransportResponse {
            status,
            body: Bytes::from(body),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    Enqueue,
    List,
    Remove(i64),
    MarkFailed(i64),
    Abandon(i64),
    Requeue(i64),
}

/// A memory store that remembers which operations were called.
pub struct RecordingStore {
    inner: MemoryQueueStore,
    calls: Mutex<Vec<StoreCall>>,
    fail_writes: AtomicBool,
    fail_lists: AtomicBool,
}

impl RecordingStore {
    pub fn new(inner: MemoryQueueStore) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Makes every following `enqueue` fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Makes every following `list` fail.
    pub fn fail_lists(&self) {
        self.fail_lists.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl QueueStore for RecordingStore {
    async fn enqueue(&self, req: NewQueuedRequest) -> Result<i64, StoreError> {
        self.record(StoreCall::Enqueue);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.enqueue(req).await
    }

    async fn list(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        self.record(StoreCall::List);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.list().await
    }

    async fn remove(&self, id: i64) -> Result<bool, StoreError> {
        self.record(StoreCall::Remove(id));
        self.inner.remove(id).await
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<QueuedRequest, StoreError> {
        self.record(StoreCall::MarkFailed(id));
        self.inner.mark_failed(id, error).await
    }

    async fn get(&self, id: i64) -> Result<QueuedRequest, StoreError> {
        self.inner.get(id).await
    }

    async fn abandon(&self, id: i64) -> Result<(), StoreError> {
        self.record(StoreCall::Abandon(id));
        self.inner.abandon(id).await
    }

    async fn list_abandoned(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        self.inner.list_abandoned().await
    }

    async fn requeue(&self, id: i64) -> Result<(), StoreError> {
        self.record(StoreCall::Requeue(id));
        self.inner.requeue(id).await
    }

    async fn count(&self) -> Result<QueueCounts, StoreError> {
        self.inner.count().await
    }
}
