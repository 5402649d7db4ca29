use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::{QueuedRequest, RequestState, SerializedBody};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("queued request {0} not found")]
    NotFound(i64),
    #[error("queued request {id} is corrupt: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to encode headers: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything about a descriptor that is fixed at enqueue time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewQueuedRequest {
    pub base_url: String,
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: SerializedBody,
    pub requires_csrf: bool,
    pub queued_at: i64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub abandoned: usize,
}

/// Durable storage for descriptors waiting to be replayed.
///
/// `list` only returns `Pending` descriptors, ordered by `queued_at` then `id`.
/// Each call is atomic with respect to the descriptor it touches.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, req: NewQueuedRequest) -> Result<i64, StoreError>;

    async fn list(&self) -> Result<Vec<QueuedRequest>, StoreError>;

    /// Returns false when no descriptor had this id.
    async fn remove(&self, id: i64) -> Result<bool, StoreError>;

    /// Bumps `attempts`, records `error`, and returns the updated descriptor.
    async fn mark_failed(&self, id: i64, error: &str) -> Result<QueuedRequest, StoreError>;

    async fn get(&self, id: i64) -> Result<QueuedRequest, StoreError>;

    async fn abandon(&self, id: i64) -> Result<(), StoreError>;

    async fn list_abandoned(&self) -> Result<Vec<QueuedRequest>, StoreError>;

    /// Moves an abandoned descriptor back to pending with a fresh attempt count.
    async fn requeue(&self, id: i64) -> Result<(), StoreError>;

    async fn count(&self) -> Result<QueueCounts, StoreError>;
}

/// In-process store. Nothing survives a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryQueueStore(Arc<Mutex<MemoryInner>>);

#[derive(Debug, Default)]
struct MemoryInner {
    last_id: i64,
    requests: BTreeMap<i64, QueuedRequest>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn in_state(&self, state: RequestState) -> Vec<QueuedRequest> {
        let inner = self.0.lock();
        let mut requests: Vec<QueuedRequest> = inner
            .requests
            .values()
            .filter(|req| req.state == state)
            .cloned()
            .collect();
        requests.sort_by_key(|req| (req.queued_at, req.id));
        requests
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, req: NewQueuedRequest) -> Result<i64, StoreError> {
        let mut inner = self.0.lock();
        inner.last_id += 1;
        let id = inner.last_id;
        inner.requests.insert(
            id,
            QueuedRequest {
                id,
                base_url: req.base_url,
                path: req.path,
                method: req.method,
                headers: req.headers,
                body: req.body,
                requires_csrf: req.requires_csrf,
                queued_at: req.queued_at,
                attempts: 0,
                last_error: None,
                state: RequestState::Pending,
            },
        );
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        Ok(self.in_state(RequestState::Pending))
    }

    async fn remove(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.0.lock().requests.remove(&id).is_some())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<QueuedRequest, StoreError> {
        let mut inner = self.0.lock();
        let req = inner
            .requests
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        req.attempts = req.attempts.saturating_add(1);
        req.last_error = Some(error.to_string());
        Ok(req.clone())
    }

    async fn get(&self, id: i64) -> Result<QueuedRequest, StoreError> {
        self.0
            .lock()
            .requests
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn abandon(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.0.lock();
        let req = inner
            .requests
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        req.state = RequestState::Abandoned;
        Ok(())
    }

    async fn list_abandoned(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        Ok(self.in_state(RequestState::Abandoned))
    }

    async fn requeue(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.0.lock();
        match inner.requests.get_mut(&id) {
            Some(req) if req.state == RequestState::Abandoned => {
                req.state = RequestState::Pending;
                req.attempts = 0;
                req.last_error = None;
                Ok(())
            }
            _ => Err(StoreError::NotFound(id)),
        }
    }

    async fn count(&self) -> Result<QueueCounts, StoreError> {
        let inner = self.0.lock();
        let mut counts = QueueCounts::default();
        for req in inner.requests.values() {
            match req.state {
                RequestState::Pending => counts.pending += 1,
                RequestState::Abandoned => counts.abandoned += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
pub(crate) fn new_request(path: &str, queued_at: i64) -> NewQueuedRequest {
    NewQueuedRequest {
        base_url: "http://kitchen.test".to_string(),
        path: path.to_string(),
        method: "POST".to_string(),
        headers: vec![("Accept".to_string(), "application/json".to_string())],
        body: SerializedBody::Text {
            content_type: "application/json".to_string(),
            content: r#"{"foo":"bar"}"#.to_string(),
        },
        requires_csrf: true,
        queued_at,
    }
}
