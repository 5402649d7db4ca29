use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use http::Method;
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::{QueueEvent, QueuedRequest};

use crate::body;
use crate::connectivity::{AttemptOutcome, Classifier};
use crate::events::EventSink;
use crate::store::{QueueStore, StoreError};
use crate::token::CsrfPolicy;
use crate::transport::{OutgoingRequest, Transport, TransportErrorKind};

/// How a replay pass ended.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    Drained,
    // the head of the queue failed; later descriptors were not attempted
    Stopped { id: i64, error: String },
    StoreUnavailable { error: String },
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub abandoned: usize,
    pub remaining: usize,
    #[serde(flatten)]
    pub outcome: PassOutcome,
}

impl FlushReport {
    pub fn is_drained(&self) -> bool {
        self.outcome == PassOutcome::Drained
    }
}

enum ReplayFailure {
    Attempt { error: String, deterministic: bool },
    Store(StoreError),
}

type PendingPass = Shared<BoxFuture<'static, FlushReport>>;

/// Drains the queue in enqueue order, one request at a time.
///
/// Only one pass runs at a time. A trigger that arrives while a pass is in
/// flight awaits that pass instead of starting another.
#[derive(Clone)]
pub struct ReplayEngine {
    inner: Arc<ReplayInner>,
}

pub struct ReplayParts {
    pub store: Arc<dyn QueueStore>,
    pub transport: Arc<dyn Transport>,
    pub classifier: Classifier,
    pub csrf: CsrfPolicy,
    pub events: Arc<dyn EventSink>,
    // 0 disables the ceiling
    pub max_attempts: u32,
}

struct ReplayInner {
    parts: ReplayParts,
    in_flight: Mutex<Option<PendingPass>>,
}

impl ReplayEngine {
    pub fn new(parts: ReplayParts) -> Self {
        Self {
            inner: Arc::new(ReplayInner {
                parts,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub async fn flush(&self) -> FlushReport {
        let pass = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.as_ref() {
                Some(pass) => {
                    tracing::debug!("flush already in progress, joining it");
                    pass.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    // spawned so that dropping the trigger does not cancel the pass
                    let handle = tokio::spawn(async move { inner.run_pass().await });
                    let inner = Arc::clone(&self.inner);
                    let pass = async move {
                        let result = handle.await;
                        *inner.in_flight.lock() = None;
                        result.unwrap_or_else(|err| {
                            tracing::error!("replay pass aborted: {}", err);
                            FlushReport {
                                delivered: 0,
                                abandoned: 0,
                                remaining: 0,
                                outcome: PassOutcome::StoreUnavailable {
                                    error: err.to_string(),
                                },
                            }
                        })
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some(pass.clone());
                    pass
                }
            }
        };

        pass.await
    }
}

impl ReplayInner {
    #[tracing::instrument(level = "debug", name = "replay", skip_all)]
    async fn run_pass(&self) -> FlushReport {
        let parts = &self.parts;

        let snapshot = match parts.store.list().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::error!("Error listing queued requests: {}", err);
                parts.events.publish(QueueEvent::FlushStarted { pending: 0 });
                parts.events.publish(QueueEvent::FlushCompleted {
                    delivered: 0,
                    remaining: 0,
                });
                return FlushReport {
                    delivered: 0,
                    abandoned: 0,
                    remaining: 0,
                    outcome: PassOutcome::StoreUnavailable {
                        error: err.to_string(),
                    },
                };
            }
        };

        let total = snapshot.len();
        parts
            .events
            .publish(QueueEvent::FlushStarted { pending: total });
        tracing::debug!("replaying {} queued requests", total);

        let mut delivered = 0;
        let mut abandoned = 0;
        let mut outcome = PassOutcome::Drained;

        for req in snapshot {
            let (error, deterministic) = match self.replay_one(&req).await {
                Ok(()) => {
                    delivered += 1;
                    continue;
                }
                Err(ReplayFailure::Store(err)) => {
                    tracing::error!("Error removing delivered request {}: {}", req.id, err);
                    outcome = PassOutcome::StoreUnavailable {
                        error: err.to_string(),
                    };
                    break;
                }
                Err(ReplayFailure::Attempt {
                    error,
                    deterministic,
                }) => (error, deterministic),
            };

            let updated = match parts.store.mark_failed(req.id, &error).await {
                Ok(updated) => updated,
                Err(err) => {
                    tracing::error!("Error marking request {} failed: {}", req.id, err);
                    outcome = PassOutcome::StoreUnavailable {
                        error: err.to_string(),
                    };
                    break;
                }
            };

            if deterministic && parts.max_attempts > 0 && updated.attempts >= parts.max_attempts {
                match parts.store.abandon(req.id).await {
                    Ok(()) => {
                        tracing::warn!(
                            "request {} abandoned after {} attempts: {}",
                            req.id,
                            updated.attempts,
                            error
                        );
                        parts.events.publish(QueueEvent::Abandoned {
                            id: req.id,
                            attempts: updated.attempts,
                        });
                        abandoned += 1;
                        continue;
                    }
                    Err(err) => {
                        tracing::error!("Error abandoning request {}: {}", req.id, err);
                        outcome = PassOutcome::StoreUnavailable {
                            error: err.to_string(),
                        };
                        break;
                    }
                }
            }

            tracing::warn!(
                "replay of request {} failed (attempt {}), stopping pass: {}",
                req.id,
                updated.attempts,
                error
            );
            outcome = PassOutcome::Stopped { id: req.id, error };
            break;
        }

        let remaining = match parts.store.count().await {
            Ok(counts) => counts.pending,
            Err(_) => total - delivered - abandoned,
        };

        parts.events.publish(QueueEvent::FlushCompleted {
            delivered,
            remaining,
        });

        FlushReport {
            delivered,
            abandoned,
            remaining,
            outcome,
        }
    }

    async fn replay_one(&self, req: &QueuedRequest) -> Result<(), ReplayFailure> {
        let parts = &self.parts;

        let method = Method::from_bytes(req.method.as_bytes()).map_err(|_| {
            ReplayFailure::Attempt {
                error: format!("invalid method {:?}", req.method),
                deterministic: true,
            }
        })?;

        let mut headers = req.headers.clone();
        if req.requires_csrf {
            parts.csrf.attach(&mut headers);
        }

        let body = (!req.body.is_empty()).then(|| body::deserialize(&req.body));
        let outgoing = OutgoingRequest {
            method,
            url: req.url(),
            headers,
            body,
        };

        tracing::debug!("replaying request {} {} {}", req.id, req.method, req.path);

        match parts
            .classifier
            .attempt(parts.transport.as_ref(), outgoing)
            .await
        {
            AttemptOutcome::Delivered(response) => {
                if !parts.store.remove(req.id).await.map_err(ReplayFailure::Store)? {
                    tracing::debug!("request {} was already removed", req.id);
                }
                tracing::info!("delivered queued request {} ({})", req.id, response.status);
                Ok(())
            }
            AttemptOutcome::Rejected(response) => Err(ReplayFailure::Attempt {
                error: format!(
                    "HTTP {}: {}",
                    response.status,
                    String::from_utf8_lossy(&response.body)
                ),
                deterministic: true,
            }),
            AttemptOutcome::ConnectivityAbsent(error) => Err(ReplayFailure::Attempt {
                error,
                deterministic: false,
            }),
            // only a request that cannot be built counts toward the ceiling
            AttemptOutcome::Fatal(err) => Err(ReplayFailure::Attempt {
                deterministic: err.kind == TransportErrorKind::Request,
                error: err.to_string(),
            }),
        }
    }
}
