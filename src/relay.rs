use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use http::Method;
use serde_json::json;
use shared_types::{join_url, QueueEvent, QueuedRequest, SerializedBody};

use crate::body::{self, RequestBody};
use crate::connectivity::{AttemptOutcome, Classifier, Connectivity};
use crate::error::Error;
use crate::events::EventSink;
use crate::replay::{FlushReport, ReplayEngine, ReplayParts};
use crate::store::{NewQueuedRequest, QueueStore};
use crate::token::{CsrfPolicy, TokenProvider};
use crate::transport::{OutgoingRequest, Transport};

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub csrf_header: String,
    pub max_attempts: u32,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            csrf_header: "X-CSRFToken".to_string(),
            max_attempts: 20,
        }
    }
}

/// The collaborators a relay is wired to.
pub struct Parts {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn QueueStore>,
    pub tokens: Arc<dyn TokenProvider>,
    pub connectivity: Arc<dyn Connectivity>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Response(serde_json::Value),
    // no route to the server; the request waits in the queue
    Queued { id: i64 },
}

impl Outcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Outcome::Queued { .. })
    }

    /// The JSON the caller sees. Queued requests read as `{"queued":true}`.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Outcome::Response(value) => value,
            Outcome::Queued { .. } => json!({ "queued": true }),
        }
    }
}

/// HTTP façade for the backend API.
///
/// Mutating calls that cannot reach the server are queued and reported as
/// [`Outcome::Queued`]. Any response from the server, including errors, is
/// returned to the caller as is.
#[derive(Clone)]
pub struct Relay {
    base_url: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn QueueStore>,
    classifier: Classifier,
    csrf: CsrfPolicy,
    events: Arc<dyn EventSink>,
    replay: ReplayEngine,
}

impl Relay {
    pub fn new(config: ClientConfig, parts: Parts) -> Self {
        let classifier = Classifier::new(parts.connectivity);
        let csrf = CsrfPolicy::new(parts.tokens, config.csrf_header);
        let replay = ReplayEngine::new(ReplayParts {
            store: Arc::clone(&parts.store),
            transport: Arc::clone(&parts.transport),
            classifier: classifier.clone(),
            csrf: csrf.clone(),
            events: Arc::clone(&parts.events),
            max_attempts: config.max_attempts,
        });

        Self {
            base_url: config.base_url,
            transport: parts.transport,
            store: parts.store,
            classifier,
            csrf,
            events: parts.events,
            replay,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn is_online(&self) -> bool {
        self.classifier.is_online()
    }

    pub async fn get(&self, path: &str) -> Result<Outcome, Error> {
        self.request(Method::GET, path, None, &[]).await
    }

    pub async fn post(&self, path: &str, body: Option<RequestBody>) -> Result<Outcome, Error> {
        self.request(Method::POST, path, body, &[]).await
    }

    pub async fn put(&self, path: &str, body: Option<RequestBody>) -> Result<Outcome, Error> {
        self.request(Method::PUT, path, body, &[]).await
    }

    pub async fn patch(&self, path: &str, body: Option<RequestBody>) -> Result<Outcome, Error> {
        self.request(Method::PATCH, path, body, &[]).await
    }

    pub async fn delete(&self, path: &str, body: Option<RequestBody>) -> Result<Outcome, Error> {
        self.request(Method::DELETE, path, body, &[]).await
    }

    /// Replays the queue. Joins the pass already running, if any.
    pub async fn flush_queue(&self) -> FlushReport {
        self.replay.flush().await
    }

    pub async fn pending(&self) -> Result<Vec<QueuedRequest>, Error> {
        Ok(self.store.list().await?)
    }

    /// Sends one request. `overrides` replace default headers by name. An
    /// anti-forgery header given here is used for the live attempt only; a
    /// queued copy gets a fresh token when it is replayed.
    #[tracing::instrument(level = "debug", skip(self, method, body, overrides), fields(%method))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        overrides: &[(&str, &str)],
    ) -> Result<Outcome, Error> {
        let mutating = is_mutating(&method);

        let serialized = match &body {
            Some(body) => body::serialize(body)?,
            None => SerializedBody::Empty,
        };
        let prepared = (!serialized.is_empty()).then(|| body::deserialize(&serialized));

        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(content_type) = prepared.as_ref().and_then(|p| p.content_type.clone()) {
            headers.push(("Content-Type".to_string(), content_type));
        }
        let mut token_override = None;
        for (name, value) in overrides {
            if self.csrf.is_token_header(name) {
                token_override = Some((*name, *value));
                continue;
            }
            set_header(&mut headers, name, value);
        }

        let mut sent_headers = headers.clone();
        if mutating {
            self.csrf.attach(&mut sent_headers);
        }
        if let Some((name, value)) = token_override {
            sent_headers.retain(|(existing, _)| !self.csrf.is_token_header(existing));
            sent_headers.push((name.to_string(), value.to_string()));
        }

        let outgoing = OutgoingRequest {
            method: method.clone(),
            url: join_url(&self.base_url, path),
            headers: sent_headers,
            body: prepared,
        };

        match self
            .classifier
            .attempt(self.transport.as_ref(), outgoing)
            .await
        {
            AttemptOutcome::Delivered(response) => {
                if mutating {
                    self.catch_up().await;
                }
                Ok(Outcome::Response(parse_json(&response.body)?))
            }
            AttemptOutcome::Rejected(response) => Err(Error::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }),
            AttemptOutcome::ConnectivityAbsent(reason) if mutating => {
                let req = NewQueuedRequest {
                    base_url: self.base_url.clone(),
                    path: path.to_string(),
                    method: method.to_string(),
                    headers,
                    body: serialized,
                    requires_csrf: true,
                    queued_at: now_millis(),
                };
                let id = self.store.enqueue(req).await?;

                tracing::info!("queued {} {} as request {}: {}", method, path, id, reason);
                self.events.publish(QueueEvent::Queued {
                    id,
                    method: method.to_string(),
                    path: path.to_string(),
                });

                Ok(Outcome::Queued { id })
            }
            AttemptOutcome::ConnectivityAbsent(reason) => Err(Error::Offline(reason)),
            AttemptOutcome::Fatal(err) => Err(Error::Transport(err)),
        }
    }

    /// Starts a replay pass in the background when requests queued earlier
    /// are still pending behind a call that just went through.
    async fn catch_up(&self) {
        match self.store.count().await {
            Ok(counts) if counts.pending > 0 => {
                tracing::debug!("{} queued requests pending, starting replay", counts.pending);
                let replay = self.replay.clone();
                tokio::spawn(async move { replay.flush().await });
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("Error counting queued requests: {}", err),
        }
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
    {
        Some(header) => header.1 = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

fn parse_json(body: &[u8]) -> Result<serde_json::Value, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(Error::Decode)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
