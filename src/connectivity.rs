use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::transport::{
    OutgoingRequest, Transport, TransportError, TransportErrorKind, TransportResponse,
};

/// Whether the platform believes a network route exists.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity flag flipped by the connectivity monitor.
#[derive(Clone, Debug)]
pub struct ConnectivityFlag(Arc<AtomicBool>);

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    /// Returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        self.0.swap(online, Ordering::SeqCst)
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum AttemptOutcome {
    // 2xx
    Delivered(TransportResponse),
    // the server answered with anything else
    Rejected(TransportResponse),
    // no route to any host; the only outcome that may be queued
    ConnectivityAbsent(String),
    // the request never left in a usable form
    Fatal(TransportError),
}

pub fn classify(result: Result<TransportResponse, TransportError>) -> AttemptOutcome {
    match result {
        Ok(response) if response.status.is_success() => AttemptOutcome::Delivered(response),
        Ok(response) => AttemptOutcome::Rejected(response),
        Err(err) => match err.kind {
            TransportErrorKind::Connect
            | TransportErrorKind::Timeout
            | TransportErrorKind::Interrupted => {
                AttemptOutcome::ConnectivityAbsent(err.to_string())
            }
            TransportErrorKind::Request | TransportErrorKind::Body => AttemptOutcome::Fatal(err),
        },
    }
}

/// Runs an attempt and classifies it. Skips the network entirely while the
/// platform reports no connectivity.
#[derive(Clone)]
pub struct Classifier {
    connectivity: Arc<dyn Connectivity>,
}

impl Classifier {
    pub fn new(connectivity: Arc<dyn Connectivity>) -> Self {
        Self { connectivity }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub async fn attempt(
        &self,
        transport: &dyn Transport,
        request: OutgoingRequest,
    ) -> AttemptOutcome {
        if !self.connectivity.is_online() {
            tracing::debug!("platform offline, not attempting {} {}", request.method, request.url);
            return AttemptOutcome::ConnectivityAbsent("platform reports no network".to_string());
        }

        classify(transport.send(request).await)
    }
}
