use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use reqwest::cookie::Jar;

use crate::body::PreparedBody;

#[derive(Clone, Debug)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<PreparedBody>,
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    // no connection could be established
    Connect,
    // no response arrived in time
    Timeout,
    // the connection dropped before any response arrived
    Interrupted,
    // the request could not be built or sent
    Request,
    // a response started but its body could not be read
    Body,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The network call. Implementations include credentials (cookies) on every
/// request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError>;
}

/// `reqwest` transport sharing a cookie jar with the token provider.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(jar: Arc<Jar>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_provider(jar)
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body.bytes);
        }

        let response = builder.send().await.map_err(from_reqwest)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::new(TransportErrorKind::Body, err.to_string()))?;

        tracing::debug!(
            "{} {} --> {} ({} bytes)",
            request.method,
            request.url,
            status,
            body.len()
        );

        Ok(TransportResponse { status, body })
    }
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    let kind = if err.is_builder() || err.is_redirect() {
        TransportErrorKind::Request
    } else if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if err.status().is_none() {
        TransportErrorKind::Interrupted
    } else {
        TransportErrorKind::Request
    };

    TransportError::new(kind, err.to_string())
}
