use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::body::BodyError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Failure of a façade call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server answered with a non-2xx status. Never queued.
    #[error("server responded {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// A read could not reach the server.
    #[error("offline: {0}")]
    Offline(String),
    #[error(transparent)]
    Body(#[from] BodyError),
    /// The request could not be made durable.
    #[error("queue storage failed: {0}")]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("response body is not JSON: {0}")]
    Decode(serde_json::Error),
}

impl Error {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(StoreError::NotFound(id)) = self.0.downcast_ref::<StoreError>() {
            tracing::debug!("request {} not found", id);
            return (StatusCode::NOT_FOUND, "Not found".to_string()).into_response();
        }

        tracing::error!("Error: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Unexpected error!".to_string(),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
