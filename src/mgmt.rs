use std::result::Result as StdResult;
use std::sync::Arc;

use axum::extract::{Extension, Json, Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Router,
};
use axum_auth::AuthBasic;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use shared_types::{QueuedRequestView, RequestState};

use crate::error::AppError;
use crate::relay::Relay;
use crate::replay::FlushReport;
use crate::store::StoreError;

/// Operator API over the queue. When `secret` is set every route requires
/// HTTP basic auth with the secret as the user id.
pub fn router(relay: Relay, secret: Option<String>) -> Router {
    let mut router = Router::new()
        .route("/requests", get(list_requests))
        .route("/requests/:id", get(get_request).delete(delete_request))
        .route("/queue", post(add_request_to_queue))
        .route("/flush", post(flush))
        .route("/status", get(status));

    if let Some(secret) = secret {
        router = router.route_layer(middleware::from_fn_with_state(
            Arc::new(secret),
            require_secret,
        ));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(Extension(relay))
}

async fn require_secret(
    State(secret): State<Arc<String>>,
    auth: Option<AuthBasic>,
    request: Request,
    next: Next,
) -> Response {
    match auth {
        Some(AuthBasic((user_id, _))) if user_id == *secret => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RequestsQuery {
    state: Option<RequestState>,
}

#[tracing::instrument(level = "trace", skip_all)]
async fn list_requests(
    Extension(relay): Extension<Relay>,
    Query(query): Query<RequestsQuery>,
) -> StdResult<impl IntoResponse, AppError> {
    let store = relay.store();
    let reqs = match query.state.unwrap_or(RequestState::Pending) {
        RequestState::Pending => store.list().await?,
        RequestState::Abandoned => store.list_abandoned().await?,
    };
    let views: Vec<QueuedRequestView> = reqs.iter().map(QueuedRequestView::from).collect();
    tracing::debug!("response = {:?}", &views);

    let mut headers = HeaderMap::new();
    headers.insert("Content-Range", content_range(&views)?);

    Ok((headers, Json(views)))
}

fn content_range<T>(list: &[T]) -> StdResult<HeaderValue, AppError> {
    let page_max = if list.is_empty() { 0 } else { list.len() - 1 };
    let range = format!("0-{}/{}", page_max, list.len());
    HeaderValue::from_str(&range).map_err(|e| e.into())
}

#[tracing::instrument(level = "trace", skip_all)]
async fn get_request(
    Extension(relay): Extension<Relay>,
    Path(id): Path<i64>,
) -> StdResult<Json<QueuedRequestView>, AppError> {
    tracing::debug!("request id = {}", id);
    let request = relay.store().get(id).await?;

    Ok(Json(QueuedRequestView::from(&request)))
}

#[tracing::instrument(level = "trace", skip_all)]
async fn delete_request(
    Extension(relay): Extension<Relay>,
    Path(id): Path<i64>,
) -> StdResult<impl IntoResponse, AppError> {
    tracing::debug!("request id = {}", id);
    if !relay.store().remove(id).await? {
        return Err(StoreError::NotFound(id).into());
    }
    tracing::info!("discarded queued request {}", id);

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NewQueueRequest {
    pub req_id: i64,
}

#[derive(Debug, Serialize)]
struct NewQueueResponse {
    id: i64,
}

#[tracing::instrument(level = "trace", skip_all)]
async fn add_request_to_queue(
    Extension(relay): Extension<Relay>,
    Json(payload): Json<NewQueueRequest>,
) -> StdResult<impl IntoResponse, AppError> {
    relay.store().requeue(payload.req_id).await?;
    tracing::info!("requeued request {}", payload.req_id);

    Ok(Json(NewQueueResponse { id: payload.req_id }))
}

#[tracing::instrument(level = "trace", skip_all)]
async fn flush(Extension(relay): Extension<Relay>) -> Json<FlushReport> {
    let report = relay.flush_queue().await;
    tracing::debug!("response = {:?}", &report);

    Json(report)
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Status {
    pub online: bool,
    pub pending: usize,
    pub abandoned: usize,
}

#[tracing::instrument(level = "trace", skip_all)]
async fn status(Extension(relay): Extension<Relay>) -> StdResult<Json<Status>, AppError> {
    let counts = relay.store().count().await?;

    Ok(Json(Status {
        online: relay.is_online(),
        pending: counts.pending,
        abandoned: counts.abandoned,
    }))
}
