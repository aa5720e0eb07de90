//! HTTP surface of the store.
//!
//! - `PUT /v1/{key}` stores the request body, answers `201 Created`.
//! - `GET /v1/{key}` answers the value or `404 Not Found`.
//! - `DELETE /v1/{key}` removes the key, answers `200 OK` even when absent.
//!
//! Mutations are applied to the store first and recorded on the transaction
//! log afterwards. Once the log writer has failed, mutating requests are
//! refused with `503 Service Unavailable`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::put,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::logger::TransactionLogger;
use crate::store::KvStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<KvStore>,
    pub logger: Arc<dyn TransactionLogger>,
}

impl AppState {
    pub fn new(store: Arc<KvStore>, logger: Arc<dyn TransactionLogger>) -> Self {
        Self { store, logger }
    }

    fn ensure_log_writable(&self) -> Result<(), ApiError> {
        match self.logger.errors().current() {
            Some(err) => {
                warn!(error = %err, "rejecting mutation: transaction log unavailable");
                Err(ApiError::LogUnavailable)
            }
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    LogUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::LogUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "transaction log unavailable",
            )
                .into_response(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/:key",
            put(put_value).get(get_value).delete(delete_value),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn put_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    value: String,
) -> Result<StatusCode, ApiError> {
    state.ensure_log_writable()?;
    state.store.put(key.clone(), value.clone());
    state.logger.record_put(&key, &value);
    Ok(StatusCode::CREATED)
}

async fn get_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<String, ApiError> {
    state.store.get(&key).ok_or(ApiError::NotFound)
}

async fn delete_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.ensure_log_writable()?;
    state.store.delete(&key);
    state.logger.record_delete(&key);
    Ok(StatusCode::OK)
}
