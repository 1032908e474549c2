//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{MethodRouter, get, post, put},
};
use serde::{Deserialize, Serialize};

use crate::bridge::protocol::{Message, Operation};
use crate::error::BridgeError;
use crate::health::Health;
use crate::service::{BridgeService, HealthSnapshot, ReplyMode};
use crate::version::VersionInfo;
use crate::worker::WorkerInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: Health,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerInfo>,
    pub reply_mode: ReplyMode,
    pub version: VersionInfo,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.state,
            worker: snapshot.worker,
            reply_mode: snapshot.reply_mode,
            version: snapshot.version,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetWorkerRequest {
    pub binary_name: String,
}

#[derive(Debug, Serialize)]
struct SetWorkerResponse {
    worker: WorkerInfo,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

fn status_for(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::NotProvisioned => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::InvalidBinaryName(_) | BridgeError::Malformed(_) => StatusCode::BAD_REQUEST,
        BridgeError::UnsupportedOperation(_) | BridgeError::UnexpectedPayload { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        BridgeError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        BridgeError::Encode(_)
        | BridgeError::Write(_)
        | BridgeError::WorkerExited
        | BridgeError::BadReply { .. }
        | BridgeError::Worker { .. } => StatusCode::BAD_GATEWAY,
        BridgeError::ReplyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn error_response(err: BridgeError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(kind = err.kind(), error = %err, "Request failed");
    } else {
        tracing::warn!(kind = err.kind(), error = %err, "Request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind(),
        }),
    )
        .into_response()
}

async fn health_check(State(service): State<Arc<BridgeService>>) -> Json<HealthCheckResponse> {
    Json(service.health().await.into())
}

async fn set_worker(
    State(service): State<Arc<BridgeService>>,
    body: Result<Json<SetWorkerRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(BridgeError::Malformed(rejection.body_text())),
    };
    match service.set_worker(&request.binary_name).await {
        Ok(worker) => (StatusCode::OK, Json(SetWorkerResponse { worker })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Forward one request body. `None` dispatches on the body's own `type`.
async fn handle_operation(
    service: Arc<BridgeService>,
    op: Option<Operation>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let value = match body {
        Ok(Json(value)) => value,
        Err(rejection) => return error_response(BridgeError::Malformed(rejection.body_text())),
    };
    let result = match Message::from_value(value) {
        Ok(request) => match op {
            Some(op) => service.request(op, request).await,
            None => service.call(request).await,
        },
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => error_response(e),
    }
}

fn operation(op: Operation) -> MethodRouter<Arc<BridgeService>> {
    post(
        move |State(service): State<Arc<BridgeService>>,
              body: Result<Json<serde_json::Value>, JsonRejection>| {
            handle_operation(service, Some(op), body)
        },
    )
}

async fn rpc(
    State(service): State<Arc<BridgeService>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    handle_operation(service, None, body).await
}

async fn shutdown(State(service): State<Arc<BridgeService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(service: Arc<BridgeService>) -> Router {
    let mut router = Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .route("/worker", put(set_worker))
        .route("/rpc", post(rpc));
    for op in Operation::ALL {
        router = router.route(&format!("/{op}"), operation(op));
    }
    router.with_state(service)
}
