//! Control API handlers.
//!
//! Each handler calls into the `Coordinator` or `LogTailer` and returns
//! the JSON envelope below.

use std::convert::Infallible;
use std::path::PathBuf;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use serde::de::{self, Deserialize, Deserializer};
use tracing::{info, warn};

use cutover_core::VersionId;
use cutover_rollout::{DeployError, PendingDeployment};
use cutover_supervisor::{LogLine, StartError, TailError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn deploy_error_status(err: &DeployError) -> StatusCode {
    match err {
        DeployError::Conflict { .. } => StatusCode::CONFLICT,
        DeployError::NotFound(_) => StatusCode::NOT_FOUND,
        DeployError::Start(StartError::Spawn { .. } | StartError::Sink { .. }) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        DeployError::Start(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DeployError::NoFreePort(_) => StatusCode::SERVICE_UNAVAILABLE,
        DeployError::HealthTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DeployError::State(_) | DeployError::Watch(_) | DeployError::Interrupted(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn deploy_error(err: DeployError) -> Response {
    error_response(&err.to_string(), deploy_error_status(&err))
}

/// Body of an accepted deploy or rollback.
#[derive(Debug, serde::Serialize)]
pub struct Accepted {
    pub version_id: VersionId,
    pub port: u16,
}

/// Reply before the health gate settles. The coordinator finishes the
/// deployment on its own; its outcome shows up in `status`.
fn accept(pending: PendingDeployment) -> Response {
    let accepted = Accepted {
        version_id: pending.version_id().clone(),
        port: pending.port(),
    };
    drop(pending);
    (StatusCode::ACCEPTED, ApiResponse::ok(accepted)).into_response()
}

// ── Deployments ────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
pub struct DeployRequest {
    pub artifact_path: PathBuf,
}

/// POST {prefix}/deploy
pub async fn deploy(State(state): State<ApiState>, Json(req): Json<DeployRequest>) -> Response {
    info!(artifact = %req.artifact_path.display(), "deploy requested");
    match state.coordinator.begin_deploy(&req.artifact_path).await {
        Ok(pending) => accept(pending),
        Err(e) => deploy_error(e),
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct RollbackRequest {
    pub version_id: VersionId,
}

/// POST {prefix}/rollback
pub async fn rollback(State(state): State<ApiState>, Json(req): Json<RollbackRequest>) -> Response {
    info!(version_id = %req.version_id, "rollback requested");
    match state.coordinator.begin_rollback(&req.version_id).await {
        Ok(pending) => accept(pending),
        Err(e) => deploy_error(e),
    }
}

/// POST {prefix}/cleanup
pub async fn cleanup(State(state): State<ApiState>) -> Response {
    let stopped = state.coordinator.cleanup().await;
    ApiResponse::ok(serde_json::json!({ "stopped": stopped })).into_response()
}

// ── Queries ────────────────────────────────────────────────────

/// GET {prefix}/status
pub async fn status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.coordinator.status()).into_response()
}

/// GET {prefix}/versions
pub async fn versions(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.coordinator.versions()).into_response()
}

// ── Logs ───────────────────────────────────────────────────────

#[derive(Debug, Default, serde::Deserialize)]
pub struct LogsQuery {
    /// Replay the log from its first line instead of its end.
    #[serde(default, alias = "full", deserialize_with = "query_flag")]
    pub from_start: bool,
}

/// `1`/`0` as well as `true`/`false`, as sent by plain HTML links.
fn query_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(d)?;
    match raw.as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        other => Err(de::Error::invalid_value(
            de::Unexpected::Str(other),
            &"1, 0, true or false",
        )),
    }
}

/// GET {prefix}/logs/{version_id}
pub async fn logs(
    State(state): State<ApiState>,
    Path(version_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let version_id = match VersionId::parse(&version_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST),
    };

    match state.tailer.stream(&version_id, query.from_start).await {
        Ok(lines) => Sse::new(events(lines))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(TailError::NotFound(id)) => {
            error_response(&format!("no logs for version {id}"), StatusCode::NOT_FOUND)
        }
        Err(e) => {
            warn!(%version_id, error = %e, "failed to open log stream");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn events(
    lines: impl Stream<Item = LogLine> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    lines.map(|line| {
        // SSE data lines cannot carry a bare carriage return.
        let text = line.text.replace('\r', "");
        Ok(Event::default().id(line.seq.to_string()).data(text))
    })
}
