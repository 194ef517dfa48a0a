//! cutover-api — HTTP surface of the orchestrator.
//!
//! Control routes are nested under a prefix (default `/_cutover`); every
//! other request is forwarded to the active instance.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `{prefix}/deploy` | Start a deployment of `artifact_path` |
//! | POST | `{prefix}/rollback` | Redeploy a recorded `version_id` |
//! | GET | `{prefix}/status` | Active, standby and stray instances |
//! | GET | `{prefix}/versions` | Version history, oldest first |
//! | GET | `{prefix}/logs/{version_id}?from_start=` | SSE stream of output lines |
//! | POST | `{prefix}/cleanup` | Stop stray and failed instances |
//! | * | anything else | Reverse-proxied to the active instance |

pub mod handlers;
pub mod proxy;

use axum::Router;
use axum::routing::{get, post};

use cutover_rollout::Coordinator;
use cutover_supervisor::LogTailer;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Coordinator,
    pub tailer: LogTailer,
}

/// Build the complete router: control API under `prefix`, proxy elsewhere.
pub fn build_router(state: ApiState, prefix: &str) -> Router {
    let control = Router::new()
        .route("/deploy", post(handlers::deploy))
        .route("/rollback", post(handlers::rollback))
        .route("/status", get(handlers::status))
        .route("/versions", get(handlers::versions))
        .route("/logs/{version_id}", get(handlers::logs))
        .route("/cleanup", post(handlers::cleanup));

    Router::new()
        .nest(prefix, control)
        .fallback(proxy::forward)
        .with_state(state)
}
