//! Fallback handler — everything outside the control prefix goes to the
//! active instance.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use tracing::warn;

use cutover_proxy::ProxyError;

use crate::ApiState;
use crate::handlers::error_response;

pub async fn forward(State(state): State<ApiState>, req: Request) -> Response {
    match state.coordinator.router().forward(req).await {
        Ok(resp) => resp.map(Body::new),
        Err(ProxyError::RouterUnset) => error_response(
            "no active instance is serving traffic yet",
            StatusCode::SERVICE_UNAVAILABLE,
        ),
        Err(e) => {
            warn!(error = %e, "proxy request failed");
            error_response(&e.to_string(), StatusCode::BAD_GATEWAY)
        }
    }
}
