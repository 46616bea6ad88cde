#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refharvest-health** – The process health HTTP surface (C10).
//!
//! Grounded in `toka-orchestration-service`'s `create_app`/`health_check`
//! pair: a tiny `axum` router with one state-carrying handler. Unlike the
//! teacher, which reports agent counts and session progress, this service
//! has exactly one thing to report - whether the broker connection is
//! healthy (§4.10) - so the router has exactly one route.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use refharvest_broker::ConnectionHealth;

/// Shared state the health route reads from.
#[derive(Clone)]
pub struct HealthState {
    broker_health: Arc<ConnectionHealth>,
}

impl HealthState {
    /// Build health state backed by the broker's connection-health flag.
    pub fn new(broker_health: Arc<ConnectionHealth>) -> Self {
        Self { broker_health }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Build the `GET /` health router described in §6: `200 {status:"OK"}`
/// when the broker is connected, `500 {status:"Unhealthy"}` otherwise.
pub fn router(state: HealthState) -> Router {
    Router::new().route("/", get(health_check)).with_state(state)
}

async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    if state.broker_health.is_disconnected() {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(HealthResponse { status: "Unhealthy" }))
    } else {
        (StatusCode::OK, Json(HealthResponse { status: "OK" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn reports_ok_when_connected() {
        let state = HealthState::new(ConnectionHealth::new());
        let app = router(state);
        let response = app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reports_unhealthy_once_broker_disconnects() {
        let health = ConnectionHealth::new();
        health.mark_disconnected();
        let state = HealthState::new(health);
        let app = router(state);
        let response = app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
