pub mod handlers;
pub mod types;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::anomaly::AnomalyEngine;
use crate::fraud::FraudEngine;
use crate::gate::{AttackShield, GateDecision};
use crate::manipulation::ManipulationEngine;
use crate::monitor::SecurityMonitor;
use crate::pipeline::AdmissionPipeline;
use crate::store::TransactionStore;

use types::ErrorResponse;

const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub monitor: Arc<SecurityMonitor>,
    pub pipeline: AdmissionPipeline,
    pub transactions: Arc<dyn TransactionStore>,
    pub anomaly: Arc<AnomalyEngine>,
    pub fraud: Arc<FraudEngine>,
    pub manipulation: Arc<ManipulationEngine>,
    pub shield: Arc<AttackShield>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route(
            "/api/v1/alerts",
            get(handlers::list_alerts).delete(handlers::clear_alerts),
        )
        .route("/api/v1/engines", get(handlers::list_engines))
        .route("/api/v1/engines/{name}/start", post(handlers::start_engine))
        .route("/api/v1/engines/{name}/stop", post(handlers::stop_engine))
        .route("/api/v1/blocked-ips", get(handlers::list_blocked_ips))
        .route("/api/v1/blocked-ips/{ip}", delete(handlers::unblock_ip))
        .route("/api/v1/rate-limits", delete(handlers::reset_rate_limits))
        .route(
            "/api/v1/transactions",
            post(handlers::submit_transaction).get(handlers::list_transactions),
        )
        .route("/api/v1/logins", post(handlers::record_login))
        .layer(middleware::from_fn_with_state(state.clone(), shield_gate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Per-request shield: blocked-IP check, rate quota and payload scanning
/// before any handler runs.
async fn shield_gate(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorResponse {
                    error: "request body too large".to_string(),
                }),
            )
                .into_response();
        }
    };
    let payload: Option<JsonValue> = if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&bytes).ok()
    };

    let decision = state.shield.check_request(
        addr.ip(),
        parts.uri.path(),
        parts.method.as_str(),
        payload.as_ref(),
    );
    match decision {
        GateDecision::Allow => {
            let request = Request::from_parts(parts, Body::from(bytes));
            next.run(request).await
        }
        GateDecision::Blocked | GateDecision::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "too many requests".to_string(),
            }),
        )
            .into_response(),
        GateDecision::Rejected { fields } => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("malicious content in fields: {}", fields.join(", ")),
            }),
        )
            .into_response(),
    }
}

pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> eyre::Result<()> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
