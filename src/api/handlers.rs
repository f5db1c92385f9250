use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::pipeline::{AdmissionOutcome, TransactionDraft};

use super::types::*;
use super::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: msg.into() }))
}

// ============================================================
// Health & Alerts
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        alerts: state.monitor.alert_count(),
        users_monitored: state.monitor.users_monitored(),
        blocked_ips: state.shield.blocked_ips().len(),
    })
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertParams>,
) -> Json<AlertsResponse> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let alerts = state.monitor.get_alerts(limit);
    let count = alerts.len();
    Json(AlertsResponse { alerts, count })
}

pub async fn clear_alerts(State(state): State<Arc<AppState>>) -> Json<ClearedResponse> {
    let cleared = state.monitor.alert_count();
    state.monitor.clear_alerts();
    Json(ClearedResponse { cleared })
}

// ============================================================
// Engines
// ============================================================

pub async fn list_engines(State(state): State<Arc<AppState>>) -> Json<EnginesResponse> {
    Json(EnginesResponse {
        anomaly: EngineStatus {
            name: "anomaly",
            running: state.anomaly.is_running(),
            stats: state.anomaly.stats(),
        },
        fraud: EngineStatus {
            name: "fraud",
            running: state.fraud.is_running(),
            stats: state.fraud.stats(),
        },
        manipulation: EngineStatus {
            name: "manipulation",
            running: state.manipulation.is_running(),
            stats: state.manipulation.stats(),
        },
        gate: EngineStatus {
            name: "gate",
            running: state.shield.is_running(),
            stats: state.shield.stats(),
        },
    })
}

pub async fn start_engine(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<EngineActionResponse> {
    set_engine(&state, &name, true)
}

pub async fn stop_engine(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<EngineActionResponse> {
    set_engine(&state, &name, false)
}

fn set_engine(state: &AppState, name: &str, run: bool) -> ApiResult<EngineActionResponse> {
    let running = match name {
        "anomaly" => {
            if run {
                state.anomaly.start();
            } else {
                state.anomaly.stop();
            }
            state.anomaly.is_running()
        }
        "fraud" => {
            if run {
                state.fraud.start();
            } else {
                state.fraud.stop();
            }
            state.fraud.is_running()
        }
        "manipulation" => {
            if run {
                state.manipulation.start();
            } else {
                state.manipulation.stop();
            }
            state.manipulation.is_running()
        }
        "gate" => {
            if run {
                state.shield.start();
            } else {
                state.shield.stop();
            }
            state.shield.is_running()
        }
        _ => {
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("unknown engine '{name}'"),
            ))
        }
    };
    Ok(Json(EngineActionResponse {
        name: name.to_string(),
        running,
    }))
}

// ============================================================
// Blocked IPs
// ============================================================

pub async fn list_blocked_ips(State(state): State<Arc<AppState>>) -> Json<BlockedIpsResponse> {
    Json(BlockedIpsResponse {
        blocked: state
            .shield
            .blocked_ips()
            .into_iter()
            .map(|(ip, unblock_at)| BlockedIpEntry { ip, unblock_at })
            .collect(),
    })
}

pub async fn unblock_ip(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> ApiResult<ClearedResponse> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("invalid IP '{ip}'")))?;
    if state.shield.unblock(ip) {
        Ok(Json(ClearedResponse { cleared: 1 }))
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("{ip} is not blocked"),
        ))
    }
}

pub async fn reset_rate_limits(State(state): State<Arc<AppState>>) -> Json<ClearedResponse> {
    Json(ClearedResponse {
        cleared: state.shield.reset_rate_limits(),
    })
}

// ============================================================
// Transactions
// ============================================================

pub async fn submit_transaction(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<SubmitTransactionRequest>,
) -> Response {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let draft = TransactionDraft {
        user_id: req.user_id,
        wallet_address: req.wallet_address,
        tx_type: req.tx_type,
        from_symbol: req.from_symbol,
        to_symbol: req.to_symbol,
        from_amount: req.from_amount,
        to_amount: req.to_amount,
        price: req.price,
        client_ip: Some(addr.ip()),
        user_agent,
        signature: req.signature,
        nonce: req.nonce,
    };

    match state.pipeline.submit(draft).await {
        Ok(AdmissionOutcome::Accepted {
            transaction,
            report,
        }) => (
            StatusCode::CREATED,
            Json(SubmitTransactionResponse {
                transaction,
                risk_score: report.risk_score,
                issues: report.issues,
            }),
        )
            .into_response(),
        Ok(AdmissionOutcome::Rejected { report }) => (
            StatusCode::FORBIDDEN,
            Json(RejectionResponse {
                error: "transaction rejected by security checks".to_string(),
                risk_score: report.risk_score,
                issues: report.issues,
            }),
        )
            .into_response(),
        Err(err) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionParams>,
) -> ApiResult<TransactionsResponse> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let offset = params.offset.unwrap_or(0);
    let transactions = state
        .transactions
        .list_for_user(&params.user_id, limit, offset)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let count = transactions.len();
    Ok(Json(TransactionsResponse {
        transactions,
        count,
    }))
}

// ============================================================
// Logins
// ============================================================

pub async fn record_login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginAttemptRequest>,
) -> Json<LoginAttemptResponse> {
    let ip = req.ip.or(Some(addr.ip()));
    state.fraud.record_login_attempt(&req.user_id, req.success, ip);
    Json(LoginAttemptResponse { recorded: true })
}
