//! `GET /healthz`, `GET /livez`, `GET /readyz`, `GET /metrics` (spec
//! §4.1 item 5, §6 HTTP surface table).

use axum::extract::State;
use axum::http::StatusCode;

use crate::state::AppState;

pub async fn healthz() -> &'static str {
    "ok"
}

/// OK only when the database is reachable and the OIDC provider was
/// successfully initialized (spec §4.1). JWKS initialization happens
/// once at startup and is a precondition for `AppState` existing at
/// all; `idp_healthy` additionally tracks runtime IdP outages (spec
/// §4.1 failure semantics: "IdP unreachable at runtime: reject new
/// connections with 503").
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let db_ok = state.db.ping().await;
    if db_ok && state.idp_healthy() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.encode()
}
