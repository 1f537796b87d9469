//! The cross-cutting error taxonomy from spec §7. These are *kinds*, not
//! a single monolithic type — `CoreError` is the shape shared by the
//! Relay Server's HTTP boundary and the Operator's reconcile loop;
//! tunnel- and stream-local errors are handled in `kuberde-tunnel`
//! without ever reaching this type, per §7's containment policy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Token missing, malformed, expired, or signature invalid.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Owner/tenant mismatch, or missing role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// No tunnel and wake failed or timed out.
    #[error("agent unavailable: {0}")]
    BadGateway(String),

    /// IdP unreachable at runtime, or DB unreachable (readiness false).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Kubernetes optimistic-concurrency conflict; retried by the caller.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    reason: String,
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            CoreError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// §7: Kubernetes transient errors (conflict, server-timeout,
    /// service-unavailable) are retried with bounded exponential
    /// backoff; every other kind is permanent for the current cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Conflict(_) | CoreError::ServiceUnavailable(_))
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if matches!(self, CoreError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorBody {
            status: status.as_u16(),
            reason: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(CoreError::Conflict("x".into()).is_transient());
        assert!(CoreError::ServiceUnavailable("x".into()).is_transient());
        assert!(!CoreError::Forbidden("x".into()).is_transient());
        assert!(!CoreError::BadGateway("x".into()).is_transient());
    }

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(CoreError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(CoreError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(CoreError::BadGateway("x".into()).status_code(), StatusCode::BAD_GATEWAY);
    }
}
