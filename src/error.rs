//! Client-visible error kinds (spec.md §7). Peer-interaction failures
//! (`PeerTransient`, `BallotRejected`, `LeaderFailure`) are recovered
//! internally by the proposer/acceptor/gossip loops and never reach here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing required field: {0}")]
    ClientInput(&'static str),

    #[error("not the leader")]
    NotLeader { current_leader: Option<u64> },

    #[error("already processing a proposal")]
    Busy,

    #[error("no quorum available")]
    NoQuorumAvailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::ClientInput(field) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("missing required field: {field}") }),
            ),
            ApiError::NotLeader { current_leader } => (
                StatusCode::FORBIDDEN,
                json!({ "error": "Not the leader", "current_leader": current_leader }),
            ),
            ApiError::Busy => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": "Already processing a proposal" }),
            ),
            ApiError::NoQuorumAvailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "No quorum available" }),
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };
        (status, Json(body)).into_response()
    }
}
