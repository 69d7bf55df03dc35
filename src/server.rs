//! Per-role axum `Router` assembly. Every role shares `/health`,
//! `/view-logs`, `/gossip`, and `/gossip/nodes`
//! (`examples/original_source/nodes/base_node.py` and
//! `gossip_protocol.py`'s `_register_routes`); each role layers its own
//! routes on top.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::acceptor::{validate_accept, validate_prepare, Acceptor};
use crate::client::Client;
use crate::config::Role;
use crate::error::ApiError;
use crate::learner::{validate_learn, Learner};
use crate::message::{
    AcceptRequest, GossipPush, HealthResponse, HeartbeatRequest, LearnRequest, NotifyRequest, PrepareRequest,
    ProposeRequest, SendRequest,
};
use crate::proposer::{validate_propose, Proposer};

pub fn proposer_router(proposer: Arc<Proposer>) -> Router {
    Router::new()
        .route("/propose", post(propose))
        .route("/heartbeat", post(heartbeat))
        .route("/view-logs", get(proposer_view_logs))
        .merge(common_routes(Role::Proposer, proposer.node_id(), proposer.gossip().clone()))
        .with_state(proposer)
}

pub fn acceptor_router(acceptor: Arc<Acceptor>) -> Router {
    Router::new()
        .route("/prepare", post(prepare))
        .route("/accept", post(accept))
        .route("/view-logs", get(acceptor_view_logs))
        .merge(common_routes(Role::Acceptor, acceptor.node_id(), acceptor.gossip().clone()))
        .with_state(acceptor)
}

pub fn learner_router(learner: Arc<Learner>) -> Router {
    Router::new()
        .route("/learn", post(learn))
        .route("/get-values", get(get_values))
        .route("/view-logs", get(learner_view_logs))
        .merge(common_routes(Role::Learner, learner.node_id(), learner.gossip().clone()))
        .with_state(learner)
}

pub fn client_router(client: Arc<Client>) -> Router {
    Router::new()
        .route("/send", post(send))
        .route("/notify", post(notify))
        .route("/read", get(read))
        .route("/get-responses", get(get_responses))
        .route("/view-logs", get(client_view_logs))
        .merge(common_routes(Role::Client, client.node_id(), client.gossip().clone()))
        .with_state(client)
}

/// `/health`, `/view-logs`, `/gossip`, `/gossip/nodes` — identical wiring
/// across roles, parametrized over the gossip agent directly since the
/// per-role `view-logs` body is produced by the caller's own state and
/// registered separately below.
fn common_routes<S>(role: Role, node_id: u64, gossip: Arc<crate::gossip::GossipAgent>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(
            "/health",
            get(move || async move {
                Json(HealthResponse {
                    status: "healthy",
                    role,
                    id: node_id,
                })
            }),
        )
        .route(
            "/gossip",
            post(move |Json(push): Json<GossipPush>| {
                let gossip = gossip.clone();
                async move { Json(gossip.receive_gossip(push)) }
            }),
        )
        .route(
            "/gossip/nodes",
            get({
                let gossip = gossip.clone();
                move || {
                    let gossip = gossip.clone();
                    async move { Json(gossip.nodes_snapshot()) }
                }
            }),
        )
}

// ---- Proposer handlers ----

async fn propose(
    State(proposer): State<Arc<Proposer>>,
    Json(req): Json<ProposeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_propose(&req)?;
    let resp = proposer.handle_propose(req)?;
    Ok(Json(resp))
}

async fn heartbeat(
    State(proposer): State<Arc<Proposer>>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    Json(proposer.handle_heartbeat(req))
}

// ---- Acceptor handlers ----

async fn prepare(
    State(acceptor): State<Arc<Acceptor>>,
    Json(req): Json<PrepareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_prepare(&req)?;
    Ok(Json(acceptor.handle_prepare(req)))
}

async fn accept(
    State(acceptor): State<Arc<Acceptor>>,
    Json(req): Json<AcceptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_accept(&req)?;
    Ok(Json(acceptor.handle_accept(req)))
}

// ---- Learner handlers ----

async fn learn(
    State(learner): State<Arc<Learner>>,
    Json(req): Json<LearnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_learn(&req)?;
    learner.handle_learn(req);
    Ok(Json(crate::message::Acknowledged::default()))
}

async fn get_values(State(learner): State<Arc<Learner>>) -> impl IntoResponse {
    Json(crate::message::ValuesResponse {
        values: learner.values(),
    })
}

// ---- Client handlers ----

async fn send(
    State(client): State<Arc<Client>>,
    Json(req): Json<SendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(client.handle_send(req).await?))
}

async fn notify(State(client): State<Arc<Client>>, Json(req): Json<NotifyRequest>) -> impl IntoResponse {
    client.handle_notify(req);
    Json(crate::message::Acknowledged::default())
}

async fn read(State(client): State<Arc<Client>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(client.handle_read().await?))
}

async fn get_responses(State(client): State<Arc<Client>>) -> impl IntoResponse {
    Json(crate::message::ResponsesResponse {
        responses: client.responses(),
    })
}

// ---- view-logs, one per role since each body shape differs ----

async fn proposer_view_logs(State(proposer): State<Arc<Proposer>>) -> impl IntoResponse {
    Json(proposer.view_logs())
}

async fn acceptor_view_logs(State(acceptor): State<Arc<Acceptor>>) -> impl IntoResponse {
    Json(acceptor.view_logs())
}

async fn learner_view_logs(State(learner): State<Arc<Learner>>) -> impl IntoResponse {
    Json(learner.view_logs())
}

async fn client_view_logs(State(client): State<Arc<Client>>) -> impl IntoResponse {
    Json(client.view_logs())
}
