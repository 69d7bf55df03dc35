//! Client role: submits values to the leader (or a random proposer),
//! retries once against the reported leader on a 403, records learner
//! notifications, and reads the replicated log. Ported from the teacher's
//! `multi_paxos.rs::Client<T>` and
//! `examples/original_source/nodes/client_node.py`.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::config::{NodeConfig, Role};
use crate::error::ApiError;
use crate::gossip::{now_secs, GossipAgent};
use crate::message::{
    ClientResponseLogEntry, NotifyRequest, ProposeRequest, ProposeResponse, SendRequest, SendResponse,
    ValuesResponse,
};
use crate::net::{resolve_address, PeerClient, PostOutcome, RetryPolicy};

pub struct Client {
    node_id: u64,
    namespace: String,
    rewrite_dns: bool,
    responses: Mutex<Vec<ClientResponseLogEntry>>,
    gossip: Arc<GossipAgent>,
    http: PeerClient,
}

impl Client {
    pub fn new(config: &NodeConfig, gossip: Arc<GossipAgent>, http: PeerClient) -> Self {
        Client {
            node_id: config.node_id,
            namespace: config.namespace.clone(),
            rewrite_dns: config.rewrite_dns,
            responses: Mutex::new(Vec::new()),
            gossip,
            http,
        }
    }

    /// Handles `POST /send`. Targets the known leader if one exists,
    /// otherwise a random proposer; on a `NotLeader` redirect, retries once
    /// against the proposer the first reply named.
    pub async fn handle_send(&self, req: SendRequest) -> Result<SendResponse, ApiError> {
        if req.value.is_empty() {
            return Err(ApiError::ClientInput("value"));
        }

        let proposers = self.gossip.get_nodes_by_role(Role::Proposer);
        if proposers.is_empty() {
            return Err(ApiError::NoQuorumAvailable);
        }

        let leader_id = self.gossip.get_leader();
        let target = match leader_id.and_then(|id| proposers.iter().find(|p| p.id == id)) {
            Some(leader) => {
                log::info!("[client-{}] sending to known leader {}", self.node_id, leader.id);
                leader.clone()
            }
            None => {
                let mut rng = rand::thread_rng();
                let chosen = proposers.choose(&mut rng).expect("non-empty proposers").clone();
                log::info!("[client-{}] sending to random proposer {}", self.node_id, chosen.id);
                chosen
            }
        };

        let payload = ProposeRequest {
            value: req.value.clone(),
            client_id: Some(self.node_id),
        };

        match self.post_propose(&target.address, target.port, &payload).await {
            PostOutcome::Ok(_) => Ok(SendResponse {
                status: "value sent",
                proposer_id: target.id,
            }),
            PostOutcome::NotLeader { current_leader: Some(new_leader) } => {
                let Some(new_target) = proposers.iter().find(|p| p.id == new_leader) else {
                    return Err(ApiError::NoQuorumAvailable);
                };
                log::info!("[client-{}] redirected to leader {new_leader}", self.node_id);
                match self.post_propose(&new_target.address, new_target.port, &payload).await {
                    PostOutcome::Ok(_) => Ok(SendResponse {
                        status: "value sent",
                        proposer_id: new_target.id,
                    }),
                    _ => Err(ApiError::NoQuorumAvailable),
                }
            }
            PostOutcome::NotLeader { current_leader: None } | PostOutcome::Failed => {
                Err(ApiError::NoQuorumAvailable)
            }
        }
    }

    async fn post_propose(&self, address: &str, port: u16, payload: &ProposeRequest) -> PostOutcome<ProposeResponse> {
        let address = resolve_address(address, &self.namespace, self.rewrite_dns);
        let url = format!("http://{address}:{port}/propose");
        self.http.post_json_or_not_leader(&url, payload, RetryPolicy::PAXOS).await
    }

    /// Handles `POST /notify`. Appends the learner's report to the local
    /// response log.
    pub fn handle_notify(&self, req: NotifyRequest) {
        self.responses.lock().push(ClientResponseLogEntry {
            learner_id: req.learner_id,
            proposal_number: req.proposal_number,
            value: req.value,
            learned_at: req.learned_at,
            received_at: now_secs(),
        });
    }

    /// Handles `GET /read`. Fetches the learned log from a random learner.
    pub async fn handle_read(&self) -> Result<ValuesResponse, ApiError> {
        let learners = self.gossip.get_nodes_by_role(Role::Learner);
        let Some(learner) = learners.choose(&mut rand::thread_rng()) else {
            return Err(ApiError::NoQuorumAvailable);
        };
        let address = resolve_address(&learner.address, &self.namespace, self.rewrite_dns);
        let url = format!("http://{address}:{}/get-values", learner.port);
        self.http
            .get_json::<ValuesResponse>(&url, RetryPolicy::PAXOS)
            .await
            .ok_or(ApiError::NoQuorumAvailable)
    }

    pub fn gossip(&self) -> &Arc<GossipAgent> {
        &self.gossip
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn responses(&self) -> Vec<ClientResponseLogEntry> {
        self.responses.lock().clone()
    }

    pub fn view_logs(&self) -> serde_json::Value {
        let responses = self.responses.lock();
        let recent: Vec<_> = responses.iter().rev().take(10).rev().cloned().collect();
        serde_json::json!({
            "id": self.node_id,
            "role": "client",
            "proposers_count": self.gossip.get_nodes_by_role(Role::Proposer).len(),
            "responses_count": responses.len(),
            "recent_responses": recent,
            "known_nodes_count": self.gossip.get_all_nodes().len(),
            "current_leader": self.gossip.get_leader(),
        })
    }
}
