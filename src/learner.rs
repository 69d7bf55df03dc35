//! Learner role: tallies acceptor votes per ballot, records values that
//! reach quorum, and notifies the originating client. Ported from the
//! teacher's `multi_paxos.rs::Learner` and
//! `examples/original_source/nodes/learner_node.py`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{NodeConfig, Role};
use crate::error::ApiError;
use crate::gossip::{now_secs, GossipAgent};
use crate::message::{LearnRequest, NotifyRequest};
use crate::net::{resolve_address, PeerClient, RetryPolicy};

#[derive(Debug, Clone)]
pub struct LearnedEntry {
    pub proposal_number: i64,
    pub value: String,
    pub timestamp: f64,
}

struct LearnerState {
    /// ballot -> (acceptor_id -> value reported)
    acceptor_responses: HashMap<i64, HashMap<u64, String>>,
    learned_values: Vec<LearnedEntry>,
}

pub struct Learner {
    node_id: u64,
    namespace: String,
    rewrite_dns: bool,
    state: Mutex<LearnerState>,
    gossip: Arc<GossipAgent>,
    http: PeerClient,
}

impl Learner {
    pub fn new(config: &NodeConfig, gossip: Arc<GossipAgent>, http: PeerClient) -> Self {
        Learner {
            node_id: config.node_id,
            namespace: config.namespace.clone(),
            rewrite_dns: config.rewrite_dns,
            state: Mutex::new(LearnerState {
                acceptor_responses: HashMap::new(),
                learned_values: Vec::new(),
            }),
            gossip,
            http,
        }
    }

    /// Handles `POST /learn`. Tallies this acceptor's vote for the ballot;
    /// once a value holds quorum among currently-live acceptors, either
    /// installs the new leader (election ballots) or appends to the
    /// learned log and spawns a client notification.
    pub fn handle_learn(self: &Arc<Self>, req: LearnRequest) {
        let quorum_size = self.gossip.live_acceptor_count() / 2 + 1;

        let should_act = {
            let mut state = self.state.lock();
            let votes = state
                .acceptor_responses
                .entry(req.proposal_number)
                .or_default();
            votes.insert(req.acceptor_id, req.value.clone());

            let value_count = votes.values().filter(|v| **v == req.value).count();
            log::info!(
                "[learner-{}] acceptor {} voted {:?} for ballot {} ({}/{})",
                self.node_id,
                req.acceptor_id,
                req.value,
                req.proposal_number,
                value_count,
                quorum_size
            );
            value_count >= quorum_size
        };

        if !should_act {
            return;
        }

        if req.is_leader_election {
            if let Some(leader_str) = req.value.strip_prefix("leader:") {
                if let Ok(leader_id) = leader_str.parse::<u64>() {
                    self.gossip.set_leader(Some(leader_id));
                    log::info!("[learner-{}] leader updated to {leader_id}", self.node_id);
                }
            }
            return;
        }

        let previously_learned_value = {
            let mut state = self.state.lock();
            let existing = state
                .learned_values
                .iter()
                .find(|e| e.proposal_number == req.proposal_number)
                .map(|e| e.value.clone());
            if existing.is_none() {
                let now = now_secs();
                state.learned_values.push(LearnedEntry {
                    proposal_number: req.proposal_number,
                    value: req.value.clone(),
                    timestamp: now,
                });
                let count = state.learned_values.len();
                drop(state);
                self.gossip.update_local_metadata(|m| {
                    m.last_learned_proposal = Some(req.proposal_number);
                    m.last_learned_value = Some(req.value.clone());
                    m.learned_values_count = Some(count);
                });
            }
            existing
        };

        if let Some(existing_value) = previously_learned_value {
            if existing_value != req.value {
                log::error!(
                    "[learner-{}] safety violation: ballot {} already decided {:?}, but acceptor {} now reports {:?}",
                    self.node_id,
                    req.proposal_number,
                    existing_value,
                    req.acceptor_id,
                    req.value
                );
            } else {
                log::debug!(
                    "[learner-{}] ballot {} already learned, ignoring repeat notify",
                    self.node_id,
                    req.proposal_number
                );
            }
            return;
        }

        log::info!(
            "[learner-{}] learned value {:?} for ballot {}",
            self.node_id,
            req.value,
            req.proposal_number
        );

        if let Some(client_id) = req.client_id {
            let this = self.clone();
            let value = req.value.clone();
            let proposal_number = req.proposal_number;
            tokio::spawn(async move {
                this.notify_client(client_id, value, proposal_number).await;
            });
        }
    }

    async fn notify_client(&self, client_id: u64, value: String, proposal_number: i64) {
        let clients = self.gossip.get_nodes_by_role(Role::Client);
        let Some(client) = clients.into_iter().find(|c| c.id == client_id) else {
            log::warn!("[learner-{}] client {client_id} not found", self.node_id);
            return;
        };

        let address = resolve_address(&client.address, &self.namespace, self.rewrite_dns);
        let url = format!("http://{address}:{}/notify", client.port);
        let payload = NotifyRequest {
            learner_id: self.node_id,
            proposal_number,
            value,
            learned_at: now_secs(),
        };
        self.http
            .post_json_fire_and_forget(&url, &payload, RetryPolicy::PAXOS)
            .await;
    }

    pub fn gossip(&self) -> &Arc<GossipAgent> {
        &self.gossip
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn values(&self) -> Vec<String> {
        self.state
            .lock()
            .learned_values
            .iter()
            .map(|e| e.value.clone())
            .collect()
    }

    pub fn view_logs(&self) -> serde_json::Value {
        let state = self.state.lock();
        let recent: Vec<_> = state
            .learned_values
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|e| {
                serde_json::json!({
                    "proposal_number": e.proposal_number,
                    "value": e.value,
                    "timestamp": e.timestamp,
                })
            })
            .collect();
        serde_json::json!({
            "id": self.node_id,
            "role": "learner",
            "learned_values_count": state.learned_values.len(),
            "recent_learned_values": recent,
            "shared_data": self.values(),
            "clients_count": self.gossip.get_nodes_by_role(Role::Client).len(),
            "known_nodes_count": self.gossip.get_all_nodes().len(),
            "current_leader": self.gossip.get_leader(),
        })
    }
}

pub fn validate_learn(req: &LearnRequest) -> Result<(), ApiError> {
    if req.acceptor_id == 0 {
        return Err(ApiError::ClientInput("acceptor_id"));
    }
    if req.value.is_empty() {
        return Err(ApiError::ClientInput("value"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::GossipTiming;

    fn test_learner_with_acceptors(id: u64, acceptor_ids: &[u64]) -> Arc<Learner> {
        let config = NodeConfig {
            node_id: id,
            role: Role::Learner,
            port: 5000,
            hostname: format!("learner{id}"),
            namespace: "paxos".into(),
            seed_nodes: acceptor_ids
                .iter()
                .map(|&aid| crate::config::SeedNode {
                    id: aid,
                    role: Role::Acceptor,
                    address: format!("acceptor{aid}"),
                    port: 4000,
                })
                .collect(),
            rewrite_dns: false,
        };
        let gossip = Arc::new(GossipAgent::new(&config, GossipTiming::default()));
        Arc::new(Learner::new(&config, gossip, PeerClient::new()))
    }

    #[test]
    fn learns_once_quorum_of_matching_votes_reached() {
        // 3 acceptors known -> quorum is 2.
        let learner = test_learner_with_acceptors(1, &[2, 3, 4]);
        learner.handle_learn(LearnRequest {
            acceptor_id: 2,
            proposal_number: 100,
            value: "hello".into(),
            client_id: None,
            is_leader_election: false,
        });
        assert!(learner.values().is_empty());

        learner.handle_learn(LearnRequest {
            acceptor_id: 3,
            proposal_number: 100,
            value: "hello".into(),
            client_id: None,
            is_leader_election: false,
        });
        assert_eq!(learner.values(), vec!["hello".to_string()]);
    }

    #[test]
    fn learning_a_ballot_twice_is_idempotent() {
        let learner = test_learner_with_acceptors(1, &[2, 3]);
        for acceptor_id in [2, 3] {
            learner.handle_learn(LearnRequest {
                acceptor_id,
                proposal_number: 7,
                value: "v".into(),
                client_id: None,
                is_leader_election: false,
            });
        }
        assert_eq!(learner.values().len(), 1);
        // A late duplicate vote from a third acceptor must not re-append.
        learner.handle_learn(LearnRequest {
            acceptor_id: 2,
            proposal_number: 7,
            value: "v".into(),
            client_id: None,
            is_leader_election: false,
        });
        assert_eq!(learner.values().len(), 1);
    }

    #[test]
    fn election_ballots_set_the_leader_instead_of_logging_a_value() {
        let learner = test_learner_with_acceptors(1, &[2, 3]);
        for acceptor_id in [2, 3] {
            learner.handle_learn(LearnRequest {
                acceptor_id,
                proposal_number: 900,
                value: "leader:2".into(),
                client_id: None,
                is_leader_election: true,
            });
        }
        assert_eq!(learner.gossip.get_leader(), Some(2));
        assert!(learner.values().is_empty());
    }

    #[test]
    fn disagreeing_acceptors_never_reach_quorum() {
        let learner = test_learner_with_acceptors(1, &[2, 3, 4]);
        learner.handle_learn(LearnRequest {
            acceptor_id: 2,
            proposal_number: 1,
            value: "a".into(),
            client_id: None,
            is_leader_election: false,
        });
        learner.handle_learn(LearnRequest {
            acceptor_id: 3,
            proposal_number: 1,
            value: "b".into(),
            client_id: None,
            is_leader_election: false,
        });
        assert!(learner.values().is_empty());
    }
}
