//! Acceptor role: promises/accepts ballots per single-decree Paxos, ported
//! from the teacher's `multi_paxos.rs::Acceptor`/`AcceptorState` and
//! `examples/original_source/nodes/acceptor_node.py`. Tracks one ballot
//! triple (`highest_promised`, `accepted_ballot`, `accepted_value`) behind a
//! single mutex, guarded so that `accepted_ballot <= highest_promised`
//! always holds.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{NodeConfig, Role};
use crate::error::ApiError;
use crate::gossip::{now_secs, GossipAgent};
use crate::message::{AcceptRequest, AcceptResponse, LearnRequest, PrepareRequest, PrepareResponse};
use crate::net::{resolve_address, PeerClient, RetryPolicy};

struct BallotState {
    highest_promised: i64,
    accepted_ballot: i64,
    accepted_value: Option<String>,
}

/// How long without a heartbeat before the currently-known leader is
/// considered failed (`leader_timeout` in `acceptor_node.py`).
const LEADER_TIMEOUT_SECS: f64 = 10.0;
const LEADER_WATCH_INTERVAL_SECS: u64 = 2;

pub struct Acceptor {
    node_id: u64,
    namespace: String,
    rewrite_dns: bool,
    state: Mutex<BallotState>,
    gossip: Arc<GossipAgent>,
    http: PeerClient,
}

impl Acceptor {
    pub fn new(config: &NodeConfig, gossip: Arc<GossipAgent>, http: PeerClient) -> Self {
        Acceptor {
            node_id: config.node_id,
            namespace: config.namespace.clone(),
            rewrite_dns: config.rewrite_dns,
            state: Mutex::new(BallotState {
                highest_promised: 0,
                accepted_ballot: 0,
                accepted_value: None,
            }),
            gossip,
            http,
        }
    }

    /// Handles `POST /prepare`. Promises if `proposal_number` exceeds
    /// `highest_promised`; also concedes (without raising the bar on a
    /// normal proposal) when this is a leader-election ballot and no leader
    /// is currently known — the bootstrap-concession path documented in
    /// DESIGN.md, preserved as-is.
    pub fn handle_prepare(&self, req: PrepareRequest) -> PrepareResponse {
        let leader_unknown = self.gossip.get_leader().is_none();
        let mut state = self.state.lock();

        if req.proposal_number > state.highest_promised {
            state.highest_promised = req.proposal_number;
            log::info!(
                "[acceptor-{}] promised ballot {} from proposer {} ({})",
                self.node_id,
                req.proposal_number,
                req.proposer_id,
                if req.is_leader_election { "election" } else { "normal" }
            );
            return PrepareResponse::Promise {
                accepted_proposal_number: state.accepted_ballot,
                accepted_value: state.accepted_value.clone(),
            };
        }

        if req.is_leader_election && leader_unknown {
            state.highest_promised = req.proposal_number;
            log::info!(
                "[acceptor-{}] promised ballot {} from proposer {} (bootstrap concession)",
                self.node_id,
                req.proposal_number,
                req.proposer_id
            );
            return PrepareResponse::Promise {
                accepted_proposal_number: state.accepted_ballot,
                accepted_value: state.accepted_value.clone(),
            };
        }

        log::info!(
            "[acceptor-{}] rejected ballot {} from proposer {} (promised: {})",
            self.node_id,
            req.proposal_number,
            req.proposer_id,
            state.highest_promised
        );
        PrepareResponse::Rejected {
            message: format!(
                "Already promised to higher proposal number: {}",
                state.highest_promised
            ),
        }
    }

    /// Handles `POST /accept`. Accepts if `proposal_number >=
    /// highest_promised`, records it in gossip metadata, and fans the
    /// decision out to learners on a spawned task (the lock is dropped
    /// first).
    pub fn handle_accept(self: &Arc<Self>, req: AcceptRequest) -> AcceptResponse {
        let accepted = {
            let mut state = self.state.lock();
            if req.proposal_number >= state.highest_promised {
                state.accepted_ballot = req.proposal_number;
                state.accepted_value = Some(req.value.clone());
                true
            } else {
                false
            }
        };

        if !accepted {
            let promised = self.state.lock().highest_promised;
            log::info!(
                "[acceptor-{}] rejected accept {} (promised: {promised})",
                self.node_id,
                req.proposal_number
            );
            return AcceptResponse::Rejected {
                message: format!("Already promised to higher proposal number: {promised}"),
            };
        }

        log::info!(
            "[acceptor-{}] accepted ballot {} value {:?} ({})",
            self.node_id,
            req.proposal_number,
            req.value,
            if req.is_leader_election { "election" } else { "normal" }
        );

        self.gossip.update_local_metadata(|m| {
            m.accepted_proposal_number = Some(req.proposal_number);
            m.accepted_value = Some(req.value.clone());
        });

        if req.is_leader_election {
            if let Some(leader_str) = req.value.strip_prefix("leader:") {
                if let Ok(leader_id) = leader_str.parse::<u64>() {
                    self.gossip.set_leader(Some(leader_id));
                    log::info!("[acceptor-{}] leader updated to {leader_id}", self.node_id);
                }
            }
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.notify_learners(req.proposal_number, req.value, req.client_id, req.is_leader_election)
                .await;
        });

        AcceptResponse::Accepted
    }

    async fn notify_learners(
        &self,
        proposal_number: i64,
        value: String,
        client_id: Option<u64>,
        is_leader_election: bool,
    ) {
        let learners = self.gossip.get_nodes_by_role(Role::Learner);
        if learners.is_empty() {
            log::warn!("[acceptor-{}] no known learners to notify", self.node_id);
            return;
        }

        for learner in learners {
            let address = resolve_address(&learner.address, &self.namespace, self.rewrite_dns);
            let url = format!("http://{address}:{}/learn", learner.port);
            let payload = LearnRequest {
                acceptor_id: self.node_id,
                proposal_number,
                value: value.clone(),
                client_id,
                is_leader_election,
            };
            self.http
                .post_json_fire_and_forget(&url, &payload, RetryPolicy::PAXOS)
                .await;
        }
    }

    pub fn gossip(&self) -> &Arc<GossipAgent> {
        &self.gossip
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// `view-logs` summary.
    pub fn view_logs(&self) -> serde_json::Value {
        let state = self.state.lock();
        serde_json::json!({
            "id": self.node_id,
            "role": "acceptor",
            "highest_promised_number": state.highest_promised,
            "accepted_proposal": {
                "number": state.accepted_ballot,
                "value": state.accepted_value,
            },
            "learners_count": self.gossip.get_nodes_by_role(Role::Learner).len(),
            "known_nodes_count": self.gossip.get_all_nodes().len(),
            "current_leader": self.gossip.get_leader(),
        })
    }

    /// Background loop: if the known leader's last heartbeat is stale,
    /// clear gossip's `leader_id` so a new election can proceed.
    pub fn spawn_leader_watch(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(LEADER_WATCH_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => self.check_leader_status(),
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        });
    }

    fn check_leader_status(&self) {
        let Some(current_leader) = self.gossip.get_leader() else {
            return;
        };
        let Some(info) = self.gossip.get_node_info(current_leader) else {
            return;
        };
        let last_heartbeat = info.metadata.last_heartbeat.unwrap_or(0.0);
        let now = now_secs();
        if now - last_heartbeat > LEADER_TIMEOUT_SECS {
            log::warn!(
                "[acceptor-{}] leader {current_leader} looks inactive, last heartbeat {:.1}s ago",
                self.node_id,
                now - last_heartbeat
            );
            self.gossip.set_leader(None);
            self.gossip.update_local_metadata(|m| {
                m.leader_detected_failed = Some(current_leader);
            });
        }
    }
}

pub fn validate_prepare(req: &PrepareRequest) -> Result<(), ApiError> {
    if req.proposer_id == 0 {
        return Err(ApiError::ClientInput("proposer_id"));
    }
    Ok(())
}

pub fn validate_accept(req: &AcceptRequest) -> Result<(), ApiError> {
    if req.proposer_id == 0 {
        return Err(ApiError::ClientInput("proposer_id"));
    }
    if req.value.is_empty() {
        return Err(ApiError::ClientInput("value"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedNode;
    use crate::gossip::GossipTiming;

    fn test_acceptor(id: u64) -> Arc<Acceptor> {
        let config = NodeConfig {
            node_id: id,
            role: Role::Acceptor,
            port: 4000,
            hostname: format!("acceptor{id}"),
            namespace: "paxos".into(),
            seed_nodes: vec![],
            rewrite_dns: false,
        };
        let gossip = Arc::new(GossipAgent::new(&config, GossipTiming::default()));
        Arc::new(Acceptor::new(&config, gossip, PeerClient::new()))
    }

    #[test]
    fn promises_higher_ballots_monotonically() {
        let acceptor = test_acceptor(1);
        let resp = acceptor.handle_prepare(PrepareRequest {
            proposer_id: 2,
            proposal_number: 100,
            is_leader_election: false,
        });
        assert!(matches!(resp, PrepareResponse::Promise { .. }));

        let resp = acceptor.handle_prepare(PrepareRequest {
            proposer_id: 3,
            proposal_number: 50,
            is_leader_election: false,
        });
        assert!(matches!(resp, PrepareResponse::Rejected { .. }));
    }

    #[test]
    fn bootstrap_concedes_election_ballots_when_leader_unknown() {
        let acceptor = test_acceptor(1);
        acceptor.handle_prepare(PrepareRequest {
            proposer_id: 2,
            proposal_number: 100,
            is_leader_election: false,
        });
        // A lower-numbered election ballot still gets promised because no
        // leader is known yet.
        let resp = acceptor.handle_prepare(PrepareRequest {
            proposer_id: 3,
            proposal_number: 50,
            is_leader_election: true,
        });
        assert!(matches!(resp, PrepareResponse::Promise { .. }));
    }

    #[test]
    fn accept_rejects_ballots_below_the_promise() {
        let acceptor = test_acceptor(1);
        acceptor.handle_prepare(PrepareRequest {
            proposer_id: 2,
            proposal_number: 100,
            is_leader_election: false,
        });
        let resp = acceptor.handle_accept(AcceptRequest {
            proposer_id: 2,
            proposal_number: 50,
            value: "hello".into(),
            is_leader_election: false,
            client_id: None,
        });
        assert!(matches!(resp, AcceptResponse::Rejected { .. }));
    }

    #[test]
    fn accepted_ballot_never_exceeds_highest_promised_invariant() {
        let acceptor = test_acceptor(1);
        acceptor.handle_prepare(PrepareRequest {
            proposer_id: 2,
            proposal_number: 100,
            is_leader_election: false,
        });
        acceptor.handle_accept(AcceptRequest {
            proposer_id: 2,
            proposal_number: 100,
            value: "v".into(),
            is_leader_election: false,
            client_id: None,
        });
        let state = acceptor.state.lock();
        assert!(state.accepted_ballot <= state.highest_promised);
    }
}
