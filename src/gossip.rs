//! Gossip-based membership and leader dissemination, ported from
//! `examples/original_source/nodes/gossip_protocol.py`. Maintains a node
//! table (`id -> {role, address, port, last_seen, version, metadata}`),
//! periodically pushes it to a random fanout, and resolves the current
//! cluster leader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::config::{NodeConfig, Role};
use crate::message::{GossipAck, GossipNodesResponse, GossipPush, NodeMetadata, WireNode};
use crate::net::{resolve_address, PeerClient, RetryPolicy};

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub id: u64,
    pub role: Role,
    pub address: String,
    pub port: u16,
    pub last_seen: f64,
    pub version: u64,
    pub metadata: NodeMetadata,
}

impl From<&NodeEntry> for WireNode {
    fn from(e: &NodeEntry) -> Self {
        WireNode {
            id: e.id,
            role: e.role,
            address: e.address.clone(),
            port: e.port,
            last_seen: e.last_seen,
            version: e.version,
            metadata: e.metadata.clone(),
        }
    }
}

struct GossipState {
    nodes: HashMap<u64, NodeEntry>,
    leader_id: Option<u64>,
}

/// Tunable timing knobs, separated out so tests can shrink them.
#[derive(Debug, Clone, Copy)]
pub struct GossipTiming {
    pub gossip_interval_secs: f64,
    pub cleanup_interval_secs: f64,
    pub node_timeout_secs: f64,
    pub fanout: usize,
}

impl Default for GossipTiming {
    fn default() -> Self {
        GossipTiming {
            gossip_interval_secs: 2.0,
            cleanup_interval_secs: 10.0,
            node_timeout_secs: 15.0,
            fanout: 3,
        }
    }
}

pub struct GossipAgent {
    node_id: u64,
    node_role: Role,
    namespace: String,
    rewrite_dns: bool,
    timing: GossipTiming,
    self_version: AtomicU64,
    state: Mutex<GossipState>,
}

impl GossipAgent {
    pub fn new(config: &NodeConfig, timing: GossipTiming) -> Self {
        let mut nodes = HashMap::new();
        let now = now_secs();
        nodes.insert(
            config.node_id,
            NodeEntry {
                id: config.node_id,
                role: config.role,
                address: config.hostname.clone(),
                port: config.port,
                last_seen: now,
                version: 0,
                metadata: NodeMetadata::default(),
            },
        );
        for seed in &config.seed_nodes {
            if seed.id == config.node_id {
                continue;
            }
            nodes.insert(
                seed.id,
                NodeEntry {
                    id: seed.id,
                    role: seed.role,
                    address: seed.address.clone(),
                    port: seed.port,
                    last_seen: now,
                    version: 0,
                    metadata: NodeMetadata::default(),
                },
            );
        }

        GossipAgent {
            node_id: config.node_id,
            node_role: config.role,
            namespace: config.namespace.clone(),
            rewrite_dns: config.rewrite_dns,
            timing,
            self_version: AtomicU64::new(0),
            state: Mutex::new(GossipState {
                nodes,
                leader_id: None,
            }),
        }
    }

    // ---- Query API ----

    pub fn get_leader(&self) -> Option<u64> {
        self.state.lock().leader_id
    }

    pub fn set_leader(&self, leader_id: Option<u64>) {
        let mut state = self.state.lock();
        let old_leader = state.leader_id;
        state.leader_id = leader_id;
        drop(state);

        if self.node_role != Role::Proposer {
            return;
        }
        if leader_id == Some(self.node_id) {
            self.update_local_metadata_inner(|m| {
                m.is_leader = Some(true);
                m.last_heartbeat = Some(now_secs());
            });
        } else if old_leader == Some(self.node_id) {
            self.update_local_metadata_inner(|m| m.is_leader = Some(false));
        }
    }

    pub fn get_nodes_by_role(&self, role: Role) -> Vec<NodeEntry> {
        let state = self.state.lock();
        let now = now_secs();
        state
            .nodes
            .values()
            .filter(|n| n.role == role && now - n.last_seen <= self.timing.node_timeout_secs)
            .cloned()
            .collect()
    }

    pub fn get_all_nodes(&self) -> Vec<NodeEntry> {
        let state = self.state.lock();
        let now = now_secs();
        state
            .nodes
            .values()
            .filter(|n| now - n.last_seen <= self.timing.node_timeout_secs)
            .cloned()
            .collect()
    }

    pub fn get_node_info(&self, id: u64) -> Option<NodeEntry> {
        self.state.lock().nodes.get(&id).cloned()
    }

    pub fn node_exists(&self, id: u64) -> bool {
        let state = self.state.lock();
        match state.nodes.get(&id) {
            Some(n) => now_secs() - n.last_seen <= self.timing.node_timeout_secs,
            None => false,
        }
    }

    pub fn update_local_metadata(&self, f: impl FnOnce(&mut NodeMetadata)) {
        self.update_local_metadata_inner(f);
    }

    fn update_local_metadata_inner(&self, f: impl FnOnce(&mut NodeMetadata)) {
        let mut state = self.state.lock();
        let version = self.self_version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(entry) = state.nodes.get_mut(&self.node_id) {
            f(&mut entry.metadata);
            entry.version = version;
        }
    }

    /// Count of currently-live acceptors, used to compute quorum.
    pub fn live_acceptor_count(&self) -> usize {
        self.get_nodes_by_role(Role::Acceptor).len()
    }

    // ---- Receive handler ----

    pub fn receive_gossip(&self, push: GossipPush) -> GossipAck {
        let mut updates = 0usize;
        let now = now_secs();
        let mut state = self.state.lock();

        if let Some(sender_node) = push.nodes.get(&push.sender_id.to_string()) {
            state.nodes.insert(
                push.sender_id,
                NodeEntry {
                    id: push.sender_id,
                    role: push.sender_role,
                    address: sender_node.address.clone(),
                    port: sender_node.port,
                    last_seen: now,
                    version: sender_node.version,
                    metadata: sender_node.metadata.clone(),
                },
            );
        }

        for (id_str, incoming) in push.nodes.iter() {
            let Ok(id) = id_str.parse::<u64>() else {
                continue;
            };
            if id == self.node_id || id == push.sender_id {
                continue;
            }

            match state.nodes.get(&id) {
                None => {
                    state.nodes.insert(
                        id,
                        NodeEntry {
                            id,
                            role: incoming.role,
                            address: incoming.address.clone(),
                            port: incoming.port,
                            last_seen: push.timestamp,
                            version: incoming.version,
                            metadata: incoming.metadata.clone(),
                        },
                    );
                    updates += 1;
                }
                Some(local) if incoming.version > local.version => {
                    state.nodes.insert(
                        id,
                        NodeEntry {
                            id,
                            role: incoming.role,
                            address: incoming.address.clone(),
                            port: incoming.port,
                            last_seen: push.timestamp,
                            version: incoming.version,
                            metadata: incoming.metadata.clone(),
                        },
                    );
                    updates += 1;
                }
                Some(local) => {
                    let max_seen = local.last_seen.max(push.timestamp);
                    let is_leader_entry = state.leader_id == Some(id);
                    let entry = state.nodes.get_mut(&id).unwrap();
                    entry.last_seen = max_seen;
                    if is_leader_entry {
                        let incoming_hb = incoming.metadata.last_heartbeat.unwrap_or(0.0);
                        let current_hb = entry.metadata.last_heartbeat.unwrap_or(0.0);
                        if incoming_hb > current_hb {
                            entry.metadata.last_heartbeat = Some(incoming_hb);
                        }
                    }
                }
            }
        }

        if let Some(incoming_leader) = push.leader_id {
            if state.leader_id != Some(incoming_leader) {
                let old_leader = state.leader_id;
                state.leader_id = Some(incoming_leader);
                log::info!(
                    "[gossip-{}-{}] leader updated via gossip: {:?} -> {}",
                    self.node_role,
                    self.node_id,
                    old_leader,
                    incoming_leader
                );
                drop(state);
                if self.node_role == Role::Proposer {
                    if incoming_leader == self.node_id {
                        self.update_local_metadata_inner(|m| {
                            m.is_leader = Some(true);
                            m.last_heartbeat = Some(now_secs());
                        });
                    } else if old_leader == Some(self.node_id) {
                        self.update_local_metadata_inner(|m| m.is_leader = Some(false));
                    }
                }
                state = self.state.lock();
            }

            if let Some(leader_node) = push.nodes.get(&incoming_leader.to_string()) {
                if let Some(incoming_hb) = leader_node.metadata.last_heartbeat {
                    if let Some(entry) = state.nodes.get_mut(&incoming_leader) {
                        let current_hb = entry.metadata.last_heartbeat.unwrap_or(0.0);
                        if incoming_hb > current_hb {
                            entry.metadata = leader_node.metadata.clone();
                        }
                    }
                }
            }
        }

        let node_count = state.nodes.len();
        GossipAck {
            status: "ok".to_string(),
            updates,
            node_count,
        }
    }

    pub fn nodes_snapshot(&self) -> GossipNodesResponse {
        let state = self.state.lock();
        let now = now_secs();
        let nodes: HashMap<String, WireNode> = state
            .nodes
            .values()
            .filter(|n| now - n.last_seen <= self.timing.node_timeout_secs)
            .map(|n| (n.id.to_string(), WireNode::from(n)))
            .collect();
        GossipNodesResponse {
            total: nodes.len(),
            nodes,
            leader_id: state.leader_id,
        }
    }

    // ---- Background loops ----

    /// One push round: bump `self_version`, refresh `last_seen` (and leader
    /// heartbeat if applicable), select up to `fanout` random live peers,
    /// and POST the full table to each.
    pub async fn push_once(self: &Arc<Self>, http: &PeerClient) {
        let targets: Vec<NodeEntry>;
        let push_payload: GossipPush;

        {
            let mut state = self.state.lock();
            let version = self.self_version.fetch_add(1, Ordering::SeqCst) + 1;
            let now = now_secs();
            let is_leader = state.leader_id == Some(self.node_id);
            if let Some(entry) = state.nodes.get_mut(&self.node_id) {
                entry.version = version;
                entry.last_seen = now;
                if is_leader && self.node_role == Role::Proposer {
                    entry.metadata.is_leader = Some(true);
                    entry.metadata.last_heartbeat = Some(now);
                }
            }

            let others: Vec<&NodeEntry> = state
                .nodes
                .values()
                .filter(|n| n.id != self.node_id && now - n.last_seen <= self.timing.node_timeout_secs)
                .collect();
            let mut rng = rand::thread_rng();
            targets = others
                .choose_multiple(&mut rng, self.timing.fanout.min(others.len()))
                .map(|&n| n.clone())
                .collect();

            let nodes: HashMap<String, WireNode> =
                state.nodes.values().map(|n| (n.id.to_string(), WireNode::from(n))).collect();
            push_payload = GossipPush {
                sender_id: self.node_id,
                sender_role: self.node_role,
                nodes,
                leader_id: state.leader_id,
                timestamp: now,
            };
        }

        for target in targets {
            let address = resolve_address(&target.address, &self.namespace, self.rewrite_dns);
            let url = format!("http://{address}:{}/gossip", target.port);
            let http = http.clone();
            let payload = push_payload.clone();
            tokio::spawn(async move {
                let _: Option<GossipAck> = http.post_json(&url, &payload, RetryPolicy::GOSSIP).await;
            });
        }
    }

    /// Evicts entries whose `last_seen` is older than `node_timeout`.
    /// Clears `leader_id` if the evicted entry was the leader.
    pub fn cleanup_once(&self) {
        let mut state = self.state.lock();
        let now = now_secs();
        let self_id = self.node_id;
        let timeout = self.timing.node_timeout_secs;
        let stale: Vec<u64> = state
            .nodes
            .iter()
            .filter(|(id, n)| **id != self_id && now - n.last_seen > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in stale {
            state.nodes.remove(&id);
            if state.leader_id == Some(id) {
                log::warn!(
                    "[gossip-{}-{}] leader {id} evicted for inactivity",
                    self.node_role,
                    self.node_id
                );
                state.leader_id = None;
            }
        }
    }

    pub fn spawn_background(
        self: Arc<Self>,
        http: PeerClient,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let push_agent = self.clone();
        let push_http = http.clone();
        let mut push_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs_f64(push_agent.timing.gossip_interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => push_agent.push_once(&push_http).await,
                    _ = push_shutdown.changed() => if *push_shutdown.borrow() { break },
                }
            }
        });

        let cleanup_agent = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(
                cleanup_agent.timing.cleanup_interval_secs,
            ));
            loop {
                tokio::select! {
                    _ = interval.tick() => cleanup_agent.cleanup_once(),
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedNode;

    fn test_config() -> NodeConfig {
        NodeConfig {
            node_id: 1,
            role: Role::Proposer,
            port: 3000,
            hostname: "proposer1".into(),
            namespace: "paxos".into(),
            seed_nodes: vec![SeedNode {
                id: 2,
                role: Role::Proposer,
                address: "proposer2".into(),
                port: 3000,
            }],
            rewrite_dns: true,
        }
    }

    #[test]
    fn self_entry_always_present() {
        let agent = GossipAgent::new(&test_config(), GossipTiming::default());
        assert!(agent.node_exists(1));
    }

    #[test]
    fn seed_nodes_are_registered() {
        let agent = GossipAgent::new(&test_config(), GossipTiming::default());
        assert!(agent.node_exists(2));
    }

    #[test]
    fn higher_version_wins_anti_entropy() {
        let agent = GossipAgent::new(&test_config(), GossipTiming::default());
        let mut nodes = HashMap::new();
        nodes.insert(
            "2".to_string(),
            WireNode {
                id: 2,
                role: Role::Proposer,
                address: "proposer2-new".into(),
                port: 3000,
                last_seen: now_secs(),
                version: 5,
                metadata: NodeMetadata::default(),
            },
        );
        let ack = agent.receive_gossip(GossipPush {
            sender_id: 2,
            sender_role: Role::Proposer,
            nodes,
            leader_id: None,
            timestamp: now_secs(),
        });
        assert_eq!(ack.updates, 0); // sender itself isn't counted in `updates`
        assert_eq!(agent.get_node_info(2).unwrap().address, "proposer2-new");
    }

    #[test]
    fn lower_version_does_not_overwrite_but_advances_last_seen() {
        let agent = GossipAgent::new(&test_config(), GossipTiming::default());
        agent.update_local_metadata_inner(|_| {});
        // Bump node 2's version locally to 10 first via a direct gossip push.
        let mut nodes = HashMap::new();
        nodes.insert(
            "2".to_string(),
            WireNode {
                id: 2,
                role: Role::Proposer,
                address: "proposer2".into(),
                port: 3000,
                last_seen: now_secs(),
                version: 10,
                metadata: NodeMetadata::default(),
            },
        );
        agent.receive_gossip(GossipPush {
            sender_id: 2,
            sender_role: Role::Proposer,
            nodes: nodes.clone(),
            leader_id: None,
            timestamp: now_secs(),
        });

        // Now push an older version for an unrelated node (3) to verify
        // it gets installed once (version 0 -> new), then a stale repeat
        // doesn't regress it.
        nodes.get_mut("2").unwrap().version = 1;
        nodes.get_mut("2").unwrap().address = "stale".into();
        let ack = agent.receive_gossip(GossipPush {
            sender_id: 2,
            sender_role: Role::Proposer,
            nodes,
            leader_id: None,
            timestamp: now_secs(),
        });
        assert_eq!(ack.updates, 0);
        assert_eq!(agent.get_node_info(2).unwrap().address, "proposer2");
    }

    #[test]
    fn cleanup_evicts_stale_nodes_and_clears_leader() {
        let agent = GossipAgent::new(&test_config(), GossipTiming {
            node_timeout_secs: 0.0,
            ..GossipTiming::default()
        });
        agent.set_leader(Some(2));
        // node 2's last_seen is "now" from construction; with a 0s timeout
        // it's immediately stale except it was set at construction, so sleep
        // a tick via a manual backdate instead of real sleeping in a unit test.
        {
            let mut state = agent.state.lock();
            if let Some(e) = state.nodes.get_mut(&2) {
                e.last_seen -= 10.0;
            }
        }
        agent.cleanup_once();
        assert!(!agent.node_exists(2));
        assert_eq!(agent.get_leader(), None);
    }

    #[test]
    fn self_entry_never_evicted() {
        let agent = GossipAgent::new(&test_config(), GossipTiming {
            node_timeout_secs: 0.0,
            ..GossipTiming::default()
        });
        {
            let mut state = agent.state.lock();
            if let Some(e) = state.nodes.get_mut(&1) {
                e.last_seen -= 1000.0;
            }
        }
        agent.cleanup_once();
        assert!(agent.state.lock().nodes.contains_key(&1));
    }
}
