//! End-to-end scenarios over real loopback HTTP, covering spec.md §8's
//! S2 (single commit), S4 (minority acceptor loss), and S5 (no quorum
//! available). S1/S3/S6 (bootstrap election, leader failover, split
//! attempts) exercise the ballot/quorum state machines directly and live
//! in each module's own `#[cfg(test)]` block instead, since they hinge on
//! the multi-second election/heartbeat timers that would make a real
//! network test prohibitively slow.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use paxos_cluster::acceptor::Acceptor;
use paxos_cluster::client::Client;
use paxos_cluster::config::{NodeConfig, Role, SeedNode};
use paxos_cluster::gossip::{GossipAgent, GossipTiming};
use paxos_cluster::learner::Learner;
use paxos_cluster::net::PeerClient;
use paxos_cluster::proposer::Proposer;
use paxos_cluster::server;

struct Node {
    port: u16,
}

async fn spawn_router(router: axum::Router) -> Node {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Node { port: addr.port() }
}

fn seed(id: u64, role: Role, port: u16) -> SeedNode {
    SeedNode {
        id,
        role,
        address: "127.0.0.1".into(),
        port,
    }
}

fn config(node_id: u64, role: Role, port: u16, seeds: Vec<SeedNode>) -> NodeConfig {
    NodeConfig {
        node_id,
        role,
        port,
        hostname: "127.0.0.1".into(),
        namespace: "paxos".into(),
        seed_nodes: seeds,
        rewrite_dns: false,
    }
}

/// Spins up `n_acceptors` acceptors, `n_learners` learners, one proposer
/// (id 1, left in bootstrap mode so it can propose without a prior
/// election), and one client, all cross-registered via seed nodes. Returns
/// the client's port and node.
async fn spawn_cluster(n_acceptors: usize, n_learners: usize, extra_seeds: Vec<SeedNode>) -> u16 {
    // Reserve ports up front so every node's seed list is complete before
    // any server starts handling gossip/propose traffic.
    let mut acceptor_listeners = Vec::new();
    for _ in 0..n_acceptors {
        acceptor_listeners.push(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let mut learner_listeners = Vec::new();
    for _ in 0..n_learners {
        learner_listeners.push(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let proposer_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();

    let acceptor_ports: Vec<u16> = acceptor_listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect();
    let learner_ports: Vec<u16> = learner_listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect();
    let proposer_port = proposer_listener.local_addr().unwrap().port();
    let client_port = client_listener.local_addr().unwrap().port();

    let mut all_seeds = Vec::new();
    for (i, &port) in acceptor_ports.iter().enumerate() {
        all_seeds.push(seed(100 + i as u64, Role::Acceptor, port));
    }
    for (i, &port) in learner_ports.iter().enumerate() {
        all_seeds.push(seed(200 + i as u64, Role::Learner, port));
    }
    all_seeds.push(seed(1, Role::Proposer, proposer_port));
    all_seeds.push(seed(300, Role::Client, client_port));
    all_seeds.extend(extra_seeds);

    for (i, listener) in acceptor_listeners.into_iter().enumerate() {
        let id = 100 + i as u64;
        let cfg = config(id, Role::Acceptor, acceptor_ports[i], all_seeds.clone());
        let gossip = Arc::new(GossipAgent::new(&cfg, GossipTiming::default()));
        let acceptor = Arc::new(Acceptor::new(&cfg, gossip, PeerClient::new()));
        let router = server::acceptor_router(acceptor);
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    }

    for (i, listener) in learner_listeners.into_iter().enumerate() {
        let id = 200 + i as u64;
        let cfg = config(id, Role::Learner, learner_ports[i], all_seeds.clone());
        let gossip = Arc::new(GossipAgent::new(&cfg, GossipTiming::default()));
        let learner = Arc::new(Learner::new(&cfg, gossip, PeerClient::new()));
        let router = server::learner_router(learner);
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    }

    let proposer_cfg = config(1, Role::Proposer, proposer_port, all_seeds.clone());
    let proposer_gossip = Arc::new(GossipAgent::new(&proposer_cfg, GossipTiming::default()));
    let proposer = Arc::new(Proposer::new(&proposer_cfg, proposer_gossip, PeerClient::new()));
    let proposer_router = server::proposer_router(proposer);
    tokio::spawn(async move { axum::serve(proposer_listener, proposer_router).await.unwrap() });

    let client_cfg = config(300, Role::Client, client_port, all_seeds);
    let client_gossip = Arc::new(GossipAgent::new(&client_cfg, GossipTiming::default()));
    let client = Arc::new(Client::new(&client_cfg, client_gossip, PeerClient::new()));
    let client_router = server::client_router(client);
    tokio::spawn(async move { axum::serve(client_listener, client_router).await.unwrap() });

    // Give the freshly-spawned servers a beat to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client_port
}

async fn send_value(client_port: u16, value: &str) -> serde_json::Value {
    let http = reqwest::Client::new();
    http.post(format!("http://127.0.0.1:{client_port}/send"))
        .json(&serde_json::json!({ "value": value }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn read_values(client_port: u16) -> Vec<String> {
    let http = reqwest::Client::new();
    let resp: serde_json::Value = http
        .get(format!("http://127.0.0.1:{client_port}/read"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    resp["values"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn s2_single_commit_reaches_the_learners() {
    let client_port = spawn_cluster(3, 2, vec![]).await;

    let send_resp = send_value(client_port, "hello-paxos").await;
    assert_eq!(send_resp["status"], "value sent");

    // Give the prepare/accept/learn fan-out a moment to complete.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let values = read_values(client_port).await;
    assert!(values.contains(&"hello-paxos".to_string()));
}

#[tokio::test]
async fn s4_commit_survives_a_minority_of_acceptors_being_down() {
    // 3 acceptors are registered in every node's gossip table, but the
    // third port is closed before anything binds to it, simulating a
    // crashed acceptor. Quorum over 3 is 2, so the 2 live acceptors still
    // carry the ballot through.
    let down_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let down_port = down_listener.local_addr().unwrap().port();
    drop(down_listener);

    let client_port = spawn_cluster(2, 1, vec![seed(103, Role::Acceptor, down_port)]).await;

    let send_resp = send_value(client_port, "survives-minority-loss").await;
    assert_eq!(send_resp["status"], "value sent");

    tokio::time::sleep(Duration::from_millis(800)).await;

    let values = read_values(client_port).await;
    assert!(values.contains(&"survives-minority-loss".to_string()));
}

#[tokio::test]
async fn s5_no_quorum_available_is_reported_to_the_client() {
    // A client wired to a cluster with zero proposers known can never
    // reach a proposer at all.
    let client_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client_port = client_listener.local_addr().unwrap().port();
    let cfg = config(300, Role::Client, client_port, vec![]);
    let gossip = Arc::new(GossipAgent::new(&cfg, GossipTiming::default()));
    let client = Arc::new(Client::new(&cfg, gossip, PeerClient::new()));
    let router = server::client_router(client);
    tokio::spawn(async move { axum::serve(client_listener, router).await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://127.0.0.1:{client_port}/send"))
        .json(&serde_json::json!({ "value": "nobody-home" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_and_gossip_routes_respond_on_every_role() {
    let client_port = spawn_cluster(1, 1, vec![]).await;
    let http = reqwest::Client::new();

    let health: serde_json::Value = http
        .get(format!("http://127.0.0.1:{client_port}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["role"], "client");

    let nodes: serde_json::Value = http
        .get(format!("http://127.0.0.1:{client_port}/gossip/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(nodes["total"].as_u64().unwrap() >= 1);
}
