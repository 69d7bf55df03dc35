//! Entrypoint: reads `NODE_ROLE` from the environment and starts the
//! matching role's server, background loops, and gossip agent. Ported
//! from `examples/original_source/nodes/main.py`'s dispatch, collapsed
//! into one binary rather than the teacher's one-binary-per-role layout
//! (see DESIGN.md for why).

use std::sync::Arc;

use paxos_cluster::acceptor::Acceptor;
use paxos_cluster::client::Client;
use paxos_cluster::config::{NodeConfig, Role};
use paxos_cluster::gossip::{GossipAgent, GossipTiming};
use paxos_cluster::learner::Learner;
use paxos_cluster::net::PeerClient;
use paxos_cluster::proposer::Proposer;
use paxos_cluster::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("paxos_cluster=info")).init();

    let config = NodeConfig::from_env()?;
    log::info!(
        "starting node {} as {} on port {} (namespace {})",
        config.node_id,
        config.role,
        config.port,
        config.namespace
    );

    let gossip = Arc::new(GossipAgent::new(&config, GossipTiming::default()));
    let http = PeerClient::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    gossip.clone().spawn_background(http.clone(), shutdown_rx.clone());

    let app = match config.role {
        Role::Proposer => {
            let proposer = Arc::new(Proposer::new(&config, gossip.clone(), http.clone()));
            proposer.clone().spawn_leader_check(shutdown_rx.clone());
            proposer.clone().spawn_heartbeat(shutdown_rx.clone());
            proposer.clone().spawn_bootstrap();
            server::proposer_router(proposer)
        }
        Role::Acceptor => {
            let acceptor = Arc::new(Acceptor::new(&config, gossip.clone(), http.clone()));
            acceptor.clone().spawn_leader_watch(shutdown_rx.clone());
            server::acceptor_router(acceptor)
        }
        Role::Learner => {
            let learner = Arc::new(Learner::new(&config, gossip.clone(), http.clone()));
            server::learner_router(learner)
        }
        Role::Client => {
            let client = Arc::new(Client::new(&config, gossip.clone(), http.clone()));
            server::client_router(client)
        }
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    log::info!("{} {} listening on 0.0.0.0:{}", config.role, config.node_id, config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received, stopping background loops");
    let _ = shutdown_tx.send(true);
}
