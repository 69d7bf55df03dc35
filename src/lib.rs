pub mod acceptor;
pub mod client;
pub mod config;
pub mod error;
pub mod gossip;
pub mod learner;
pub mod message;
pub mod net;
pub mod proposer;
pub mod server;
