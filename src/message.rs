//! JSON request/response bodies exchanged over the HTTP endpoints of §6.
//! One struct per message, mirroring the shape (and doc-comment density) of
//! the teacher's `message.rs`, translated from bincode frames to JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Role;

// ---- Acceptor ----

#[derive(Debug, Clone, Deserialize)]
pub struct PrepareRequest {
    pub proposer_id: u64,
    pub proposal_number: i64,
    #[serde(default)]
    pub is_leader_election: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum PrepareResponse {
    #[serde(rename = "promise")]
    Promise {
        accepted_proposal_number: i64,
        accepted_value: Option<String>,
    },
    #[serde(rename = "rejected")]
    Rejected { message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptRequest {
    pub proposer_id: u64,
    pub proposal_number: i64,
    pub value: String,
    #[serde(default)]
    pub is_leader_election: bool,
    pub client_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum AcceptResponse {
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "rejected")]
    Rejected { message: String },
}

// ---- Proposer ----

#[derive(Debug, Clone, Deserialize)]
pub struct ProposeRequest {
    pub value: String,
    pub client_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeResponse {
    pub status: String,
    pub proposal_number: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub leader_id: u64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledged {
    pub status: String,
}

impl Default for Acknowledged {
    fn default() -> Self {
        Acknowledged {
            status: "acknowledged".to_string(),
        }
    }
}

// ---- Learner ----

#[derive(Debug, Clone, Deserialize)]
pub struct LearnRequest {
    pub acceptor_id: u64,
    pub proposal_number: i64,
    pub value: String,
    pub client_id: Option<u64>,
    #[serde(default)]
    pub is_leader_election: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuesResponse {
    pub values: Vec<String>,
}

// ---- Client ----

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResponse {
    pub status: &'static str,
    pub proposer_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyRequest {
    pub learner_id: u64,
    pub proposal_number: i64,
    pub value: String,
    pub learned_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientResponseLogEntry {
    pub learner_id: u64,
    pub proposal_number: i64,
    pub value: String,
    pub learned_at: f64,
    pub received_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponsesResponse {
    pub responses: Vec<ClientResponseLogEntry>,
}

// ---- Gossip (common to all roles) ----

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_leader: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_proposal_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_learned_proposal: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_learned_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learned_values_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_detected_failed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNode {
    pub id: u64,
    pub role: Role,
    pub address: String,
    pub port: u16,
    pub last_seen: f64,
    pub version: u64,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPush {
    pub sender_id: u64,
    pub sender_role: Role,
    pub nodes: HashMap<String, WireNode>,
    pub leader_id: Option<u64>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipAck {
    pub status: String,
    pub updates: usize,
    pub node_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GossipNodesResponse {
    pub total: usize,
    pub nodes: HashMap<String, WireNode>,
    pub leader_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub role: Role,
    pub id: u64,
}
