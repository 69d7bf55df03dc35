//! Outbound HTTP calls to peers, with the retry/backoff/jitter discipline
//! that `examples/original_source/nodes/gossip_protocol.py` and
//! `proposer_node.py` apply around every `requests.post`. This replaces the
//! teacher's `net_node.rs` UDP/bincode transport wholesale: the wire format
//! is JSON-over-HTTP per spec.md §6.

use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A retry policy: up to `max_retries` attempts, each waited out with
/// `base * factor^attempt + U(jitter_lo, jitter_hi)` seconds between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub factor: f64,
    pub jitter_lo: f64,
    pub jitter_hi: f64,
}

impl RetryPolicy {
    /// prepare/accept: base 1s, factor 2, <= 3 tries (spec.md §4.3).
    pub const PAXOS: RetryPolicy = RetryPolicy {
        max_retries: 3,
        base: Duration::from_secs(1),
        factor: 2.0,
        jitter_lo: 0.1,
        jitter_hi: 0.3,
    };

    /// gossip push: factor 1.5 (spec.md §4.4).
    pub const GOSSIP: RetryPolicy = RetryPolicy {
        max_retries: 3,
        base: Duration::from_secs(2),
        factor: 1.5,
        jitter_lo: 0.1,
        jitter_hi: 0.3,
    };

    /// leader heartbeat: single attempt, 2s timeout, no retry (spec.md §4.3).
    pub const HEARTBEAT: RetryPolicy = RetryPolicy {
        max_retries: 1,
        base: Duration::from_secs(2),
        factor: 1.0,
        jitter_lo: 0.0,
        jitter_hi: 0.05,
    };

    fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(self.jitter_lo..self.jitter_hi);
        Duration::from_secs_f64(backoff + jitter)
    }
}

/// Result of [`PeerClient::post_json_or_not_leader`].
pub enum PostOutcome<R> {
    Ok(R),
    NotLeader { current_leader: Option<u64> },
    Failed,
}

/// Thin wrapper around a `reqwest::Client` that applies [`RetryPolicy`] to
/// POST/GET calls and logs failures at `warn`, never propagating them to the
/// caller (spec.md §7: `PeerTransient` is recovered internally).
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl Default for PeerClient {
    fn default() -> Self {
        PeerClient {
            http: reqwest::Client::new(),
        }
    }
}

impl PeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// POSTs `body` as JSON to `url`, retrying per `policy`. Returns `None`
    /// if every attempt failed or returned a non-2xx status; the caller
    /// never sees the underlying transport error (§7 propagation policy).
    pub async fn post_json<B, R>(&self, url: &str, body: &B, policy: RetryPolicy) -> Option<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        for attempt in 0..policy.max_retries {
            let timeout = policy.timeout_for_attempt(attempt);
            match self
                .http
                .post(url)
                .json(body)
                .timeout(timeout)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => match resp.json::<R>().await {
                    Ok(parsed) => return Some(parsed),
                    Err(e) => {
                        log::warn!("peer {url} sent an unparsable response: {e}");
                        return None;
                    }
                },
                Ok(resp) => {
                    log::warn!("peer {url} replied with status {}", resp.status());
                }
                Err(e) => {
                    if attempt + 1 == policy.max_retries {
                        log::warn!(
                            "peer {url} unreachable after {} attempts: {e}",
                            policy.max_retries
                        );
                    }
                }
            }
            if attempt + 1 < policy.max_retries {
                tokio::time::sleep(timeout).await;
            }
        }
        None
    }

    /// POSTs `body` as JSON and discards the response, used for fire-and-forget
    /// notifications (heartbeat, learn, notify) where the caller doesn't act
    /// on the reply.
    pub async fn post_json_fire_and_forget<B>(&self, url: &str, body: &B, policy: RetryPolicy)
    where
        B: Serialize + ?Sized,
    {
        let _: Option<serde_json::Value> = self.post_json(url, body, policy).await;
    }

    /// POSTs `body` as JSON, distinguishing a 403 "not the leader" reply
    /// (the only status code a caller needs to act on differently) from
    /// every other failure. Used by the client's send-to-leader path, which
    /// needs to redirect to whatever proposer its first target names as
    /// leader rather than just giving up.
    pub async fn post_json_or_not_leader<B, R>(&self, url: &str, body: &B, policy: RetryPolicy) -> PostOutcome<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        for attempt in 0..policy.max_retries {
            let timeout = policy.timeout_for_attempt(attempt);
            match self.http.post(url).json(body).timeout(timeout).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return match resp.json::<R>().await {
                        Ok(parsed) => PostOutcome::Ok(parsed),
                        Err(e) => {
                            log::warn!("peer {url} sent an unparsable response: {e}");
                            PostOutcome::Failed
                        }
                    };
                }
                Ok(resp) if resp.status() == reqwest::StatusCode::FORBIDDEN => {
                    let current_leader = resp
                        .json::<serde_json::Value>()
                        .await
                        .ok()
                        .and_then(|v| v.get("current_leader").and_then(|l| l.as_u64()));
                    return PostOutcome::NotLeader { current_leader };
                }
                Ok(resp) => {
                    log::warn!("peer {url} replied with status {}", resp.status());
                }
                Err(e) => {
                    if attempt + 1 == policy.max_retries {
                        log::warn!(
                            "peer {url} unreachable after {} attempts: {e}",
                            policy.max_retries
                        );
                    }
                }
            }
            if attempt + 1 < policy.max_retries {
                tokio::time::sleep(timeout).await;
            }
        }
        PostOutcome::Failed
    }

    /// GETs `url`, retrying per `policy`.
    pub async fn get_json<R>(&self, url: &str, policy: RetryPolicy) -> Option<R>
    where
        R: DeserializeOwned,
    {
        for attempt in 0..policy.max_retries {
            let timeout = policy.timeout_for_attempt(attempt);
            match self.http.get(url).timeout(timeout).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<R>().await {
                    Ok(parsed) => return Some(parsed),
                    Err(e) => {
                        log::warn!("peer {url} sent an unparsable response: {e}");
                        return None;
                    }
                },
                Ok(resp) => {
                    log::warn!("peer {url} replied with status {}", resp.status());
                }
                Err(e) => {
                    if attempt + 1 == policy.max_retries {
                        log::warn!(
                            "peer {url} unreachable after {} attempts: {e}",
                            policy.max_retries
                        );
                    }
                }
            }
            if attempt + 1 < policy.max_retries {
                tokio::time::sleep(timeout).await;
            }
        }
        None
    }
}

/// Rewrites `address` into a cluster DNS name if it contains `-` and isn't
/// already a fully-qualified service name. Ported from
/// `examples/original_source/nodes/gossip_protocol.py`'s address rewrite,
/// now gated behind `NodeConfig.rewrite_dns` instead of unconditional
/// (spec.md §9 REDESIGN FLAGS).
pub fn resolve_address(address: &str, namespace: &str, rewrite_dns: bool) -> String {
    if !rewrite_dns || address.contains("svc.cluster.local") || !address.contains('-') {
        return address.to_string();
    }
    let service_name = address.split('-').next().unwrap_or(address);
    format!("{service_name}.{namespace}.svc.cluster.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_address_leaves_plain_hosts_alone() {
        assert_eq!(resolve_address("acceptor1", "paxos", true), "acceptor1");
    }

    #[test]
    fn resolve_address_rewrites_pod_names() {
        assert_eq!(
            resolve_address("proposer1-d789dbb8b-8lj97", "paxos", true),
            "proposer1.paxos.svc.cluster.local"
        );
    }

    #[test]
    fn resolve_address_respects_the_toggle() {
        assert_eq!(
            resolve_address("proposer1-d789dbb8b-8lj97", "paxos", false),
            "proposer1-d789dbb8b-8lj97"
        );
    }

    #[test]
    fn resolve_address_is_idempotent_on_fqdns() {
        let fqdn = "proposer1.paxos.svc.cluster.local";
        assert_eq!(resolve_address(fqdn, "paxos", true), fqdn);
    }
}
