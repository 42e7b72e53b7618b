//! The Client gateway (spec §4.4): the only role external clients talk
//! to. Routes writes to the current leader Proposer (retrying on
//! `NOT_LEADER`), routes reads to a Learner at the requested consistency
//! level, and offers a best-effort, non-durable subscribe/notify
//! surface (a supplement beyond the distilled spec — see SPEC_FULL.md).
//!
//! The teacher had no equivalent role: its `Client` struct
//! (`multi_paxos::Client`) broadcast a command directly to every
//! Acceptor over UDP and wasn't consistency-aware. This keeps the
//! teacher's "hide cluster topology behind one facade" idea but adds
//! leader tracking, retry-with-redirect, and read routing.

use crate::config::GatewaySettings;
use crate::error::PaxosError;
use crate::message::{
    ConsistencyLevel, GatewayReadRequest, GatewayStatus, ProposeRequest, ProposeResponse,
    ProposeStatus, ReadIndexResponse, ReadRequest, ReadResponse, SubscribeRequest,
    SubscribeResponse, UnsubscribeRequest, WriteRequest, WriteResponse,
};
use crate::rpc::RpcClient;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Subscription {
    patterns: Vec<String>,
    pending: Vec<String>,
}

struct GatewayState {
    known_leader: Option<String>,
    /// Last slot each client wrote to, so a subsequent `session` read
    /// from that client can require at least that slot (read-your-writes).
    session_index: HashMap<String, u64>,
    subscriptions: HashMap<String, Subscription>,
}

pub struct Gateway {
    settings: GatewaySettings,
    rpc: RpcClient,
    state: Mutex<GatewayState>,
    read_rr: AtomicUsize,
}

impl Gateway {
    pub fn new(settings: GatewaySettings) -> Arc<Self> {
        Arc::new(Gateway {
            settings,
            rpc: RpcClient::new(),
            state: Mutex::new(GatewayState {
                known_leader: None,
                session_index: HashMap::new(),
                subscriptions: HashMap::new(),
            }),
            read_rr: AtomicUsize::new(0),
        })
    }

    fn candidate_proposers(&self) -> Vec<String> {
        let leader = self.state.lock().known_leader.clone();
        let mut hosts = self.settings.proposer_hosts.clone();
        if let Some(leader) = leader {
            if let Some(pos) = hosts.iter().position(|h| *h == leader) {
                hosts.swap(0, pos);
            }
        }
        hosts
    }

    fn next_learner(&self) -> &str {
        let i = self.read_rr.fetch_add(1, Ordering::Relaxed) % self.settings.learner_hosts.len();
        &self.settings.learner_hosts[i]
    }

    /// Sends the write to the believed leader; on `NOT_LEADER` updates
    /// the cached leader hint and retries against the rest of the
    /// proposer set (spec §4.4, "Write routing").
    pub async fn write(self: &Arc<Self>, client_id: String, req: WriteRequest) -> Result<WriteResponse, PaxosError> {
        let candidates = self.candidate_proposers();
        let mut last_err = None;
        for host in candidates {
            let url = format!("http://{host}/propose");
            let body = ProposeRequest {
                key: req.key.clone(),
                value: req.value.clone(),
                client_id: client_id.clone(),
            };
            match self
                .rpc
                .post::<ProposeRequest, ProposeResponse>(&url, &body, Duration::from_secs(2))
                .await
            {
                Ok(ProposeResponse {
                    status: ProposeStatus::Ok,
                    slot: Some(slot),
                    ..
                }) => {
                    let mut s = self.state.lock();
                    s.known_leader = Some(host);
                    s.session_index.insert(client_id.clone(), slot);
                    drop(s);
                    self.fan_out_subscriptions(&req.key);
                    return Ok(WriteResponse { slot, client_id });
                }
                Ok(ProposeResponse {
                    status: ProposeStatus::NotLeader,
                    leader,
                    ..
                }) => {
                    self.state.lock().known_leader = leader;
                    continue;
                }
                Ok(_) => continue,
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(PaxosError::NotLeader { leader: None }))
    }

    /// Routes a read per `consistency_level` (spec §4.4, "Read
    /// routing"). `strong` first confirms the leader's current index via
    /// [`crate::proposer::Proposer::read_index`]-backed `/read_index`,
    /// then waits for a Learner to catch up to it; `session` waits for
    /// at least the client's own last write; `eventual` hits whichever
    /// Learner is next in the round-robin with no waiting.
    pub async fn read(self: &Arc<Self>, req: GatewayReadRequest) -> Result<ReadResponse, PaxosError> {
        let min_slot = match req.consistency_level {
            ConsistencyLevel::Strong => Some(self.confirm_leader_index().await?),
            ConsistencyLevel::Session => req
                .client_id
                .as_ref()
                .and_then(|id| self.state.lock().session_index.get(id).copied()),
            ConsistencyLevel::Eventual => None,
        };

        let host = self.next_learner().to_string();
        let url = format!("http://{host}/read");
        let body = ReadRequest {
            key: req.key,
            consistency_level: match req.consistency_level {
                ConsistencyLevel::Strong => ConsistencyLevel::Session,
                other => other,
            },
            client_id: req.client_id,
            min_slot,
        };
        self.rpc
            .post::<ReadRequest, ReadResponse>(&url, &body, self.settings.read_deadline)
            .await
    }

    async fn confirm_leader_index(&self) -> Result<u64, PaxosError> {
        let candidates = self.candidate_proposers();
        let mut last_err = None;
        for host in candidates {
            let url = format!("http://{host}/read_index");
            match self
                .rpc
                .post::<(), ReadIndexResponse>(&url, &(), Duration::from_secs(2))
                .await
            {
                Ok(ReadIndexResponse {
                    status: ProposeStatus::Ok,
                    slot: Some(slot),
                    ..
                }) => {
                    self.state.lock().known_leader = Some(host);
                    return Ok(slot);
                }
                Ok(ReadIndexResponse { leader, .. }) => {
                    self.state.lock().known_leader = leader;
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(PaxosError::ReadUnavailable(
            "no proposer confirmed leadership".into(),
        )))
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            known_leader: self.state.lock().known_leader.clone(),
        }
    }

    pub fn subscribe(&self, req: SubscribeRequest) -> SubscribeResponse {
        let id = uuid::Uuid::new_v4().to_string();
        self.state.lock().subscriptions.insert(
            id.clone(),
            Subscription {
                patterns: req.patterns,
                pending: Vec::new(),
            },
        );
        SubscribeResponse { id }
    }

    pub fn unsubscribe(&self, req: UnsubscribeRequest) {
        self.state.lock().subscriptions.remove(&req.id);
    }

    /// Drains whatever keys have changed for this subscription since the
    /// last poll. Best-effort only: a gateway restart loses pending
    /// notifications, and a key change is recorded only if this gateway
    /// itself served the write.
    pub fn poll(&self, id: &str) -> Option<Vec<String>> {
        let mut s = self.state.lock();
        s.subscriptions.get_mut(id).map(|sub| std::mem::take(&mut sub.pending))
    }

    fn fan_out_subscriptions(&self, key: &str) {
        let mut s = self.state.lock();
        for sub in s.subscriptions.values_mut() {
            if sub.patterns.iter().any(|p| pattern_matches(p, key)) {
                sub.pending.push(key.to_string());
            }
        }
    }
}

/// A pattern is either an exact key or ends in `*` for a prefix match.
/// Minimal by design: full glob syntax has no caller in this surface.
fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_exact_and_prefix() {
        assert!(pattern_matches("user:42", "user:42"));
        assert!(!pattern_matches("user:42", "user:43"));
        assert!(pattern_matches("user:*", "user:99"));
        assert!(!pattern_matches("user:*", "order:1"));
    }

    #[test]
    fn subscribe_then_poll_drains_and_clears() {
        let gateway = Gateway::new(GatewaySettings {
            port: 0,
            proposer_hosts: vec!["p1".into()],
            learner_hosts: vec!["l1".into()],
            read_deadline: Duration::from_millis(100),
        });
        let sub = gateway.subscribe(SubscribeRequest {
            patterns: vec!["user:*".into()],
        });
        gateway.fan_out_subscriptions("user:1");
        gateway.fan_out_subscriptions("order:1");
        let pending = gateway.poll(&sub.id).unwrap();
        assert_eq!(pending, vec!["user:1".to_string()]);
        assert!(gateway.poll(&sub.id).unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_removes_subscription() {
        let gateway = Gateway::new(GatewaySettings {
            port: 0,
            proposer_hosts: vec!["p1".into()],
            learner_hosts: vec!["l1".into()],
            read_deadline: Duration::from_millis(100),
        });
        let sub = gateway.subscribe(SubscribeRequest { patterns: vec![] });
        gateway.unsubscribe(UnsubscribeRequest { id: sub.id.clone() });
        assert!(gateway.poll(&sub.id).is_none());
    }
}
