//! The Proposer role (spec §4.2): drives Paxos rounds, contests
//! leadership, and amortizes Phase 1 across an epoch once it wins
//! (Multi-Paxos).
//!
//! Grounded on the teacher's `multi_paxos::Proposer` (`ProposerState`
//! per in-flight instance, round generation, NACK-triggered retry with a
//! bumped round), generalized to a long-lived FOLLOWER/CANDIDATE/LEADER
//! state machine with heartbeat-based leader discovery instead of the
//! teacher's "one proposal, one client command" loop.

use crate::config::ProposerSettings;
use crate::error::PaxosError;
use crate::message::{
    AcceptRequest, AcceptResponse, AcceptStatus, HeartbeatRequest, HeartbeatResponse,
    PrepareRequest, PrepareResponse, PrepareStatus, ProposerRole, ProposerStatus,
};
use crate::rpc::RpcClient;
use crate::types::{quorum_size, Command, ProposalNumber, Slot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Slot reserved for leader-election proposals. A proposer wins epoch
/// `n` by getting `Command::Leader{proposer_id, epoch: n}` accepted by a
/// quorum in Paxos instance `(ELECTION_SLOT, n)`.
const ELECTION_SLOT: Slot = 0;

struct SharedState {
    role: ProposerRole,
    epoch: u64,
    current_leader: Option<String>,
    next_slot: Slot,
    phase1_done_for_epoch: bool,
    last_heartbeat_seen: Instant,
    inflight: usize,
}

/// Drives Paxos rounds for this node and, while `LEADER`, accepts client
/// writes via [`Proposer::propose`].
pub struct Proposer {
    pub id: u64,
    pub host: String,
    settings: ProposerSettings,
    rpc: RpcClient,
    state: Mutex<SharedState>,
    round_counter: AtomicU64,
}

impl Proposer {
    pub fn spawn(id: u64, host: String, settings: ProposerSettings) -> Arc<Self> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            / 1000;
        let proposer = Arc::new(Proposer {
            id,
            host,
            settings,
            rpc: RpcClient::new(),
            state: Mutex::new(SharedState {
                role: ProposerRole::Follower,
                epoch: 0,
                current_leader: None,
                next_slot: 1,
                phase1_done_for_epoch: false,
                last_heartbeat_seen: Instant::now(),
                inflight: 0,
            }),
            round_counter: AtomicU64::new(seed),
        });

        tokio::spawn(election_monitor(proposer.clone()));
        tokio::spawn(heartbeat_sender(proposer.clone()));
        proposer
    }

    pub fn status(&self) -> ProposerStatus {
        let s = self.state.lock();
        ProposerStatus {
            role: s.role,
            epoch: s.epoch,
            next_slot: s.next_slot,
            leader: s.current_leader.clone(),
        }
    }

    fn next_round(&self) -> u64 {
        self.round_counter.fetch_add(1, AtomicOrdering::SeqCst)
    }

    fn is_leader(&self) -> bool {
        self.state.lock().role == ProposerRole::Leader
    }

    /// Checked at the top of every Phase 1/Phase 2 retry iteration: a
    /// proposer demoted to FOLLOWER, or that has moved to a different
    /// epoch, abandons inflight work for the epoch it started the round
    /// under instead of continuing to contend on its behalf (spec §5).
    fn ensure_still_contending(&self, started_epoch: u64) -> Result<(), PaxosError> {
        let s = self.state.lock();
        if s.role == ProposerRole::Follower || s.epoch != started_epoch {
            return Err(PaxosError::StaleEpoch {
                epoch: started_epoch,
                current_epoch: s.epoch,
            });
        }
        Ok(())
    }

    /// Handles an incoming heartbeat from whichever node believes itself
    /// leader. Per spec §4.2: a heartbeat from an equal or higher epoch
    /// than ours is authoritative and demotes us to FOLLOWER; a
    /// heartbeat from a lower epoch is stale and ignored. `req.host` is
    /// the leader's own advertised address, not the connection-peer
    /// address the transport would otherwise see it dial in from — that
    /// peer address is an ephemeral outbound port, not something another
    /// node could dial back.
    pub fn on_heartbeat(&self, req: HeartbeatRequest) -> HeartbeatResponse {
        let mut s = self.state.lock();
        if req.epoch < s.epoch {
            return HeartbeatResponse { ack: false };
        }
        if req.epoch > s.epoch || s.current_leader.as_deref() != Some(req.host.as_str()) {
            log::info!(
                "proposer {}: observed leader {} at epoch {}",
                self.id,
                req.host,
                req.epoch
            );
        }
        s.last_heartbeat_seen = Instant::now();
        s.epoch = req.epoch;
        s.current_leader = Some(req.host);
        if req.proposer_id != self.id {
            s.role = ProposerRole::Follower;
            s.phase1_done_for_epoch = false;
        }
        HeartbeatResponse { ack: true }
    }

    /// Accepts a client write if this node currently believes itself
    /// leader. Returns `NotLeader` (with the best-known leader, for the
    /// gateway to redirect to) otherwise.
    pub async fn propose(self: &Arc<Self>, key: String, value: Vec<u8>) -> Result<Slot, PaxosError> {
        {
            let mut s = self.state.lock();
            if s.role != ProposerRole::Leader {
                return Err(PaxosError::NotLeader {
                    leader: s.current_leader.clone(),
                });
            }
            if s.inflight >= self.settings.inflight_window {
                return Err(PaxosError::BackpressureRejected {
                    capacity: self.settings.inflight_window,
                });
            }
            s.inflight += 1;
        }

        let result = self.bind_command(Command::Write { key, value }).await;

        {
            let mut s = self.state.lock();
            s.inflight = s.inflight.saturating_sub(1);
        }
        result
    }

    /// Claims fresh slots and drives them until `command` itself is the
    /// value committed to one of them (spec §4.2, "Client command
    /// binding": a slot a concurrent Phase 1 already bound to a
    /// different value is not wasted — that value is finished there,
    /// and the client's command is retried at the next slot instead of
    /// being silently dropped).
    async fn bind_command(self: &Arc<Self>, command: Command) -> Result<Slot, PaxosError> {
        loop {
            let slot = {
                let mut s = self.state.lock();
                let slot = s.next_slot;
                s.next_slot += 1;
                slot
            };
            let committed = self.drive_slot(slot, command.clone()).await?;
            if committed == command {
                return Ok(slot);
            }
            log::debug!(
                "proposer {}: slot {slot} was already bound to another value, retrying at a fresh slot",
                self.id
            );
        }
    }

    /// Confirms this node is still leader and returns the slot a
    /// `strong` read should wait for, by driving a `NoOp` through one
    /// more slot. A successful round proves no other proposer has won
    /// leadership since, satisfying the same "confirm before reading"
    /// requirement as a real read, without touching the key-value map.
    pub async fn read_index(self: &Arc<Self>) -> Result<Slot, PaxosError> {
        let slot = {
            let mut s = self.state.lock();
            if s.role != ProposerRole::Leader {
                return Err(PaxosError::NotLeader {
                    leader: s.current_leader.clone(),
                });
            }
            let slot = s.next_slot;
            s.next_slot += 1;
            slot
        };
        self.drive_slot(slot, Command::NoOp).await?;
        Ok(slot)
    }

    /// Runs a full Paxos round for `slot`, retrying with a strictly
    /// higher proposal number on every NACK, until a quorum accepts some
    /// value — `value` itself, unless Phase 1 revealed a value already
    /// accepted for that slot, in which case safety requires finishing
    /// that value instead (Paxos's Phase 1 rule). Returns whichever
    /// value actually ends up committed to `slot`, so callers can tell
    /// the two cases apart.
    async fn drive_slot(self: &Arc<Self>, slot: Slot, value: Command) -> Result<Command, PaxosError> {
        let started_epoch = self.state.lock().epoch;
        let phase1_done = slot != ELECTION_SLOT && self.state.lock().phase1_done_for_epoch;
        let mut to_propose = value;

        let committed = if !phase1_done {
            let (n, adopted) = self.run_phase1(slot, started_epoch).await?;
            if let Some(adopted_value) = adopted {
                to_propose = adopted_value;
            }
            if slot != ELECTION_SLOT {
                self.state.lock().phase1_done_for_epoch = true;
            }
            self.run_phase2(slot, n, to_propose, started_epoch).await?
        } else {
            self.ensure_still_contending(started_epoch)?;
            let n = self.proposal_number_for_epoch();
            self.run_phase2(slot, n, to_propose, started_epoch).await?
        };

        if slot == ELECTION_SLOT {
            self.become_leader_if_self(&committed);
        }
        Ok(committed)
    }

    fn proposal_number_for_epoch(&self) -> ProposalNumber {
        ProposalNumber::new(self.state.lock().epoch, self.id)
    }

    /// Phase 1: PREPARE against every acceptor, retrying with a bumped
    /// round on NACK, until a quorum of PROMISEs is collected. Returns
    /// the winning proposal number plus the highest-numbered previously
    /// accepted value among the promises, if any (invariant: a proposer
    /// must adopt that value rather than its own, spec §4.2 "Phase 1
    /// rule").
    async fn run_phase1(
        self: &Arc<Self>,
        slot: Slot,
        started_epoch: u64,
    ) -> Result<(ProposalNumber, Option<Command>), PaxosError> {
        let quorum = self.settings.quorum_size;
        let mut attempt = 0u32;
        loop {
            self.ensure_still_contending(started_epoch)?;
            let round = self.next_round();
            let n = ProposalNumber::new(round, self.id);
            let req = PrepareRequest {
                slot,
                proposal_num: n,
            };
            let responses = self
                .rpc
                .broadcast::<PrepareRequest, PrepareResponse>(
                    &self.settings.acceptor_hosts,
                    "/prepare",
                    &req,
                    Duration::from_millis(500),
                )
                .await;

            let mut promises = 0usize;
            let mut highest: Option<(ProposalNumber, Command)> = None;
            for (_peer, result) in responses {
                match result {
                    Ok(PrepareResponse {
                        status: PrepareStatus::Promise,
                        accepted_num,
                        accepted_val,
                        ..
                    }) => {
                        promises += 1;
                        if let (Some(an), Some(av)) = (accepted_num, accepted_val) {
                            if highest.as_ref().map(|(hn, _)| an > *hn).unwrap_or(true) {
                                highest = Some((an, av));
                            }
                        }
                    }
                    Ok(PrepareResponse {
                        status: PrepareStatus::Nack,
                        promised,
                        ..
                    }) => {
                        // A NACK's promised round updates maxRoundSeen
                        // (the shared `round_counter`) before any further
                        // proposal, so the next `next_round()` call -
                        // from this loop or any other in-flight one -
                        // strictly exceeds it (spec §3/§4.2).
                        if let Some(p) = promised {
                            self.round_counter.fetch_max(p.round.saturating_add(1), AtomicOrdering::SeqCst);
                        }
                    }
                    Err(_) => {}
                }
            }

            if promises >= quorum {
                return Ok((n, highest.map(|(_, v)| v)));
            }

            attempt += 1;
            tokio::time::sleep(crate::rpc::backoff_delay(attempt)).await;
        }
    }

    /// Phase 2: ACCEPT against every acceptor with proposal number `n`
    /// and `value`. A quorum of ACCEPTED confirms the slot is chosen; a
    /// NACK carrying a higher promise forces a fresh Phase 1.
    async fn run_phase2(
        self: &Arc<Self>,
        slot: Slot,
        n: ProposalNumber,
        value: Command,
        started_epoch: u64,
    ) -> Result<Command, PaxosError> {
        let quorum = self.settings.quorum_size;
        let mut n = n;
        let mut value = value;
        loop {
            self.ensure_still_contending(started_epoch)?;
            let req = AcceptRequest {
                slot,
                proposal_num: n,
                value: value.clone(),
            };
            let responses = self
                .rpc
                .broadcast::<AcceptRequest, AcceptResponse>(
                    &self.settings.acceptor_hosts,
                    "/accept",
                    &req,
                    Duration::from_millis(500),
                )
                .await;

            let mut accepted = 0usize;
            let mut superseded = false;
            for (_peer, result) in responses {
                match result {
                    Ok(AcceptResponse {
                        status: AcceptStatus::Accepted,
                        ..
                    }) => accepted += 1,
                    Ok(AcceptResponse {
                        status: AcceptStatus::Nack,
                        promised,
                    }) => {
                        superseded = true;
                        if let Some(p) = promised {
                            self.round_counter.fetch_max(p.round.saturating_add(1), AtomicOrdering::SeqCst);
                        }
                    }
                    Err(_) => {}
                }
            }

            if accepted >= quorum {
                return Ok(value);
            }

            if !superseded {
                return Err(PaxosError::NoQuorum { slot, quorum });
            }

            // Lost the slot to a higher proposal; re-run Phase 1 to learn
            // the now-highest accepted value and a fresh round.
            let (fresh_n, adopted) = self.run_phase1(slot, started_epoch).await?;
            n = fresh_n;
            if let Some(adopted_value) = adopted {
                value = adopted_value;
            }
        }
    }

    fn become_leader_if_self(&self, value: &Command) {
        if let Command::Leader { proposer_id, epoch } = value {
            if *proposer_id == self.id {
                let mut s = self.state.lock();
                s.role = ProposerRole::Leader;
                s.epoch = *epoch;
                s.current_leader = Some(self.host.clone());
                s.phase1_done_for_epoch = false;
                s.next_slot = s.next_slot.max(1);
                log::info!("proposer {} became leader for epoch {}", self.id, epoch);
            }
        }
    }

    /// Contests leadership for a fresh epoch. Called by the election
    /// monitor when no heartbeat has been seen within `leader_timeout`.
    async fn run_election(self: &Arc<Self>) {
        {
            let mut s = self.state.lock();
            s.role = ProposerRole::Candidate;
        }
        let round = self.next_round();
        let epoch = round;
        let value = Command::Leader {
            proposer_id: self.id,
            epoch,
        };
        match self.drive_slot(ELECTION_SLOT, value).await {
            Ok(_) => {}
            Err(e) => {
                log::warn!("proposer {}: election attempt failed: {e}", self.id);
                let mut s = self.state.lock();
                if s.role == ProposerRole::Candidate {
                    s.role = ProposerRole::Follower;
                }
            }
        }
    }
}

async fn election_monitor(proposer: Arc<Proposer>) {
    let timeout = proposer.settings.leader_timeout;
    loop {
        tokio::time::sleep(timeout / 3).await;
        let should_run = {
            let s = proposer.state.lock();
            s.role != ProposerRole::Leader && s.last_heartbeat_seen.elapsed() >= timeout
        };
        if should_run {
            proposer.run_election().await;
        }
    }
}

async fn heartbeat_sender(proposer: Arc<Proposer>) {
    let interval = proposer.settings.heartbeat_interval;
    loop {
        tokio::time::sleep(interval).await;
        if !proposer.is_leader() {
            continue;
        }
        let (epoch, committed_up_to) = {
            let s = proposer.state.lock();
            (s.epoch, s.next_slot.saturating_sub(1))
        };
        let req = HeartbeatRequest {
            proposer_id: proposer.id,
            epoch,
            committed_up_to,
            host: proposer.host.clone(),
        };
        let _ = proposer
            .rpc
            .broadcast::<HeartbeatRequest, HeartbeatResponse>(
                &proposer.settings.proposer_hosts,
                "/heartbeat",
                &req,
                Duration::from_millis(300),
            )
            .await;
        // Learners expose `knownLeader` on `/status` purely for
        // operator visibility; piggyback the same heartbeat so they
        // have something to report without deriving it from vote data.
        let _ = proposer
            .rpc
            .broadcast::<HeartbeatRequest, HeartbeatResponse>(
                &proposer.settings.learner_hosts,
                "/leader_heartbeat",
                &req,
                Duration::from_millis(300),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings(acceptor_hosts: Vec<String>) -> ProposerSettings {
        ProposerSettings {
            id: 1,
            port: 0,
            acceptor_hosts: acceptor_hosts.clone(),
            proposer_hosts: vec![],
            learner_hosts: vec![],
            total_acceptors: acceptor_hosts.len(),
            quorum_size: quorum_size(acceptor_hosts.len()),
            heartbeat_interval: Duration::from_millis(50),
            leader_timeout: Duration::from_millis(200),
            inflight_window: 16,
        }
    }

    #[test]
    fn starts_as_follower_with_no_leader() {
        let settings = test_settings(vec!["h1".into(), "h2".into(), "h3".into()]);
        let proposer = Proposer::spawn(1, "self:0".into(), settings);
        let status = proposer.status();
        assert_eq!(status.role, ProposerRole::Follower);
        assert!(status.leader.is_none());
    }

    #[test]
    fn heartbeat_from_higher_epoch_demotes_and_records_leader() {
        let settings = test_settings(vec!["h1".into()]);
        let proposer = Proposer::spawn(7, "self:0".into(), settings);
        {
            let mut s = proposer.state.lock();
            s.role = ProposerRole::Leader;
            s.epoch = 1;
        }
        let resp = proposer.on_heartbeat(HeartbeatRequest {
            proposer_id: 9,
            epoch: 2,
            committed_up_to: 4,
            host: "other:0".into(),
        });
        assert!(resp.ack);
        let status = proposer.status();
        assert_eq!(status.role, ProposerRole::Follower);
        assert_eq!(status.leader.as_deref(), Some("other:0"));
        assert_eq!(status.epoch, 2);
    }

    #[test]
    fn heartbeat_from_stale_epoch_is_ignored() {
        let settings = test_settings(vec!["h1".into()]);
        let proposer = Proposer::spawn(7, "self:0".into(), settings);
        {
            let mut s = proposer.state.lock();
            s.epoch = 5;
            s.current_leader = Some("self:0".into());
        }
        let resp = proposer.on_heartbeat(HeartbeatRequest {
            proposer_id: 2,
            epoch: 3,
            committed_up_to: 1,
            host: "stale:0".into(),
        });
        assert!(!resp.ack);
        assert_eq!(proposer.status().epoch, 5);
    }

    #[tokio::test]
    async fn propose_rejects_when_not_leader() {
        let settings = test_settings(vec!["h1".into(), "h2".into(), "h3".into()]);
        let proposer = Proposer::spawn(1, "self:0".into(), settings);
        let result = proposer.propose("k".into(), b"v".to_vec()).await;
        assert!(matches!(result, Err(PaxosError::NotLeader { .. })));
    }

    #[tokio::test]
    async fn propose_rejects_when_inflight_window_full() {
        let mut settings = test_settings(vec!["h1".into(), "h2".into(), "h3".into()]);
        settings.inflight_window = 0;
        let proposer = Proposer::spawn(1, "self:0".into(), settings);
        proposer.state.lock().role = ProposerRole::Leader;
        let result = proposer.propose("k".into(), b"v".to_vec()).await;
        assert!(matches!(result, Err(PaxosError::BackpressureRejected { .. })));
    }
}
