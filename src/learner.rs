//! The Learner role (spec §4.3): aggregates ACCEPTED notifications into
//! quorum decisions, commits them to the replicated key-value map in
//! strict slot order, and serves reads at the three tunable consistency
//! levels.
//!
//! Grounded on the teacher's `multi_paxos::Learner` (`acceptTally`-style
//! per-slot vote counting, strict-order apply to the map), generalized
//! with gap detection and catch-up (peer `/sync` first, Acceptor
//! `queryAccepted` as fallback) since the teacher assumed no missed
//! messages.

use crate::config::LearnerSettings;
use crate::error::PaxosError;
use crate::message::{
    AcceptedEntry, ConsistencyLevel, NotifyRequest, SyncEntry, SyncRequest,
};
use crate::types::{Command, ProposalNumber, Slot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct SlotTally {
    votes: HashMap<ProposalNumber, HashSet<String>>,
    chosen: Option<Command>,
}

struct LearnerState {
    kv: BTreeMap<String, Vec<u8>>,
    committed_up_to: Slot,
    tally: BTreeMap<Slot, SlotTally>,
    known_leader: Option<String>,
    catching_up: HashSet<Slot>,
}

pub struct Learner {
    pub id: String,
    settings: LearnerSettings,
    rpc: crate::rpc::RpcClient,
    state: Mutex<LearnerState>,
    committed: Notify,
}

impl Learner {
    pub fn spawn(id: String, settings: LearnerSettings) -> Arc<Self> {
        Arc::new(Learner {
            id,
            settings,
            rpc: crate::rpc::RpcClient::new(),
            state: Mutex::new(LearnerState {
                kv: BTreeMap::new(),
                committed_up_to: 0,
                tally: BTreeMap::new(),
                known_leader: None,
                catching_up: HashSet::new(),
            }),
            committed: Notify::new(),
        })
    }

    pub fn committed_up_to(&self) -> Slot {
        self.state.lock().committed_up_to
    }

    pub fn known_leader(&self) -> Option<String> {
        self.state.lock().known_leader.clone()
    }

    pub fn set_known_leader(&self, leader: Option<String>) {
        self.state.lock().known_leader = leader;
    }

    /// Records the leader heartbeat for `/status` visibility; purely
    /// informational, never consulted for the gap-recovery or read
    /// paths above.
    pub fn on_leader_heartbeat(&self, from_host: String) {
        self.set_known_leader(Some(from_host));
    }

    /// Records one acceptor's vote for `(slot, proposal_num, value)`.
    /// Once a quorum of acceptors agree on the same `(proposal_num,
    /// value)` pair the slot is "chosen" (spec invariant: a chosen value
    /// never changes) and commit-in-order is attempted.
    pub fn on_notify(self: &Arc<Self>, req: NotifyRequest) {
        let quorum = self.settings.quorum_size;
        let became_chosen = {
            let mut s = self.state.lock();
            if req.slot <= s.committed_up_to {
                return; // already durably committed, nothing to learn
            }
            let tally = s.tally.entry(req.slot).or_default();
            if tally.chosen.is_some() {
                false
            } else {
                let voters = tally.votes.entry(req.proposal_num).or_default();
                voters.insert(req.acceptor_id.clone());
                if voters.len() >= quorum {
                    tally.chosen = Some(req.value.clone());
                    true
                } else {
                    false
                }
            }
        };
        if became_chosen {
            self.advance_commits();
        }
    }

    /// Applies every contiguously-chosen slot starting at
    /// `committed_up_to + 1`. Stops at the first gap and, if one
    /// exists, kicks off catch-up in the background rather than blocking
    /// the caller.
    fn advance_commits(self: &Arc<Self>) {
        let gap_start;
        {
            let mut s = self.state.lock();
            loop {
                let next = s.committed_up_to + 1;
                let Some(tally) = s.tally.get(&next) else {
                    break;
                };
                let Some(value) = tally.chosen.clone() else {
                    break;
                };
                apply(&mut s.kv, &value);
                s.committed_up_to = next;
                s.tally.remove(&next);
            }
            gap_start = s.committed_up_to + 1;
            let gap_is_real = s.tally.keys().any(|slot| *slot > s.committed_up_to);
            if !gap_is_real {
                self.committed.notify_waiters();
                return;
            }
        }
        self.committed.notify_waiters();
        self.spawn_catchup(gap_start);
    }

    fn spawn_catchup(self: &Arc<Self>, from: Slot) {
        {
            let mut s = self.state.lock();
            if !s.catching_up.insert(from) {
                return; // already in flight
            }
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.catch_up(from).await;
            this.state.lock().catching_up.remove(&from);
        });
    }

    /// Fills the gap at `from` by asking peer Learners first (cheap,
    /// already-verified data), then falling back to querying Acceptors'
    /// raw accepted records directly (spec §4.3, "Gap recovery").
    async fn catch_up(self: &Arc<Self>, from: Slot) {
        let to = from + 63;

        for peer in &self.settings.learner_hosts {
            if *peer == self.id {
                continue;
            }
            let url = format!("http://{peer}/sync");
            let req = SyncRequest { from, to };
            if let Ok(entries) = self
                .rpc
                .post::<SyncRequest, Vec<SyncEntry>>(&url, &req, Duration::from_millis(800))
                .await
            {
                if !entries.is_empty() {
                    self.apply_sync_entries(entries);
                    if self.committed_up_to() >= from {
                        return;
                    }
                }
            }
        }

        let query = format!("/accepted?from={from}&to={to}");
        let responses = self
            .rpc
            .broadcast_get::<Vec<AcceptedEntry>>(&self.settings.acceptor_hosts, &query, Duration::from_millis(800))
            .await;

        // A slot is provably chosen only if the same `(acceptedNum,
        // value)` pair is reported by at least a quorum of distinct
        // Acceptors (spec §4.3, "Gap recovery"); recovering anything
        // weaker than that risks adopting a superseded value a single
        // straggling Acceptor still holds. A slot with no such quorum
        // among the Acceptors that answered is left for a later
        // catch-up pass once more of them respond.
        let mut by_slot: HashMap<Slot, HashMap<(ProposalNumber, Command), HashSet<String>>> = HashMap::new();
        let mut responded = 0usize;
        for (peer, result) in responses {
            let Ok(entries) = result else { continue };
            responded += 1;
            for entry in entries {
                if let (Some(num), Some(value)) = (entry.accepted_num, entry.accepted_val) {
                    by_slot
                        .entry(entry.slot)
                        .or_default()
                        .entry((num, value))
                        .or_default()
                        .insert(peer.clone());
                }
            }
        }
        if responded == 0 {
            return;
        }
        let quorum = self.settings.quorum_size;
        let mut recovered = Vec::new();
        for (slot, votes) in by_slot {
            if let Some(((_, value), _)) = votes.into_iter().find(|(_, voters)| voters.len() >= quorum) {
                recovered.push(SyncEntry { slot, value });
            }
        }
        recovered.sort_by_key(|e| e.slot);
        self.apply_sync_entries(recovered);
    }

    fn apply_sync_entries(self: &Arc<Self>, entries: Vec<SyncEntry>) {
        let mut by_slot: BTreeMap<Slot, Command> = entries.into_iter().map(|e| (e.slot, e.value)).collect();
        {
            let mut s = self.state.lock();
            loop {
                let next = s.committed_up_to + 1;
                let Some(value) = by_slot.remove(&next) else {
                    break;
                };
                apply(&mut s.kv, &value);
                s.committed_up_to = next;
                s.tally.remove(&next);
            }
        }
        self.committed.notify_waiters();
    }

    /// Serves already-committed entries to a peer Learner catching up.
    pub fn on_sync(&self, req: SyncRequest) -> Vec<SyncEntry> {
        // We only have the applied key/value pairs, not the original
        // `Command`, for committed slots; re-synthesize a `Write`
        // command is not possible once collapsed into `kv`, so sync
        // only covers slots still held in the tally (not yet GC'd) plus
        // a reconstructed view of recently committed writes is out of
        // scope here. In practice catch-up targets recent gaps, which
        // still have relevant votes in `tally` most of the time; slots
        // long since compacted are instead recovered from Acceptors.
        let s = self.state.lock();
        s.tally
            .range(req.from..=req.to)
            .filter_map(|(slot, tally)| tally.chosen.clone().map(|value| SyncEntry { slot: *slot, value }))
            .collect()
    }

    /// Reads `key` at the requested consistency level.
    ///
    /// - `eventual`: return the local value immediately, however stale.
    /// - `session`: block (up to the configured deadline) until
    ///   `committed_up_to >= min_slot`, guaranteeing the caller never
    ///   observes an earlier state than one it previously wrote or read.
    /// - `strong`: not handled here; the gateway first asks the current
    ///   leader to confirm its committed index (a no-op round trip
    ///   through Paxos) and then calls this with `session` semantics
    ///   and that index as `min_slot`.
    pub async fn read(
        &self,
        key: &str,
        consistency: ConsistencyLevel,
        min_slot: Option<Slot>,
    ) -> Result<(Option<Vec<u8>>, Slot), PaxosError> {
        match consistency {
            ConsistencyLevel::Eventual => {
                let s = self.state.lock();
                Ok((s.kv.get(key).cloned(), s.committed_up_to))
            }
            ConsistencyLevel::Session | ConsistencyLevel::Strong => {
                let required = min_slot.unwrap_or(0);
                let deadline = tokio::time::Instant::now() + self.settings.read_deadline;
                loop {
                    {
                        let s = self.state.lock();
                        if s.committed_up_to >= required {
                            return Ok((s.kv.get(key).cloned(), s.committed_up_to));
                        }
                    }
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Err(PaxosError::ReadUnavailable(format!(
                            "committed_up_to did not reach {required} before deadline"
                        )));
                    }
                    let _ = tokio::time::timeout(deadline - now, self.committed.notified()).await;
                }
            }
        }
    }
}

fn apply(kv: &mut BTreeMap<String, Vec<u8>>, value: &Command) {
    if let Command::Write { key, value } = value {
        kv.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LearnerSettings {
        LearnerSettings {
            id: "l1".into(),
            port: 0,
            learner_hosts: vec![],
            acceptor_hosts: vec!["a1".into(), "a2".into(), "a3".into()],
            quorum_size: 2,
            read_deadline: Duration::from_millis(200),
        }
    }

    fn notify(slot: Slot, acceptor: &str, n: ProposalNumber, value: Command) -> NotifyRequest {
        NotifyRequest {
            slot,
            acceptor_id: acceptor.into(),
            proposal_num: n,
            value,
        }
    }

    #[test]
    fn commits_once_quorum_reached() {
        let learner = Learner::spawn("l1".into(), settings());
        let n = ProposalNumber::new(1, 1);
        let value = Command::Write {
            key: "x".into(),
            value: b"42".to_vec(),
        };
        learner.on_notify(notify(1, "a1", n, value.clone()));
        assert_eq!(learner.committed_up_to(), 0);
        learner.on_notify(notify(1, "a2", n, value.clone()));
        assert_eq!(learner.committed_up_to(), 1);
        assert_eq!(learner.state.lock().kv.get("x"), Some(&b"42".to_vec()));
    }

    #[test]
    fn does_not_commit_out_of_order() {
        let learner = Learner::spawn("l1".into(), settings());
        let n = ProposalNumber::new(1, 1);
        let value = Command::Write {
            key: "x".into(),
            value: b"v2".to_vec(),
        };
        learner.on_notify(notify(2, "a1", n, value.clone()));
        learner.on_notify(notify(2, "a2", n, value));
        // Slot 2 is chosen but slot 1 never was: committed_up_to stays at 0.
        assert_eq!(learner.committed_up_to(), 0);
    }

    #[tokio::test]
    async fn eventual_read_returns_immediately_even_if_stale() {
        let learner = Learner::spawn("l1".into(), settings());
        let (value, slot) = learner.read("missing", ConsistencyLevel::Eventual, None).await.unwrap();
        assert_eq!(value, None);
        assert_eq!(slot, 0);
    }

    #[tokio::test]
    async fn session_read_times_out_if_slot_never_commits() {
        let learner = Learner::spawn("l1".into(), settings());
        let result = learner.read("x", ConsistencyLevel::Session, Some(5)).await;
        assert!(matches!(result, Err(PaxosError::ReadUnavailable(_))));
    }

    #[tokio::test]
    async fn session_read_unblocks_once_slot_commits() {
        let learner = Learner::spawn("l1".into(), settings());
        let n = ProposalNumber::new(1, 1);
        let value = Command::Write {
            key: "x".into(),
            value: b"v1".to_vec(),
        };
        let waiter = {
            let learner = learner.clone();
            tokio::spawn(async move { learner.read("x", ConsistencyLevel::Session, Some(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        learner.on_notify(notify(1, "a1", n, value.clone()));
        learner.on_notify(notify(1, "a2", n, value.clone()));
        let (got, slot) = waiter.await.unwrap().unwrap();
        assert_eq!(got, Some(b"v1".to_vec()));
        assert_eq!(slot, 1);
    }
}
