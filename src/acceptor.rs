//! The Acceptor role (spec §4.1): a durable per-slot voter.
//!
//! Grounded on the teacher's `multi_paxos::Acceptor` (per-instance state
//! map, `promise`/`accept` handlers), generalized with real durability
//! (fsync-before-reply, journal + compacted snapshot per spec §6) in
//! place of the teacher's purely in-memory `AcceptorState`, and
//! serialized through a single actor task rather than a lock held across
//! an `.await` (spec §5: "no operation holds a durable-write in progress
//! while blocking on the network", and disk writes may be batched "where
//! safety allows" — an actor gives us that batching almost for free).

use crate::message::{
    AcceptRequest, AcceptResponse, AcceptStatus, AcceptedEntry, NotifyRequest, PrepareRequest,
    PrepareResponse, PrepareStatus,
};
use crate::rpc::RpcClient;
use crate::types::{Command, ProposalNumber, Slot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Per-slot durable state (spec §3: `promised` / `acceptedNum` /
/// `acceptedVal`, invariant A1: `acceptedNum <= promised` whenever
/// `acceptedNum` is set).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotRecord {
    pub promised: Option<ProposalNumber>,
    pub accepted_num: Option<ProposalNumber>,
    pub accepted_val: Option<Command>,
}

#[derive(Serialize, Deserialize)]
struct JournalEntry {
    slot: Slot,
    record: SlotRecord,
}

/// Append-only journal plus a compacted snapshot, per spec §6's
/// "Persisted state layout". The compacted file is written atomically
/// (write to a temp file, then rename) so a crash mid-compaction leaves
/// either the old or the new snapshot, never a half-written one.
struct Journal {
    dir: PathBuf,
    file: std::fs::File,
    entries_since_compaction: usize,
}

const COMPACT_AFTER_ENTRIES: usize = 256;

impl Journal {
    fn compacted_path(dir: &Path) -> PathBuf {
        dir.join("snapshot.bin")
    }

    fn journal_path(dir: &Path) -> PathBuf {
        dir.join("journal.log")
    }

    /// Loads the compacted snapshot (if any), replays the journal tail
    /// on top of it, and returns both the reconstructed state and a
    /// `Journal` handle positioned for further appends.
    fn open(dir: &Path) -> io::Result<(Self, BTreeMap<Slot, SlotRecord>)> {
        std::fs::create_dir_all(dir)?;

        let mut state: BTreeMap<Slot, SlotRecord> = BTreeMap::new();
        let snapshot_path = Self::compacted_path(dir);
        if snapshot_path.exists() {
            let bytes = std::fs::read(&snapshot_path)?;
            if !bytes.is_empty() {
                state = bincode::deserialize(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            }
        }

        let journal_path = Self::journal_path(dir);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&journal_path)?;

        let mut raw = Vec::new();
        {
            let mut reader = std::fs::File::open(&journal_path)?;
            reader.read_to_end(&mut raw)?;
        }
        let mut cursor = &raw[..];
        let mut replayed = 0usize;
        while !cursor.is_empty() {
            match bincode::deserialize::<JournalEntry>(cursor) {
                Ok(entry) => {
                    let size = bincode::serialized_size(&entry).unwrap_or(0) as usize;
                    if size == 0 || size > cursor.len() {
                        break;
                    }
                    state.insert(entry.slot, entry.record);
                    cursor = &cursor[size..];
                    replayed += 1;
                }
                // A torn write at the very end of the journal (crash mid-append) is
                // tolerated: the incomplete tail record never got an affirmative
                // reply sent, so dropping it is safe.
                Err(_) => break,
            }
        }

        file.sync_all()?;
        Ok((
            Journal {
                dir: dir.to_path_buf(),
                file,
                entries_since_compaction: replayed,
            },
            state,
        ))
    }

    fn append(&mut self, slot: Slot, record: &SlotRecord) -> io::Result<()> {
        let entry = JournalEntry {
            slot,
            record: record.clone(),
        };
        let bytes = bincode::serialize(&entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.file.write_all(&bytes)?;
        self.file.sync_all()?;
        self.entries_since_compaction += 1;
        Ok(())
    }

    fn maybe_compact(&mut self, state: &BTreeMap<Slot, SlotRecord>) -> io::Result<()> {
        if self.entries_since_compaction < COMPACT_AFTER_ENTRIES {
            return Ok(());
        }
        let tmp_path = self.dir.join("snapshot.bin.tmp");
        let bytes = bincode::serialize(state).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::File::open(&tmp_path)?.sync_all()?;
        std::fs::rename(&tmp_path, Self::compacted_path(&self.dir))?;

        let journal_path = Self::journal_path(&self.dir);
        self.file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&journal_path)?;
        self.file.sync_all()?;
        self.entries_since_compaction = 0;
        Ok(())
    }
}

enum Cmd {
    Prepare {
        slot: Slot,
        n: ProposalNumber,
        reply: oneshot::Sender<PrepareResponse>,
    },
    Accept {
        slot: Slot,
        n: ProposalNumber,
        value: Command,
        reply: oneshot::Sender<AcceptResponse>,
    },
    QueryAccepted {
        from: Slot,
        to: Slot,
        reply: oneshot::Sender<Vec<AcceptedEntry>>,
    },
    HighestSlot {
        reply: oneshot::Sender<Slot>,
    },
}

/// A durable Paxos voter. Talks to the outside world through
/// [`Acceptor::prepare`] / [`Acceptor::accept`] /
/// [`Acceptor::query_accepted`]; internally every request is serialized
/// through a single actor task owning the in-memory map and the journal,
/// so "promised is non-decreasing" (invariant A2) and "a response is
/// emitted only after durability" (invariant A3) hold without extra
/// locking at the call sites.
#[derive(Clone)]
pub struct Acceptor {
    pub id: String,
    cmd_tx: mpsc::Sender<Cmd>,
}

impl Acceptor {
    pub fn spawn(id: String, data_dir: PathBuf, learner_hosts: Vec<String>) -> io::Result<Arc<Self>> {
        let (journal, state) = Journal::open(&data_dir)?;
        let (tx, rx) = mpsc::channel(1024);
        let actor_id = id.clone();
        tokio::spawn(run_actor(rx, journal, state, learner_hosts, actor_id));
        Ok(Arc::new(Acceptor { id, cmd_tx: tx }))
    }

    pub async fn prepare(&self, req: PrepareRequest) -> PrepareResponse {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Cmd::Prepare {
                slot: req.slot,
                n: req.proposal_num,
                reply,
            })
            .await;
        rx.await.expect("acceptor actor task must not die")
    }

    pub async fn accept(&self, req: AcceptRequest) -> AcceptResponse {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Cmd::Accept {
                slot: req.slot,
                n: req.proposal_num,
                value: req.value,
                reply,
            })
            .await;
        rx.await.expect("acceptor actor task must not die")
    }

    pub async fn query_accepted(&self, from: Slot, to: Slot) -> Vec<AcceptedEntry> {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Cmd::QueryAccepted { from, to, reply }).await;
        rx.await.unwrap_or_default()
    }

    pub async fn highest_slot(&self) -> Slot {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Cmd::HighestSlot { reply }).await;
        rx.await.unwrap_or(0)
    }
}

async fn run_actor(
    mut rx: mpsc::Receiver<Cmd>,
    mut journal: Journal,
    mut state: BTreeMap<Slot, SlotRecord>,
    learner_hosts: Vec<String>,
    self_id: String,
) {
    let rpc = RpcClient::new();
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Cmd::Prepare { slot, n, reply } => {
                let current = state.get(&slot).cloned().unwrap_or_default();
                if n > current.promised.unwrap_or(ProposalNumber::ZERO) {
                    let mut candidate = current.clone();
                    candidate.promised = Some(n);
                    match persist(&mut journal, slot, &candidate).await {
                        Ok(()) => {
                            state.insert(slot, candidate.clone());
                            let _ = journal.maybe_compact(&state);
                            let _ = reply.send(PrepareResponse {
                                status: PrepareStatus::Promise,
                                accepted_num: candidate.accepted_num,
                                accepted_val: candidate.accepted_val,
                                promised: None,
                            });
                        }
                        Err(e) => {
                            // Not durable: must not send an affirmative
                            // reply (spec §4.1/§7 DurabilityFailure).
                            log::error!("acceptor: durability failure promising slot {slot}: {e}");
                            let _ = reply.send(PrepareResponse {
                                status: PrepareStatus::Nack,
                                accepted_num: None,
                                accepted_val: None,
                                promised: current.promised,
                            });
                        }
                    }
                } else {
                    let _ = reply.send(PrepareResponse {
                        status: PrepareStatus::Nack,
                        accepted_num: None,
                        accepted_val: None,
                        promised: current.promised,
                    });
                }
            }
            Cmd::Accept { slot, n, value, reply } => {
                let current = state.get(&slot).cloned().unwrap_or_default();
                if n >= current.promised.unwrap_or(ProposalNumber::ZERO) {
                    let mut candidate = current.clone();
                    candidate.promised = Some(n);
                    candidate.accepted_num = Some(n);
                    candidate.accepted_val = Some(value.clone());
                    match persist(&mut journal, slot, &candidate).await {
                        Ok(()) => {
                            state.insert(slot, candidate);
                            let _ = journal.maybe_compact(&state);
                            let _ = reply.send(AcceptResponse {
                                status: AcceptStatus::Accepted,
                                promised: None,
                            });
                            notify_learners(&rpc, &learner_hosts, slot, &self_id, n, value);
                        }
                        Err(e) => {
                            log::error!("acceptor: durability failure accepting slot {slot}: {e}");
                            let _ = reply.send(AcceptResponse {
                                status: AcceptStatus::Nack,
                                promised: current.promised,
                            });
                        }
                    }
                } else {
                    let _ = reply.send(AcceptResponse {
                        status: AcceptStatus::Nack,
                        promised: current.promised,
                    });
                }
            }
            Cmd::HighestSlot { reply } => {
                let highest = state.keys().next_back().copied().unwrap_or(0);
                let _ = reply.send(highest);
            }
            Cmd::QueryAccepted { from, to, reply } => {
                let entries = state
                    .range(from..=to)
                    .map(|(slot, rec)| AcceptedEntry {
                        slot: *slot,
                        accepted_num: rec.accepted_num,
                        accepted_val: rec.accepted_val.clone(),
                    })
                    .collect();
                let _ = reply.send(entries);
            }
        }
    }
}

/// Durably appends `record` for `slot`, returning the error to the
/// caller rather than swallowing it: a failed write here must turn into
/// a NACK, never an affirmative reply (spec §4.1/§7 `DurabilityFailure`).
///
/// `Journal` isn't `Send` across the blocking boundary by reference, so
/// the append happens inline: the actor task is already the sole
/// writer, and `File::sync_all` is the only blocking call here. A
/// production deployment under heavy fsync latency would hand this off
/// via `spawn_blocking` with an owned `Journal`; for this single
/// dedicated actor task the cost is equivalent and the code stays
/// simple.
async fn persist(journal: &mut Journal, slot: Slot, record: &SlotRecord) -> io::Result<()> {
    journal.append(slot, record)
}

fn notify_learners(
    rpc: &RpcClient,
    learner_hosts: &[String],
    slot: Slot,
    acceptor_id: &str,
    proposal_num: ProposalNumber,
    value: Command,
) {
    if learner_hosts.is_empty() {
        return;
    }
    let rpc = rpc.clone();
    let hosts = learner_hosts.to_vec();
    let acceptor_id = acceptor_id.to_string();
    tokio::spawn(async move {
        let body = NotifyRequest {
            slot,
            acceptor_id,
            proposal_num,
            value,
        };
        let results = rpc
            .broadcast::<NotifyRequest, serde_json::Value>(&hosts, "/notify", &body, Duration::from_secs(2))
            .await;
        for (peer, result) in results {
            if let Err(e) = result {
                log::warn!("acceptor: notify to learner {peer} failed: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PrepareStatus;

    async fn new_test_acceptor() -> (Acceptor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let acceptor = Acceptor::spawn("a1".into(), dir.path().to_path_buf(), vec![]).unwrap();
        (acceptor, dir)
    }

    #[tokio::test]
    async fn prepare_promises_on_higher_round_and_nacks_ties() {
        let (acceptor, _dir) = new_test_acceptor().await;
        let n1 = ProposalNumber::new(1, 1);
        let resp = acceptor
            .prepare(PrepareRequest {
                slot: 1,
                proposal_num: n1,
            })
            .await;
        assert_eq!(resp.status, PrepareStatus::Promise);
        assert!(resp.accepted_num.is_none());

        // Same round: must NACK (ties are impossible to win).
        let resp2 = acceptor
            .prepare(PrepareRequest {
                slot: 1,
                proposal_num: n1,
            })
            .await;
        assert_eq!(resp2.status, PrepareStatus::Nack);
        assert_eq!(resp2.promised, Some(n1));
    }

    #[tokio::test]
    async fn accept_then_prepare_reveals_accepted_value() {
        let (acceptor, _dir) = new_test_acceptor().await;
        let n1 = ProposalNumber::new(1, 1);
        let value = Command::Write {
            key: "x".into(),
            value: b"1".to_vec(),
        };
        acceptor
            .prepare(PrepareRequest {
                slot: 5,
                proposal_num: n1,
            })
            .await;
        let accept_resp = acceptor
            .accept(AcceptRequest {
                slot: 5,
                proposal_num: n1,
                value: value.clone(),
            })
            .await;
        assert_eq!(accept_resp.status, AcceptStatus::Accepted);

        let n2 = ProposalNumber::new(2, 2);
        let promise = acceptor
            .prepare(PrepareRequest {
                slot: 5,
                proposal_num: n2,
            })
            .await;
        assert_eq!(promise.status, PrepareStatus::Promise);
        assert_eq!(promise.accepted_num, Some(n1));
        assert_eq!(promise.accepted_val, Some(value));
    }

    #[tokio::test]
    async fn accept_rejects_proposal_below_promised() {
        let (acceptor, _dir) = new_test_acceptor().await;
        let high = ProposalNumber::new(5, 1);
        let low = ProposalNumber::new(1, 9);
        acceptor
            .prepare(PrepareRequest {
                slot: 2,
                proposal_num: high,
            })
            .await;
        let resp = acceptor
            .accept(AcceptRequest {
                slot: 2,
                proposal_num: low,
                value: Command::NoOp,
            })
            .await;
        assert_eq!(resp.status, AcceptStatus::Nack);
        assert_eq!(resp.promised, Some(high));
    }

    #[tokio::test]
    async fn accept_is_idempotent_on_replay() {
        let (acceptor, _dir) = new_test_acceptor().await;
        let n1 = ProposalNumber::new(1, 1);
        let value = Command::Write {
            key: "x".into(),
            value: b"1".to_vec(),
        };
        let first = acceptor
            .accept(AcceptRequest {
                slot: 3,
                proposal_num: n1,
                value: value.clone(),
            })
            .await;
        let second = acceptor
            .accept(AcceptRequest {
                slot: 3,
                proposal_num: n1,
                value: value.clone(),
            })
            .await;
        assert_eq!(first.status, second.status);
        assert_eq!(first.promised, second.promised);
    }

    #[tokio::test]
    async fn state_survives_restart_from_journal() {
        let dir = tempfile::tempdir().unwrap();
        let n1 = ProposalNumber::new(1, 1);
        let value = Command::Write {
            key: "x".into(),
            value: b"1".to_vec(),
        };
        {
            let acceptor = Acceptor::spawn("a1".into(), dir.path().to_path_buf(), vec![]).unwrap();
            acceptor
                .accept(AcceptRequest {
                    slot: 9,
                    proposal_num: n1,
                    value: value.clone(),
                })
                .await;
        }
        let acceptor = Acceptor::spawn("a1".into(), dir.path().to_path_buf(), vec![]).unwrap();
        let entries = acceptor.query_accepted(9, 9).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].accepted_num, Some(n1));
        assert_eq!(entries[0].accepted_val, Some(value));
    }

    #[tokio::test]
    async fn query_accepted_returns_range() {
        let (acceptor, _dir) = new_test_acceptor().await;
        for slot in 1..=3u64 {
            acceptor
                .accept(AcceptRequest {
                    slot,
                    proposal_num: ProposalNumber::new(1, 1),
                    value: Command::NoOp,
                })
                .await;
        }
        let entries = acceptor.query_accepted(1, 3).await;
        assert_eq!(entries.len(), 3);
    }
}
