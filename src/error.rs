//! Error kinds surfaced across the system (see spec §7).
//!
//! Acceptors only ever hand back `DurabilityFailure` to their own caller
//! (everything else is expressed as a protocol-level `PREPARE`/`ACCEPT`
//! response, not an `Err`); Proposers internalize `TransientNetwork` and
//! `ProposalSuperseded` as retry loops and surface only `NoQuorum` /
//! `NotLeader` / `StaleEpoch` / `BackpressureRejected` to callers.

use std::fmt;

/// Errors that can cross a role boundary (HTTP handler, gateway, or the
/// public library API).
#[derive(Debug, thiserror::Error)]
pub enum PaxosError {
    /// An RPC timed out or the peer refused the connection. Callers retry
    /// with backoff; this should rarely escape to an HTTP client unless
    /// the outer deadline has also expired.
    #[error("transient network error contacting {peer}: {source}")]
    TransientNetwork {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    /// A write arrived at a Proposer that is not currently LEADER.
    #[error("not leader, current leader is {leader:?}")]
    NotLeader { leader: Option<String> },

    /// A Proposer could not assemble a quorum of PROMISE/ACCEPTED replies
    /// before its deadline. The slot is left unbound; it will be retried
    /// once quorum is reachable again.
    #[error("failed to reach quorum of {quorum} for slot {slot}")]
    NoQuorum { slot: u64, quorum: usize },

    /// Internal-only: a PREPARE/ACCEPT was NACKed because a higher
    /// proposal number is already in play. Never surfaced past the
    /// Proposer that triggers a retry.
    #[error("proposal {0:?} superseded")]
    ProposalSuperseded(crate::types::ProposalNumber),

    /// A Proposer discovered it is acting on a stale epoch (e.g. it saw a
    /// heartbeat from a higher epoch) and must self-demote.
    #[error("acting on stale epoch {epoch}, current leader epoch is {current_epoch}")]
    StaleEpoch { epoch: u64, current_epoch: u64 },

    /// An Acceptor could not durably persist a promise/accept decision.
    /// It must not have sent an affirmative reply; this is treated as
    /// locally fatal and is operator-visible.
    #[error("could not durably persist state for slot {slot}: {reason}")]
    DurabilityFailure { slot: u64, reason: String },

    /// A `strong` read could not confirm current leadership, or a
    /// `session` read could not observe its required slot, within the
    /// request deadline.
    #[error("read unavailable: {0}")]
    ReadUnavailable(String),

    /// The leader's inflight window is full; the write is retriable.
    #[error("backpressure: inflight window full (capacity {capacity})")]
    BackpressureRejected { capacity: usize },
}

impl PaxosError {
    /// Maps an error to the HTTP status the gateway should return, per
    /// spec §7's propagation policy.
    pub fn http_status(&self) -> u16 {
        match self {
            PaxosError::NotLeader { .. } => 409,
            PaxosError::NoQuorum { .. } | PaxosError::BackpressureRejected { .. } => 503,
            PaxosError::ReadUnavailable(_) => 504,
            PaxosError::TransientNetwork { .. } => 503,
            PaxosError::StaleEpoch { .. } => 409,
            PaxosError::DurabilityFailure { .. } => 500,
            PaxosError::ProposalSuperseded(_) => 500,
        }
    }
}

/// A lightweight tag for errors that is safe to embed in a JSON body
/// without leaking internal detail (peer addresses, `reqwest::Error`
/// internals, etc).
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    TransientNetwork,
    NotLeader,
    NoQuorum,
    ProposalSuperseded,
    StaleEpoch,
    DurabilityFailure,
    ReadUnavailable,
    BackpressureRejected,
}

impl From<&PaxosError> for ErrorKind {
    fn from(e: &PaxosError) -> Self {
        match e {
            PaxosError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            PaxosError::NotLeader { .. } => ErrorKind::NotLeader,
            PaxosError::NoQuorum { .. } => ErrorKind::NoQuorum,
            PaxosError::ProposalSuperseded(_) => ErrorKind::ProposalSuperseded,
            PaxosError::StaleEpoch { .. } => ErrorKind::StaleEpoch,
            PaxosError::DurabilityFailure { .. } => ErrorKind::DurabilityFailure,
            PaxosError::ReadUnavailable(_) => ErrorKind::ReadUnavailable,
            PaxosError::BackpressureRejected { .. } => ErrorKind::BackpressureRejected,
        }
    }
}

pub type Result<T> = std::result::Result<T, PaxosError>;
