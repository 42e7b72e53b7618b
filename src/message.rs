//! Wire types for the HTTP/JSON surface in spec §6.
//!
//! Field names follow the spec's JSON contract verbatim, including the
//! fix noted in the Open Questions: `consistencyLevel`, not
//! `consistency`/`consistency_level`. Epoch staleness is gated inline,
//! per message: `HeartbeatRequest.epoch` against a Proposer's own
//! epoch in [`crate::proposer::Proposer::on_heartbeat`], and a
//! Prepare/Accept's `proposal_num` against an Acceptor's `promised`
//! (the round component already carries the proposer's epoch) — there
//! is no separate envelope wrapper in this transport.

use crate::types::{Command, ProposalNumber, Slot};
use serde::{Deserialize, Serialize};

// ---- Acceptor endpoints --------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareRequest {
    pub slot: Slot,
    pub proposal_num: ProposalNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareStatus {
    Promise,
    Nack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    pub status: PrepareStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_num: Option<ProposalNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_val: Option<Command>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promised: Option<ProposalNumber>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    pub slot: Slot,
    pub proposal_num: ProposalNumber,
    pub value: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptStatus {
    Accepted,
    Nack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub status: AcceptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promised: Option<ProposalNumber>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedRangeQuery {
    pub from: Slot,
    pub to: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptorStatus {
    pub id: String,
    pub highest_slot: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedEntry {
    pub slot: Slot,
    pub accepted_num: Option<ProposalNumber>,
    pub accepted_val: Option<Command>,
}

// ---- Proposer endpoints ---------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeRequest {
    pub key: String,
    pub value: Vec<u8>,
    pub client_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposeStatus {
    Ok,
    NotLeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeResponse {
    pub status: ProposeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub proposer_id: u64,
    pub epoch: u64,
    pub committed_up_to: Slot,
    /// The leader's own advertised `host:port`, distinct from whatever
    /// connection-peer address the transport sees it dial in from.
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ack: bool,
}

/// Confirms the leader's committed index without a client write, so the
/// gateway can implement a `strong` read as "wait for a Learner to reach
/// this index" instead of routing every strong read through Paxos
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadIndexResponse {
    pub status: ProposeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposerRole {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposerStatus {
    pub role: ProposerRole,
    pub epoch: u64,
    pub next_slot: Slot,
    pub leader: Option<String>,
}

// ---- Learner endpoints ------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub slot: Slot,
    pub acceptor_id: String,
    pub proposal_num: ProposalNumber,
    pub value: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    Session,
    Eventual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub key: String,
    pub consistency_level: ConsistencyLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_slot: Option<Slot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub value: Option<Vec<u8>>,
    pub slot: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from: Slot,
    pub to: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub slot: Slot,
    pub value: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerStatus {
    pub committed_up_to: Slot,
    pub known_leader: Option<String>,
}

// ---- Client gateway endpoints -------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub key: String,
    pub value: Vec<u8>,
    /// Carried back on `WriteResponse` so the client can present it as
    /// `clientId` on a later `session` read (spec §4.4 "session tokens
    /// carried in the request"). A client omitting this gets one minted
    /// for it, but then has no way to ask for read-your-writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub slot: Slot,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReadRequest {
    pub key: String,
    pub consistency_level: ConsistencyLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub known_leader: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: crate::error::ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_level_round_trips_through_json() {
        let req = ReadRequest {
            key: "x".into(),
            consistency_level: ConsistencyLevel::Strong,
            client_id: None,
            min_slot: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"consistencyLevel\":\"strong\""));
        let back: ReadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.consistency_level, ConsistencyLevel::Strong);
    }

    #[test]
    fn prepare_response_omits_none_fields() {
        let resp = PrepareResponse {
            status: PrepareStatus::Nack,
            accepted_num: None,
            accepted_val: None,
            promised: Some(ProposalNumber::new(4, 2)),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("acceptedNum"));
        assert!(json.contains("promised"));
    }
}
