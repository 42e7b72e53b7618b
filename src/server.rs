//! HTTP/JSON surface (spec §6) for each role, built with `axum` — the
//! teacher spoke raw UDP frames through `net_node::NetNode`; every
//! endpoint below is the JSON-over-HTTP equivalent of one of its
//! message kinds.

use crate::acceptor::Acceptor;
use crate::error::{ErrorKind, PaxosError};
use crate::gateway::Gateway;
use crate::learner::Learner;
use crate::message::{
    AcceptRequest, AcceptedRangeQuery, AcceptorStatus, ErrorBody, GatewayReadRequest,
    HeartbeatRequest, HeartbeatResponse, PrepareRequest, ProposeRequest, ProposeResponse,
    ProposeStatus, ReadIndexResponse, ReadRequest, SubscribeRequest, SyncRequest,
    UnsubscribeRequest, WriteRequest,
};
use crate::proposer::Proposer;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;

async fn health() -> &'static str {
    "ok"
}

fn error_response(err: PaxosError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let kind: ErrorKind = (&err).into();
    let leader = match &err {
        PaxosError::NotLeader { leader } => leader.clone(),
        _ => None,
    };
    let body = ErrorBody {
        error: kind,
        message: err.to_string(),
        leader,
    };
    (status, Json(body)).into_response()
}

// ---- Acceptor ----------------------------------------------------------

pub fn acceptor_router(acceptor: Arc<Acceptor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/prepare", post(acceptor_prepare))
        .route("/accept", post(acceptor_accept))
        .route("/accepted", get(acceptor_accepted))
        .route("/status", get(acceptor_status))
        .with_state(acceptor)
}

async fn acceptor_prepare(State(acceptor): State<Arc<Acceptor>>, Json(req): Json<PrepareRequest>) -> impl IntoResponse {
    Json(acceptor.prepare(req).await)
}

async fn acceptor_accept(State(acceptor): State<Arc<Acceptor>>, Json(req): Json<AcceptRequest>) -> impl IntoResponse {
    Json(acceptor.accept(req).await)
}

async fn acceptor_accepted(
    State(acceptor): State<Arc<Acceptor>>,
    Query(req): Query<AcceptedRangeQuery>,
) -> impl IntoResponse {
    Json(acceptor.query_accepted(req.from, req.to).await)
}

async fn acceptor_status(State(acceptor): State<Arc<Acceptor>>) -> impl IntoResponse {
    Json(AcceptorStatus {
        id: acceptor.id.clone(),
        highest_slot: acceptor.highest_slot().await,
    })
}

// ---- Proposer -----------------------------------------------------------

pub fn proposer_router(proposer: Arc<Proposer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/propose", post(proposer_propose))
        .route("/heartbeat", post(proposer_heartbeat))
        .route("/read_index", post(proposer_read_index))
        .route("/status", get(proposer_status))
        .with_state(proposer)
}

async fn proposer_propose(State(proposer): State<Arc<Proposer>>, Json(req): Json<ProposeRequest>) -> Response {
    match proposer.propose(req.key, req.value).await {
        Ok(slot) => Json(ProposeResponse {
            status: ProposeStatus::Ok,
            slot: Some(slot),
            leader: None,
        })
        .into_response(),
        Err(PaxosError::NotLeader { leader }) => Json(ProposeResponse {
            status: ProposeStatus::NotLeader,
            slot: None,
            leader,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn proposer_heartbeat(State(proposer): State<Arc<Proposer>>, Json(req): Json<HeartbeatRequest>) -> impl IntoResponse {
    Json(proposer.on_heartbeat(req))
}

async fn proposer_read_index(State(proposer): State<Arc<Proposer>>) -> Response {
    match proposer.read_index().await {
        Ok(slot) => Json(ReadIndexResponse {
            status: ProposeStatus::Ok,
            slot: Some(slot),
            leader: None,
        })
        .into_response(),
        Err(PaxosError::NotLeader { leader }) => Json(ReadIndexResponse {
            status: ProposeStatus::NotLeader,
            slot: None,
            leader,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn proposer_status(State(proposer): State<Arc<Proposer>>) -> impl IntoResponse {
    Json(proposer.status())
}

// ---- Learner --------------------------------------------------------

pub fn learner_router(learner: Arc<Learner>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/notify", post(learner_notify))
        .route("/read", post(learner_read))
        .route("/sync", post(learner_sync))
        .route("/status", get(learner_status))
        .route("/leader_heartbeat", post(learner_leader_heartbeat))
        .with_state(learner)
}

async fn learner_notify(State(learner): State<Arc<Learner>>, Json(req): Json<crate::message::NotifyRequest>) -> impl IntoResponse {
    learner.on_notify(req);
    Json(json!({ "ok": true }))
}

async fn learner_read(State(learner): State<Arc<Learner>>, Json(req): Json<ReadRequest>) -> Response {
    match learner.read(&req.key, req.consistency_level, req.min_slot).await {
        Ok((value, slot)) => Json(crate::message::ReadResponse { value, slot }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn learner_sync(State(learner): State<Arc<Learner>>, Json(req): Json<SyncRequest>) -> impl IntoResponse {
    Json(learner.on_sync(req))
}

async fn learner_status(State(learner): State<Arc<Learner>>) -> impl IntoResponse {
    Json(crate::message::LearnerStatus {
        committed_up_to: learner.committed_up_to(),
        known_leader: learner.known_leader(),
    })
}

async fn learner_leader_heartbeat(State(learner): State<Arc<Learner>>, Json(req): Json<HeartbeatRequest>) -> impl IntoResponse {
    learner.on_leader_heartbeat(req.host.clone());
    Json(HeartbeatResponse { ack: true })
}

// ---- Gateway --------------------------------------------------------

pub fn gateway_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/write", post(gateway_write))
        .route("/read", post(gateway_read))
        .route("/subscribe", post(gateway_subscribe))
        .route("/unsubscribe", post(gateway_unsubscribe))
        .route("/poll/:id", get(gateway_poll))
        .route("/status", get(gateway_status))
        .with_state(gateway)
}

async fn gateway_write(State(gateway): State<Arc<Gateway>>, Json(req): Json<WriteRequest>) -> Response {
    let client_id = req.client_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    match gateway.write(client_id, req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

async fn gateway_read(State(gateway): State<Arc<Gateway>>, Json(req): Json<GatewayReadRequest>) -> Response {
    match gateway.read(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

async fn gateway_subscribe(State(gateway): State<Arc<Gateway>>, Json(req): Json<SubscribeRequest>) -> impl IntoResponse {
    Json(gateway.subscribe(req))
}

async fn gateway_unsubscribe(State(gateway): State<Arc<Gateway>>, Json(req): Json<UnsubscribeRequest>) -> impl IntoResponse {
    gateway.unsubscribe(req);
    StatusCode::NO_CONTENT
}

async fn gateway_poll(State(gateway): State<Arc<Gateway>>, Path(id): Path<String>) -> Response {
    match gateway.poll(&id) {
        Some(keys) => Json(json!({ "keys": keys })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn gateway_status(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(gateway.status())
}
