//! Centralized inter-node RPC helper (spec §9, "Retries and backoff"):
//! a single request/response round trip and fan-out broadcast, with
//! jittered exponential backoff starting at 20ms and capped at 1s
//! available to callers that need to retry across a longer deadline.
//! Epoch staleness is gated by the message bodies themselves (the
//! `epoch` field on `HeartbeatRequest`, the round component of
//! `ProposalNumber` on Prepare/Accept), not by a transport-level
//! wrapper.
//!
//! This replaces the teacher's `net_node::NetNode`, which broadcast
//! bincode-framed messages over a UDP multicast socket; the role here is
//! the same (send a message, get a typed reply) but the transport is
//! point-to-point JSON over HTTP.

use crate::error::PaxosError;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_millis(20);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Jittered exponential backoff for a retry loop's `attempt`'th sleep
/// (1-indexed): doubles `INITIAL_BACKOFF` per attempt, caps at
/// `MAX_BACKOFF`, then jitters uniformly over the lower half of that
/// value so retries across callers don't lock-step.
pub fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.min(6);
    let capped = INITIAL_BACKOFF.checked_mul(1u32 << shift).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF);
    let half_ms = (capped.as_millis() as u64 / 2).max(1);
    let jitter_ms = rand::thread_rng().gen_range(0..=half_ms);
    Duration::from_millis(half_ms + jitter_ms)
}

#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient {
    pub fn new() -> Self {
        RpcClient {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("building the reqwest client should never fail"),
        }
    }

    /// A single request/response round trip with a per-call deadline.
    /// Network failures and non-2xx statuses become
    /// `PaxosError::TransientNetwork`; the caller decides whether to
    /// retry.
    pub async fn post<Req, Resp>(
        &self,
        url: &str,
        body: &Req,
        deadline: Duration,
    ) -> Result<Resp, PaxosError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let send = self.http.post(url).json(body).timeout(deadline).send();
        let resp = send.await.map_err(|source| PaxosError::TransientNetwork {
            peer: url.to_string(),
            source,
        })?;
        let resp = resp
            .error_for_status()
            .map_err(|source| PaxosError::TransientNetwork {
                peer: url.to_string(),
                source,
            })?;
        resp.json::<Resp>()
            .await
            .map_err(|source| PaxosError::TransientNetwork {
                peer: url.to_string(),
                source,
            })
    }

    /// A single GET round trip, for the handful of endpoints the wire
    /// contract specifies as query-string reads rather than JSON posts
    /// (e.g. `GET /accepted?from=&to=`).
    pub async fn get<Resp>(&self, url: &str, deadline: Duration) -> Result<Resp, PaxosError>
    where
        Resp: DeserializeOwned,
    {
        let resp = self
            .http
            .get(url)
            .timeout(deadline)
            .send()
            .await
            .map_err(|source| PaxosError::TransientNetwork {
                peer: url.to_string(),
                source,
            })?;
        let resp = resp
            .error_for_status()
            .map_err(|source| PaxosError::TransientNetwork {
                peer: url.to_string(),
                source,
            })?;
        resp.json::<Resp>()
            .await
            .map_err(|source| PaxosError::TransientNetwork {
                peer: url.to_string(),
                source,
            })
    }

    /// Fans a GET out to every peer concurrently. `path_and_query` is
    /// appended verbatim after the host, so callers build their own
    /// query string (e.g. `/accepted?from=1&to=64`).
    pub async fn broadcast_get<Resp>(
        &self,
        peers: &[String],
        path_and_query: &str,
        deadline: Duration,
    ) -> Vec<(String, Result<Resp, PaxosError>)>
    where
        Resp: DeserializeOwned,
    {
        let futs = peers.iter().map(|peer| {
            let url = format!("http://{peer}{path_and_query}");
            async move {
                let result = self.get(&url, deadline).await;
                (peer.clone(), result)
            }
        });
        futures::future::join_all(futs).await
    }

    /// Fans a request out to every peer concurrently, collecting
    /// whichever responses arrive (failures become `None`, logged by the
    /// caller). Used for PREPARE/ACCEPT broadcasts and sync fan-out.
    pub async fn broadcast<Req, Resp>(
        &self,
        peers: &[String],
        path: &str,
        body: &Req,
        deadline: Duration,
    ) -> Vec<(String, Result<Resp, PaxosError>)>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let futs = peers.iter().map(|peer| {
            let url = format!("http://{peer}{path}");
            async move {
                let result = self.post(&url, body, deadline).await;
                (peer.clone(), result)
            }
        });
        futures::future::join_all(futs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = INITIAL_BACKOFF;
        for _ in 0..10 {
            b = (b * 2).min(MAX_BACKOFF);
        }
        assert_eq!(b, MAX_BACKOFF);
    }

    #[test]
    fn backoff_delay_stays_within_bounds() {
        for attempt in 0..20 {
            let d = backoff_delay(attempt);
            assert!(d >= Duration::from_millis(1));
            assert!(d <= MAX_BACKOFF);
        }
    }
}
