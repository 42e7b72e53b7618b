//! Reads each role's configuration from the environment (spec §6's
//! configuration table). Scalars are pulled through the `config` crate
//! (the teacher's dependency, repointed from `Config.toml` at the
//! workspace root to `config::Environment`); comma-separated peer lists
//! are split by hand since they don't fit `config`'s scalar
//! deserialization cleanly.

use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

fn env_str(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_str_opt(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_hosts(name: &'static str) -> Result<Vec<String>, ConfigError> {
    let raw = env_str(name)?;
    let hosts: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if hosts.is_empty() {
        return Err(ConfigError::Invalid(name, raw));
    }
    Ok(hosts)
}

fn parse_hosts_opt(name: &str) -> Vec<String> {
    env_str_opt(name)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// A handful of scalar settings that `config::Environment` is well
/// suited to: numeric knobs with sane defaults, read once at startup.
#[derive(Debug, Deserialize)]
struct Tunables {
    /// Milliseconds, despite the bare name: matches the env var spelling
    /// the spec's configuration table uses (`HEARTBEAT_INTERVAL`, not
    /// `HEARTBEAT_INTERVAL_MS`).
    #[serde(default = "default_heartbeat_interval")]
    heartbeat_interval: u64,
    #[serde(default = "default_leader_timeout")]
    leader_timeout: u64,
    #[serde(default = "default_inflight_window")]
    inflight_window: usize,
    #[serde(default = "default_read_deadline_ms")]
    read_deadline_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    150
}
fn default_leader_timeout() -> u64 {
    450
}
fn default_inflight_window() -> usize {
    256
}
fn default_read_deadline_ms() -> u64 {
    2_000
}

fn tunables() -> Result<Tunables, ConfigError> {
    let cfg = Config::builder()
        .add_source(Environment::default())
        .build()?;
    Ok(cfg.try_deserialize::<Tunables>().unwrap_or(Tunables {
        heartbeat_interval: default_heartbeat_interval(),
        leader_timeout: default_leader_timeout(),
        inflight_window: default_inflight_window(),
        read_deadline_ms: default_read_deadline_ms(),
    }))
}

pub fn log_level() -> String {
    env_str_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string())
}

#[derive(Debug, Clone)]
pub struct AcceptorSettings {
    pub id: String,
    pub port: u16,
    pub learner_hosts: Vec<String>,
    pub data_dir: std::path::PathBuf,
}

impl AcceptorSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_str("ACCEPTOR_PORT")?
            .parse()
            .map_err(|_| ConfigError::Invalid("ACCEPTOR_PORT", "not a u16".into()))?;
        Ok(AcceptorSettings {
            id: env_str("ACCEPTOR_ID")?,
            port,
            learner_hosts: parse_hosts_opt("LEARNER_HOSTS"),
            data_dir: env_str_opt("ACCEPTOR_DATA_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| std::path::PathBuf::from("./data/acceptor")),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProposerSettings {
    pub id: u64,
    pub port: u16,
    pub acceptor_hosts: Vec<String>,
    pub proposer_hosts: Vec<String>,
    pub learner_hosts: Vec<String>,
    pub total_acceptors: usize,
    pub quorum_size: usize,
    pub heartbeat_interval: Duration,
    pub leader_timeout: Duration,
    pub inflight_window: usize,
}

impl ProposerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let id: u64 = env_str("PROPOSER_ID")?
            .parse()
            .map_err(|_| ConfigError::Invalid("PROPOSER_ID", "not a u64".into()))?;
        let port = env_str("PROPOSER_PORT")?
            .parse()
            .map_err(|_| ConfigError::Invalid("PROPOSER_PORT", "not a u16".into()))?;
        let acceptor_hosts = parse_hosts("ACCEPTOR_HOSTS")?;
        let total_acceptors: usize = env_str_opt("TOTAL_ACCEPTORS")
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ConfigError::Invalid("TOTAL_ACCEPTORS", "not a usize".into()))?
            .unwrap_or(acceptor_hosts.len());
        let quorum_size: usize = env_str_opt("QUORUM_SIZE")
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ConfigError::Invalid("QUORUM_SIZE", "not a usize".into()))?
            .unwrap_or_else(|| crate::types::quorum_size(total_acceptors));
        let t = tunables()?;
        if t.leader_timeout < 2 * t.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "LEADER_TIMEOUT",
                "must be >= 2x HEARTBEAT_INTERVAL".into(),
            ));
        }
        Ok(ProposerSettings {
            id,
            port,
            acceptor_hosts,
            proposer_hosts: parse_hosts_opt("PROPOSER_HOSTS"),
            learner_hosts: parse_hosts_opt("LEARNER_HOSTS"),
            total_acceptors,
            quorum_size,
            heartbeat_interval: Duration::from_millis(t.heartbeat_interval),
            leader_timeout: Duration::from_millis(t.leader_timeout),
            inflight_window: t.inflight_window,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LearnerSettings {
    pub id: String,
    pub port: u16,
    pub learner_hosts: Vec<String>,
    pub acceptor_hosts: Vec<String>,
    pub quorum_size: usize,
    pub read_deadline: Duration,
}

impl LearnerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_str("LEARNER_PORT")?
            .parse()
            .map_err(|_| ConfigError::Invalid("LEARNER_PORT", "not a u16".into()))?;
        let acceptor_hosts = parse_hosts("ACCEPTOR_HOSTS")?;
        let quorum_size: usize = env_str_opt("QUORUM_SIZE")
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| ConfigError::Invalid("QUORUM_SIZE", "not a usize".into()))?
            .unwrap_or_else(|| crate::types::quorum_size(acceptor_hosts.len()));
        let t = tunables()?;
        Ok(LearnerSettings {
            id: env_str("LEARNER_ID")?,
            port,
            learner_hosts: parse_hosts_opt("LEARNER_HOSTS"),
            acceptor_hosts,
            quorum_size,
            read_deadline: Duration::from_millis(t.read_deadline_ms),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub port: u16,
    pub proposer_hosts: Vec<String>,
    pub learner_hosts: Vec<String>,
    pub read_deadline: Duration,
}

impl GatewaySettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_str("GATEWAY_PORT")?
            .parse()
            .map_err(|_| ConfigError::Invalid("GATEWAY_PORT", "not a u16".into()))?;
        let t = tunables()?;
        Ok(GatewaySettings {
            port,
            proposer_hosts: parse_hosts("PROPOSER_HOSTS")?,
            learner_hosts: parse_hosts("LEARNER_HOSTS")?,
            read_deadline: Duration::from_millis(t.read_deadline_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hosts_opt_splits_and_trims() {
        std::env::set_var("TEST_HOSTS_A", "a:1, b:2 ,c:3");
        assert_eq!(
            parse_hosts_opt("TEST_HOSTS_A"),
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
        );
        std::env::remove_var("TEST_HOSTS_A");
    }

    #[test]
    fn parse_hosts_opt_defaults_empty_when_unset() {
        std::env::remove_var("TEST_HOSTS_B_DOES_NOT_EXIST");
        assert!(parse_hosts_opt("TEST_HOSTS_B_DOES_NOT_EXIST").is_empty());
    }
}
