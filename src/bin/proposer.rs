use kvpaxos::config::ProposerSettings;
use kvpaxos::proposer::Proposer;
use kvpaxos::server::proposer_router;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .parse_filters(&kvpaxos::config::log_level())
        .init();

    let settings = ProposerSettings::from_env()?;
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let host = format!("{}:{}", local_host_hint(), settings.port);
    log::info!("proposer {} starting on {}", settings.id, host);

    let proposer = Proposer::spawn(settings.id, host, settings);
    let app = proposer_router(proposer);

    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

/// Best-effort local address for the `from` field advertised to peers;
/// overridable since container networking rarely matches what a
/// process sees of itself.
fn local_host_hint() -> String {
    std::env::var("ADVERTISE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}
