use kvpaxos::config::GatewaySettings;
use kvpaxos::gateway::Gateway;
use kvpaxos::server::gateway_router;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .parse_filters(&kvpaxos::config::log_level())
        .init();

    let settings = GatewaySettings::from_env()?;
    log::info!("gateway starting on port {}", settings.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    let gateway = Gateway::new(settings);
    let app = gateway_router(gateway);

    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}
