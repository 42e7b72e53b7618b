use kvpaxos::acceptor::Acceptor;
use kvpaxos::config::AcceptorSettings;
use kvpaxos::server::acceptor_router;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .parse_filters(&kvpaxos::config::log_level())
        .init();

    let settings = AcceptorSettings::from_env()?;
    log::info!("acceptor {} starting on port {}", settings.id, settings.port);

    let acceptor = Acceptor::spawn(settings.id.clone(), settings.data_dir.clone(), settings.learner_hosts.clone())?;
    let app = acceptor_router(acceptor);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}
