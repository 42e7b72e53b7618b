use kvpaxos::config::LearnerSettings;
use kvpaxos::learner::Learner;
use kvpaxos::server::learner_router;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .parse_filters(&kvpaxos::config::log_level())
        .init();

    let settings = LearnerSettings::from_env()?;
    log::info!("learner {} starting on port {}", settings.id, settings.port);

    let learner = Learner::spawn(settings.id.clone(), settings.clone());
    let app = learner_router(learner);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}
