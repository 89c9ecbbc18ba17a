use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chain_ledger::api;
use chain_ledger::config::AppConfig;
use chain_ledger::ledger::Ledger;
use chain_ledger::storage::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chain_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chain ledger");

    let config = AppConfig::load()?;

    // Initialize database
    let store = SqliteStore::new(&config.database_url).await?;
    info!("Database connected");
    store.run_migrations().await?;

    let ledger = Arc::new(Ledger::open(store, config.ledger()).await?);
    info!(
        "Ledger ready with {} registered streams (strict: {})",
        ledger.registry().streams().len(),
        ledger.registry().is_strict()
    );

    // Scheduled verification task
    if config.verifier.schedule_enabled {
        let ledger = Arc::clone(&ledger);
        let every = Duration::from_secs(config.verifier.interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match ledger.verify_all().await {
                    Ok(reports) => {
                        for report in reports.iter().filter(|r| !r.is_valid) {
                            error!(
                                "Integrity alert ({:?}): {}",
                                report.finding(),
                                report.summary()
                            );
                        }
                    }
                    Err(e) => error!("Scheduled verification failed: {}", e),
                }
            }
        });
        info!("Scheduled verification every {}s", config.verifier.interval_secs);
    }

    let app = api::router(ledger);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
