use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use tradewatch_monitor::anomaly::AnomalyEngine;
use tradewatch_monitor::api::{self, AppState};
use tradewatch_monitor::config::Config;
use tradewatch_monitor::fraud::FraudEngine;
use tradewatch_monitor::gate::AttackShield;
use tradewatch_monitor::manipulation::ManipulationEngine;
use tradewatch_monitor::monitor::{SecurityMonitor, TransactionValidator};
use tradewatch_monitor::pipeline::AdmissionPipeline;
use tradewatch_monitor::store::postgres::PostgresStore;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("TradeWatch Monitor starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!("Configuration loaded from {}", config_path);

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    let store = Arc::new(PostgresStore::new(pool));
    let monitor = Arc::new(SecurityMonitor::new());

    let validator = TransactionValidator::new(
        store.clone(),
        store.clone(),
        config.validation.clone(),
    );
    let pipeline = AdmissionPipeline::new(
        validator,
        monitor.clone(),
        store.clone(),
        config.gas.clone(),
        config.validation.clone(),
    );

    let anomaly = AnomalyEngine::new(monitor.clone(), store.clone(), config.anomaly.clone());
    let fraud = FraudEngine::new(
        monitor.clone(),
        store.clone(),
        store.clone(),
        config.fraud.clone(),
    );
    let manipulation =
        ManipulationEngine::new(monitor.clone(), store.clone(), config.manipulation.clone());
    let shield = AttackShield::new(monitor.clone(), config.gate.clone());

    if config.anomaly.enabled {
        anomaly.start();
    }
    if config.fraud.enabled {
        fraud.start();
    }
    if config.manipulation.enabled {
        manipulation.start();
    }
    if config.gate.enabled {
        shield.start();
    }
    tracing::info!("Detection engines started");

    // Spawn API server
    if config.api.enabled {
        let state = Arc::new(AppState {
            monitor: monitor.clone(),
            pipeline,
            transactions: store.clone(),
            anomaly: anomaly.clone(),
            fraud: fraud.clone(),
            manipulation: manipulation.clone(),
            shield: shield.clone(),
        });
        let host = config.api.host.clone();
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(state, &host, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    tracing::info!("TradeWatch Monitor running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping engines...");

    anomaly.stop();
    fraud.stop();
    manipulation.stop();
    shield.stop();

    tracing::info!("TradeWatch Monitor stopped gracefully");
    Ok(())
}
