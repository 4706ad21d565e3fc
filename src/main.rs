//! Lead Scoring Serving Core - HTTP server
//!
//! Wires configuration, the lead store, the model registry and the
//! telemetry sinks into the batch prediction API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadscore_serving::batch::BatchPredictor;
use leadscore_serving::calibration::{CalibrationEngine, CalibrationMonitor};
use leadscore_serving::config::Config;
use leadscore_serving::features::FeatureGuard;
use leadscore_serving::registry::ModelRegistry;
use leadscore_serving::store::{InMemoryLeadStore, LeadStore, PgLeadStore};
use leadscore_serving::telemetry::{EventSink, FanoutSink, JsonlSink, TracingSink};
use leadscore_serving::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "leadscore_serving=debug,tower_http=debug".into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Lead scoring server starting...");
    tracing::info!(
        model_dir = %config.registry.model_dir.display(),
        pattern = %config.registry.pattern,
        ttl_secs = config.registry.cache_ttl.as_secs(),
        "Model registry configured"
    );

    // Lead record store
    let store: Arc<dyn LeadStore> = match &config.leads_fixture_path {
        Some(path) => {
            let store = InMemoryLeadStore::from_json_file(path)?;
            tracing::info!(path = %path.display(), leads = store.len(), "Serving leads from fixture");
            Arc::new(store)
        }
        None => {
            tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
            Arc::new(
                PgLeadStore::connect(&config.database_url)
                    .await
                    .context("Failed to connect to lead store")?,
            )
        }
    };

    // Model registry, warmed best-effort
    let registry = Arc::new(ModelRegistry::new(config.registry.clone())?);
    match registry.load_active(false) {
        Ok(model) => tracing::info!(version = %model.version, "Model warmed"),
        Err(e) => tracing::warn!(error = %e, "No usable model at startup, will retry on first request"),
    }

    // Telemetry sinks
    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink)];
    if let Some(dir) = &config.telemetry_dir {
        let sink = JsonlSink::spawn(dir.clone()).context("Failed to open telemetry directory")?;
        sinks.push(Arc::new(sink));
    }

    let predictor = BatchPredictor::new(
        registry,
        Arc::new(FeatureGuard::new(config.features.clone())),
        CalibrationEngine::new(config.calibration.clone()),
        Arc::new(CalibrationMonitor::default()),
        store,
        Arc::new(FanoutSink::new(sinks)),
        config.batch.clone(),
    );

    // Build router
    let app = create_router(AppState::new(predictor));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
