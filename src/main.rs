mod api;
mod config;
mod db;
mod dispatch;
mod error;
mod models;
mod notify;
mod routing;

use anyhow::Context;
use api::AppState;
use config::{AppConfig, StoreBackend};
use db::{DemoData, Directory, EmergencyStore, MemoryDirectory, MemoryEmergencyStore, PgDirectory, PgEmergencyStore};
use dispatch::DispatchOrchestrator;
use notify::{KafkaRealtimePublisher, NotificationFanout, RealtimePublisher, TracingRealtimePublisher, TwilioSmsSender};
use routing::google::GoogleMapsClient;
use routing::{DistanceEstimator, EstimatorSettings, HospitalLocator};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

async fn build_backends(config: &AppConfig) -> anyhow::Result<(Arc<dyn EmergencyStore>, Arc<dyn Directory>)> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
            info!("Connected to database");

            if config.run_migrations {
                db::run_migrations(&pool).await?;
                info!("Database migrations applied");
            }

            let store: Arc<dyn EmergencyStore> = Arc::new(PgEmergencyStore::new(pool.clone()));
            let directory: Arc<dyn Directory> = Arc::new(PgDirectory::new(pool));
            Ok((store, directory))
        }
        StoreBackend::Memory => {
            let data = match &config.demo_data_path {
                Some(path) => DemoData::from_json_file(path)?,
                None => DemoData::default(),
            };
            warn!(
                "Running on the in-memory store with {} patients and {} hospitals; nothing is persisted",
                data.patients.len(),
                data.hospitals.len()
            );

            let store: Arc<dyn EmergencyStore> = Arc::new(MemoryEmergencyStore::new());
            let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::new(data));
            Ok((store, directory))
        }
    }
}

fn build_realtime(config: &AppConfig) -> anyhow::Result<Arc<dyn RealtimePublisher>> {
    if config.kafka_enabled {
        Ok(Arc::new(KafkaRealtimePublisher::new(config)?))
    } else {
        warn!("Kafka disabled, realtime events will only be logged");
        Ok(Arc::new(TracingRealtimePublisher))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Sanjeevani Dispatch Service ({} store)...", config.store_backend.as_str());

    let (store, directory) = build_backends(&config).await?;

    // Shared HTTP client for the maps and SMS providers
    let http = reqwest::Client::builder()
        .timeout(HTTP_CLIENT_TIMEOUT)
        .build()
        .context("building HTTP client")?;

    let maps = Arc::new(GoogleMapsClient::new(
        &config.google_maps_api_key,
        &config.google_maps_base_url,
        http.clone(),
    ));
    if !maps.is_configured() {
        warn!("GOOGLE_MAPS_API_KEY not set, travel estimates will use the haversine fallback");
    }

    let estimator = Arc::new(DistanceEstimator::new(
        maps.clone(),
        EstimatorSettings {
            timeout: Duration::from_millis(config.routing_timeout_ms),
            fallback_duration_secs: config.routing_fallback_duration_secs,
            max_failures: config.routing_max_failures,
            cooldown: Duration::from_secs(config.routing_circuit_breaker_cooldown),
        },
    ));
    let locator = Arc::new(HospitalLocator::new(estimator));

    let sms = Arc::new(TwilioSmsSender::new(
        &config.twilio_account_sid,
        &config.twilio_auth_token,
        &config.twilio_phone_number,
        &config.twilio_base_url,
        http,
    ));
    if !sms.is_configured() {
        warn!("Twilio credentials not set, SMS notifications will be skipped");
    }
    let notifier = Arc::new(NotificationFanout::new(sms, build_realtime(&config)?));

    let orchestrator = Arc::new(
        DispatchOrchestrator::new(store, directory, maps, locator, notifier)
            .with_geocoder_timeout(Duration::from_millis(config.routing_timeout_ms)),
    );

    let state = AppState {
        orchestrator,
        jwt_secret: Arc::from(config.jwt_secret_key.as_str()),
        store_backend: config.store_backend,
    };
    let app = api::router(state, &config.cors_origins);

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    info!("Listening on {}", config.bind_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
