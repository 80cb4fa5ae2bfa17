//! tipmarket-gateway server entry point.
//!
//! Wires the backend client, services and background workers, then serves
//! REST and WebSocket endpoints.

use std::sync::Arc;

use anyhow::Context;
use axum::http::StatusCode;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tipmarket_gateway::api;
use tipmarket_gateway::app_state::AppState;
use tipmarket_gateway::backend::rest::RestConfig;
use tipmarket_gateway::backend::{Backend, MemoryBackend, RestBackend};
use tipmarket_gateway::config::{BackendMode, LogFormat, MarketConfig};
use tipmarket_gateway::domain::EventBus;
use tipmarket_gateway::persistence::PostgresPersistence;
use tipmarket_gateway::service::{Notifier, realtime_bridge};
use tipmarket_gateway::session::{MemorySessionStore, SessionStore};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn connect_backend(config: &MarketConfig) -> anyhow::Result<Arc<dyn Backend>> {
    match config.backend_mode {
        BackendMode::Memory => {
            tracing::warn!("using in-memory backend; data is lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        BackendMode::Rest => {
            let rest = RestBackend::new(RestConfig {
                base_url: config.backend_url.clone(),
                anon_key: config.backend_anon_key.clone(),
                service_key: config.backend_service_key.clone(),
                timeout: config.request_timeout,
            })
            .context("failed to build backend client")?;
            if config.realtime_enabled {
                let _realtime = rest
                    .spawn_realtime()
                    .context("failed to start realtime subscription")?;
            }
            Ok(Arc::new(rest))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MarketConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    init_tracing(config.log_format);
    tracing::info!(addr = %config.listen_addr, backend = ?config.backend_mode, "starting tipmarket-gateway");

    let backend = connect_backend(&config)?;
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let event_bus = EventBus::new(config.event_bus_capacity);
    let (notifier, _notify_worker) = Notifier::spawn(
        Arc::clone(&backend),
        config.notify_function.clone(),
        config.notify_queue_capacity,
    );

    let persistence = if config.persistence_enabled {
        let persistence = PostgresPersistence::connect(&config)
            .await
            .context("failed to connect audit database")?;
        persistence.clone().spawn_recorder(&event_bus);
        persistence.clone().spawn_cleanup(config.cleanup_after_days);
        Some(persistence)
    } else {
        None
    };

    let state = AppState::new(
        Arc::clone(&backend),
        store,
        &config,
        event_bus.clone(),
        notifier,
        persistence,
    );

    state.sessions.start();
    Arc::clone(&state.wallet).spawn_reconciler(config.reconcile_interval_secs);
    realtime_bridge::spawn(backend.row_changes(), event_bus, (*state.sessions).clone());

    let app = api::app(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
