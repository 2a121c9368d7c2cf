use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use terrarium_service::{
    api::{self, AppState},
    config::{Config, StoreBackendKind},
    history::DeviceLog,
    polling::{PollingCoordinator, TracingRenderer, ViewContext},
    sensors::{SensorService, SensorSimulator},
    standards::Standards,
    store::{HttpStore, MemoryStore, StoreBackend},
};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; variables may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store = match config.store_backend {
        StoreBackendKind::Http => {
            info!(url = %config.store_base_url, "Using hosted terrarium store");
            StoreBackend::Http(HttpStore::new(&config.store_base_url))
        }
        StoreBackendKind::Memory => {
            info!("Using in-memory terrarium store");
            StoreBackend::Memory(MemoryStore::new())
        }
    };
    let standards = Standards::default();
    let simulator = SensorSimulator::new(config.site_offset);

    // Global simulation: advances every active terrarium, independent of views
    let log = DeviceLog::new(store.clone(), config.concurrency_mode);
    let simulation = SensorService::new(log, simulator.clone()).spawn_global(config.simulation_interval);

    // Optional watch view that logs each refresh
    let watch = config.watch.as_ref().map(|watch| {
        info!(terrarium_id = %watch.terrarium_id, view = %watch.view, "Starting watch view");
        let ctx = ViewContext::for_terrarium(watch.view, watch.terrarium_id.clone())
            .with_advisory_cooldown(config.advisory_cooldown);
        PollingCoordinator::new(store.clone(), standards).spawn(
            ctx,
            config.poll_period(watch.view),
            TracingRenderer,
        )
    });

    let state = AppState::new(store, config.concurrency_mode, simulator, standards);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = watch {
        task.stop();
    }
    simulation.stop();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
