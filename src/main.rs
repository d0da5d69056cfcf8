mod config;
mod error;
mod events;
mod load;
mod notify;
mod regression;
mod routes;
mod scenario;
mod server;
mod service;
mod settings;
mod state;
mod store;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{AppConfig, CliArgs};
use load::executor::HttpTransport;
use service::{LoadTestService, ServiceOptions};
use state::AppState;
use store::PerfDb;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing: stdout always, plus a daily-rolling file when requested
    let (file_layer, _log_guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "loadwarden.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadwarden=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting loadwarden v{}", env!("CARGO_PKG_VERSION"));
    let config = AppConfig::from_args(args);
    info!("Environment: {}", config.environment);
    info!("Persistence: {}", config.persist);

    let db = if config.persist {
        info!("Data dir: {:?}", config.data_dir);
        PerfDb::new(&config.data_dir)?
    } else {
        PerfDb::open_in_memory()?
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("loadwarden/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let transport = Arc::new(HttpTransport::new(client));

    let service = Arc::new(LoadTestService::new(
        Arc::new(db),
        transport,
        ServiceOptions::from(&config),
    ));
    if let Err(e) = service.restore().await {
        warn!("Failed to restore persisted state: {}", e);
    }
    register_scenario_dir(&service, &config).await;

    let port = config.port;
    let state = Arc::new(AppState::new(config, service));

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("loadwarden listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    info!("loadwarden shutting down");

    // Stop anything still generating load
    for status in state.service.active_runs().await {
        if let Some(id) = status.scenario_id {
            info!("Stopping run for scenario {} before exit...", id);
            let _ = state.service.stop_test(&id).await;
        }
    }

    Ok(())
}

async fn register_scenario_dir(service: &LoadTestService, config: &AppConfig) {
    let Some(dir) = &config.scenario_dir else {
        return;
    };
    if !dir.is_dir() {
        error!("Scenario directory does not exist: {:?}", dir);
        return;
    }

    for (path, parsed) in scenario::load_scenario_dir(dir) {
        let mut scenario = match parsed {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping scenario file {:?}: {}", path, e);
                continue;
            }
        };
        if scenario.id.trim().is_empty() {
            if let Some(stem) = path.file_stem() {
                scenario.id = stem.to_string_lossy().into_owned();
            }
        }
        if let Err(e) = service.register_scenario(scenario).await {
            warn!("Rejected scenario file {:?}: {}", path, e);
        }
    }
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
    state.notify_shutdown();
}
