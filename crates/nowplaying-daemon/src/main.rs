mod core;
mod http;
mod socket;

use anyhow::Context;
use nowplaying_proto::config::Config;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Setup file logging
    if let Some(parent) = config.hub.log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.hub.log_file)
        .with_context(|| format!("opening log file {:?}", config.hub.log_file))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,nowplaying_daemon=debug")
            }),
        )
        .init();

    eprintln!("nowplaying-hub log: {}", config.hub.log_file.display());
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel: all external inputs funnel into HubCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::HubEvent>(256);
    let (hub_core, state_rx) = core::HubCore::new();

    let address = config.hub.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding hub socket {}", address))?;
    let _socket_handle = socket::start_server(listener, event_tx.clone(), state_rx.clone());

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            event_tx.clone(),
            state_rx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                let _ = shutdown_tx.send(core::HubEvent::Shutdown).await;
            }
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    info!("Hub initialised, running event loop");
    hub_core.run(event_rx).await?;

    Ok(())
}
