//! Jellyfin Remote Bridge
//!
//! Bridges a Jellyfin server's playback sessions to a remote control's
//! media-player entity model.

use jellyfin_remote_bridge::{bus, config, dispatcher, health, host, reconciler};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jellyfin_remote_bridge::client::JellyfinClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jellyfin_remote_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Jellyfin Remote Bridge v{} ({})",
        env!("JRB_VERSION"),
        env!("JRB_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    let Some(jellyfin_config) = config.jellyfin else {
        anyhow::bail!(
            "no Jellyfin server configured; set JELLYFIN_URL/JELLYFIN_USERNAME/JELLYFIN_PASSWORD \
             or add a [jellyfin] section to the config file"
        );
    };
    tracing::info!("Configuration loaded, server: {}", jellyfin_config.url);

    // Create event bus
    let event_bus = bus::create_bus();
    tracing::info!("Event bus initialized");

    // Server client
    let api = Arc::new(JellyfinClient::new(&jellyfin_config)?);

    // Initial login. A failure here is not fatal: the health monitor keeps
    // probing and the reconciler re-authenticates once sessions are reachable
    match api.authenticate().await {
        Ok(auth) => tracing::info!("Authenticated with {}", auth.server_name),
        Err(e) => tracing::error!("Initial authentication failed: {}", e),
    }

    // Health monitor owns the connectivity cell
    let (monitor, connectivity) = health::HealthMonitor::new(
        event_bus.clone(),
        health::HealthConfig {
            probe_interval: Duration::from_secs(config.probe_interval_secs),
            ..Default::default()
        },
    );

    // Reconciliation engine and command dispatch
    let host_runtime = Arc::new(host::BusHostRuntime::new(event_bus.clone()));
    let session_reconciler = Arc::new(reconciler::SessionReconciler::new(
        api.clone(),
        host_runtime,
        monitor.clone(),
        connectivity,
        reconciler::ReconcilerConfig {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            grace: Duration::from_secs(config.grace_secs),
        },
    ));
    let command_dispatcher = Arc::new(dispatcher::CommandDispatcher::new(
        api.clone(),
        session_reconciler.bindings(),
        event_bus.clone(),
    ));

    // Spawn the long-lived workers
    let shutdown = CancellationToken::new();
    let mut workers = Vec::new();

    {
        let monitor = monitor.clone();
        let api = api.clone();
        let token = shutdown.child_token();
        workers.push(tokio::spawn(
            async move { monitor.run(api, token).await },
        ));
    }
    {
        let session_reconciler = session_reconciler.clone();
        let token = shutdown.child_token();
        workers.push(tokio::spawn(async move {
            session_reconciler.run(token).await
        }));
    }
    {
        let command_dispatcher = command_dispatcher.clone();
        let token = shutdown.child_token();
        workers.push(tokio::spawn(async move {
            command_dispatcher.run(token).await
        }));
    }

    shutdown_signal().await;

    // Graceful shutdown: announce on the bus, cancel in-flight work
    event_bus.publish(bus::BusEvent::ShuttingDown {
        reason: Some("signal received".to_string()),
    });
    shutdown.cancel();

    for worker in workers {
        if tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .is_err()
        {
            tracing::warn!("worker did not stop within timeout, abandoning");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
