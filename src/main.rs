//! Process entrypoint: parses configuration, binds the four listen ports,
//! and spawns one task per owned component (spec.md §5). Shutdown is a
//! single `broadcast` signal fanned out to every task; `main` waits for
//! all of them to finish within a bounded grace period before exiting.

use std::time::Duration;

use sdr_relay_core::bridge::{BridgeStats, ControlBridge};
use sdr_relay_core::config::Config;
use sdr_relay_core::discovery::{actor, session};
use sdr_relay_core::error::FatalError;
use sdr_relay_core::status;
use sdr_relay_core::stream::relay::StreamStats;
use sdr_relay_core::stream::StreamRelay;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), FatalError> {
    let detector_listener = bind(config.detector_port).await?;
    let display_listener = bind(config.display_port).await?;
    let control_listener = bind(config.control_port).await?;
    let discovery_listener = bind(config.discovery_port).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let detector_stats = StreamStats::new();
    let display_stats = StreamStats::new();
    let bridge_stats = BridgeStats::new();

    let detector = StreamRelay::new(
        "detector",
        50_000,
        detector_listener,
        config.consumer_cap,
        Config::ring_capacity_for(50_000),
        detector_stats.clone(),
    );
    let display = StreamRelay::new(
        "display",
        12_000,
        display_listener,
        config.consumer_cap,
        Config::ring_capacity_for(12_000),
        display_stats.clone(),
    );
    let bridge = ControlBridge::new(control_listener, bridge_stats.clone());

    let registry = actor::spawn(
        config.edge_cap,
        config.service_cap,
        config.edge_timeout(),
        SWEEP_INTERVAL,
        shutdown_tx.subscribe(),
    );

    let mut handles = Vec::new();
    handles.push(tokio::spawn(detector.run(shutdown_tx.subscribe())));
    handles.push(tokio::spawn(display.run(shutdown_tx.subscribe())));
    handles.push(tokio::spawn(bridge.run(shutdown_tx.subscribe())));
    handles.push(tokio::spawn(session::run_listener(
        discovery_listener,
        registry.clone(),
        shutdown_tx.subscribe(),
    )));
    handles.push(tokio::spawn(status::run(
        detector_stats,
        display_stats,
        bridge_stats,
        registry,
        config.status_interval(),
        shutdown_tx.subscribe(),
    )));

    info!(
        detector_port = config.detector_port,
        display_port = config.display_port,
        control_port = config.control_port,
        discovery_port = config.discovery_port,
        "relay listening"
    );

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping tasks");
    let _ = shutdown_tx.send(());

    let grace = tokio::time::sleep(SHUTDOWN_GRACE);
    tokio::pin!(grace);
    for mut handle in handles {
        tokio::select! {
            _ = &mut grace => {
                handle.abort();
            }
            result = &mut handle => {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        error!(error = %e, "task panicked");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn bind(port: u16) -> Result<TcpListener, FatalError> {
    let addr = format!("0.0.0.0:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| FatalError::Bind { addr, source })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
