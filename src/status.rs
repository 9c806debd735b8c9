//! Periodic status reporting: a fifth task that wakes up every
//! `status_interval` and logs the counters published by the other owned
//! tasks, without ever touching their internal state directly (each reads
//! atomics the owning task published, or asks the registry task over its
//! command channel).

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::info;

use crate::bridge::BridgeStats;
use crate::discovery::RegistryHandle;
use crate::stream::relay::StreamStats;

pub async fn run(
    detector: StreamStats,
    display: StreamStats,
    bridge: BridgeStats,
    registry: RegistryHandle,
    status_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(status_interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("status task shutting down");
                break;
            }

            _ = ticker.tick() => {
                let d = detector.snapshot();
                let p = display.snapshot();
                let b = bridge.snapshot();
                let (edges, services) = registry.snapshot().await;

                info!(
                    stream = "detector",
                    producer_up = d.producer_connected,
                    consumers = d.consumer_count,
                    clients_served = d.clients_served,
                    bytes_relayed = d.bytes_relayed,
                    "relay status"
                );
                info!(
                    stream = "display",
                    producer_up = p.producer_connected,
                    consumers = p.consumer_count,
                    clients_served = p.clients_served,
                    bytes_relayed = p.bytes_relayed,
                    "relay status"
                );
                info!(
                    producer_up = b.producer_connected,
                    controller_up = b.controller_connected,
                    "control bridge status"
                );
                info!(edges, services, "discovery registry status");
            }
        }
    }
}
