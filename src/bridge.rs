//! Control bridge: a single TCP listener accepts exactly one producer and
//! one controller; subsequent connections are refused. Bytes are forwarded
//! verbatim in both directions with no framing imposed. If either side
//! closes, both are torn down — a half-open bridge would strand the
//! surviving peer mid-dialogue with no way to recover.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{info, warn};

const FORWARD_CHUNK: usize = 4096;

struct BridgeStatsInner {
    producer_connected: AtomicBool,
    controller_connected: AtomicBool,
}

/// Read-only snapshot of bridge occupancy, published on every state change
/// so the status task can observe it without touching the bridge itself.
#[derive(Clone)]
pub struct BridgeStats(Arc<BridgeStatsInner>);

pub struct BridgeSnapshot {
    pub producer_connected: bool,
    pub controller_connected: bool,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self(Arc::new(BridgeStatsInner {
            producer_connected: AtomicBool::new(false),
            controller_connected: AtomicBool::new(false),
        }))
    }

    fn publish(&self, producer_connected: bool, controller_connected: bool) {
        self.0.producer_connected.store(producer_connected, Ordering::Relaxed);
        self.0.controller_connected.store(controller_connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            producer_connected: self.0.producer_connected.load(Ordering::Relaxed),
            controller_connected: self.0.controller_connected.load(Ordering::Relaxed),
        }
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ControlBridge {
    listener: TcpListener,
    producer: Option<TcpStream>,
    producer_addr: Option<SocketAddr>,
    controller: Option<TcpStream>,
    controller_addr: Option<SocketAddr>,
    stats: BridgeStats,
}

impl ControlBridge {
    pub fn new(listener: TcpListener, stats: BridgeStats) -> Self {
        Self {
            listener,
            producer: None,
            producer_addr: None,
            controller: None,
            controller_addr: None,
            stats,
        }
    }

    pub fn producer_connected(&self) -> bool {
        self.producer.is_some()
    }

    pub fn controller_connected(&self) -> bool {
        self.controller.is_some()
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut producer_buf = [0u8; FORWARD_CHUNK];
        let mut controller_buf = [0u8; FORWARD_CHUNK];

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("control bridge shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => self.accept(socket, addr),
                        Err(e) => warn!(error = %e, "control bridge accept failed"),
                    }
                }

                result = self.producer.as_mut().unwrap().read(&mut producer_buf),
                    if self.producer.is_some() && self.controller.is_some() =>
                {
                    if !self.forward(result, &producer_buf, Side::Producer).await {
                        self.teardown();
                    }
                }

                result = self.controller.as_mut().unwrap().read(&mut controller_buf),
                    if self.producer.is_some() && self.controller.is_some() =>
                {
                    if !self.forward(result, &controller_buf, Side::Controller).await {
                        self.teardown();
                    }
                }
            }
        }
    }

    fn accept(&mut self, socket: TcpStream, addr: SocketAddr) {
        if self.producer.is_none() {
            info!(%addr, "control bridge: producer connected");
            self.producer = Some(socket);
            self.producer_addr = Some(addr);
        } else if self.controller.is_none() {
            info!(%addr, "control bridge: controller connected");
            self.controller = Some(socket);
            self.controller_addr = Some(addr);
        } else {
            warn!(%addr, "control bridge already occupied, closing");
            // socket dropped here, closing it
        }
        self.stats.publish(self.producer.is_some(), self.controller.is_some());
    }

    /// Forwards `result` (a just-completed read on `from`) to the other
    /// side. Returns `false` if the bridge must tear down.
    async fn forward(&mut self, result: std::io::Result<usize>, buf: &[u8], from: Side) -> bool {
        let n = match result {
            Ok(0) => {
                info!(side = ?from, "control bridge peer closed");
                return false;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(side = ?from, error = %e, "control bridge read failed");
                return false;
            }
        };

        let dest = match from {
            Side::Producer => self.controller.as_mut().unwrap(),
            Side::Controller => self.producer.as_mut().unwrap(),
        };

        if let Err(e) = dest.write_all(&buf[..n]).await {
            warn!(side = ?from, error = %e, "control bridge write failed");
            return false;
        }

        true
    }

    fn teardown(&mut self) {
        self.producer = None;
        self.producer_addr = None;
        self.controller = None;
        self.controller_addr = None;
        self.stats.publish(false, false);
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Producer,
    Controller,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn third_connection_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut bridge = ControlBridge::new(listener, BridgeStats::new());

        let p = TcpStream::connect(addr).await.unwrap();
        let (s, a) = bridge.listener.accept().await.unwrap();
        bridge.accept(s, a);
        drop(p);

        let c = TcpStream::connect(addr).await.unwrap();
        let (s, a) = bridge.listener.accept().await.unwrap();
        bridge.accept(s, a);
        drop(c);

        assert!(bridge.producer_connected());
        assert!(bridge.controller_connected());

        let mut third = TcpStream::connect(addr).await.unwrap();
        let (s, a) = bridge.listener.accept().await.unwrap();
        bridge.accept(s, a);
        // third socket was dropped inside accept(); the peer observes EOF.
        let mut buf = [0u8; 1];
        let n = third.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn bytes_forward_producer_to_controller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut bridge = ControlBridge::new(listener, BridgeStats::new());

        let mut producer = TcpStream::connect(addr).await.unwrap();
        let (s, a) = bridge.listener.accept().await.unwrap();
        bridge.accept(s, a);

        let mut controller = TcpStream::connect(addr).await.unwrap();
        let (s, a) = bridge.listener.accept().await.unwrap();
        bridge.accept(s, a);

        producer.write_all(b"STATUS\n").await.unwrap();
        let mut buf = [0u8; 64];
        let result = bridge
            .producer
            .as_mut()
            .unwrap()
            .read(&mut buf)
            .await
            .unwrap();
        assert!(bridge.forward(Ok(result), &buf, Side::Producer).await);

        let mut out = [0u8; 7];
        controller.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"STATUS\n");
    }
}
