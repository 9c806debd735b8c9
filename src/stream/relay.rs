//! Stream relay: one producer socket fans out to a consumer set, for one
//! of the two I/Q streams. The relay never parses frame boundaries — it
//! forwards the producer's raw bytes (which already carry `FT32`/`DATA`
//! headers) verbatim.
//!
//! Producer and consumers share one listen port (spec.md §6). Since plain
//! TCP gives no structural signal distinguishing the two at accept time,
//! newly accepted sockets are classified by behavior: a connection that
//! sends bytes within a short grace window is the producer (real producers
//! start streaming frames immediately); one that stays silent is a
//! read-only consumer. See DESIGN.md for the reasoning behind this
//! producer/consumer accept ambiguity resolution.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{info, warn};

use crate::stream::consumer::ConsumerSet;
use crate::stream::header;

const CLASSIFY_GRACE: Duration = Duration::from_millis(200);
const DRAIN_TICK: Duration = Duration::from_millis(20);
const PRODUCER_READ_CHUNK: usize = 64 * 1024;

enum RoleCandidate {
    Producer(TcpStream, SocketAddr),
    Consumer(TcpStream, SocketAddr),
}

struct StreamStatsInner {
    consumer_count: AtomicUsize,
    clients_served: AtomicU64,
    bytes_relayed: AtomicU64,
    producer_connected: AtomicBool,
}

/// Read-only snapshot of a relay's counters, published once per drain tick.
/// Lets the status task observe a stream owned by another task without a
/// command channel round trip, mirroring how the reference relay's stats
/// module exposes atomics for a reporter to poll.
#[derive(Clone)]
pub struct StreamStats(Arc<StreamStatsInner>);

pub struct StreamSnapshot {
    pub consumer_count: usize,
    pub clients_served: u64,
    pub bytes_relayed: u64,
    pub producer_connected: bool,
}

impl StreamStats {
    pub fn new() -> Self {
        Self(Arc::new(StreamStatsInner {
            consumer_count: AtomicUsize::new(0),
            clients_served: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            producer_connected: AtomicBool::new(false),
        }))
    }

    fn publish(&self, consumer_count: usize, clients_served: u64, bytes_relayed: u64, producer_connected: bool) {
        self.0.consumer_count.store(consumer_count, Ordering::Relaxed);
        self.0.clients_served.store(clients_served, Ordering::Relaxed);
        self.0.bytes_relayed.store(bytes_relayed, Ordering::Relaxed);
        self.0.producer_connected.store(producer_connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            consumer_count: self.0.consumer_count.load(Ordering::Relaxed),
            clients_served: self.0.clients_served.load(Ordering::Relaxed),
            bytes_relayed: self.0.bytes_relayed.load(Ordering::Relaxed),
            producer_connected: self.0.producer_connected.load(Ordering::Relaxed),
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// One task owns one stream end to end: its listener, its single producer
/// slot, and its consumer set. The detector and display tasks share
/// nothing and may run fully in parallel.
pub struct StreamRelay {
    name: &'static str,
    listener: TcpListener,
    producer: Option<TcpStream>,
    producer_addr: Option<SocketAddr>,
    consumers: ConsumerSet,
    bytes_relayed: u64,
    stats: StreamStats,
}

impl StreamRelay {
    pub fn new(
        name: &'static str,
        sample_rate: u32,
        listener: TcpListener,
        consumer_cap: usize,
        ring_capacity: usize,
        stats: StreamStats,
    ) -> Self {
        Self {
            name,
            listener,
            producer: None,
            producer_addr: None,
            consumers: ConsumerSet::new(consumer_cap, header::encode(sample_rate), ring_capacity),
            bytes_relayed: 0,
            stats,
        }
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn clients_served(&self) -> u64 {
        self.consumers.clients_served()
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed
    }

    pub fn producer_connected(&self) -> bool {
        self.producer.is_some()
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let (role_tx, mut role_rx) = mpsc::channel::<RoleCandidate>(16);
        let mut ticker = interval(DRAIN_TICK);
        let mut producer_buf = vec![0u8; PRODUCER_READ_CHUNK];

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!(stream = self.name, "stream relay shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let tx = role_tx.clone();
                            tokio::spawn(async move {
                                classify(socket, addr, tx).await;
                            });
                        }
                        Err(e) => warn!(stream = self.name, error = %e, "accept failed"),
                    }
                }

                Some(candidate) = role_rx.recv() => {
                    self.adopt(candidate);
                }

                result = self.producer.as_mut().unwrap().read(&mut producer_buf),
                    if self.producer.is_some() =>
                {
                    match result {
                        Ok(n) if n > 0 => {
                            self.bytes_relayed += n as u64;
                            self.consumers.broadcast(&producer_buf[..n]);
                        }
                        _ => {
                            info!(stream = self.name, addr = ?self.producer_addr, "producer disconnected");
                            self.producer = None;
                            self.producer_addr = None;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.consumers.drain();
                    self.stats.publish(
                        self.consumers.len(),
                        self.consumers.clients_served(),
                        self.bytes_relayed,
                        self.producer.is_some(),
                    );
                }
            }
        }
    }

    fn adopt(&mut self, candidate: RoleCandidate) {
        match candidate {
            RoleCandidate::Producer(socket, addr) => {
                if self.producer.is_some() {
                    warn!(stream = self.name, new = %addr, old = ?self.producer_addr, "replacing producer");
                }
                self.producer = Some(socket);
                self.producer_addr = Some(addr);
            }
            RoleCandidate::Consumer(socket, addr) => {
                if let Err(e) = self.consumers.attach(socket, addr) {
                    warn!(stream = self.name, %addr, error = %e, "consumer attach refused");
                }
            }
        }
    }
}

/// Waits briefly to see if a newly accepted socket sends data. If it does,
/// it's the producer; if it stays silent for the grace period, it's a
/// read-only consumer.
async fn classify(socket: TcpStream, addr: SocketAddr, tx: mpsc::Sender<RoleCandidate>) {
    let candidate = match tokio::time::timeout(CLASSIFY_GRACE, socket.readable()).await {
        Ok(Ok(())) => RoleCandidate::Producer(socket, addr),
        _ => RoleCandidate::Consumer(socket, addr),
    };
    let _ = tx.send(candidate).await;
}
