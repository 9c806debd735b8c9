//! The registry lives on exactly one task, reached by every edge session
//! through a command channel. This keeps `Registry` itself free of any
//! synchronization while still letting many edge connections reach it
//! concurrently (spec.md §5: "the registry is owned by one task").

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{info, warn};

use crate::discovery::protocol::ServiceOut;
use crate::discovery::registry::{EdgeId, Registry};
use crate::error::RegistryError;

pub enum RegistryCommand {
    Connect {
        addr: SocketAddr,
        respond_to: oneshot::Sender<Result<EdgeId, RegistryError>>,
    },
    Helo {
        edge: EdgeId,
        id: String,
        svc: String,
        ctrl_port: i64,
        data_port: i64,
        caps: String,
    },
    Bye {
        edge: EdgeId,
        id: String,
        svc: Option<String>,
    },
    List {
        edge: EdgeId,
        respond_to: oneshot::Sender<Vec<ServiceOut>>,
    },
    Find {
        edge: EdgeId,
        svc: String,
        respond_to: oneshot::Sender<Vec<ServiceOut>>,
    },
    Disconnect {
        edge: EdgeId,
    },
    Snapshot {
        respond_to: oneshot::Sender<(usize, usize)>,
    },
}

#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub async fn connect(&self, addr: SocketAddr) -> Result<EdgeId, RegistryError> {
        let (respond_to, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RegistryCommand::Connect { addr, respond_to })
            .await;
        rx.await
            .unwrap_or(Err(RegistryError::EdgeCapacityExceeded { cap: 0 }))
    }

    pub async fn helo(
        &self,
        edge: EdgeId,
        id: String,
        svc: String,
        ctrl_port: i64,
        data_port: i64,
        caps: String,
    ) {
        let _ = self
            .tx
            .send(RegistryCommand::Helo {
                edge,
                id,
                svc,
                ctrl_port,
                data_port,
                caps,
            })
            .await;
    }

    pub async fn bye(&self, edge: EdgeId, id: String, svc: Option<String>) {
        let _ = self
            .tx
            .send(RegistryCommand::Bye { edge, id, svc })
            .await;
    }

    pub async fn list(&self, edge: EdgeId) -> Vec<ServiceOut> {
        let (respond_to, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RegistryCommand::List { edge, respond_to })
            .await;
        rx.await.unwrap_or_default()
    }

    pub async fn find(&self, edge: EdgeId, svc: String) -> Vec<ServiceOut> {
        let (respond_to, rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RegistryCommand::Find {
                edge,
                svc,
                respond_to,
            })
            .await;
        rx.await.unwrap_or_default()
    }

    pub async fn disconnect(&self, edge: EdgeId) {
        let _ = self.tx.send(RegistryCommand::Disconnect { edge }).await;
    }

    pub async fn snapshot(&self) -> (usize, usize) {
        let (respond_to, rx) = oneshot::channel();
        let _ = self.tx.send(RegistryCommand::Snapshot { respond_to }).await;
        rx.await.unwrap_or((0, 0))
    }
}

/// Spawns the registry task and returns a cloneable handle to it.
pub fn spawn(
    edge_cap: usize,
    service_cap: usize,
    edge_timeout: Duration,
    sweep_interval: Duration,
    shutdown: broadcast::Receiver<()>,
) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(rx, Registry::new(edge_cap, service_cap, edge_timeout), sweep_interval, shutdown));
    RegistryHandle { tx }
}

async fn run(
    mut rx: mpsc::Receiver<RegistryCommand>,
    mut registry: Registry,
    sweep_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(sweep_interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("discovery registry shutting down");
                break;
            }

            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                handle(&mut registry, cmd);
            }

            _ = ticker.tick() => {
                let removed = registry.sweep(Instant::now());
                for id in removed {
                    info!(?id, "edge session timed out");
                }
            }
        }
    }
}

fn handle(registry: &mut Registry, cmd: RegistryCommand) {
    let now = Instant::now();
    match cmd {
        RegistryCommand::Connect { addr, respond_to } => {
            let result = registry.connect(addr, now);
            if let Err(ref e) = result {
                warn!(%addr, error = %e, "discovery edge refused");
            }
            let _ = respond_to.send(result);
        }
        RegistryCommand::Helo {
            edge,
            id,
            svc,
            ctrl_port,
            data_port,
            caps,
        } => {
            if let Err(e) = registry.helo(edge, now, &id, &svc, ctrl_port, data_port, &caps) {
                warn!(%id, %svc, error = %e, "helo refused");
            }
        }
        RegistryCommand::Bye { edge, id, svc } => {
            registry.bye(edge, now, &id, svc.as_deref());
        }
        RegistryCommand::List { edge, respond_to } => {
            let _ = respond_to.send(registry.list(edge, now));
        }
        RegistryCommand::Find {
            edge,
            svc,
            respond_to,
        } => {
            let _ = respond_to.send(registry.find(edge, now, &svc));
        }
        RegistryCommand::Disconnect { edge } => {
            registry.disconnect(edge);
        }
        RegistryCommand::Snapshot { respond_to } => {
            let _ = respond_to.send((registry.edge_count(), registry.service_count()));
        }
    }
}
