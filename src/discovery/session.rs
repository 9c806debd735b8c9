//! Per-edge-connection handling: accept, frame lines, dispatch to the
//! registry task, write `list`/`find` responses back.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::discovery::actor::RegistryHandle;
use crate::discovery::framer::LineFramer;
use crate::discovery::protocol::{encode_response, parse_line, Command};

/// Accepts discovery connections and spawns one session task per edge.
/// This task only ever touches the listener and the registry handle (a
/// channel), never the registry's tables directly.
pub async fn run_listener(
    listener: TcpListener,
    registry: RegistryHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            handle_edge(stream, addr, registry).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "discovery accept failed"),
                }
            }
        }
    }
}

async fn handle_edge(mut stream: TcpStream, addr: SocketAddr, registry: RegistryHandle) {
    let edge = match registry.connect(addr).await {
        Ok(edge) => edge,
        Err(e) => {
            warn!(%addr, error = %e, "edge connection refused");
            return;
        }
    };
    debug!(%addr, "edge connected");

    let mut framer = LineFramer::new();

    'conn: loop {
        if framer.is_full() {
            warn!(%addr, "oversize discovery line, resyncing");
            framer.reset();
        }

        let n = match stream.read(framer.spare_mut()).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(%addr, error = %e, "edge read failed");
                break;
            }
        };
        framer.advance(n);

        for line in framer.take_lines() {
            let Some(cmd) = parse_line(&line) else {
                continue;
            };

            let response = match cmd {
                Command::Helo {
                    id,
                    svc,
                    ctrl_port,
                    data_port,
                    caps,
                } => {
                    registry.helo(edge, id, svc, ctrl_port, data_port, caps).await;
                    None
                }
                Command::Bye { id, svc } => {
                    registry.bye(edge, id, svc).await;
                    None
                }
                Command::List => {
                    let services = registry.list(edge).await;
                    Some(encode_response("list", &services))
                }
                Command::Find { svc } => {
                    let services = registry.find(edge, svc).await;
                    Some(encode_response("find", &services))
                }
            };

            if let Some(response) = response {
                if stream.write_all(response.as_bytes()).await.is_err() {
                    break 'conn;
                }
            }
        }
    }

    registry.disconnect(edge).await;
    debug!(%addr, "edge disconnected");
}
