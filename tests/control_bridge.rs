//! Full-stack control bridge exercise: the bridge's own `run` task,
//! real producer/controller sockets, a refused third connection, and
//! verbatim forwarding in both directions.

use std::time::Duration;

use sdr_relay_core::bridge::{BridgeStats, ControlBridge};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

#[tokio::test]
async fn third_connection_refused_and_bytes_forward_both_ways() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bridge = ControlBridge::new(listener, BridgeStats::new());
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(bridge.run(shutdown_tx.subscribe()));

    let mut producer = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut controller = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut third = TcpStream::connect(addr).await.unwrap();
    let mut probe = [0u8; 1];
    let n = third.read(&mut probe).await.unwrap();
    assert_eq!(n, 0, "third connection must be closed by the relay");

    controller.write_all(b"STATUS\n").await.unwrap();
    let mut buf = [0u8; 7];
    producer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"STATUS\n");

    producer.write_all(b"OK\n").await.unwrap();
    let mut reply = [0u8; 3];
    controller.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"OK\n");
}

#[tokio::test]
async fn producer_close_tears_down_controller_side_too() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bridge = ControlBridge::new(listener, BridgeStats::new());
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(bridge.run(shutdown_tx.subscribe()));

    let producer = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut controller = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(producer);

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_millis(500), controller.read(&mut buf))
        .await
        .expect("controller should observe teardown")
        .unwrap();
    assert_eq!(n, 0);
}
