//! Per-stream consumer set: attach/detach, header-once delivery, and the
//! best-effort ring drain that fans data out to every attached socket.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::CapacityExceeded;
use crate::ring::RingBuffer;
use crate::stream::header::HEADER_LEN;

const DRAIN_CHUNK: usize = 8192;

struct Consumer {
    stream: TcpStream,
    addr: SocketAddr,
    ring: RingBuffer,
    header_sent: bool,
    header_sent_offset: usize,
    bytes_written: u64,
    bytes_delivered: u64,
    connected_at: Instant,
}

/// Holds every consumer currently attached to one stream and performs the
/// broadcast/drain cycle against them. Owned by exactly one task.
pub struct ConsumerSet {
    consumers: Vec<Consumer>,
    cap: usize,
    header: [u8; HEADER_LEN],
    ring_capacity: usize,
    clients_served: u64,
}

impl ConsumerSet {
    pub fn new(cap: usize, header: [u8; HEADER_LEN], ring_capacity: usize) -> Self {
        Self {
            consumers: Vec::new(),
            cap,
            header,
            ring_capacity,
            clients_served: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn clients_served(&self) -> u64 {
        self.clients_served
    }

    pub fn attach(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<(), CapacityExceeded> {
        if self.consumers.len() >= self.cap {
            return Err(CapacityExceeded { cap: self.cap });
        }
        self.consumers.push(Consumer {
            stream,
            addr,
            ring: RingBuffer::new(self.ring_capacity),
            header_sent: false,
            header_sent_offset: 0,
            bytes_written: 0,
            bytes_delivered: 0,
            connected_at: Instant::now(),
        });
        self.clients_served += 1;
        debug!(%addr, total = self.consumers.len(), "consumer attached");
        Ok(())
    }

    /// Writes `bytes` into every attached consumer's ring. Never fails —
    /// slow consumers absorb loss via ring overflow, not broadcast failure.
    pub fn broadcast(&mut self, bytes: &[u8]) {
        for consumer in &mut self.consumers {
            consumer.ring.write(bytes);
            consumer.bytes_written += bytes.len() as u64;
        }
    }

    /// Attempts, for every consumer in reverse index order, to deliver the
    /// header (if not yet sent) or drain up to `DRAIN_CHUNK` ring bytes.
    /// Consumers whose socket errors non-transiently are evicted.
    pub fn drain(&mut self) {
        let mut i = self.consumers.len();
        while i > 0 {
            i -= 1;
            let evict = {
                let consumer = &mut self.consumers[i];
                Self::drain_one(consumer, &self.header)
            };
            if evict {
                let consumer = self.consumers.swap_remove(i);
                debug!(addr = %consumer.addr, "consumer evicted");
            }
        }
    }

    /// Returns `true` if the consumer should be evicted.
    fn drain_one(consumer: &mut Consumer, header: &[u8; HEADER_LEN]) -> bool {
        if !consumer.header_sent {
            let remaining = &header[consumer.header_sent_offset..];
            match consumer.stream.try_write(remaining) {
                Ok(n) => {
                    // track how much of the header actually landed; a
                    // partial write resumes from this offset next drain
                    // instead of resending bytes already on the wire.
                    consumer.header_sent_offset += n;
                    if consumer.header_sent_offset == HEADER_LEN {
                        consumer.header_sent = true;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    warn!(addr = %consumer.addr, error = %e, "consumer header write failed");
                    return true;
                }
            }
            return false;
        }

        if consumer.ring.is_empty() {
            return false;
        }

        let mut buf = [0u8; DRAIN_CHUNK];
        let to_read = consumer.ring.len().min(DRAIN_CHUNK);
        let n = consumer.ring.read(&mut buf[..to_read]);
        match consumer.stream.try_write(&buf[..n]) {
            Ok(sent) => {
                consumer.bytes_delivered += sent as u64;
                if sent < n {
                    // unsent tail goes back to the front to preserve FIFO order.
                    consumer.ring.push_front(&buf[sent..n]);
                }
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                // nothing sent; restore everything we pulled out.
                consumer.ring.push_front(&buf[..n]);
                false
            }
            Err(e) => {
                warn!(addr = %consumer.addr, error = %e, "consumer write failed");
                true
            }
        }
    }
}
