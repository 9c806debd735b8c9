//! In-memory service registry: edge sessions and the service table they
//! own. Pure logic, no I/O — owned and driven by a single task (see
//! `discovery::actor`). Edge/service relationships are represented as two
//! flat tables keyed by handle, per spec.md §9: removing an edge iterates
//! services and drops those whose owner matches, rather than following
//! owning back-pointers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::discovery::protocol::{truncate, ServiceOut, CAPS_MAX, ID_MAX, IP_MAX, SVC_MAX};
use crate::error::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u64);

struct EdgeEntry {
    addr: SocketAddr,
    last_seen: Instant,
}

#[derive(Clone)]
struct ServiceRecord {
    id: String,
    svc: String,
    ip: String,
    ctrl_port: i64,
    data_port: i64,
    caps: String,
    owner_edge: EdgeId,
}

impl From<&ServiceRecord> for ServiceOut {
    fn from(r: &ServiceRecord) -> Self {
        ServiceOut {
            id: r.id.clone(),
            svc: r.svc.clone(),
            ip: r.ip.clone(),
            port: r.ctrl_port,
            data: r.data_port,
            caps: r.caps.clone(),
        }
    }
}

pub struct Registry {
    edges: HashMap<EdgeId, EdgeEntry>,
    services: HashMap<(String, String), ServiceRecord>,
    next_edge_id: u64,
    edge_cap: usize,
    service_cap: usize,
    edge_timeout: Duration,
}

impl Registry {
    pub fn new(edge_cap: usize, service_cap: usize, edge_timeout: Duration) -> Self {
        Self {
            edges: HashMap::new(),
            services: HashMap::new(),
            next_edge_id: 0,
            edge_cap,
            service_cap,
            edge_timeout,
        }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn connect(&mut self, addr: SocketAddr, now: Instant) -> Result<EdgeId, RegistryError> {
        if self.edges.len() >= self.edge_cap {
            return Err(RegistryError::EdgeCapacityExceeded { cap: self.edge_cap });
        }
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        self.edges.insert(id, EdgeEntry { addr, last_seen: now });
        Ok(id)
    }

    /// Removes an edge and every service record it owns. Atomic from the
    /// caller's point of view: no partial state is ever observable.
    pub fn disconnect(&mut self, edge: EdgeId) {
        self.edges.remove(&edge);
        self.services.retain(|_, record| record.owner_edge != edge);
    }

    fn touch(&mut self, edge: EdgeId, now: Instant) {
        if let Some(entry) = self.edges.get_mut(&edge) {
            entry.last_seen = now;
        }
    }

    /// Upserts service `(svc, id)`. A repeat HELO for an existing key
    /// updates the record in place even at capacity; a brand new key is
    /// rejected once `service_cap` is reached.
    pub fn helo(
        &mut self,
        edge: EdgeId,
        now: Instant,
        id: &str,
        svc: &str,
        ctrl_port: i64,
        data_port: i64,
        caps: &str,
    ) -> Result<(), RegistryError> {
        self.touch(edge, now);
        let Some(entry) = self.edges.get(&edge) else {
            return Ok(());
        };
        let ip = truncate(&entry.addr.ip().to_string(), IP_MAX);
        let key = (truncate(svc, SVC_MAX), truncate(id, ID_MAX));

        if !self.services.contains_key(&key) && self.services.len() >= self.service_cap {
            return Err(RegistryError::ServiceCapacityExceeded {
                cap: self.service_cap,
            });
        }

        self.services.insert(
            key.clone(),
            ServiceRecord {
                id: key.1,
                svc: key.0,
                ip,
                ctrl_port,
                data_port,
                caps: truncate(caps, CAPS_MAX),
                owner_edge: edge,
            },
        );
        Ok(())
    }

    /// Removes `(svc, id)` if `svc` is given, else every service with that
    /// `id` owned by this edge. Only ever removes records this edge owns.
    pub fn bye(&mut self, edge: EdgeId, now: Instant, id: &str, svc: Option<&str>) {
        self.touch(edge, now);
        let id = truncate(id, ID_MAX);
        match svc {
            Some(svc) => {
                let key = (truncate(svc, SVC_MAX), id);
                if self
                    .services
                    .get(&key)
                    .is_some_and(|r| r.owner_edge == edge)
                {
                    self.services.remove(&key);
                }
            }
            None => {
                self.services
                    .retain(|_, record| !(record.id == id && record.owner_edge == edge));
            }
        }
    }

    pub fn list(&mut self, edge: EdgeId, now: Instant) -> Vec<ServiceOut> {
        self.touch(edge, now);
        self.services.values().map(ServiceOut::from).collect()
    }

    pub fn find(&mut self, edge: EdgeId, now: Instant, svc: &str) -> Vec<ServiceOut> {
        self.touch(edge, now);
        self.services
            .values()
            .filter(|r| r.svc == svc)
            .map(ServiceOut::from)
            .collect()
    }

    /// Removes every edge whose `last_seen` is older than the configured
    /// timeout, and the services it owned. Returns the removed edge ids.
    pub fn sweep(&mut self, now: Instant) -> Vec<EdgeId> {
        let expired: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > self.edge_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.disconnect(*id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("192.0.2.1:{port}").parse().unwrap()
    }

    #[test]
    fn helo_then_list_echoes_fields_with_observed_ip() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let now = Instant::now();
        let edge = reg.connect(addr(9), now).unwrap();
        reg.helo(edge, now, "A", "sdr_server", 4535, 4536, "rx").unwrap();

        let services = reg.list(edge, now);
        assert_eq!(services.len(), 1);
        let s = &services[0];
        assert_eq!(s.id, "A");
        assert_eq!(s.svc, "sdr_server");
        assert_eq!(s.port, 4535);
        assert_eq!(s.data, 4536);
        assert_eq!(s.caps, "rx");
        assert_eq!(s.ip, "192.0.2.1");
    }

    #[test]
    fn helo_then_bye_then_list_is_empty() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let now = Instant::now();
        let edge = reg.connect(addr(1), now).unwrap();
        reg.helo(edge, now, "A", "sdr_server", 1, 2, "").unwrap();
        reg.bye(edge, now, "A", Some("sdr_server"));
        assert!(reg.list(edge, now).is_empty());
    }

    #[test]
    fn disconnect_removes_all_owned_services_atomically() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let now = Instant::now();
        let edge = reg.connect(addr(1), now).unwrap();
        reg.helo(edge, now, "A", "svc1", 1, 2, "").unwrap();
        reg.helo(edge, now, "B", "svc2", 1, 2, "").unwrap();
        reg.disconnect(edge);
        assert_eq!(reg.service_count(), 0);
    }

    #[test]
    fn repeat_helo_updates_in_place_and_stays_unique() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let now = Instant::now();
        let edge = reg.connect(addr(1), now).unwrap();
        reg.helo(edge, now, "A", "sdr_server", 1, 2, "v1").unwrap();
        reg.helo(edge, now, "A", "sdr_server", 3, 4, "v2").unwrap();
        let services = reg.list(edge, now);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].caps, "v2");
        assert_eq!(services[0].port, 3);
    }

    #[test]
    fn exactly_32_edges_accept_the_33rd_is_refused() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let now = Instant::now();
        for i in 0..32 {
            reg.connect(addr(i), now).unwrap();
        }
        assert_eq!(reg.edge_count(), 32);
        assert!(reg.connect(addr(999), now).is_err());
    }

    #[test]
    fn service_cap_rejects_new_keys_but_allows_updates() {
        let mut reg = Registry::new(32, 2, Duration::from_secs(120));
        let now = Instant::now();
        let edge = reg.connect(addr(1), now).unwrap();
        reg.helo(edge, now, "A", "svc", 1, 1, "").unwrap();
        reg.helo(edge, now, "B", "svc", 1, 1, "").unwrap();
        assert!(reg.helo(edge, now, "C", "svc", 1, 1, "").is_err());
        // updating an existing key must still succeed at capacity.
        assert!(reg.helo(edge, now, "A", "svc", 9, 9, "").is_ok());
    }

    #[test]
    fn timed_out_edge_is_removed_by_sweep() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let past = Instant::now() - Duration::from_secs(200);
        let edge = reg.connect(addr(1), past).unwrap();
        reg.helo(edge, past, "A", "svc", 1, 1, "").unwrap();

        let removed = reg.sweep(Instant::now());
        assert_eq!(removed, vec![edge]);
        assert_eq!(reg.edge_count(), 0);
        assert_eq!(reg.service_count(), 0);
    }

    #[test]
    fn list_refreshes_last_seen_and_prevents_timeout() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let start = Instant::now();
        let edge = reg.connect(addr(1), start).unwrap();
        let later = start + Duration::from_secs(100);
        reg.list(edge, later);
        // edge touched at `later`; sweeping shortly after must not expire it.
        let removed = reg.sweep(later + Duration::from_secs(1));
        assert!(removed.is_empty());
    }

    #[test]
    fn bye_only_removes_services_owned_by_the_requesting_edge() {
        let mut reg = Registry::new(32, 128, Duration::from_secs(120));
        let now = Instant::now();
        let edge_a = reg.connect(addr(1), now).unwrap();
        let edge_b = reg.connect(addr(2), now).unwrap();
        reg.helo(edge_a, now, "A", "svc", 1, 1, "").unwrap();
        // edge_b cannot remove edge_a's service even with a matching key.
        reg.bye(edge_b, now, "A", Some("svc"));
        assert_eq!(reg.service_count(), 1);
    }
}
