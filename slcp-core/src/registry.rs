//! Known peers: handle -> address and online flag.
//!
//! Upsert-only. Entries are never removed and there is no expiry; a peer that
//! disappears without sending LEAVE stays `online` until it is seen again.

use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub handle: String,
    pub addr: SocketAddr,
    pub online: bool,
}

#[derive(Debug, Default, Clone)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `handle`. Last write wins on the address; the peer is marked online.
    /// Returns true if the handle was not known before or its address changed.
    pub fn upsert(&mut self, handle: &str, addr: SocketAddr) -> bool {
        let record = PeerRecord {
            handle: handle.to_string(),
            addr,
            online: true,
        };
        match self.peers.insert(handle.to_string(), record) {
            Some(prev) => prev.addr != addr,
            None => true,
        }
    }

    /// Explicit LEAVE. Unknown handles are ignored.
    pub fn mark_offline(&mut self, handle: &str) -> bool {
        match self.peers.get_mut(handle) {
            Some(p) => {
                p.online = false;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, handle: &str) -> Option<&PeerRecord> {
        self.peers.get(handle)
    }

    pub fn addr_of(&self, handle: &str) -> Option<SocketAddr> {
        self.peers.get(handle).map(|p| p.addr)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Copy of all records, sorted by handle.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut out: Vec<PeerRecord> = self.peers.values().cloned().collect();
        out.sort_by(|a, b| a.handle.cmp(&b.handle));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn last_write_wins() {
        let mut r = PeerRegistry::new();
        assert!(r.upsert("B", addr("10.0.0.5:5001")));
        assert!(r.upsert("B", addr("10.0.0.9:5002")));
        assert_eq!(r.len(), 1);
        assert_eq!(r.addr_of("B"), Some(addr("10.0.0.9:5002")));
        // Same address again is not a change.
        assert!(!r.upsert("B", addr("10.0.0.9:5002")));
    }

    #[test]
    fn leave_only_flips_online() {
        let mut r = PeerRegistry::new();
        r.upsert("B", addr("10.0.0.5:5001"));
        assert!(r.mark_offline("B"));
        let b = r.get("B").unwrap();
        assert!(!b.online);
        assert_eq!(b.addr, addr("10.0.0.5:5001"));
        assert!(!r.mark_offline("nobody"));

        // Seen again: back online.
        r.upsert("B", addr("10.0.0.5:5001"));
        assert!(r.get("B").unwrap().online);
    }

    #[test]
    fn snapshot_is_sorted_copy() {
        let mut r = PeerRegistry::new();
        r.upsert("zoe", addr("10.0.0.3:1"));
        r.upsert("amy", addr("10.0.0.2:1"));
        let snap = r.snapshot();
        let handles: Vec<_> = snap.iter().map(|p| p.handle.as_str()).collect();
        assert_eq!(handles, ["amy", "zoe"]);
        r.mark_offline("amy");
        assert!(snap[0].online);
    }
}
