//! Peer registry: live peer records keyed by hex node id.

use crate::message::Capability;
use crate::session::SessionHandle;
use dashmap::DashMap;

/// A live peer admitted by the server.
///
/// The record lives between the `connected` and `disconnected` events; the
/// session handle inside it is a cheap back reference owned by the session
/// multiplexer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Hex node id.
    pub id: String,
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Whether the remote end dialed us.
    pub inbound: bool,
    /// Capabilities negotiated for this peer.
    pub protocols: Vec<Capability>,
    /// Back reference to the underlying session.
    pub session: SessionHandle,
}

/// Concurrency-safe map of live peers.
///
/// All mutation happens on the server event loop; the map type makes reads
/// from other contexts (info, metrics, tests) safe.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<String, PeerRecord>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any prior entry for the same id.
    pub fn insert(&self, record: PeerRecord) {
        self.peers.insert(record.id.clone(), record);
    }

    /// Remove a record; unknown ids are a no-op returning `None`.
    pub fn remove(&self, id: &str) -> Option<PeerRecord> {
        self.peers.remove(id).map(|(_, record)| record)
    }

    pub fn get(&self, id: &str) -> Option<PeerRecord> {
        self.peers.get(id).map(|entry| entry.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of all records, no ordering guarantees.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.iter().map(|entry| entry.clone()).collect()
    }

    pub fn clear(&self) {
        self.peers.clear();
    }
}
