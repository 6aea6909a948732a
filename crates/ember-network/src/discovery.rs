//! UDP node-discovery table.
//!
//! Keeps a routing table of known endpoints, primed by bootstrap pings and
//! refreshed on an interval. Packet parsing failures and unreachable
//! bootnodes are reported through the error channel; they never tear the
//! table down.

use crate::{NetworkError, NetworkResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ember_consensus::rlp::{self, Item};

/// A discovery endpoint; ports are unset until learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub udp_port: Option<u16>,
    pub tcp_port: Option<u16>,
}

impl Endpoint {
    /// The initial advertised endpoint before any bind.
    pub fn unspecified() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            udp_port: None,
            tcp_port: None,
        }
    }
}

/// Packet type ids.
const PACKET_PING: u8 = 0x01;
const PACKET_PONG: u8 = 0x02;

/// Packet lifetime before the expiry stamp rejects it.
const PACKET_TTL: Duration = Duration::from_secs(60);

/// UDP node-discovery service.
pub struct DiscoveryTable {
    node_id: [u8; 64],
    refresh_interval: Duration,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    advertised: Mutex<Endpoint>,
    /// Known endpoints keyed by hex node id.
    table: Arc<DashMap<String, SocketAddr>>,
    /// Deny-listed node ids and their expiry.
    banned: Arc<DashMap<String, Instant>>,
    error_tx: mpsc::Sender<NetworkError>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryTable {
    pub fn new(
        node_id: [u8; 64],
        refresh_interval: Duration,
        error_tx: mpsc::Sender<NetworkError>,
    ) -> Self {
        Self {
            node_id,
            refresh_interval,
            socket: Mutex::new(None),
            local_addr: Mutex::new(None),
            advertised: Mutex::new(Endpoint::unspecified()),
            table: Arc::new(DashMap::new()),
            banned: Arc::new(DashMap::new()),
            error_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bind the UDP socket and start the receive and refresh loops.
    pub async fn bind(&self, port: u16, host: &str) -> NetworkResult<SocketAddr> {
        let socket = Arc::new(UdpSocket::bind((host, port)).await?);
        let local_addr = socket.local_addr()?;
        info!(addr = %local_addr, "discovery table bound");

        *self.socket.lock() = Some(Arc::clone(&socket));
        *self.local_addr.lock() = Some(local_addr);
        self.advertised.lock().udp_port = Some(local_addr.port());

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(recv_loop(
            Arc::clone(&socket),
            self.node_id,
            Arc::clone(&self.table),
            Arc::clone(&self.banned),
            self.error_tx.clone(),
        )));
        tasks.push(tokio::spawn(refresh_loop(
            Arc::clone(&socket),
            self.node_id,
            Arc::clone(&self.table),
            self.refresh_interval,
        )));

        Ok(local_addr)
    }

    /// Seed the routing table with a bootnode and ping it.
    pub async fn bootstrap(&self, endpoint: Endpoint) -> NetworkResult<()> {
        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or_else(|| NetworkError::InvalidState("discovery socket not bound".into()))?;

        let port = endpoint
            .udp_port
            .ok_or_else(|| NetworkError::InvalidMessage("bootnode without udp port".into()))?;
        let target = format!("{}:{}", endpoint.address, port);

        let mut addrs = tokio::net::lookup_host(target.as_str())
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("resolve {target}: {e}")))?;
        let addr = addrs
            .next()
            .ok_or_else(|| NetworkError::ConnectionFailed(format!("no address for {target}")))?;

        debug!(addr = %addr, "bootstrapping discovery");
        send_packet(&socket, addr, PACKET_PING, self.node_id).await
    }

    /// Record a time-limited deny for a node id.
    pub fn ban_peer(&self, id: &str, max_age: Duration) {
        self.banned
            .insert(id.to_string(), Instant::now() + max_age);
        if self.table.remove(id).is_some() {
            debug!(peer = %id, "banned peer evicted from table");
        }
    }

    /// Whether a node id is currently denied.
    pub fn is_banned(&self, id: &str) -> bool {
        if let Some(until) = self.banned.get(id) {
            if Instant::now() < *until {
                return true;
            }
        }
        self.banned.remove(id);
        false
    }

    /// Number of known endpoints.
    pub fn node_count(&self) -> usize {
        self.table.len()
    }

    /// Known endpoint for a node id.
    pub fn endpoint_of(&self, id: &str) -> Option<SocketAddr> {
        self.table.get(id).map(|entry| *entry)
    }

    /// Local UDP bind address, when bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Currently advertised endpoint.
    pub fn advertised(&self) -> Endpoint {
        self.advertised.lock().clone()
    }

    /// Release the socket and stop all tasks.
    pub async fn destroy(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.socket.lock() = None;
        *self.local_addr.lock() = None;
        self.table.clear();
        debug!("discovery table destroyed");
    }
}

impl std::fmt::Debug for DiscoveryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryTable")
            .field("nodes", &self.table.len())
            .field("banned", &self.banned.len())
            .finish()
    }
}

async fn send_packet(
    socket: &UdpSocket,
    addr: SocketAddr,
    packet_type: u8,
    node_id: [u8; 64],
) -> NetworkResult<()> {
    let expiry = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + PACKET_TTL.as_secs();
    let payload = rlp::encode_item(&Item::List(vec![
        Item::Bytes(node_id.to_vec()),
        Item::Bytes(minimal_be(expiry)),
    ]));

    let mut packet = Vec::with_capacity(payload.len() + 1);
    packet.push(packet_type);
    packet.extend_from_slice(&payload);
    socket.send_to(&packet, addr).await?;
    Ok(())
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    node_id: [u8; 64],
    table: Arc<DashMap<String, SocketAddr>>,
    banned: Arc<DashMap<String, Instant>>,
    error_tx: mpsc::Sender<NetworkError>,
) {
    let mut buf = [0u8; 1280];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                let _ = error_tx.send(NetworkError::Io(e)).await;
                continue;
            }
        };

        match parse_packet(&buf[..len]) {
            Ok((packet_type, remote_id)) => {
                let id = hex::encode(remote_id);
                if let Some(until) = banned.get(&id) {
                    if Instant::now() < *until {
                        debug!(peer = %id, "dropping packet from banned peer");
                        continue;
                    }
                }
                table.insert(id.clone(), from);
                if packet_type == PACKET_PING {
                    if let Err(e) = send_packet(&socket, from, PACKET_PONG, node_id).await {
                        let _ = error_tx.send(e).await;
                    }
                }
            }
            Err(e) => {
                let _ = error_tx.send(e).await;
            }
        }
    }
}

async fn refresh_loop(
    socket: Arc<UdpSocket>,
    node_id: [u8; 64],
    table: Arc<DashMap<String, SocketAddr>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // immediate first tick
    loop {
        ticker.tick().await;
        let targets: Vec<SocketAddr> = table.iter().map(|entry| *entry).collect();
        for addr in targets {
            if let Err(e) = send_packet(&socket, addr, PACKET_PING, node_id).await {
                warn!(addr = %addr, error = %e, "refresh ping failed");
            }
        }
    }
}

/// Parse `type || rlp([node_id, expiry])`.
fn parse_packet(packet: &[u8]) -> NetworkResult<(u8, [u8; 64])> {
    let (packet_type, payload) = packet
        .split_first()
        .ok_or_else(|| NetworkError::InvalidMessage("empty discovery packet".into()))?;
    if *packet_type != PACKET_PING && *packet_type != PACKET_PONG {
        return Err(NetworkError::InvalidMessage(format!(
            "unknown discovery packet type 0x{packet_type:02x}"
        )));
    }

    let item = rlp::decode(payload)
        .map_err(|e| NetworkError::InvalidMessage(format!("discovery payload: {e}")))?;
    let fields = match item {
        Item::List(fields) if fields.len() == 2 => fields,
        _ => {
            return Err(NetworkError::InvalidMessage(
                "discovery payload is not a pair".into(),
            ))
        }
    };

    let mut fields = fields.into_iter();
    let id_bytes = match fields.next() {
        Some(Item::Bytes(bytes)) if bytes.len() == 64 => bytes,
        _ => {
            return Err(NetworkError::InvalidMessage(
                "Invalid address buffer".into(),
            ))
        }
    };
    let expiry_bytes = match fields.next() {
        Some(Item::Bytes(bytes)) if bytes.len() <= 8 => bytes,
        _ => {
            return Err(NetworkError::InvalidMessage(
                "Invalid timestamp buffer".into(),
            ))
        }
    };

    let mut expiry = 0u64;
    for byte in expiry_bytes {
        expiry = (expiry << 8) | u64::from(byte);
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if expiry < now {
        return Err(NetworkError::InvalidMessage(
            "Invalid timestamp buffer".into(),
        ));
    }

    let mut remote_id = [0u8; 64];
    remote_id.copy_from_slice(&id_bytes);
    Ok((*packet_type, remote_id))
}

fn minimal_be(value: u64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    bytes[start..].to_vec()
}
