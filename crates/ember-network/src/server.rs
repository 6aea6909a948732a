//! Top-level P2P server.
//!
//! Composes the discovery table, the session multiplexer and the peer
//! registry. A single event-loop task owns every registry mutation, so
//! `connected` always precedes `disconnected` for a peer id and removal of
//! an unknown id is a no-op.

use crate::discovery::{DiscoveryTable, Endpoint};
use crate::error::is_ignored_error;
use crate::message::Capability;
use crate::registry::{PeerRecord, PeerRegistry};
use crate::session::{SessionConfig, SessionEvent, SessionHandle, SessionMultiplexer};
use crate::{DisconnectReason, NetworkError, NetworkResult};
use ember_chain::{BootnodeEndpoint, ChainSpec};
use ember_consensus::{BlockHeader, HeaderFields, HeaderOptions};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default ban duration.
pub const DEFAULT_BAN_MAX_AGE: Duration = Duration::from_millis(60_000);

/// Server lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Events emitted by the server.
#[derive(Debug)]
pub enum ServerEvent {
    /// A peer completed its handshake and entered the registry.
    Connected(PeerRecord),
    /// A registered peer left.
    Disconnected {
        peer: PeerRecord,
        reason: DisconnectReason,
    },
    /// The session transport is listening.
    Listening(ListeningInfo),
    /// A surfaced error, with the peer it belongs to when known.
    Error {
        error: NetworkError,
        peer: Option<PeerRecord>,
    },
}

/// Payload of the `Listening` event.
#[derive(Debug, Clone, Serialize)]
pub struct ListeningInfo {
    pub transport: String,
    pub url: String,
}

/// Snapshot returned by [`P2PServer::info`].
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub ip: String,
    #[serde(rename = "listenAddr")]
    pub listen_addr: String,
    pub ports: ServerPorts,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerPorts {
    pub discovery: u16,
    pub listener: u16,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Chain the server speaks for (network id, genesis, bootnodes).
    pub chain: Arc<ChainSpec>,
    /// 32-byte node secret; generated when absent.
    pub private_key: Option<[u8; 32]>,
    /// Client identifier advertised in hellos.
    pub client_id: String,
    /// Address used in the enode URL and `info()`.
    pub advertised_ip: String,
    /// TCP listen port; 0 picks an ephemeral port.
    pub listen_port: u16,
    /// UDP discovery port; 0 disables the discovery bind.
    pub discovery_port: u16,
    /// Maximum concurrent peers.
    pub max_peers: usize,
    /// Discovery refresh interval.
    pub refresh_interval: Duration,
    /// Allow-list of remote client-id substrings; empty allows all.
    pub client_filter: Vec<String>,
    /// Capabilities this node offers.
    pub capabilities: Vec<Capability>,
    /// Discovery bootstrap endpoints; defaults to the chain's bootnodes.
    pub bootnodes: Vec<BootnodeEndpoint>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let chain = Arc::new(ChainSpec::mainnet());
        let bootnodes = chain.bootnodes().to_vec();
        Self {
            chain,
            private_key: None,
            client_id: format!("ember/v{}", env!("CARGO_PKG_VERSION")),
            advertised_ip: "0.0.0.0".to_string(),
            listen_port: ember_chain::DEFAULT_PORT,
            discovery_port: ember_chain::DEFAULT_PORT,
            max_peers: 25,
            refresh_interval: Duration::from_secs(30),
            client_filter: Vec::new(),
            capabilities: vec![Capability::new("eth", 65)],
            bootnodes,
        }
    }
}

/// The P2P server.
pub struct P2PServer {
    config: ServerConfig,
    node_id: [u8; 64],
    state: Mutex<Lifecycle>,
    registry: Arc<PeerRegistry>,
    discovery: Mutex<Option<Arc<DiscoveryTable>>>,
    multiplexer: Mutex<Option<Arc<SessionMultiplexer>>>,
    event_tx: mpsc::Sender<ServerEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<ServerEvent>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    bound_listener: Mutex<Option<SocketAddr>>,
    bound_discovery: Mutex<Option<SocketAddr>>,
}

impl P2PServer {
    /// Build a server; derives the node id from the configured secret or a
    /// freshly generated one.
    pub fn new(mut config: ServerConfig) -> NetworkResult<Self> {
        let secret = match config.private_key {
            Some(secret) => secret,
            None => {
                let key = secp256k1::SecretKey::new(&mut secp256k1::rand::thread_rng());
                let bytes = key.secret_bytes();
                config.private_key = Some(bytes);
                bytes
            }
        };
        let node_id = derive_node_id(&secret)?;

        let (event_tx, event_rx) = mpsc::channel(256);
        Ok(Self {
            config,
            node_id,
            state: Mutex::new(Lifecycle::Idle),
            registry: Arc::new(PeerRegistry::new()),
            discovery: Mutex::new(None),
            multiplexer: Mutex::new(None),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            event_loop: Mutex::new(None),
            bound_listener: Mutex::new(None),
            bound_discovery: Mutex::new(None),
        })
    }

    /// Take the server event receiver; available once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.lock().take()
    }

    /// Registry of live peers.
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Hex node id.
    pub fn node_id_hex(&self) -> String {
        hex::encode(self.node_id)
    }

    /// Whether the server is running.
    pub fn is_running(&self) -> bool {
        *self.state.lock() == Lifecycle::Running
    }

    /// Start the server: bind discovery and the session listener, start the
    /// event loop, then bootstrap.
    ///
    /// Returns `Ok(false)` without side effects when already started.
    /// Bootstrap failures are surfaced as error events, never as a failed
    /// start.
    pub async fn start(&self) -> NetworkResult<bool> {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Idle {
                return Ok(false);
            }
            *state = Lifecycle::Starting;
        }

        match self.start_inner().await {
            Ok(()) => {
                *self.state.lock() = Lifecycle::Running;
                info!(id = %self.node_id_hex(), "p2p server started");
                Ok(true)
            }
            Err(e) => {
                self.teardown().await;
                *self.state.lock() = Lifecycle::Idle;
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> NetworkResult<()> {
        let (session_tx, session_rx) = mpsc::channel::<SessionEvent>(256);
        let (disc_err_tx, disc_err_rx) = mpsc::channel::<NetworkError>(64);

        // Discovery table first; the multiplexer takes a reference to it.
        let discovery = Arc::new(DiscoveryTable::new(
            self.node_id,
            self.config.refresh_interval,
            disc_err_tx.clone(),
        ));
        if self.config.discovery_port != 0 {
            let addr = discovery.bind(self.config.discovery_port, "0.0.0.0").await?;
            *self.bound_discovery.lock() = Some(addr);
        }
        *self.discovery.lock() = Some(Arc::clone(&discovery));

        let genesis_hash = genesis_hash(&self.config.chain)?;
        let multiplexer = Arc::new(SessionMultiplexer::new(
            SessionConfig {
                client_id: self.config.client_id.clone(),
                node_id: self.node_id,
                network_id: self.config.chain.network_id(),
                genesis_hash,
                listen_port: self.config.listen_port,
                max_peers: self.config.max_peers,
                capabilities: self.config.capabilities.clone(),
                client_filter: self.config.client_filter.clone(),
                handshake_timeout: Duration::from_secs(8),
                ping_interval: Duration::from_secs(15),
            },
            session_tx,
        ));
        let listener_addr = multiplexer.listen(self.config.listen_port, "0.0.0.0").await?;
        *self.bound_listener.lock() = Some(listener_addr);
        *self.multiplexer.lock() = Some(Arc::clone(&multiplexer));

        // Single consumer of session and discovery events; exclusive owner
        // of registry mutation.
        let event_loop = EventLoop {
            registry: Arc::clone(&self.registry),
            capabilities: self.config.capabilities.clone(),
            event_tx: self.event_tx.clone(),
            enode: self.enode_url(listener_addr.port()),
        };
        *self.event_loop.lock() = Some(tokio::spawn(
            event_loop.run(session_rx, disc_err_rx),
        ));

        // Bootstrap all bootnodes in parallel; failures are reported, not
        // fatal.
        let endpoints: Vec<Endpoint> = self
            .config
            .bootnodes
            .iter()
            .map(|bootnode| Endpoint {
                address: bootnode.address.clone(),
                udp_port: Some(bootnode.udp_port),
                tcp_port: Some(bootnode.tcp_port),
            })
            .collect();
        if self.config.discovery_port != 0 && !endpoints.is_empty() {
            let results = futures::future::join_all(
                endpoints
                    .into_iter()
                    .map(|endpoint| discovery.bootstrap(endpoint)),
            )
            .await;
            for result in results {
                if let Err(e) = result {
                    warn!(error = %e, "bootstrap failed");
                    let _ = disc_err_tx.send(e).await;
                }
            }
        }

        Ok(())
    }

    /// Stop the server and release all transports.
    ///
    /// Returns `false` when not running.
    pub async fn stop(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state != Lifecycle::Running {
                return false;
            }
            *state = Lifecycle::Stopping;
        }

        self.teardown().await;
        *self.state.lock() = Lifecycle::Idle;
        info!("p2p server stopped");
        true
    }

    async fn teardown(&self) {
        let multiplexer = self.multiplexer.lock().take();
        if let Some(multiplexer) = multiplexer {
            multiplexer.destroy().await;
        }
        let discovery = self.discovery.lock().take();
        if let Some(discovery) = discovery {
            discovery.destroy().await;
        }
        if let Some(task) = self.event_loop.lock().take() {
            task.abort();
        }
        self.registry.clear();
        *self.bound_listener.lock() = None;
        *self.bound_discovery.lock() = None;
    }

    /// Ban a peer id in the discovery table.
    ///
    /// Returns `false` when the server is not running.
    pub fn ban(&self, id: &str, max_age: Option<Duration>) -> bool {
        if *self.state.lock() != Lifecycle::Running {
            return false;
        }
        let discovery = self.discovery.lock().clone();
        match discovery {
            Some(discovery) => {
                discovery.ban_peer(id, max_age.unwrap_or(DEFAULT_BAN_MAX_AGE));
                true
            }
            None => false,
        }
    }

    /// Dial a remote session endpoint.
    pub async fn connect(&self, addr: SocketAddr) -> bool {
        let multiplexer = self.multiplexer.lock().clone();
        match multiplexer {
            Some(multiplexer) if self.is_running() => {
                multiplexer.connect(addr).await;
                true
            }
            _ => false,
        }
    }

    /// Address snapshot; `id` and `enode` are absent until the session
    /// multiplexer has been initialized.
    pub fn info(&self) -> ServerInfo {
        let listener_port = self
            .bound_listener
            .lock()
            .map(|addr| addr.port())
            .unwrap_or(self.config.listen_port);
        let discovery_port = self
            .bound_discovery
            .lock()
            .map(|addr| addr.port())
            .unwrap_or(self.config.discovery_port);
        let initialized = self.multiplexer.lock().is_some();

        let (id, enode) = if initialized {
            (
                Some(self.node_id_hex()),
                Some(self.enode_url(listener_port)),
            )
        } else {
            (None, None)
        };

        ServerInfo {
            enode,
            id,
            ip: self.config.advertised_ip.clone(),
            listen_addr: format!("[{}]:{}", self.config.advertised_ip, listener_port),
            ports: ServerPorts {
                discovery: discovery_port,
                listener: listener_port,
            },
        }
    }

    /// Enode URL; brackets around the host for IPv4 and IPv6 alike.
    fn enode_url(&self, port: u16) -> String {
        format!(
            "enode://{}@[{}]:{}",
            self.node_id_hex(),
            self.config.advertised_ip,
            port
        )
    }
}

/// Consumes session and discovery events; sole mutator of the registry.
struct EventLoop {
    registry: Arc<PeerRegistry>,
    capabilities: Vec<Capability>,
    event_tx: mpsc::Sender<ServerEvent>,
    enode: String,
}

impl EventLoop {
    async fn run(
        self,
        mut session_rx: mpsc::Receiver<SessionEvent>,
        mut disc_err_rx: mpsc::Receiver<NetworkError>,
    ) {
        let mut discovery_open = true;
        loop {
            tokio::select! {
                event = session_rx.recv() => match event {
                    Some(event) => self.handle_session_event(event).await,
                    None => break,
                },
                error = disc_err_rx.recv(), if discovery_open => match error {
                    Some(error) => self.route_error(error, None).await,
                    None => discovery_open = false,
                },
            }
        }
        debug!("server event loop ended");
    }

    async fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Listening { local_addr } => {
                debug!(addr = %local_addr, "transport listening");
                let _ = self
                    .event_tx
                    .send(ServerEvent::Listening(ListeningInfo {
                        transport: "rlpx".to_string(),
                        url: self.enode.clone(),
                    }))
                    .await;
            }
            SessionEvent::Added(handle) => match self.accept_peer(&handle) {
                Ok(record) => {
                    self.registry.insert(record.clone());
                    let _ = self.event_tx.send(ServerEvent::Connected(record)).await;
                }
                Err(error) => {
                    handle.disconnect(DisconnectReason::UselessPeer).await;
                    self.route_error(error, None).await;
                }
            },
            SessionEvent::Removed(handle, reason) => {
                // Unknown ids are a no-op: at most one disconnected per
                // connected.
                if let Some(record) = self.registry.remove(handle.get_id()) {
                    let _ = self
                        .event_tx
                        .send(ServerEvent::Disconnected {
                            peer: record,
                            reason,
                        })
                        .await;
                }
            }
            SessionEvent::Error { peer_id, error } => {
                let peer = peer_id.as_deref().and_then(|id| self.registry.get(id));
                self.route_error(error, peer).await;
            }
        }
    }

    /// Admission handshake: the peer must share a capability with us.
    fn accept_peer(&self, handle: &SessionHandle) -> NetworkResult<PeerRecord> {
        let shared: Vec<Capability> = handle
            .capabilities()
            .iter()
            .filter(|cap| self.capabilities.contains(cap))
            .cloned()
            .collect();
        if shared.is_empty() {
            return Err(NetworkError::HandshakeFailed(format!(
                "no shared capabilities with {}",
                handle.client_id()
            )));
        }

        let (host, port) = match handle.remote_addr() {
            Some(addr) => (addr.ip().to_string(), addr.port()),
            None => ("unknown".to_string(), 0),
        };
        Ok(PeerRecord {
            id: handle.get_id().to_string(),
            host,
            port,
            inbound: handle.is_inbound_connection(),
            protocols: shared,
            session: handle.clone(),
        })
    }

    /// Classify and route an error: expected churn is logged and dropped,
    /// everything else becomes an event.
    async fn route_error(&self, error: NetworkError, peer: Option<PeerRecord>) {
        let message = error.to_string();
        if is_ignored_error(&message) {
            debug!(error = %message, "ignored transport error");
            return;
        }
        let _ = self.event_tx.send(ServerEvent::Error { error, peer }).await;
    }
}

/// Genesis header hash for the hello exchange.
fn genesis_hash(chain: &Arc<ChainSpec>) -> NetworkResult<[u8; 32]> {
    let opts = HeaderOptions {
        chain: Arc::clone(chain),
        hardfork: Some(ember_chain::Hardfork::Chainstart),
        init_with_genesis_header: true,
    };
    let header = BlockHeader::from_fields(HeaderFields::default(), opts)
        .map_err(|e| NetworkError::Consensus(e.to_string()))?;
    Ok(header.hash())
}

/// 64-byte node id: the uncompressed secp256k1 public key without its tag.
fn derive_node_id(secret: &[u8; 32]) -> NetworkResult<[u8; 64]> {
    let key = secp256k1::SecretKey::from_slice(secret)
        .map_err(|e| NetworkError::InvalidKey(e.to_string()))?;
    let public = key.public_key(&secp256k1::Secp256k1::new());
    let uncompressed = public.serialize_uncompressed();
    let mut node_id = [0u8; 64];
    node_id.copy_from_slice(&uncompressed[1..]);
    Ok(node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    fn local_config(chain: Arc<ChainSpec>) -> ServerConfig {
        ServerConfig {
            chain,
            listen_port: 0,
            discovery_port: 0,
            bootnodes: vec![],
            ..Default::default()
        }
    }

    async fn next_event(rx: &mut Receiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_lifecycle_monotonicity() {
        let server = P2PServer::new(local_config(Arc::new(ChainSpec::mainnet()))).unwrap();
        assert!(!server.stop().await, "stop on idle server is false");
        assert!(server.start().await.unwrap());
        assert!(!server.start().await.unwrap(), "second start is false");
        assert!(server.stop().await);
        assert!(!server.stop().await, "second stop is false");
    }

    #[tokio::test]
    async fn test_listening_emitted_once_per_start() {
        let server = P2PServer::new(local_config(Arc::new(ChainSpec::mainnet()))).unwrap();
        let mut events = server.take_events().unwrap();

        assert!(server.start().await.unwrap());
        match next_event(&mut events).await {
            ServerEvent::Listening(info) => {
                assert_eq!(info.transport, "rlpx");
                assert!(info.url.starts_with("enode://"));
                assert!(info.url.contains("@[0.0.0.0]:"));
            }
            other => panic!("expected listening, got {other:?}"),
        }
        server.stop().await;
    }

    #[tokio::test]
    async fn test_info_before_and_after_start() {
        let server = P2PServer::new(local_config(Arc::new(ChainSpec::mainnet()))).unwrap();

        let info = server.info();
        assert!(info.id.is_none());
        assert!(info.enode.is_none());

        server.start().await.unwrap();
        let info = server.info();
        let id = info.id.expect("id after start");
        assert_eq!(id.len(), 128);
        let enode = info.enode.expect("enode after start");
        assert_eq!(enode, format!("enode://{id}@[0.0.0.0]:{}", info.ports.listener));
        assert_eq!(
            info.listen_addr,
            format!("[0.0.0.0]:{}", info.ports.listener)
        );
        server.stop().await;
    }

    #[tokio::test]
    async fn test_ban_requires_running() {
        let server = P2PServer::new(local_config(Arc::new(ChainSpec::mainnet()))).unwrap();
        assert!(!server.ban("aabb", None));

        // Discovery disabled: ban still reaches the table object.
        server.start().await.unwrap();
        assert!(server.ban("aabb", Some(Duration::from_secs(1))));
        server.stop().await;
        assert!(!server.ban("aabb", None));
    }

    #[tokio::test]
    async fn test_two_servers_connect_and_disconnect() {
        let chain = Arc::new(ChainSpec::mainnet());
        let a = P2PServer::new(local_config(Arc::clone(&chain))).unwrap();
        let b = P2PServer::new(local_config(Arc::clone(&chain))).unwrap();
        let mut events_a = a.take_events().unwrap();
        let mut events_b = b.take_events().unwrap();

        a.start().await.unwrap();
        b.start().await.unwrap();

        let a_port = a.info().ports.listener;
        assert!(b.connect(([127, 0, 0, 1], a_port).into()).await);

        // Skip listening events, expect connected on both sides.
        async fn connected_on(events: &mut Receiver<ServerEvent>) -> PeerRecord {
            loop {
                match tokio::time::timeout(Duration::from_secs(2), events.recv())
                    .await
                    .expect("event timeout")
                    .expect("channel open")
                {
                    ServerEvent::Connected(record) => return record,
                    ServerEvent::Listening(_) => continue,
                    other => panic!("unexpected event: {other:?}"),
                }
            }
        }
        let peer_on_a = connected_on(&mut events_a).await;
        let peer_on_b = connected_on(&mut events_b).await;

        assert_eq!(peer_on_a.id, b.node_id_hex());
        assert_eq!(peer_on_b.id, a.node_id_hex());
        assert!(peer_on_a.inbound);
        assert!(!peer_on_b.inbound);
        assert_eq!(a.registry().len(), 1);

        // Stopping b must produce a disconnected event on a.
        b.stop().await;
        let mut disconnected = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_secs(1), events_a.recv()).await {
                Ok(Some(ServerEvent::Disconnected { peer, .. })) => {
                    assert_eq!(peer.id, peer_on_a.id);
                    disconnected = true;
                    break;
                }
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        assert!(disconnected, "disconnect must propagate");
        assert_eq!(a.registry().len(), 0);

        a.stop().await;
    }

    #[tokio::test]
    async fn test_bootstrap_failure_does_not_abort_start() {
        // Grab a free UDP port for the discovery bind.
        let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let free_port = probe.local_addr().unwrap().port();
        drop(probe);

        let chain = Arc::new(ChainSpec::mainnet());
        let mut config = local_config(chain);
        config.discovery_port = free_port;
        config.bootnodes = vec![BootnodeEndpoint {
            address: "bootnode.invalid".to_string(),
            udp_port: 30303,
            tcp_port: 30303,
        }];

        let server = P2PServer::new(config).unwrap();
        let mut events = server.take_events().unwrap();

        // Start resolves true despite the unresolvable bootnode, listening
        // is emitted, and the failure lands on the error sink.
        assert!(server.start().await.unwrap());

        let mut saw_listening = false;
        let mut saw_error = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(ServerEvent::Listening(_))) => saw_listening = true,
                Ok(Some(ServerEvent::Error { peer, .. })) => {
                    assert!(peer.is_none());
                    saw_error = true;
                }
                Ok(Some(_)) => {}
                _ => break,
            }
            if saw_listening && saw_error {
                break;
            }
        }
        assert!(saw_listening, "listening must still be emitted");
        assert!(saw_error, "bootstrap failure must reach the error sink");

        server.stop().await;
    }

    #[test]
    fn test_derive_node_id_is_stable() {
        let secret = [0x17u8; 32];
        let a = derive_node_id(&secret).unwrap();
        let b = derive_node_id(&secret).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, [0u8; 64]);
    }

    #[test]
    fn test_derive_node_id_rejects_zero_key() {
        assert!(derive_node_id(&[0u8; 32]).is_err());
    }
}
