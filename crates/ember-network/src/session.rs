//! Encrypted-session multiplexer: TCP listener and per-session tasks.
//!
//! Each accepted or dialed connection performs a framed hello exchange and
//! then runs a session task until it disconnects. The multiplexer reports
//! everything through `SessionEvent`s; it never touches the peer registry
//! itself.

use crate::codec::FrameCodec;
use crate::message::{Capability, DisconnectReason, Hello, Message};
use crate::{NetworkError, NetworkResult};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Session serial numbers, so stale removals never evict a replacement.
static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Events produced by the multiplexer.
#[derive(Debug)]
pub enum SessionEvent {
    /// The TCP listener is bound.
    Listening { local_addr: SocketAddr },
    /// A session completed its hello exchange.
    Added(SessionHandle),
    /// A previously added session ended.
    Removed(SessionHandle, DisconnectReason),
    /// A transport or handshake error.
    Error {
        peer_id: Option<String>,
        error: NetworkError,
    },
}

/// Commands a session task accepts from its handle.
#[derive(Debug)]
enum SessionCommand {
    Send(Message),
    Close(DisconnectReason),
}

/// Cheap back reference to a live session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    seq: u64,
    id: String,
    addr: Option<SocketAddr>,
    inbound: bool,
    client_id: String,
    capabilities: Vec<Capability>,
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Hex node id of the remote peer.
    pub fn get_id(&self) -> &str {
        &self.id
    }

    /// Remote socket address.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Whether the remote end dialed us.
    pub fn is_inbound_connection(&self) -> bool {
        self.inbound
    }

    /// Remote client identifier from the hello exchange.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Capabilities the remote peer advertised.
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Queue a message to the session.
    pub async fn send(&self, message: Message) -> NetworkResult<()> {
        self.command_tx
            .send(SessionCommand::Send(message))
            .await
            .map_err(|_| NetworkError::ConnectionClosed)
    }

    /// Ask the session task to close with a reason.
    pub async fn disconnect(&self, reason: DisconnectReason) {
        let _ = self.command_tx.send(SessionCommand::Close(reason)).await;
    }

    /// A handle with no live session behind it (tests and placeholders).
    pub fn detached(id: &str) -> Self {
        let (command_tx, _rx) = mpsc::channel(1);
        Self {
            seq: 0,
            id: id.to_string(),
            addr: None,
            inbound: false,
            client_id: String::new(),
            capabilities: Vec::new(),
            command_tx,
        }
    }
}

/// Multiplexer configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Our client identifier sent in the hello.
    pub client_id: String,
    /// Our 64-byte node id.
    pub node_id: [u8; 64],
    /// Network id; disagreement aborts the handshake.
    pub network_id: u64,
    /// Genesis hash; disagreement aborts the handshake.
    pub genesis_hash: [u8; 32],
    /// Port advertised in the hello.
    pub listen_port: u16,
    /// Maximum concurrent sessions.
    pub max_peers: usize,
    /// Capabilities we advertise.
    pub capabilities: Vec<Capability>,
    /// Allow-list of remote client-id substrings; empty allows all.
    pub client_filter: Vec<String>,
    /// Hello exchange deadline.
    pub handshake_timeout: Duration,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
}

/// Owns the TCP listener and all session tasks.
pub struct SessionMultiplexer {
    config: Arc<SessionConfig>,
    sessions: Arc<DashMap<String, SessionHandle>>,
    event_tx: mpsc::Sender<SessionEvent>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SessionMultiplexer {
    pub fn new(config: SessionConfig, event_tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(DashMap::new()),
            event_tx,
            listener_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind the listener, emit `Listening` and start accepting sessions.
    pub async fn listen(&self, port: u16, host: &str) -> NetworkResult<SocketAddr> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!(addr = %local_addr, "session multiplexer listening");

        let _ = self
            .event_tx
            .send(SessionEvent::Listening { local_addr })
            .await;

        let config = Arc::clone(&self.config);
        let sessions = Arc::clone(&self.sessions);
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if sessions.len() >= config.max_peers {
                            warn!(addr = %addr, "max peers reached, rejecting");
                            continue;
                        }
                        debug!(addr = %addr, "inbound connection");
                        tokio::spawn(run_session(
                            stream,
                            addr,
                            true,
                            Arc::clone(&config),
                            Arc::clone(&sessions),
                            event_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        let _ = event_tx
                            .send(SessionEvent::Error {
                                peer_id: None,
                                error: NetworkError::Io(e),
                            })
                            .await;
                    }
                }
            }
        });
        *self.listener_task.lock() = Some(task);

        Ok(local_addr)
    }

    /// Dial a remote peer; failures surface as session events.
    pub async fn connect(&self, addr: SocketAddr) {
        if self.sessions.len() >= self.config.max_peers {
            warn!(addr = %addr, "max peers reached, not dialing");
            return;
        }

        let config = Arc::clone(&self.config);
        let sessions = Arc::clone(&self.sessions);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    run_session(stream, addr, false, config, sessions, event_tx).await;
                }
                Err(e) => {
                    let _ = event_tx
                        .send(SessionEvent::Error {
                            peer_id: None,
                            error: NetworkError::ConnectionFailed(format!("{addr}: {e}")),
                        })
                        .await;
                }
            }
        });
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Local listener address, when bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Close the listener and all sessions.
    pub async fn destroy(&self) {
        if let Some(task) = self.listener_task.lock().take() {
            task.abort();
        }
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in handles {
            handle.disconnect(DisconnectReason::ClientQuitting).await;
        }
        debug!("session multiplexer destroyed");
    }
}

impl std::fmt::Debug for SessionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMultiplexer")
            .field("sessions", &self.sessions.len())
            .field("local_addr", &*self.local_addr.lock())
            .finish()
    }
}

/// Run one session to completion: hello exchange, then the message loop.
async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    inbound: bool,
    config: Arc<SessionConfig>,
    sessions: Arc<DashMap<String, SessionHandle>>,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let mut framed = Framed::new(stream, FrameCodec::for_network(config.network_id));

    let remote = match tokio::time::timeout(
        config.handshake_timeout,
        hello_exchange(&mut framed, addr, inbound, &config),
    )
    .await
    {
        Ok(Ok(hello)) => hello,
        Ok(Err(error)) => {
            let _ = event_tx
                .send(SessionEvent::Error {
                    peer_id: None,
                    error,
                })
                .await;
            return;
        }
        Err(_) => {
            let _ = event_tx
                .send(SessionEvent::Error {
                    peer_id: None,
                    error: NetworkError::Timeout("Handshake timed out".to_string()),
                })
                .await;
            return;
        }
    };

    let id = hex::encode(remote.node_id);
    let (command_tx, mut command_rx) = mpsc::channel::<SessionCommand>(32);
    let handle = SessionHandle {
        seq: SESSION_SEQ.fetch_add(1, Ordering::Relaxed),
        id: id.clone(),
        addr: Some(addr),
        inbound,
        client_id: remote.client_id.clone(),
        capabilities: remote.capabilities.clone(),
        command_tx,
    };
    let seq = handle.seq;

    sessions.insert(id.clone(), handle.clone());
    let _ = event_tx.send(SessionEvent::Added(handle.clone())).await;

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await; // swallow the immediate first tick

    let reason = loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(Message::Ping)) => {
                    if framed.send(Message::Pong).await.is_err() {
                        break DisconnectReason::Disconnected;
                    }
                }
                Some(Ok(Message::Pong)) => {}
                Some(Ok(Message::Disconnect(reason))) => break reason,
                Some(Ok(Message::Hello(_))) => {
                    let _ = event_tx.send(SessionEvent::Error {
                        peer_id: Some(id.clone()),
                        error: NetworkError::InvalidMessage("unexpected hello".into()),
                    }).await;
                    break DisconnectReason::ProtocolError;
                }
                Some(Err(error)) => {
                    let _ = event_tx.send(SessionEvent::Error {
                        peer_id: Some(id.clone()),
                        error,
                    }).await;
                    break DisconnectReason::ProtocolError;
                }
                None => break DisconnectReason::Disconnected,
            },
            command = command_rx.recv() => match command {
                Some(SessionCommand::Send(message)) => {
                    if framed.send(message).await.is_err() {
                        break DisconnectReason::Disconnected;
                    }
                }
                Some(SessionCommand::Close(reason)) => {
                    let _ = framed.send(Message::Disconnect(reason)).await;
                    break reason;
                }
                None => break DisconnectReason::Requested,
            },
            _ = ping.tick() => {
                if framed.send(Message::Ping).await.is_err() {
                    break DisconnectReason::Disconnected;
                }
            }
        }
    };

    sessions.remove_if(&id, |_, stored| stored.seq == seq);
    debug!(peer = %id, reason = %reason, "session ended");
    let _ = event_tx.send(SessionEvent::Removed(handle, reason)).await;
}

/// Exchange hellos and vet the remote against our chain and filters.
async fn hello_exchange(
    framed: &mut Framed<TcpStream, FrameCodec>,
    addr: SocketAddr,
    inbound: bool,
    config: &SessionConfig,
) -> NetworkResult<Hello> {
    let ours = Message::Hello(Hello {
        client_id: config.client_id.clone(),
        network_id: config.network_id,
        genesis_hash: config.genesis_hash,
        node_id: config.node_id,
        listen_port: config.listen_port,
        capabilities: config.capabilities.clone(),
    });

    let theirs = if inbound {
        let theirs = read_hello(framed).await?;
        framed.send(ours).await?;
        theirs
    } else {
        framed.send(ours).await?;
        read_hello(framed).await?
    };

    if theirs.network_id != config.network_id {
        return Err(NetworkError::NetworkIdMismatch {
            local: config.network_id,
            remote: theirs.network_id,
        });
    }
    if theirs.genesis_hash != config.genesis_hash {
        return Err(NetworkError::GenesisMismatch);
    }
    if !config.client_filter.is_empty()
        && !config
            .client_filter
            .iter()
            .any(|probe| theirs.client_id.contains(probe))
    {
        return Err(NetworkError::ClientFiltered(theirs.client_id));
    }

    debug!(
        addr = %addr,
        client = %theirs.client_id,
        caps = theirs.capabilities.len(),
        "hello complete"
    );
    Ok(theirs)
}

async fn read_hello(framed: &mut Framed<TcpStream, FrameCodec>) -> NetworkResult<Hello> {
    match framed.next().await {
        Some(Ok(Message::Hello(hello))) => Ok(hello),
        Some(Ok(other)) => Err(NetworkError::HandshakeFailed(format!(
            "expected hello, got {:?}",
            other.message_type()
        ))),
        Some(Err(error)) => Err(error),
        None => Err(NetworkError::ConnectionClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(network_id: u64, node_id: u8, filter: Vec<String>) -> SessionConfig {
        SessionConfig {
            client_id: format!("ember/test-{node_id}"),
            node_id: [node_id; 64],
            network_id,
            genesis_hash: [0x11; 32],
            listen_port: 0,
            max_peers: 8,
            capabilities: vec![Capability::new("eth", 65)],
            client_filter: filter,
            handshake_timeout: Duration::from_secs(2),
            ping_interval: Duration::from_secs(30),
        }
    }

    async fn expect_added(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionHandle {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("event timeout")
                .expect("channel open")
            {
                SessionEvent::Added(handle) => return handle,
                SessionEvent::Listening { .. } => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_session_established_both_sides() {
        let (tx_a, mut rx_a) = mpsc::channel(32);
        let (tx_b, mut rx_b) = mpsc::channel(32);
        let a = SessionMultiplexer::new(config(1, 0xaa, vec![]), tx_a);
        let b = SessionMultiplexer::new(config(1, 0xbb, vec![]), tx_b);

        let addr = a.listen(0, "127.0.0.1").await.unwrap();
        b.connect(addr).await;

        let on_a = expect_added(&mut rx_a).await;
        let on_b = expect_added(&mut rx_b).await;

        assert!(on_a.is_inbound_connection());
        assert!(!on_b.is_inbound_connection());
        assert_eq!(on_a.get_id(), hex::encode([0xbb; 64]));
        assert_eq!(on_b.get_id(), hex::encode([0xaa; 64]));
        assert_eq!(a.session_count(), 1);

        a.destroy().await;
        b.destroy().await;
    }

    #[tokio::test]
    async fn test_network_id_mismatch_rejected() {
        let (tx_a, mut rx_a) = mpsc::channel(32);
        let (tx_b, mut rx_b) = mpsc::channel(32);
        let a = SessionMultiplexer::new(config(1, 0xaa, vec![]), tx_a);
        let b = SessionMultiplexer::new(config(2, 0xbb, vec![]), tx_b);

        let addr = a.listen(0, "127.0.0.1").await.unwrap();
        b.connect(addr).await;

        // Wait for any error event on either side; no Added may arrive.
        let deadline = tokio::time::sleep(Duration::from_secs(2));
        tokio::pin!(deadline);
        let mut saw_error = false;
        while !saw_error {
            tokio::select! {
                event = rx_a.recv() => match event {
                    Some(SessionEvent::Error { error, .. }) => {
                        // Decoded under a's magic the frame is garbage, or
                        // the id check fires; either way no session forms.
                        let _ = error;
                        saw_error = true;
                    }
                    Some(SessionEvent::Added(_)) => panic!("session must not form"),
                    _ => {}
                },
                event = rx_b.recv() => match event {
                    Some(SessionEvent::Error { .. }) => saw_error = true,
                    Some(SessionEvent::Added(_)) => panic!("session must not form"),
                    _ => {}
                },
                _ = &mut deadline => break,
            }
        }
        assert!(saw_error, "expected a handshake error");
        assert_eq!(a.session_count(), 0);

        a.destroy().await;
        b.destroy().await;
    }

    #[tokio::test]
    async fn test_client_filter_rejects() {
        let (tx_a, mut rx_a) = mpsc::channel(32);
        let (tx_b, _rx_b) = mpsc::channel(32);
        let a = SessionMultiplexer::new(config(1, 0xaa, vec!["geth".to_string()]), tx_a);
        let b = SessionMultiplexer::new(config(1, 0xbb, vec![]), tx_b);

        let addr = a.listen(0, "127.0.0.1").await.unwrap();
        b.connect(addr).await;

        let mut filtered = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_secs(1), rx_a.recv()).await {
                Ok(Some(SessionEvent::Error { error, .. })) => {
                    if matches!(error, NetworkError::ClientFiltered(_)) {
                        filtered = true;
                        break;
                    }
                }
                Ok(Some(SessionEvent::Added(_))) => panic!("filtered client admitted"),
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        assert!(filtered, "expected a client-filter rejection");

        a.destroy().await;
        b.destroy().await;
    }

    #[tokio::test]
    async fn test_removed_event_on_remote_close() {
        let (tx_a, mut rx_a) = mpsc::channel(32);
        let (tx_b, mut rx_b) = mpsc::channel(32);
        let a = SessionMultiplexer::new(config(1, 0xaa, vec![]), tx_a);
        let b = SessionMultiplexer::new(config(1, 0xbb, vec![]), tx_b);

        let addr = a.listen(0, "127.0.0.1").await.unwrap();
        b.connect(addr).await;
        let _ = expect_added(&mut rx_a).await;
        let on_b = expect_added(&mut rx_b).await;

        on_b.disconnect(DisconnectReason::Requested).await;

        let mut removed_on_a = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_secs(1), rx_a.recv()).await {
                Ok(Some(SessionEvent::Removed(_, _))) => {
                    removed_on_a = true;
                    break;
                }
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        assert!(removed_on_a, "peer removal must propagate");
        assert_eq!(a.session_count(), 0);

        a.destroy().await;
        b.destroy().await;
    }
}
