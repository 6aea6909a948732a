//! Two-node server scenarios over loopback sockets.

use ember_chain::ChainSpec;
use ember_network::{is_ignored_error, P2PServer, ServerConfig, ServerEvent};
use std::sync::Arc;
use std::time::Duration;
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

async fn wait_connected(events: &mut Receiver<ServerEvent>) -> ember_network::PeerRecord {
    loop {
        match tokio::time::timeout(Duration::from_secs(3), events.recv())
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

#[tokio::test]
async fn full_peer_lifecycle_between_two_servers() {
    let chain = Arc::new(ChainSpec::mainnet());
    let alpha = P2PServer::new(local_config(Arc::clone(&chain))).unwrap();
    let beta = P2PServer::new(local_config(Arc::clone(&chain))).unwrap();
    let mut alpha_events = alpha.take_events().unwrap();
    let mut beta_events = beta.take_events().unwrap();

    assert!(alpha.start().await.unwrap());
    assert!(beta.start().await.unwrap());

    let alpha_port = alpha.info().ports.listener;
    assert!(beta.connect(([127, 0, 0, 1], alpha_port).into()).await);

    let seen_by_alpha = wait_connected(&mut alpha_events).await;
    let seen_by_beta = wait_connected(&mut beta_events).await;

    assert_eq!(seen_by_alpha.id, beta.node_id_hex());
    assert_eq!(seen_by_beta.id, alpha.node_id_hex());
    assert!(seen_by_alpha.inbound);
    assert!(!seen_by_beta.inbound);
    assert!(!seen_by_alpha.protocols.is_empty());
    assert_eq!(alpha.registry().len(), 1);
    assert_eq!(beta.registry().len(), 1);

    // Tearing beta down propagates a disconnect to alpha and empties its
    // registry; connected always precedes disconnected for the same id.
    assert!(beta.stop().await);
    let mut disconnected = false;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(1), alpha_events.recv()).await {
            Ok(Some(ServerEvent::Disconnected { peer, .. })) => {
                assert_eq!(peer.id, seen_by_alpha.id);
                disconnected = true;
                break;
            }
            Ok(Some(_)) => {}
            _ => break,
        }
    }
    assert!(disconnected);
    assert_eq!(alpha.registry().len(), 0);

    assert!(alpha.stop().await);
}

#[tokio::test]
async fn lifecycle_calls_are_not_reentrant() {
    let server = P2PServer::new(local_config(Arc::new(ChainSpec::mainnet()))).unwrap();

    assert!(!server.stop().await);
    assert!(server.start().await.unwrap());
    assert!(!server.start().await.unwrap());
    assert!(server.stop().await);
    assert!(!server.stop().await);

    // A stopped server can start again.
    assert!(server.start().await.unwrap());
    assert!(server.stop().await);
}

#[tokio::test]
async fn mismatched_networks_never_register_peers() {
    let alpha = P2PServer::new(local_config(Arc::new(ChainSpec::mainnet()))).unwrap();
    let beta = P2PServer::new(local_config(Arc::new(ChainSpec::poanet()))).unwrap();
    let _alpha_events = alpha.take_events().unwrap();
    let _beta_events = beta.take_events().unwrap();

    alpha.start().await.unwrap();
    beta.start().await.unwrap();

    let alpha_port = alpha.info().ports.listener;
    beta.connect(([127, 0, 0, 1], alpha_port).into()).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(alpha.registry().len(), 0);
    assert_eq!(beta.registry().len(), 0);

    alpha.stop().await;
    beta.stop().await;
}

#[test]
fn transport_error_classification_matches_the_list() {
    // S5: an ECONNRESET-class message is dropped, an unexpected one is not.
    assert!(is_ignored_error("stream error: ECONNRESET"));
    assert!(!is_ignored_error("unexpected"));
}

#[tokio::test]
async fn ban_is_rejected_when_stopped() {
    let server = P2PServer::new(local_config(Arc::new(ChainSpec::mainnet()))).unwrap();
    assert!(!server.ban("00ff", None));

    server.start().await.unwrap();
    assert!(server.ban("00ff", Some(Duration::from_secs(5))));
    server.stop().await;
    assert!(!server.ban("00ff", None));
}
