//! Connection supervisor tests

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use common::{assert_near, handshake};
use wallet_transport::channel::{ChannelConfig, ChannelState, MemoryConnector, MemoryServer, WireMessage};
use wallet_transport::{
    ConnectionSupervisor, CredentialPair, CredentialStore, SessionCallbacks, TransportError,
};

fn supervisor() -> (ConnectionSupervisor, MemoryServer) {
    let (connector, server) = MemoryConnector::pair();
    let credentials = Arc::new(CredentialStore::with_pair(CredentialPair::new("token-1", None)));
    (ConnectionSupervisor::new(Arc::new(connector), credentials), server)
}

fn config() -> ChannelConfig {
    ChannelConfig::new("mem://push")
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_socket() {
    let (supervisor, mut server) = supervisor();
    let acceptor = tokio::spawn(async move {
        let peer = handshake(&mut server).await;
        (server, peer)
    });

    let (a, b) = tokio::join!(
        supervisor.connect(config(), SessionCallbacks::default()),
        supervisor.connect(config(), SessionCallbacks::default()),
    );
    a.unwrap();
    b.unwrap();

    let (server, _peer) = acceptor.await.unwrap();
    assert_eq!(server.attempts(), 1);
    assert!(supervisor.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_open_is_noop() {
    let (supervisor, mut server) = supervisor();
    let acceptor = tokio::spawn(async move {
        let peer = handshake(&mut server).await;
        (server, peer)
    });
    supervisor.connect(config(), SessionCallbacks::default()).await.unwrap();
    let (server, _peer) = acceptor.await.unwrap();
    let first = supervisor.channel().await.unwrap();

    supervisor.connect(config(), SessionCallbacks::default()).await.unwrap();

    assert_eq!(server.attempts(), 1);
    assert!(Arc::ptr_eq(&first, &supervisor.channel().await.unwrap()));
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_connect_times_out() {
    let (supervisor, server) = supervisor();
    let supervisor = supervisor.with_connect_timeout(Duration::from_secs(2));
    let started = Instant::now();

    // The server side never acknowledges the auth frame
    let err = supervisor
        .connect(config(), SessionCallbacks::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Timeout(_)), "got {:?}", err);
    assert_near(Instant::now() - started, Duration::from_secs(2));
    assert_eq!(server.attempts(), 1);
    assert!(!supervisor.is_connected().await);
    assert!(supervisor.channel().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_auth_fails_connect() {
    let (supervisor, mut server) = supervisor();
    let acceptor = tokio::spawn(async move {
        let mut peer = server.accept().await.unwrap();
        peer.recv_json().await.unwrap();
        peer.send_json(json!({"type": "auth_error", "data": {"message": "revoked"}}));
        (server, peer)
    });

    let err = supervisor
        .connect(config(), SessionCallbacks::default())
        .await
        .unwrap_err();
    let (server, _peer) = acceptor.await.unwrap();

    assert!(err.is_auth());
    assert_eq!(server.attempts(), 1);
    assert!(supervisor.channel().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_allows_fresh_connect() {
    let (supervisor, mut server) = supervisor();
    let supervisor = supervisor.with_connect_timeout(Duration::from_secs(2));
    server.set_refusing(true);
    assert!(supervisor.connect(config(), SessionCallbacks::default()).await.is_err());

    server.set_refusing(false);
    let acceptor = tokio::spawn(async move {
        let peer = handshake(&mut server).await;
        (server, peer)
    });
    supervisor.connect(config(), SessionCallbacks::default()).await.unwrap();
    let (_server, _peer) = acceptor.await.unwrap();
    assert!(supervisor.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_stale_channel_replaced() {
    let (supervisor, mut server) = supervisor();
    let acceptor = tokio::spawn(async move {
        let peer = handshake(&mut server).await;
        (server, peer)
    });
    supervisor.connect(config(), SessionCallbacks::default()).await.unwrap();
    let (mut server, peer) = acceptor.await.unwrap();
    let stale = supervisor.channel().await.unwrap();

    peer.close(1001, "going away");
    stale
        .subscribe_state()
        .wait_for(|s| *s == ChannelState::Reconnecting)
        .await
        .unwrap();

    let acceptor = tokio::spawn(async move {
        let peer = handshake(&mut server).await;
        (server, peer)
    });
    supervisor.connect(config(), SessionCallbacks::default()).await.unwrap();
    let (server, _peer) = acceptor.await.unwrap();

    let current = supervisor.channel().await.unwrap();
    assert!(!Arc::ptr_eq(&stale, &current));
    assert_eq!(stale.state(), ChannelState::Closed);
    assert_eq!(current.state(), ChannelState::Open);
    assert_eq!(server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_channel() {
    let (supervisor, mut server) = supervisor();
    let acceptor = tokio::spawn(async move {
        let peer = handshake(&mut server).await;
        (server, peer)
    });
    supervisor.connect(config(), SessionCallbacks::default()).await.unwrap();
    let (_server, mut peer) = acceptor.await.unwrap();

    supervisor.send(r#"{"hello":true}"#).await.unwrap();
    assert_eq!(peer.recv_json().await, Some(json!({"hello": true})));

    supervisor.disconnect().await;
    assert!(matches!(peer.recv().await, Some(WireMessage::Close { code: Some(1000), .. })));
    assert!(!supervisor.is_connected().await);
    assert!(matches!(
        supervisor.send("late").await,
        Err(TransportError::ChannelClosed)
    ));
}
