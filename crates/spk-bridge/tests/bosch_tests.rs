//! Bosch Session Tests (spk-bridge)
//!
//! Drives the session actor with an in-memory connector on paused time:
//! - first connection poll, login once per connection
//! - keepalive schedule
//! - connection loss and reconnect
//! - refused connections are retried
//! - real TCP round trip and reconnect

use spk_bridge::bosch::{BoschConfig, BoschServer, BoschSession, SessionState, TcpConnector};
use spk_bridge::{SendOutcome, SpeakerServer};
use spk_core::bosch;
use spk_test_utils::{MockConnector, ReplyMode, TcpRecorder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

async fn wait_state(state: &mut watch::Receiver<SessionState>, target: SessionState) {
    timeout(Duration::from_secs(60), state.wait_for(|s| *s == target))
        .await
        .expect("state change timed out")
        .expect("session gone");
}

fn spawn(connector: &MockConnector) -> BoschSession {
    BoschSession::spawn(BoschConfig::default(), Arc::new(connector.clone())).unwrap()
}

// ============================================================================
// Connect / Login
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_poll_connects_and_logs_in() {
    let connector = MockConnector::new();
    let session = spawn(&connector);
    let mut state = session.subscribe();

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(connector.attempts(), 0, "no attempt before the first poll");
    assert_eq!(session.state(), SessionState::Disconnected);

    wait_state(&mut state, SessionState::Connected).await;
    assert_eq!(connector.attempts(), 1);

    let mut link = connector.take_link().unwrap();
    let login = link.sent.recv().await.unwrap();
    assert_eq!(login, bosch::login_frame("admin", "admin").unwrap());

    session.shutdown().await;
    assert!(!link.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_credentials_reach_login_frame() {
    let connector = MockConnector::new();
    let config = BoschConfig {
        user: "operator".to_string(),
        passwd: "s3cret".to_string(),
        ..Default::default()
    };
    let session = BoschSession::spawn(config, Arc::new(connector.clone())).unwrap();
    wait_state(&mut session.subscribe(), SessionState::Connected).await;

    let mut link = connector.take_link().unwrap();
    let login = link.sent.recv().await.unwrap();
    assert_eq!(login, bosch::login_frame("operator", "s3cret").unwrap());

    session.shutdown().await;
}

// ============================================================================
// Keepalive
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_keepalive_schedule() {
    let connector = MockConnector::new();
    let session = spawn(&connector);
    wait_state(&mut session.subscribe(), SessionState::Connected).await;

    let mut link = connector.take_link().unwrap();
    let _login = link.sent.recv().await.unwrap();

    // first keepalive at 6s, then every 5s
    let start = tokio::time::Instant::now();
    let first = link.sent.recv().await.unwrap();
    assert_eq!(first.as_ref(), bosch::KEEPALIVE);
    let second = link.sent.recv().await.unwrap();
    assert_eq!(second.as_ref(), bosch::KEEPALIVE);

    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_secs(5) && elapsed <= Duration::from_secs(7),
        "two keepalives took {:?}",
        elapsed
    );

    session.shutdown().await;
}

// ============================================================================
// Send
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_without_connection_fails_fast() {
    let connector = MockConnector::new();
    let session = spawn(&connector);

    let outcome = session.send(bosch::start_call_frame()).await;
    assert_eq!(outcome, SendOutcome::Failed("not connected".to_string()));
    assert_eq!(connector.attempts(), 0);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_start_call_and_stop() {
    let connector = MockConnector::new();
    let server = BoschServer::with_connector(BoschConfig::default(), Arc::new(connector.clone()));
    server.start().await.unwrap();
    // starting twice keeps the same session
    server.start().await.unwrap();

    let session = server.session().unwrap();
    wait_state(&mut session.subscribe(), SessionState::Connected).await;

    assert_eq!(server.send_start(3).await, SendOutcome::Unconfirmed);
    assert_eq!(server.send_stop(3).await, SendOutcome::Skipped);

    let mut link = connector.take_link().unwrap();
    let frames = link.drain();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].as_ref(), bosch::START_CALL);
    assert_eq!(connector.attempts(), 1);

    server.stop().await.unwrap();
    assert!(server.session().is_none());
    assert!(server.send_start(3).await.is_failed());
}

// ============================================================================
// Connection Loss / Reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connection_loss_then_reconnect() {
    let connector = MockConnector::new();
    let session = spawn(&connector);
    let mut state = session.subscribe();
    wait_state(&mut state, SessionState::Connected).await;

    let first = connector.take_link().unwrap();
    first.close();
    wait_state(&mut state, SessionState::Disconnected).await;

    let outcome = session.send(bosch::start_call_frame()).await;
    assert!(outcome.is_failed());

    wait_state(&mut state, SessionState::Connected).await;
    assert_eq!(connector.attempts(), 2);

    let mut second = connector.take_link().unwrap();
    let login = second.sent.recv().await.unwrap();
    assert_eq!(login, bosch::login_frame("admin", "admin").unwrap());

    assert_eq!(
        session.send(bosch::start_call_frame()).await,
        SendOutcome::Unconfirmed
    );
    assert_eq!(second.sent.recv().await.unwrap().as_ref(), bosch::START_CALL);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_connect_is_retried() {
    let connector = MockConnector::new();
    connector.refuse(true);
    let session = spawn(&connector);
    let mut state = session.subscribe();

    let attempted = spk_test_utils::wait_for(
        || async { connector.attempts() >= 1 },
        Duration::from_millis(10),
        Duration::from_secs(30),
    )
    .await;
    assert!(attempted);
    wait_state(&mut state, SessionState::Disconnected).await;
    assert_eq!(connector.attempts(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(session.state(), SessionState::Disconnected);

    connector.refuse(false);
    wait_state(&mut state, SessionState::Connected).await;
    assert_eq!(connector.attempts(), 3);

    session.shutdown().await;
}

// ============================================================================
// Real TCP
// ============================================================================

#[tokio::test]
async fn test_tcp_session_round_trip() {
    let server = TcpRecorder::start(ReplyMode::Fixed(bosch::keepalive_frame())).await;
    let config = BoschConfig {
        server_addr: server.addr().to_string(),
        reconnect_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let adapter = BoschServer::new(config);
    adapter.start().await.unwrap();

    let session = adapter.session().unwrap();
    wait_state(&mut session.subscribe(), SessionState::Connected).await;
    assert_eq!(adapter.send_start(1).await, SendOutcome::Unconfirmed);

    let mut expected = bosch::login_frame("admin", "admin").unwrap().to_vec();
    expected.extend_from_slice(bosch::START_CALL);
    let arrived = spk_test_utils::wait_for(
        || {
            let got = server.received_bytes();
            let want = expected.clone();
            async move { got == want }
        },
        Duration::from_millis(10),
        Duration::from_secs(5),
    )
    .await;
    assert!(arrived, "got {:02X?}", server.received_bytes());

    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn test_tcp_session_reconnects_after_server_drop() {
    let server = TcpRecorder::start(ReplyMode::Silent).await;
    let config = BoschConfig {
        server_addr: server.addr().to_string(),
        reconnect_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let session = BoschSession::spawn(config, Arc::new(TcpConnector::default())).unwrap();

    assert!(server.wait_for_connections(1, Duration::from_secs(5)).await);
    assert!(server.wait_for_count(1).await);
    server.drop_connections();

    assert!(server.wait_for_connections(2, Duration::from_secs(5)).await);
    wait_state(&mut session.subscribe(), SessionState::Connected).await;

    let login = bosch::login_frame("admin", "admin").unwrap().to_vec();
    let expected = [login.clone(), login].concat();
    let logged_in_twice = spk_test_utils::wait_for(
        || {
            let got = server.received_bytes();
            let want = expected.clone();
            async move { got == want }
        },
        Duration::from_millis(10),
        Duration::from_secs(5),
    )
    .await;
    assert!(logged_in_twice, "got {:02X?}", server.received_bytes());

    session.shutdown().await;
}
