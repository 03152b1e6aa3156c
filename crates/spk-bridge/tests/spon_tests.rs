//! Spon Adapter Tests (spk-bridge)
//!
//! Runs the Spon client and server adapter against a recording UDP server:
//! - exact datagrams for each command form
//! - reply / no-reply classification
//! - source terminal fallback

use bytes::Bytes;
use spk_bridge::spon::{SponClient, SponConfig, SponServer};
use spk_bridge::{SendOutcome, SpeakerServer};
use spk_core::spon::{Switch, TerminalAction};
use spk_core::ActionStatus;
use spk_test_utils::UdpRecorder;
use std::time::Duration;

fn config_for(server: &UdpRecorder) -> SponConfig {
    SponConfig {
        server_addr: server.addr().to_string(),
        bind_addr: Some("127.0.0.1:0".to_string()),
        ..Default::default()
    }
}

// ============================================================================
// Client Tests
// ============================================================================

#[tokio::test]
async fn test_alarm_task_replied() {
    let server = UdpRecorder::replying(&[0xFF, 0xFF, 0xCA, 0x01]).await;
    let client = SponClient::bind(&config_for(&server)).await.unwrap();

    let outcome = client.alarm_task(Switch::Start, 3, Some(3)).await;
    assert_eq!(
        outcome,
        SendOutcome::Replied(Bytes::from_static(&[0xFF, 0xFF, 0xCA, 0x01]))
    );

    assert!(server.wait_for_count(1).await);
    assert_eq!(
        server.received()[0].as_ref(),
        &[0xFF, 0xFF, 0xCA, 0x01, 0x03, 0x00, 0x00, 0x00]
    );
}

#[tokio::test]
async fn test_silent_server_is_unconfirmed() {
    let server = UdpRecorder::silent().await;
    let client = SponClient::bind(&config_for(&server)).await.unwrap();

    let outcome = client.alarm_task(Switch::Stop, 3, None).await;
    assert_eq!(outcome, SendOutcome::Unconfirmed);

    assert!(server.wait_for_count(1).await);
    assert_eq!(
        server.received()[0].as_ref(),
        &[0xFF, 0xFF, 0xCA, 0x00, 0x03, 0x00, 0x00, 0x00]
    );
}

#[tokio::test]
async fn test_terminal_control_source_fallback() {
    let server = UdpRecorder::silent().await;
    let client = SponClient::bind(&SponConfig {
        local_term: 9,
        ..config_for(&server)
    })
    .await
    .unwrap();

    client.terminal_control(TerminalAction::Call, 4, 0).await;
    client.terminal_control(TerminalAction::Hangup, 4, 3).await;

    assert!(server.wait_for_count(2).await);
    let received = server.received();
    assert_eq!(
        received[0].as_ref(),
        &[0xFF, 0xFF, 0xC1, 0x00, 0x09, 0x00, 0x04, 0x00]
    );
    assert_eq!(
        received[1].as_ref(),
        &[0xFF, 0xFF, 0xC1, 0x02, 0x03, 0x00, 0x04, 0x00]
    );
}

#[tokio::test]
async fn test_broadcast_forms_on_the_wire() {
    let server = UdpRecorder::silent().await;
    let client = SponClient::bind(&config_for(&server)).await.unwrap();

    client.broadcast_control(Switch::Start, [3, 4, 5], 0).await;
    client.broadcast_extend(Switch::Stop, [1000], 2).await;
    client.broadcast_single(Switch::Start, 4, 3).await;

    assert!(server.wait_for_count(3).await);
    let received = server.received();

    assert_eq!(received[0].len(), 8 + 16);
    assert_eq!(&received[0][..8], &[0xFF, 0xFF, 0xC3, 0x01, 0x01, 0x00, 0x00, 0x00]);
    assert_eq!(received[0][8], 0b0001_1100);

    assert_eq!(received[1].len(), 8 + 125);
    assert_eq!(&received[1][..8], &[0xFF, 0xFF, 0xC3, 0x02, 0x02, 0x00, 0x00, 0x00]);
    assert_eq!(received[1][8 + 124], 0b1000_0000);

    assert_eq!(
        received[2].as_ref(),
        &[0xFF, 0xFF, 0xC3, 0x05, 0x04, 0x00, 0x03, 0x00]
    );
}

#[tokio::test]
async fn test_send_raw() {
    let server = UdpRecorder::replying(b"ok").await;
    let client = SponClient::bind(&config_for(&server)).await.unwrap();

    let outcome = client.send_raw(Bytes::from_static(&[0xFF, 0xFF, 0x00])).await;
    assert_eq!(outcome, SendOutcome::Replied(Bytes::from_static(b"ok")));
    assert_eq!(server.received()[0].as_ref(), &[0xFF, 0xFF, 0x00]);
}

// ============================================================================
// Server Adapter Tests
// ============================================================================

#[tokio::test]
async fn test_server_drives_zones_as_alarm_tasks() {
    let recorder = UdpRecorder::silent().await;
    let server = SponServer::bind(SponConfig {
        release_time: Duration::from_secs(5),
        ..config_for(&recorder)
    })
    .await
    .unwrap();

    server.start().await.unwrap();
    assert_eq!(server.name(), "spon");
    assert_eq!(server.register_timeout(ActionStatus::Auto), Duration::from_secs(6));

    assert_eq!(server.send_start(7).await, SendOutcome::Unconfirmed);
    assert_eq!(server.send_stop(7).await, SendOutcome::Unconfirmed);

    assert!(recorder.wait_for_count(2).await);
    let received = recorder.received();
    assert_eq!(received[0].as_ref(), &[0xFF, 0xFF, 0xCA, 0x01, 0x07, 0x00, 0x00, 0x00]);
    assert_eq!(received[1].as_ref(), &[0xFF, 0xFF, 0xCA, 0x00, 0x07, 0x00, 0x00, 0x00]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_default_bind_follows_server_family() {
    let v4 = UdpRecorder::silent().await;
    let server = SponServer::bind(SponConfig {
        server_addr: v4.addr().to_string(),
        ..Default::default()
    })
    .await
    .unwrap();
    assert!(server.client().local_addr().unwrap().is_ipv4());
    assert_eq!(server.send_start(2).await, SendOutcome::Unconfirmed);
    assert!(v4.wait_for_count(1).await);

    // hosts without IPv6 loopback cannot run the rest
    if std::net::UdpSocket::bind("[::1]:0").is_err() {
        return;
    }
    let v6 = UdpRecorder::silent_at("[::1]:0").await;
    let server = SponServer::bind(SponConfig {
        server_addr: v6.addr().to_string(),
        ..Default::default()
    })
    .await
    .unwrap();
    assert!(server.client().local_addr().unwrap().is_ipv6());
    assert_eq!(server.send_start(2).await, SendOutcome::Unconfirmed);

    assert!(v6.wait_for_count(1).await);
    assert_eq!(
        v6.received()[0].as_ref(),
        &[0xFF, 0xFF, 0xCA, 0x01, 0x02, 0x00, 0x00, 0x00]
    );
}

#[tokio::test]
async fn test_unresolvable_server_is_config_error() {
    let result = SponServer::bind(SponConfig {
        server_addr: "no-such-host.invalid:2048".to_string(),
        ..Default::default()
    })
    .await;
    assert!(result.is_err());
}
