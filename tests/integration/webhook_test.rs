//! Integration tests for the webhook and health endpoints.

use http::StatusCode;

use docrelay_core::types::ChannelId;

use crate::helpers::{FakeDrive, SOURCE, TARGET, TestRelay};

#[tokio::test]
async fn test_health_reports_active_channels() {
    let relay = TestRelay::new(FakeDrive::default(), 2);

    let before = relay.request("GET", "/health", &[]).await;
    assert_eq!(before.status, StatusCode::OK);
    assert_eq!(before.json()["status"], "ok");
    assert_eq!(before.json()["active_channels"], 0);

    relay.monitor.start().await.unwrap();

    let after = relay.request("GET", "/health", &[]).await.json();
    assert_eq!(after["active_channels"], 1);
    assert_eq!(after["version"], env!("CARGO_PKG_VERSION"));
    assert!(after["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_webhook_always_acknowledges() {
    let relay = TestRelay::new(FakeDrive::default(), 2);

    let bare = relay.request("POST", "/webhook", &[]).await;
    assert_eq!(bare.status, StatusCode::OK);
    assert_eq!(bare.body, "OK");

    let unknown = relay.notify(&ChannelId::new(), "update").await;
    assert_eq!(unknown.status, StatusCode::OK);

    let malformed = relay
        .request(
            "POST",
            "/webhook",
            &[
                ("X-Goog-Channel-Id", "channel-1".to_string()),
                ("X-Goog-Resource-State", "update".to_string()),
            ],
        )
        .await;
    assert_eq!(malformed.status, StatusCode::OK);

    assert!(relay.dispatcher.is_idle());
    assert_eq!(relay.dispatcher.stats().collect.completed, 0);
}

#[tokio::test]
async fn test_sync_notification_ignored() {
    let relay = TestRelay::new(FakeDrive::default(), 2);
    let channel_id = relay.monitor.start().await.unwrap();
    relay.drive.upload(SOURCE, "early");

    let response = relay.notify(&channel_id, "sync").await;

    assert_eq!(response.status, StatusCode::OK);
    relay.dispatcher.wait_idle().await;
    assert!(relay.sink.filenames().is_empty());
}

#[tokio::test]
async fn test_notification_relays_new_file() {
    let relay = TestRelay::new(FakeDrive::default(), 2);
    let channel_id = relay.monitor.start().await.unwrap();
    // Startup scan primes the change token.
    relay.dispatcher.scan_all();
    relay.dispatcher.wait_idle().await;

    relay.drive.upload(SOURCE, "invoice");
    let response = relay.notify(&channel_id, "add").await;
    assert_eq!(response.status, StatusCode::OK);
    relay.dispatcher.wait_idle().await;

    assert_eq!(relay.sink.filenames(), vec!["invoice.pdf"]);
    assert_eq!(relay.drive.file_ids(TARGET), vec!["invoice"]);
    assert!(relay.drive.file_ids(SOURCE).is_empty());
}

#[tokio::test]
async fn test_renewed_channel_replaces_old_one() {
    let relay = TestRelay::new(FakeDrive::default(), 2);
    let original = relay.monitor.start().await.unwrap();
    relay.dispatcher.scan_all();
    relay.dispatcher.wait_idle().await;

    let renewed = relay.monitor.renew().await.unwrap();
    assert_ne!(renewed, original);
    assert_eq!(*relay.drive.stopped.lock().unwrap(), vec![original]);

    relay.drive.upload(SOURCE, "late");
    relay.notify(&original, "update").await;
    relay.dispatcher.wait_idle().await;
    assert!(relay.sink.filenames().is_empty());

    relay.notify(&renewed, "update").await;
    relay.dispatcher.wait_idle().await;
    assert_eq!(relay.sink.filenames(), vec!["late.pdf"]);
}
