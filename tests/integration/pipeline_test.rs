//! Integration tests for startup scans, transfers and scheduled renewal.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::watch;

use crate::helpers::{FakeDrive, SOURCE, TARGET, TestRelay};

#[tokio::test(start_paused = true)]
async fn test_startup_files_relayed_within_concurrency() {
    let drive = FakeDrive::with_delay(Duration::from_millis(200));
    for id in ["a", "b", "c"] {
        drive.upload(SOURCE, id);
    }
    let relay = TestRelay::new(drive, 2);

    relay.dispatcher.scan_all();
    relay.dispatcher.wait_idle().await;

    assert_eq!(relay.sink.filenames(), vec!["a.pdf", "b.pdf", "c.pdf"]);
    assert_eq!(relay.drive.file_ids(TARGET), vec!["a", "b", "c"]);
    assert!(relay.drive.file_ids(SOURCE).is_empty());
    assert_eq!(relay.drive.peak_in_flight.load(Ordering::SeqCst), 2);

    let stats = relay.dispatcher.stats();
    assert_eq!(stats.transfers.completed, 3);
    assert_eq!(stats.transfers.failed, 0);
}

#[tokio::test]
async fn test_transient_upload_failure_retried_once_moved_once() {
    let drive = FakeDrive::default();
    drive.upload(SOURCE, "receipt");
    let relay = TestRelay::new(drive, 1);
    relay.sink.failures_left.store(2, Ordering::SeqCst);

    relay.dispatcher.scan_all();
    relay.dispatcher.wait_idle().await;

    assert_eq!(relay.sink.filenames(), vec!["receipt.pdf"]);
    assert_eq!(*relay.drive.moves.lock().unwrap(), vec!["receipt"]);
    assert_eq!(relay.dispatcher.stats().transfers.retried, 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_renewal_runs_once_before_expiry() {
    let relay = TestRelay::new(FakeDrive::default(), 2);
    let (tx, rx) = watch::channel(false);
    let runner = tokio::spawn({
        let scheduler = relay.scheduler.clone();
        async move { scheduler.run(rx).await }
    });

    let original = relay.monitor.start().await.unwrap();

    // Expires after 300s, renewed 120s before.
    tokio::time::sleep(Duration::from_secs(170)).await;
    assert_eq!(relay.monitor.current_channel_id(), Some(original));

    tokio::time::sleep(Duration::from_secs(15)).await;
    let renewed = relay.monitor.current_channel_id().unwrap();
    assert_ne!(renewed, original);
    assert_eq!(relay.drive.watched.lock().unwrap().len(), 2);
    assert_eq!(*relay.drive.stopped.lock().unwrap(), vec![original]);
    assert_eq!(relay.registry.lookup_owner(&renewed), Some(relay.account));
    assert_eq!(relay.registry.lookup_owner(&original), None);

    relay.monitor.stop(None).await;
    assert_eq!(relay.registry.channel_count(), 0);
    assert_eq!(relay.scheduler.scheduled_count(), 0);

    tx.send(true).unwrap();
    runner.await.unwrap().unwrap();
}
