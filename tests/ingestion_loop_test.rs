//! Integration tests for the ingestion loop against mock serial hardware.

mod common;

use bridgebrain::ingest::ConnectionState;
use bridgebrain::locator::PortInfo;
use common::{mock_loop, wait_until, MockConnector, MockPorts, TICK};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_frames_reach_history_and_log() {
    let dir = tempdir().expect("tempdir");
    let log = dir.path().join("bridge_data.csv");
    let connector = MockConnector::default();
    let mut board = connector.queue_device();

    let handle = mock_loop(MockPorts::with_board(), connector.clone(), &log, 100).spawn();
    let query = handle.query();

    board
        .write_all(b"{\"ts_ms\":1000,\"event\":\"vehicle\",\"vehicleWeight\":1500.5,\"vehicleCount\":1}\n")
        .await
        .expect("write frame");
    board
        .write_all(b"{\"event\":\"idle\",\"vibration\":0.25}\r\n")
        .await
        .expect("write frame");

    wait_until("two records", || query.snapshot().len() == 2).await;
    wait_until("two persisted rows", || handle.stats().persisted == 2).await;

    let records = query.snapshot();
    assert_eq!(records[0].event, "vehicle");
    assert_eq!(records[0].vehicle_weight, 1500.5);
    assert_eq!(records[1].event, "idle");
    assert_eq!(records[1].vibration, 0.25);
    assert_eq!(records[1].device_timestamp_ms, None);

    let text = fs::read_to_string(&log).expect("read log");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "Time,event,vehicleWeight,vibration,tilt,vehicleCount,totalLoad,ts_ms"
    );
    assert!(lines[1].ends_with(",vehicle,1500.5,0,0,1,0,1000"));
    assert!(lines[2].ends_with(",idle,0,0.25,0,0,0,"));

    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(query.log_file_path(), Some(log.clone()));
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_bad_frames_are_skipped_without_disconnecting() {
    let dir = tempdir().expect("tempdir");
    let connector = MockConnector::default();
    let mut board = connector.queue_device();

    let log = dir.path().join("bridge_data.csv");
    let handle = mock_loop(MockPorts::with_board(), connector.clone(), &log, 100).spawn();

    board
        .write_all(b"not json\n\n   \n[1,2,3]\n{\"tilt\":\"steep\"}\n{\"tilt\":2.5}\n")
        .await
        .expect("write frames");

    wait_until("the valid frame", || handle.query().snapshot().len() == 1).await;
    wait_until("the valid frame persisted", || handle.stats().persisted == 1).await;

    let stats = handle.stats();
    // Blank lines are not frames.
    assert_eq!(stats.frames, 4);
    assert_eq!(stats.decode_failures, 3);
    assert_eq!(stats.records, 1);
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.sink_failures, 0);

    let text = fs::read_to_string(&log).expect("read log");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with(",,0,0,2.5,0,0,"));
    assert_eq!(stats.connections, 1);
    assert_eq!(handle.query().latest().map(|r| r.tilt), Some(2.5));
    assert_eq!(handle.state(), ConnectionState::Connected);
    assert_eq!(connector.open_attempts(), 1);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_reconnects_after_device_disappears() {
    let dir = tempdir().expect("tempdir");
    let connector = MockConnector::default();
    let mut first = connector.queue_device();
    let mut second = connector.queue_device();

    let handle = mock_loop(
        MockPorts::with_board(),
        connector.clone(),
        &dir.path().join("bridge_data.csv"),
        100,
    )
    .spawn();
    let query = handle.query();

    first
        .write_all(b"{\"event\":\"before\"}\n")
        .await
        .expect("write frame");
    wait_until("first record", || query.snapshot().len() == 1).await;

    // Unplug: the device side sees end of stream.
    drop(first);

    second
        .write_all(b"{\"event\":\"after\"}\n")
        .await
        .expect("write frame");
    wait_until("record after reconnect", || query.snapshot().len() == 2).await;

    let events: Vec<String> = query.snapshot().into_iter().map(|r| r.event).collect();
    assert_eq!(events, vec!["before", "after"]);
    assert_eq!(handle.stats().connections, 2);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_waits_for_device_to_be_plugged_in() {
    let dir = tempdir().expect("tempdir");
    let ports = MockPorts::default();
    ports.plug(PortInfo::new("/dev/ttyS0", "Intel UART"));
    let connector = MockConnector::default();
    let mut board = connector.queue_device();

    let handle = mock_loop(
        ports.clone(),
        connector.clone(),
        &dir.path().join("bridge_data.csv"),
        100,
    )
    .spawn();

    tokio::time::sleep(TICK * 5).await;
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert_eq!(connector.open_attempts(), 0);
    assert!(handle.query().snapshot().is_empty());

    ports.plug(PortInfo::new("/dev/ttyUSB0", "USB2.0-Serial CH340"));
    let mut state = handle.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("connect in time")
    .expect("loop alive");

    board.write_all(b"{}\n").await.expect("write frame");
    wait_until("default record", || handle.query().snapshot().len() == 1).await;

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_open_failure_is_retried() {
    let dir = tempdir().expect("tempdir");
    let connector = MockConnector::default();

    let handle = mock_loop(
        MockPorts::with_board(),
        connector.clone(),
        &dir.path().join("bridge_data.csv"),
        100,
    )
    .spawn();

    wait_until("repeated open attempts", || connector.open_attempts() >= 2).await;
    assert_eq!(handle.stats().connections, 0);
    assert_ne!(handle.state(), ConnectionState::Connected);

    let mut board = connector.queue_device();
    board
        .write_all(b"{\"event\":\"late\"}\n")
        .await
        .expect("write frame");
    wait_until("record after open succeeds", || {
        handle.query().snapshot().len() == 1
    })
    .await;
    assert_eq!(handle.stats().connections, 1);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_history_keeps_records_the_log_cannot_store() {
    let dir = tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, "x").expect("write blocker");
    let connector = MockConnector::default();
    let mut board = connector.queue_device();

    let handle = mock_loop(
        MockPorts::with_board(),
        connector.clone(),
        &blocker.join("bridge_data.csv"),
        100,
    )
    .spawn();

    board
        .write_all(b"{\"event\":\"a\"}\n{\"event\":\"b\"}\n")
        .await
        .expect("write frames");
    wait_until("both sink failures", || handle.stats().sink_failures == 2).await;

    assert_eq!(handle.query().snapshot().len(), 2);
    assert_eq!(handle.stats().persisted, 0);
    assert_eq!(handle.query().log_file_path(), None);
    assert_eq!(handle.state(), ConnectionState::Connected);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_history_is_bounded() {
    let dir = tempdir().expect("tempdir");
    let connector = MockConnector::default();
    let mut board = connector.queue_device();

    let handle = mock_loop(
        MockPorts::with_board(),
        connector.clone(),
        &dir.path().join("bridge_data.csv"),
        3,
    )
    .spawn();

    for n in 0..5 {
        board
            .write_all(format!("{{\"vehicleCount\":{n}}}\n").as_bytes())
            .await
            .expect("write frame");
    }
    wait_until("all frames persisted", || handle.stats().persisted == 5).await;

    let counts: Vec<f64> = handle
        .query()
        .snapshot()
        .into_iter()
        .map(|r| r.vehicle_count)
        .collect();
    assert_eq!(counts, vec![2.0, 3.0, 4.0]);

    let rows = fs::read_to_string(dir.path().join("bridge_data.csv"))
        .expect("read log")
        .lines()
        .count();
    assert_eq!(rows, 6);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_shutdown_stops_a_connected_loop() {
    let dir = tempdir().expect("tempdir");
    let connector = MockConnector::default();
    let _board = connector.queue_device();

    let handle = mock_loop(
        MockPorts::with_board(),
        connector.clone(),
        &dir.path().join("bridge_data.csv"),
        100,
    )
    .spawn();
    let state = handle.subscribe_state();

    wait_until("connection", || handle.state() == ConnectionState::Connected).await;

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown in time")
        .expect("clean shutdown");
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_shutdown_while_searching() {
    let dir = tempdir().expect("tempdir");
    let handle = mock_loop(
        MockPorts::default(),
        MockConnector::default(),
        &dir.path().join("bridge_data.csv"),
        100,
    )
    .spawn();

    tokio::time::sleep(TICK * 2).await;
    assert!(!handle.is_finished());
    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown in time")
        .expect("clean shutdown");
}
