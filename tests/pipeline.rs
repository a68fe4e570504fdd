//! End-to-end pipeline tests against in-process TCP classifier peers.

use flowscope::{
    engine, EngineConfig, EngineError, EngineState, FlowExpired, FlowStats, FlowTuple,
    PacketObserved,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Fake classifier peer: accepts one connection and forwards every
/// received line.
async fn spawn_peer() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    (port, rx)
}

/// Next non-header, non-blank line.
async fn next_data_row(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    loop {
        let line = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a row")
            .expect("peer connection closed");
        if !line.is_empty() && !line.starts_with('@') {
            return line;
        }
    }
}

fn config(k: usize, training_port: u16, testing_port: u16) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.sample_width = k;
    cfg.bandwidth_threshold_mbps = 90.0;
    cfg.duration_threshold_secs = 5.0;
    cfg.idle_timeout_secs = 0.0;
    cfg.classifier.host = "127.0.0.1".into();
    cfg.classifier.training_port = training_port;
    cfg.classifier.testing_port = testing_port;
    cfg
}

fn tuple(src: &str, src_port: u16) -> FlowTuple {
    FlowTuple::new(src.parse().unwrap(), src_port, "10.0.0.2".parse().unwrap(), 80)
}

async fn feed_packets(
    handle: &engine::EngineHandle,
    tuple: FlowTuple,
    samples: &[(u32, i64)],
) {
    for &(size_bytes, at_micros) in samples {
        handle
            .observe_packet(PacketObserved {
                tuple,
                size_bytes,
                at_micros,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_end_to_end_suppression_then_gated_send() {
    let (training_port, mut training_rx) = spawn_peer().await;
    let (testing_port, mut testing_rx) = spawn_peer().await;

    let handle = engine::start(config(3, training_port, testing_port))
        .await
        .unwrap();
    assert_eq!(handle.state(), EngineState::Running);

    // both channels were primed with the dummy handshake row
    let dummy = next_data_row(&mut training_rx).await;
    assert_eq!(dummy, "0,0,0,-1,-1,-1,0,0,X");
    assert_eq!(next_data_row(&mut testing_rx).await, dummy);

    // three packets complete flow A's sample window, but no training
    // example has ever been sent, so the testing row is suppressed
    let flow_a = tuple("10.0.0.1", 1000);
    feed_packets(&handle, flow_a, &[(64, 100), (128, 250), (64, 300)]).await;

    // flow A's rule expires: 125 MB over 10 s = 100 Mbit/s -> elephant
    handle
        .flow_expired(FlowExpired {
            tuple: flow_a,
            stats: FlowStats {
                start_time_ms: 1_000,
                end_time_ms: 11_000,
                bytes: 125_000_000,
                packets: 90_000,
                ip_protocol: 6,
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let training_row = next_data_row(&mut training_rx).await;
    assert_eq!(training_row, "1000,80,6,64,128,64,150,50,E");

    // the gate is open now; flow B's completed window must be streamed
    let flow_b = tuple("10.0.0.3", 2000);
    feed_packets(&handle, flow_b, &[(64, 1_000), (128, 1_150), (64, 1_200)]).await;

    // flow A's row was suppressed before the gate opened, so the first
    // testing row after the dummy belongs to flow B
    let testing_row = next_data_row(&mut testing_rx).await;
    assert_eq!(testing_row, "2000,80,0,64,128,64,150,50,X");

    let stats = handle.stats();
    assert_eq!(stats.testing_suppressed, 1);
    assert_eq!(stats.training_rows, 1);
    assert_eq!(stats.testing_rows, 1);
    assert_eq!(stats.table_anomalies, 0);

    handle.stop().await;
    assert_eq!(handle.state(), EngineState::Stopped);
    // idempotent
    handle.stop().await;

    // events after stop are rejected
    let err = handle
        .observe_packet(PacketObserved {
            tuple: flow_a,
            size_bytes: 64,
            at_micros: 0,
        })
        .await;
    assert!(matches!(err, Err(EngineError::Stopped)));
}

#[tokio::test]
async fn test_snapshot_exposes_live_flows() {
    let (training_port, _training_rx) = spawn_peer().await;
    let (testing_port, _testing_rx) = spawn_peer().await;

    let handle = engine::start(config(3, training_port, testing_port))
        .await
        .unwrap();

    feed_packets(&handle, tuple("10.0.0.1", 1000), &[(64, 100)]).await;
    feed_packets(&handle, tuple("10.0.0.4", 4000), &[(96, 200)]).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 2);
    let rec = snapshot
        .iter()
        .find(|r| r.tuple.src_port == 1000)
        .unwrap();
    assert_eq!(rec.packet_size[0], 64);
    assert_eq!(rec.packet_size[1], -1);

    handle.stop().await;
}

#[tokio::test]
async fn test_snapshot_reflects_every_acknowledged_event() {
    let (training_port, _training_rx) = spawn_peer().await;
    let (testing_port, _testing_rx) = spawn_peer().await;

    let handle = engine::start(config(3, training_port, testing_port))
        .await
        .unwrap();

    // a snapshot requested after an injection returns must include that
    // flow: control requests ride the same queue as events
    for i in 0..100u16 {
        feed_packets(&handle, tuple("10.0.0.1", 10_000 + i), &[(64, i as i64)]).await;
    }
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 100);

    handle.stop().await;
}

#[tokio::test]
async fn test_completion_for_unsampled_flow_is_kept() {
    let (training_port, mut training_rx) = spawn_peer().await;
    let (testing_port, _testing_rx) = spawn_peer().await;

    let handle = engine::start(config(3, training_port, testing_port))
        .await
        .unwrap();
    // consume the dummy handshake row
    next_data_row(&mut training_rx).await;

    // completion event with no sampled record: anomaly, but the record
    // is inserted and no training row goes out
    handle
        .flow_expired(FlowExpired {
            tuple: tuple("10.0.0.9", 9000),
            stats: FlowStats {
                bytes: 4_242,
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].bytes, 4_242);
    assert_eq!(handle.stats().table_anomalies, 1);
    assert_eq!(handle.stats().training_rows, 0);

    handle.stop().await;
}

#[tokio::test]
async fn test_start_tears_down_when_testing_channel_unreachable() {
    let (training_port, mut training_rx) = spawn_peer().await;
    // pick a port nothing listens on
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let testing_port = closed.local_addr().unwrap().port();
    drop(closed);

    let err = engine::start(config(3, training_port, testing_port)).await;
    assert!(matches!(err, Err(EngineError::Stream(_))));

    // the already-connected training channel must have been torn down:
    // the peer sees the handshake, then the connection closes
    loop {
        match tokio::time::timeout(Duration::from_secs(5), training_rx.recv())
            .await
            .expect("timed out waiting for teardown")
        {
            Some(_) => continue,
            None => break,
        }
    }
}
