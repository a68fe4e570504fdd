//! Engine orchestration: event ingestion, labeling, channel sends.
//!
//! A single table-owning task consumes both event paths from one bounded
//! queue, so the two concurrently-invoked controller callbacks never race
//! on flow state. Encoding is pure and happens inside that task; the
//! blocking network sends happen in per-channel sender tasks fed by
//! bounded send queues, so a stalled classifier cannot stall ingestion.

use crate::arff::ArffStreamClient;
use crate::config::{EngineConfig, OverflowPolicy};
use crate::event::{now_micros, FlowExpired, FlowTuple, PacketObserved};
use crate::features::{classify, encode, flow_attributes, Thresholds, UNLABELED};
use crate::record::FlowRecord;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::table::{FlowTable, MergeDecision, PacketDecision};
use crate::EngineError;

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting events
    Running,
    /// Stopped (or never fully started)
    Stopped,
}

/// Events consumed by the engine task.
#[derive(Debug, Clone, Copy)]
pub enum EngineEvent {
    /// Early-sampling path
    Packet(PacketObserved),
    /// Completion path
    Expired(FlowExpired),
}

/// Everything the engine task consumes travels on one channel so that
/// control messages keep FIFO order with events: a snapshot requested
/// after an event injection has returned always observes that event.
enum EngineMessage {
    Event(EngineEvent),
    Snapshot(oneshot::Sender<Vec<FlowRecord>>),
    Shutdown,
}

/// Outcome of pushing a row onto a send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Queued,
    DroppedOldest,
    Rejected,
}

/// Bounded row queue between the engine task and one sender task.
///
/// tokio's mpsc cannot shed from the front, and drop-oldest is the
/// default overflow policy here, so this is a small deque under a mutex
/// with a notify for the single consumer.
struct SendQueue {
    inner: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

struct QueueState {
    rows: VecDeque<Vec<String>>,
    closed: bool,
}

impl SendQueue {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(QueueState {
                rows: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    fn push(&self, row: Vec<String>) -> PushOutcome {
        let mut state = self.inner.lock();
        if state.closed {
            return PushOutcome::Rejected;
        }
        let outcome = if state.rows.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    state.rows.pop_front();
                    state.rows.push_back(row);
                    PushOutcome::DroppedOldest
                }
                OverflowPolicy::Reject => PushOutcome::Rejected,
            }
        } else {
            state.rows.push_back(row);
            PushOutcome::Queued
        };
        drop(state);
        self.notify.notify_one();
        outcome
    }

    async fn pop(&self) -> Option<Vec<String>> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.inner.lock();
                if let Some(row) = state.rows.pop_front() {
                    return Some(row);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// Handle to a running engine: the fixed surface exposed to the event
/// source and to operator tooling.
pub struct EngineHandle {
    messages: mpsc::Sender<EngineMessage>,
    stats: Arc<EngineStats>,
    state: Arc<RwLock<EngineState>>,
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl EngineHandle {
    /// Inject a sampled packet observation.
    pub async fn observe_packet(&self, packet: PacketObserved) -> Result<(), EngineError> {
        self.messages
            .send(EngineMessage::Event(EngineEvent::Packet(packet)))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Inject an expired-rule completion event.
    pub async fn flow_expired(&self, expired: FlowExpired) -> Result<(), EngineError> {
        self.messages
            .send(EngineMessage::Event(EngineEvent::Expired(expired)))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// Clone out the live flow table, for status/show commands.
    ///
    /// The request rides the event queue, so every event whose injection
    /// completed before this call is reflected in the returned table.
    pub async fn snapshot(&self) -> Result<Vec<FlowRecord>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.messages
            .send(EngineMessage::Snapshot(tx))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Stop the engine: drain tasks, disconnect both channels, drop the
    /// table. Idempotent; a second call is a no-op.
    pub async fn stop(&self) {
        let handles = self.tasks.lock().take();
        let Some(handles) = handles else {
            return;
        };
        tracing::info!("stopping flowscope engine");
        let _ = self.messages.send(EngineMessage::Shutdown).await;
        for handle in handles {
            let _ = handle.await;
        }
        *self.state.write() = EngineState::Stopped;
        tracing::info!("stopped flowscope engine");
    }
}

/// Validate the configuration, connect both classifier channels, and
/// spawn the engine.
///
/// Either channel failing to connect aborts startup with no partial
/// state: the other channel is torn down before the error is returned.
pub async fn start(config: EngineConfig) -> Result<EngineHandle, EngineError> {
    config.validate()?;

    let k = config.sample_width;
    let attributes = flow_attributes(k);
    let mut training = ArffStreamClient::new(
        config.relation_name.clone(),
        attributes.clone(),
        config.line_ending,
    );
    let mut testing =
        ArffStreamClient::new(config.relation_name.clone(), attributes, config.line_ending);

    // handshake both channels with a dummy record before anything else
    let dummy = encode(&FlowRecord::new(FlowTuple::default(), k), UNLABELED);
    let host = &config.classifier.host;
    training
        .connect(host, config.classifier.training_port, &dummy)
        .await?;
    if let Err(e) = testing
        .connect(host, config.classifier.testing_port, &dummy)
        .await
    {
        training.disconnect().await;
        return Err(e.into());
    }
    tracing::info!(
        host = %config.classifier.host,
        training_port = config.classifier.training_port,
        testing_port = config.classifier.testing_port,
        "connected both classifier channels"
    );

    let stats = Arc::new(EngineStats::default());
    let (msg_tx, msg_rx) = mpsc::channel(config.queues.event_capacity);
    let training_queue = Arc::new(SendQueue::new(
        config.queues.send_capacity,
        config.queues.overflow,
    ));
    let testing_queue = Arc::new(SendQueue::new(
        config.queues.send_capacity,
        config.queues.overflow,
    ));

    let mut handles = Vec::with_capacity(3);
    handles.push(tokio::spawn(run_sender(
        "training",
        training,
        training_queue.clone(),
        stats.clone(),
    )));
    handles.push(tokio::spawn(run_sender(
        "testing",
        testing,
        testing_queue.clone(),
        stats.clone(),
    )));
    handles.push(tokio::spawn(run_engine(
        config,
        msg_rx,
        training_queue,
        testing_queue,
        stats.clone(),
    )));

    Ok(EngineHandle {
        messages: msg_tx,
        stats,
        state: Arc::new(RwLock::new(EngineState::Running)),
        tasks: Mutex::new(Some(handles)),
    })
}

async fn run_engine(
    config: EngineConfig,
    mut messages: mpsc::Receiver<EngineMessage>,
    training_queue: Arc<SendQueue>,
    testing_queue: Arc<SendQueue>,
    stats: Arc<EngineStats>,
) {
    let thresholds = Thresholds {
        bandwidth_mbps: config.bandwidth_threshold_mbps,
        duration_secs: config.duration_threshold_secs,
        idle_timeout_secs: config.idle_timeout_secs,
    };
    let mut table = FlowTable::new(
        config.sample_width,
        config.table.max_flows,
        stats.clone(),
    );
    // testing is gated until the first-ever training row: the remote
    // classifier is untrained before that and any answer is meaningless.
    // The gate is global across the table's lifetime, as intended.
    let mut has_trained = false;
    let max_age_micros = config.table.max_age_secs as i64 * 1_000_000;
    let mut sweep = tokio::time::interval(Duration::from_secs(
        config.table.sweep_interval_secs.max(1),
    ));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    sweep.reset(); // skip the immediate first tick

    loop {
        tokio::select! {
            msg = messages.recv() => match msg {
                Some(EngineMessage::Event(EngineEvent::Packet(packet))) => {
                    stats.record_packet_observed();
                    let decision =
                        table.observe_packet(packet.tuple, packet.size_bytes, packet.at_micros);
                    if decision == PacketDecision::TestReady {
                        if has_trained {
                            if let Some(rec) = table.get(&packet.tuple) {
                                if push_row(&testing_queue, "testing", encode(rec, UNLABELED), &stats) {
                                    stats.testing_rows.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        } else {
                            stats.testing_suppressed.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                src_port = packet.tuple.src_port,
                                dst_port = packet.tuple.dst_port,
                                "testing row suppressed: no training example sent yet"
                            );
                        }
                    }
                }
                Some(EngineMessage::Event(EngineEvent::Expired(expired))) => {
                    let decision =
                        table.merge_statistics(expired.tuple, &expired.stats, now_micros());
                    if let MergeDecision::Merged { train_ready: true } = decision {
                        if let Some(rec) = table.get(&expired.tuple) {
                            match classify(rec, &thresholds) {
                                Ok(label) => {
                                    tracing::info!(
                                        src_port = expired.tuple.src_port,
                                        dst_port = expired.tuple.dst_port,
                                        label = label.as_str(),
                                        "sending flow for training"
                                    );
                                    // the gate opens only if the row made
                                    // it into the queue; a rejected row
                                    // trains nothing
                                    if push_row(
                                        &training_queue,
                                        "training",
                                        encode(rec, label.as_str()),
                                        &stats,
                                    ) {
                                        stats.training_rows.fetch_add(1, Ordering::Relaxed);
                                        has_trained = true;
                                    }
                                }
                                Err(e) => {
                                    // aborts this record only, never the engine
                                    stats.classification_errors.fetch_add(1, Ordering::Relaxed);
                                    tracing::warn!(
                                        src_port = expired.tuple.src_port,
                                        dst_port = expired.tuple.dst_port,
                                        error = %e,
                                        "skipping training row"
                                    );
                                }
                            }
                        }
                    }
                }
                Some(EngineMessage::Snapshot(reply)) => {
                    let _ = reply.send(table.snapshot());
                }
                Some(EngineMessage::Shutdown) | None => break,
            },
            _ = sweep.tick() => {
                table.evict_older_than(now_micros() - max_age_micros);
            }
        }
    }

    training_queue.close();
    testing_queue.close();
}

/// Push a row, applying the overflow policy. Returns whether the row is
/// in the queue afterwards (drop-oldest sheds an older row, not this
/// one; reject and a closed queue refuse it).
fn push_row(queue: &SendQueue, channel: &'static str, row: Vec<String>, stats: &EngineStats) -> bool {
    match queue.push(row) {
        PushOutcome::Queued => true,
        PushOutcome::DroppedOldest => {
            stats.queue_drops.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(channel, "send queue full, dropped oldest row");
            true
        }
        PushOutcome::Rejected => {
            stats.queue_drops.fetch_add(1, Ordering::Relaxed);
            tracing::error!(channel, "send queue overflow, row rejected");
            false
        }
    }
}

async fn run_sender(
    channel: &'static str,
    mut client: ArffStreamClient<TcpStream>,
    queue: Arc<SendQueue>,
    stats: Arc<EngineStats>,
) {
    while let Some(row) = queue.pop().await {
        if let Err(e) = client.send(&row).await {
            stats.send_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(channel, error = %e, "failed to stream feature vector");
        }
    }
    client.disconnect().await;
    tracing::debug!(channel, "sender task finished");
}
