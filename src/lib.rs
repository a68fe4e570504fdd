//! FlowScope - elephant flow sampling and feature streaming for SDN
//! controllers.
//!
//! FlowScope watches per-flow traffic in a software-defined network,
//! samples the first k packets of every new flow, and streams labeled
//! feature vectors to an external machine-learning classifier that
//! separates elephant flows from mice.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        FLOWSCOPE ENGINE                          │
//! │                                                                  │
//! │   packet-observed ─┐                        ┌─> training queue ──┼─> classifier :train
//! │                    ├─> event queue ─> flow  │    (labeled E/X)   │
//! │   flow-expired ────┘      (bounded)   table ┤                    │
//! │                                       task  └─> testing queue ───┼─> classifier :test
//! │                                                 (unlabeled)      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two event paths originate from independent controller callbacks;
//! a single table-owning task serializes them. Network sends run on
//! their own tasks behind bounded queues so a stalled classifier never
//! stalls event ingestion.
//!
//! The controller-side packet classification, the flow-rule event
//! subscription, and any interactive shell are external collaborators:
//! they feed [`engine::EngineHandle`] plain event values and render its
//! snapshots.

#![warn(missing_docs)]

pub mod arff;
pub mod config;
pub mod engine;
pub mod event;
pub mod features;
pub mod record;
pub mod stats;
pub mod table;

use thiserror::Error;

pub use arff::{ArffStreamClient, Attribute, StreamError};
pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineHandle, EngineState};
pub use event::{FlowExpired, FlowStats, FlowTuple, PacketObserved};
pub use features::{ClassificationError, Label};
pub use record::FlowRecord;
pub use table::FlowTable;

/// Engine error types.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Channel connect/send failure
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    /// Operation on a stopped engine
    #[error("engine is not running")]
    Stopped,
}
