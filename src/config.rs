//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// k must be at least 1
    #[error("sample width must be at least 1")]
    SampleWidth,
    /// Classifier ports live in the registered/dynamic range
    #[error("{role} port {port} outside registered/dynamic range 1024-65535")]
    PortRange {
        /// Which channel the port belongs to
        role: &'static str,
        /// The rejected value
        port: u16,
    },
    /// Classifier host must be set
    #[error("classifier host must not be empty")]
    EmptyHost,
    /// Queue and table bounds must be non-zero
    #[error("{0} must be non-zero")]
    ZeroBound(&'static str),
    /// Cannot read the config file
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid JSON
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of leading packets sampled per flow (k)
    pub sample_width: usize,
    /// Bandwidth threshold for elephant flows, Mbit/s
    pub bandwidth_threshold_mbps: f64,
    /// Duration threshold for elephant flows, seconds
    pub duration_threshold_secs: f64,
    /// Reactive-forwarding idle timeout subtracted from flow durations
    pub idle_timeout_secs: f64,
    /// Remote classifier endpoints
    pub classifier: ClassifierConfig,
    /// Queue sizing and overflow policy
    pub queues: QueueConfig,
    /// Flow table bounds
    pub table: TableConfig,
    /// ARFF relation name declared in the stream header
    pub relation_name: String,
    /// Line ending shared by the header and every record
    pub line_ending: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_width: 5,
            bandwidth_threshold_mbps: 90.0,
            duration_threshold_secs: 5.0,
            idle_timeout_secs: 10.0,
            classifier: ClassifierConfig::default(),
            queues: QueueConfig::default(),
            table: TableConfig::default(),
            relation_name: "flows".into(),
            line_ending: '\n',
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to a JSON file.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate bounds before startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_width < 1 {
            return Err(ConfigError::SampleWidth);
        }
        if self.classifier.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        for (role, port) in [
            ("training", self.classifier.training_port),
            ("testing", self.classifier.testing_port),
        ] {
            if port < 1024 {
                return Err(ConfigError::PortRange { role, port });
            }
        }
        if self.queues.event_capacity == 0 || self.queues.send_capacity == 0 {
            return Err(ConfigError::ZeroBound("queue capacity"));
        }
        if self.table.max_flows == 0 {
            return Err(ConfigError::ZeroBound("table.max_flows"));
        }
        Ok(())
    }
}

/// Remote classifier endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Classifier host name or IP
    pub host: String,
    /// Port of the labeled (training) channel
    pub training_port: u16,
    /// Port of the unlabeled (testing) channel
    pub testing_port: u16,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            training_port: 6000,
            testing_port: 6001,
        }
    }
}

/// Queue sizing and overflow policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Event queue capacity (sampling + completion paths)
    pub event_capacity: usize,
    /// Per-channel send queue capacity
    pub send_capacity: usize,
    /// What to do when a send queue is full
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            event_capacity: 4096,
            send_capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Send-queue overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Discard the oldest queued row to make room (counted, logged)
    DropOldest,
    /// Refuse the new row and surface an overflow error
    Reject,
}

/// Flow table bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableConfig {
    /// Maximum live records before oldest-eviction
    pub max_flows: usize,
    /// Age after which an untouched record is swept, seconds
    pub max_age_secs: u64,
    /// Sweep interval, seconds
    pub sweep_interval_secs: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_flows: 100_000,
            max_age_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}
