//! Typed agent configuration.
//!
//! Every recognized option is enumerated here with a default; validation
//! happens once at construction time, never at use. Loading these structs from
//! a file or environment is the deployment layer's job.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("agent.machine_id must not be empty")]
    EmptyMachineId,
    #[error("agent.sampling_rate must be at least 1 ms (got {0} ms)")]
    SamplingRateTooFast(u64),
    #[error("buffering.hot_buffer.capacity must be non-zero")]
    ZeroHotCapacity,
    #[error("buffering.warm_buffer.size must be non-zero")]
    ZeroWarmSize,
    #[error("buffering.cold_buffer.max_size must be non-zero")]
    ZeroColdMaxSize,
    #[error("buffering.batching.size must be non-zero")]
    ZeroBatchSize,
    #[error("stream.url must not be empty")]
    EmptyStreamUrl,
}

/// Root configuration for the edge agent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub buffering: BufferingSection,
    pub stream: StreamSection,
}

/// Identity and sampling cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Identity stamped on every record.
    pub machine_id: String,
    /// Sensor loop tick period in milliseconds (min 1).
    pub sampling_rate_ms: u64,
}

/// The three buffer tiers plus batching policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BufferingSection {
    pub hot_buffer: HotBufferSection,
    pub warm_buffer: WarmBufferSection,
    pub cold_buffer: ColdBufferSection,
    pub batching: BatchingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotBufferSection {
    /// Ring capacity in bytes; rounded up to the next power of two.
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmBufferSection {
    pub path: PathBuf,
    /// Minimum file size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColdBufferSection {
    pub path: PathBuf,
    /// Rotation threshold in bytes.
    pub max_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchingSection {
    /// Frames per batch before it closes.
    pub size: usize,
    /// Milliseconds since the first frame before a partial batch closes.
    pub timeout_ms: u64,
}

/// Message stream topology and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub url: String,
    pub name: String,
    pub subject_prefix: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnects: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            machine_id: "cnc-001".to_string(),
            sampling_rate_ms: 100,
        }
    }
}

impl Default for HotBufferSection {
    fn default() -> Self {
        Self { capacity: 1 << 20 }
    }
}

impl Default for WarmBufferSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/tmp/cnc-agent/warm.buffer"),
            size: 10 * 1024 * 1024,
        }
    }
}

impl Default for ColdBufferSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/tmp/cnc-agent/cold.log"),
            max_size: 100 * 1024 * 1024,
        }
    }
}

impl Default for BatchingSection {
    fn default() -> Self {
        Self {
            size: 100,
            timeout_ms: 2_000,
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            name: "CNC_DATA".to_string(),
            // Must stay inside the stream's bound subject space `<name>.>`.
            subject_prefix: "CNC_DATA".to_string(),
            reconnect_delay_ms: 2_000,
            max_reconnects: 10,
        }
    }
}

impl AgentSection {
    pub fn sampling_rate(&self) -> Duration {
        Duration::from_millis(self.sampling_rate_ms)
    }
}

impl BatchingSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StreamSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Subject the agent publishes data batches to.
    pub fn data_subject(&self) -> String {
        format!("{}.data", self.subject_prefix)
    }
}

impl AgentConfig {
    /// Checks every option once, up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.machine_id.is_empty() {
            return Err(ConfigError::EmptyMachineId);
        }
        if self.agent.sampling_rate_ms < 1 {
            return Err(ConfigError::SamplingRateTooFast(self.agent.sampling_rate_ms));
        }
        if self.buffering.hot_buffer.capacity == 0 {
            return Err(ConfigError::ZeroHotCapacity);
        }
        if self.buffering.warm_buffer.size == 0 {
            return Err(ConfigError::ZeroWarmSize);
        }
        if self.buffering.cold_buffer.max_size == 0 {
            return Err(ConfigError::ZeroColdMaxSize);
        }
        if self.buffering.batching.size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.stream.url.is_empty() {
            return Err(ConfigError::EmptyStreamUrl);
        }
        Ok(())
    }
}
