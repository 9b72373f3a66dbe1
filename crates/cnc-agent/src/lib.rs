//! CNC Edge Telemetry Agent
//!
//! Reads machine sensors on a fixed cadence, buffers the samples through a
//! three-tier hierarchy (lock-free in-memory ring, then a crash-consistent
//! warm file, with a rotating cold log as the last resort) and publishes
//! length-framed JSON batches to a durable message stream. A supervisor
//! state machine tracks the publish link and backpressure through a typed
//! event bus.
//!
//! # Task set
//!
//! - sensor loop: periodic sampling, monotonically sequenced records
//! - drain loop: batch formation (hot first, warm replay when hot is empty),
//!   delivery with exponential backoff, cursor commits only after broker ack
//! - supervisor: event bus → state machine transitions
//!
//! Records survive process restarts in the warm file and are replayed on the
//! next run; the backend deduplicates on `(machine_id, sequence_number)`.

pub mod agent;
pub mod cold;
pub mod config;
pub mod events;
pub mod manager;
pub mod processor;
pub mod publisher;
pub mod sensors;
pub mod shutdown;
pub mod state;
pub mod warm;

pub use agent::{Agent, AgentError};
pub use cold::{ColdBuffer, ColdError};
pub use config::{AgentConfig, ConfigError};
pub use events::{AgentEvent, EventBus};
pub use manager::{BatchPolicy, BufferManager, IngestError, ManagerMetrics, Tier};
pub use processor::{Batch, NullProcessor, ProcessError, Processor, ProcessorBoxed};
pub use publisher::{JetStreamPublisher, PublisherError, PublisherMetrics};
pub use sensors::{SensorBank, SensorLoop, SensorLoopMetrics, SensorReading, SimulatedSensorBank};
pub use shutdown::ShutdownSignal;
pub use state::{AgentState, StateError, StateMachine, Transition};
pub use warm::{WarmBatch, WarmBuffer, WarmError, MAX_RECORD_LEN};
