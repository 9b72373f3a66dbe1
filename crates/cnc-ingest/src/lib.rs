//! CNC Telemetry Ingestion Service
//!
//! Consumes length-framed JSON batches from the durable message stream with
//! explicit acknowledgement and persists them idempotently, keyed on
//! `(machine_id, sequence_number)`.
//!
//! Delivery is at-least-once end to end; the disposition policy keeps it
//! safe: malformed messages are terminated (never retried, so poison can't
//! loop), transient database faults are NAKed for redelivery, and duplicates
//! from redelivery or edge-side replay vanish into ON-CONFLICT-DO-NOTHING.

pub mod consumer;
pub mod repository;

pub use consumer::{
    ConsumerConfig, ConsumerMetrics, Disposition, IngestConsumer, Ingestor, SetupError,
};
pub use repository::{
    InsertOutcome, MemoryRepository, PgRepository, RepoError, Repository, RepositoryBoxed,
};
