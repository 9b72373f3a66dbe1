//! HotRing - Lock-Free Multi-Writer Single-Reader Byte Ring
//!
//! The in-memory hot tier of a tiered telemetry buffer: arbitrary writer
//! tasks append length-framed records, a single drain task reads them back
//! in FIFO order.
//!
//! # Key Features
//!
//! - Two-phase append: atomic window reservation, then in-order commit
//! - Cache-line padded cursors (prefetcher false sharing elimination)
//! - Two-slice wrap-aware read API with explicit read commits
//! - Crossbeam adaptive backoff (spin → yield) on the commit spin
//!
//! # Example
//!
//! ```
//! use hotring::{ByteRing, RingConfig};
//!
//! let ring = ByteRing::new(RingConfig::new(1024, false));
//! ring.append(b"framed-record").unwrap();
//!
//! if let Some((first, second)) = ring.readable() {
//!     let n = first.len() + second.len();
//!     // ... consume bytes ...
//!     ring.commit_read(n);
//! }
//! ```

mod config;
mod invariants;
mod metrics;
mod ring;

pub use config::RingConfig;
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring::{ByteRing, RingError};
