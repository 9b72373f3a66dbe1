//! JetStream batch publisher.
//!
//! The production [`Processor`]: concatenates a batch's frames into one
//! transport message, publishes it to `<prefix>.data` and awaits the broker
//! acknowledgement within a deadline. Transient failures surface as
//! retriable so the drain loop keeps the batch; authorization and topology
//! failures are fatal and push the agent into its degraded state via the
//! event bus.

use crate::config::StreamSection;
use crate::events::{AgentEvent, EventBus};
use crate::processor::{Batch, ProcessError, Processor};
use async_nats::jetstream;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Error types for publisher setup.
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("broker connection failed: {0}")]
    Connect(#[from] async_nats::ConnectError),
    #[error("stream provisioning failed: {0}")]
    Stream(#[from] jetstream::context::CreateStreamError),
}

/// Publish counters.
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    batches_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl PublisherMetrics {
    pub fn batches_published(&self) -> u64 {
        self.batches_published.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

/// Tracks consecutive publish failures against the reconnect budget and
/// emits the matching events.
pub(crate) struct LinkHealth {
    max_reconnects: u32,
    consecutive_failures: AtomicU32,
    events: EventBus,
}

impl LinkHealth {
    pub(crate) fn new(max_reconnects: u32, events: EventBus) -> Self {
        Self {
            max_reconnects,
            consecutive_failures: AtomicU32::new(0),
            events,
        }
    }

    /// Classifies a failure and updates the streak. Crossing the reconnect
    /// budget announces the disconnect exactly once per streak.
    pub(crate) fn on_failure(&self, reason: String) -> ProcessError {
        if is_fatal_reason(&reason) {
            self.events.emit(AgentEvent::PublisherFatal {
                reason: reason.clone(),
            });
            return ProcessError::Fatal(reason);
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.max_reconnects {
            self.events.emit(AgentEvent::PublisherDisconnected {
                consecutive_failures: failures,
            });
        }
        ProcessError::Retriable(reason)
    }

    /// Ends a failure streak, if one was running.
    pub(crate) fn on_success(&self) {
        if self.consecutive_failures.swap(0, Ordering::Relaxed) > 0 {
            self.events.emit(AgentEvent::PublisherRecovered);
        }
    }
}

/// Authorization and topology problems will not heal by retrying.
fn is_fatal_reason(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("authorization violation")
        || reason.contains("permissions violation")
        || reason.contains("stream not found")
}

/// Persistent JetStream connection publishing batches to `<prefix>.data`.
pub struct JetStreamPublisher {
    context: jetstream::Context,
    subject: String,
    publish_timeout: Duration,
    health: LinkHealth,
    metrics: PublisherMetrics,
}

impl JetStreamPublisher {
    /// Connects to the broker and ensures the stream exists with its bound
    /// subject space. The client reconnects on its own with exponential
    /// delays derived from `stream.reconnect_delay`.
    pub async fn connect(config: &StreamSection, events: EventBus) -> Result<Self, PublisherError> {
        let reconnect_delay = config.reconnect_delay();
        let client = async_nats::ConnectOptions::new()
            .name("cnc-agent")
            .max_reconnects(config.max_reconnects as usize)
            .reconnect_delay_callback(move |attempts| {
                reconnect_delay
                    .saturating_mul(1u32 << attempts.min(4))
                    .min(MAX_RECONNECT_DELAY)
            })
            .connect(&config.url)
            .await?;

        let context = jetstream::new(client);
        context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.name.clone(),
                subjects: vec![format!("{}.>", config.name)],
                ..Default::default()
            })
            .await?;

        tracing::info!(url = %config.url, stream = %config.name, "publisher connected");

        Ok(Self {
            context,
            subject: config.data_subject(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            health: LinkHealth::new(config.max_reconnects, events),
            metrics: PublisherMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &PublisherMetrics {
        &self.metrics
    }
}

impl Processor for JetStreamPublisher {
    async fn process(&self, batch: Batch) -> Result<(), ProcessError> {
        if batch.is_empty() {
            return Ok(());
        }

        let outcome = tokio::time::timeout(self.publish_timeout, async {
            match self
                .context
                .publish(self.subject.clone(), batch.to_payload().into())
                .await
            {
                Ok(ack) => ack.await.map(|_| ()).map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                self.metrics
                    .batches_published
                    .fetch_add(1, Ordering::Relaxed);
                self.health.on_success();
                Ok(())
            }
            Ok(Err(reason)) => {
                self.metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
                Err(self.health.on_failure(reason))
            }
            Err(_elapsed) => {
                self.metrics.publish_failures.fetch_add(1, Ordering::Relaxed);
                Err(self.health.on_failure(format!(
                    "no broker ack within {:?}",
                    self.publish_timeout
                )))
            }
        }
    }

    fn name(&self) -> &str {
        "jetstream"
    }
}
