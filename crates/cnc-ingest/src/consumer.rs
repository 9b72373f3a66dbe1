//! Durable pull consumer with explicit acknowledgement.
//!
//! Fetches transport messages in bounded batches and decides one of three
//! dispositions per message:
//!
//! - **TERM** — any framing, JSON or semantic failure poisons the whole
//!   message; it is never redelivered and nothing from it is stored.
//! - **NAK** — a transient repository failure; the broker redelivers after a
//!   delay and idempotent inserts absorb the records stored before the error.
//! - **ACK** — every record stored (or already present); progress commits.
//!
//! Decode is all-or-nothing *before* any insert, so a half-poison message
//! never leaves partial rows behind.

use crate::repository::{InsertOutcome, RepositoryBoxed};
use async_nats::jetstream::{self, AckKind};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_wire::decode_message;
use thiserror::Error;
use tokio::sync::watch;

/// Error types for consumer setup.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("broker connection failed: {0}")]
    Connect(#[from] async_nats::ConnectError),
    #[error("stream provisioning failed: {0}")]
    Stream(#[from] jetstream::context::CreateStreamError),
    #[error("consumer provisioning failed: {0}")]
    Consumer(#[from] jetstream::stream::ConsumerError),
}

/// Backend consumer configuration with defaults matching the edge agent's
/// stream topology.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream_name: String,
    pub durable_name: String,
    /// Messages requested per fetch.
    pub batch_size: usize,
    /// Upper bound on how long one fetch waits for messages.
    pub max_wait: Duration,
    /// Redelivery delay attached to NAKs.
    pub nak_delay: Duration,
    /// How long fetching pauses after a fatal repository error.
    pub fatal_pause: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            stream_name: "CNC_DATA".to_string(),
            durable_name: "cnc-ingest".to_string(),
            batch_size: 64,
            max_wait: Duration::from_secs(5),
            nak_delay: Duration::from_secs(5),
            fatal_pause: Duration::from_secs(30),
        }
    }
}

/// Message and record counters.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    messages_fetched: AtomicU64,
    acked: AtomicU64,
    naked: AtomicU64,
    termed: AtomicU64,
    records_inserted: AtomicU64,
    duplicates: AtomicU64,
}

impl ConsumerMetrics {
    pub fn messages_fetched(&self) -> u64 {
        self.messages_fetched.load(Ordering::Relaxed)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn naked(&self) -> u64 {
        self.naked.load(Ordering::Relaxed)
    }

    pub fn termed(&self) -> u64 {
        self.termed.load(Ordering::Relaxed)
    }

    pub fn records_inserted(&self) -> u64 {
        self.records_inserted.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }
}

/// Per-message verdict. `Nak { pause: true }` marks a fatal repository error:
/// the message still gets redelivered later, but fetching pauses instead of
/// hammering a broken database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nak { pause: bool },
    Term,
}

/// The broker-independent core: decode, validate, store, decide.
pub struct Ingestor {
    repository: Arc<dyn RepositoryBoxed>,
    metrics: Arc<ConsumerMetrics>,
}

impl Ingestor {
    pub fn new(repository: Arc<dyn RepositoryBoxed>) -> Self {
        Self {
            repository,
            metrics: Arc::new(ConsumerMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    /// Decides the disposition for one transport message.
    pub async fn dispose(&self, payload: &[u8]) -> Disposition {
        // Decode phase: the whole message must parse and validate before a
        // single insert happens.
        let records = match decode_message(payload) {
            Ok(records) => records,
            Err(err) => {
                self.metrics.termed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, payload_len = payload.len(),
                    "terminating malformed transport message");
                return Disposition::Term;
            }
        };

        // Store phase: in order, stopping at the first repository error.
        for record in &records {
            match self.repository.insert_boxed(record).await {
                Ok(InsertOutcome::Inserted) => {
                    self.metrics.records_inserted.fetch_add(1, Ordering::Relaxed);
                }
                Ok(InsertOutcome::Duplicate) => {
                    self.metrics.duplicates.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(machine_id = %record.machine_id,
                        sequence = record.sequence_number, "duplicate record ignored");
                }
                Err(err) if err.is_transient() => {
                    self.metrics.naked.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, "transient repository failure, NAK for redelivery");
                    return Disposition::Nak { pause: false };
                }
                Err(err) => {
                    self.metrics.naked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %err, "fatal repository failure, pausing fetch");
                    return Disposition::Nak { pause: true };
                }
            }
        }

        self.metrics.acked.fetch_add(1, Ordering::Relaxed);
        Disposition::Ack
    }
}

/// Durable pull consumer bound to the stream's subject space.
pub struct IngestConsumer {
    consumer: jetstream::consumer::PullConsumer,
    ingestor: Ingestor,
    config: ConsumerConfig,
}

impl IngestConsumer {
    /// Connects, ensures the stream exists and declares (or reuses) the
    /// durable consumer with explicit-ACK policy.
    pub async fn connect(
        url: &str,
        config: ConsumerConfig,
        repository: Arc<dyn RepositoryBoxed>,
    ) -> Result<Self, SetupError> {
        let client = async_nats::ConnectOptions::new()
            .name("cnc-ingest")
            .connect(url)
            .await?;
        let context = jetstream::new(client);

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: vec![format!("{}.>", config.stream_name)],
                ..Default::default()
            })
            .await?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(config.durable_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(url, stream = %config.stream_name, durable = %config.durable_name,
            "consumer connected");

        Ok(Self {
            consumer,
            ingestor: Ingestor::new(repository),
            config,
        })
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        self.ingestor.metrics()
    }

    /// Fetch loop: bounded batches with a max wait, one disposition per
    /// message, until the shutdown flag flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let fetch = self
                .consumer
                .fetch()
                .max_messages(self.config.batch_size)
                .expires(self.config.max_wait)
                .messages();

            let mut messages = tokio::select! {
                _ = shutdown.changed() => break,
                result = fetch => match result {
                    Ok(messages) => messages,
                    Err(err) => {
                        tracing::warn!(error = %err, "fetch request failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            while let Some(message) = messages.next().await {
                match message {
                    Ok(message) => self.handle(message).await,
                    Err(err) => {
                        tracing::warn!(error = %err, "fetch stream error");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            acked = self.metrics().acked(),
            naked = self.metrics().naked(),
            termed = self.metrics().termed(),
            "consumer stopped"
        );
    }

    async fn handle(&self, message: jetstream::Message) {
        self.ingestor
            .metrics
            .messages_fetched
            .fetch_add(1, Ordering::Relaxed);

        let disposition = self.ingestor.dispose(&message.payload).await;
        let ack_result = match disposition {
            Disposition::Ack => message.ack().await,
            Disposition::Nak { .. } => {
                message
                    .ack_with(AckKind::Nak(Some(self.config.nak_delay)))
                    .await
            }
            Disposition::Term => message.ack_with(AckKind::Term).await,
        };
        if let Err(err) = ack_result {
            tracing::warn!(error = %err, ?disposition, "acknowledgement failed");
        }

        if disposition == (Disposition::Nak { pause: true }) {
            tracing::warn!(pause = ?self.config.fatal_pause, "pausing fetch after fatal repository error");
            tokio::time::sleep(self.config.fatal_pause).await;
        }
    }
}
