//! Buffer manager: demotion on backpressure, batch formation, drain loop.
//!
//! Owns the three tiers. Writers call [`BufferManager::ingest`], which never
//! suspends on the hot path and demotes hot → warm → cold under pressure;
//! when every tier refuses, the record is dropped and counted (drop-newest,
//! no flow control back to the sensors). A single drain task forms batches —
//! hot first, warm only when hot is empty, so older data always ships before
//! newer — and hands them to a [`Processor`](crate::processor::Processor).
//! Read cursors advance only after the processor confirms a batch, so a
//! failed attempt re-presents the same records.

use crate::cold::ColdBuffer;
use crate::events::{AgentEvent, EventBus};
use crate::processor::{Batch, ProcessorBoxed};
use crate::shutdown::ShutdownSignal;
use crate::warm::{WarmBuffer, WarmError};
use hotring::ByteRing;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_wire::{SensorRecord, HEADER_LEN};
use thiserror::Error;
use tokio::time::Instant;

/// How often the drain task looks for new frames when idle.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Error types for record ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("record could not be serialized: {0}")]
    Encode(#[from] serde_json::Error),
    /// Every tier refused the record; it was dropped and counted.
    #[error("record dropped: all buffer tiers exhausted")]
    Dropped,
}

/// Which tier absorbed an ingested record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

/// Counters for buffer and drain activity.
#[derive(Debug, Default)]
pub struct ManagerMetrics {
    records_ingested: AtomicU64,
    warm_demotions: AtomicU64,
    cold_demotions: AtomicU64,
    records_dropped: AtomicU64,
    batches_delivered: AtomicU64,
    frames_delivered: AtomicU64,
    delivery_retries: AtomicU64,
}

impl ManagerMetrics {
    pub fn records_ingested(&self) -> u64 {
        self.records_ingested.load(Ordering::Relaxed)
    }

    pub fn warm_demotions(&self) -> u64 {
        self.warm_demotions.load(Ordering::Relaxed)
    }

    pub fn cold_demotions(&self) -> u64 {
        self.cold_demotions.load(Ordering::Relaxed)
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn batches_delivered(&self) -> u64 {
        self.batches_delivered.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn delivery_retries(&self) -> u64 {
        self.delivery_retries.load(Ordering::Relaxed)
    }
}

/// Batch closure policy: a batch closes at `size` frames or `timeout` after
/// its first frame, whichever comes first.
#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub size: usize,
    pub timeout: Duration,
}

/// Owns the tier hierarchy and feeds batches to a processor.
pub struct BufferManager {
    hot: ByteRing,
    warm: WarmBuffer,
    cold: ColdBuffer,
    policy: BatchPolicy,
    events: EventBus,
    metrics: ManagerMetrics,
    drain_running: AtomicBool,
}

/// Where a pending batch's frames came from; cold is never drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchSource {
    Hot,
    Warm,
}

/// A batch under construction, tied to the cursor state that releases it.
struct PendingBatch {
    batch: Batch,
    source: BatchSource,
    /// Ring bytes covered by the batch (hot source).
    hot_bytes: usize,
    /// Warm cursor after the batch (warm source).
    warm_next_pos: u64,
    /// When the first frame was added; the closure timeout counts from here.
    started: Instant,
}

enum Delivery {
    Delivered,
    Aborted,
}

impl BufferManager {
    pub fn new(
        hot: ByteRing,
        warm: WarmBuffer,
        cold: ColdBuffer,
        policy: BatchPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            hot,
            warm,
            cold,
            policy,
            events,
            metrics: ManagerMetrics::default(),
            drain_running: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> &ManagerMetrics {
        &self.metrics
    }

    pub fn warm(&self) -> &WarmBuffer {
        &self.warm
    }

    /// Serializes the record and pushes it down the tier hierarchy.
    ///
    /// Never suspends. Hot rejections demote to warm, warm rejections to
    /// cold; a cold failure drops the record.
    pub fn ingest(&self, record: &SensorRecord) -> Result<Tier, IngestError> {
        let frame = telemetry_wire::encode_record(record)?;
        self.metrics.records_ingested.fetch_add(1, Ordering::Relaxed);

        if self.hot.append(&frame).is_ok() {
            return Ok(Tier::Hot);
        }
        self.events.emit(AgentEvent::HotFull);

        match self.warm.write(&frame) {
            Ok(()) => {
                self.metrics.warm_demotions.fetch_add(1, Ordering::Relaxed);
                self.events.emit(AgentEvent::WarmEngaged);
                return Ok(Tier::Warm);
            }
            Err(WarmError::Full { .. }) => {}
            Err(err) => {
                tracing::warn!(error = %err, "warm buffer write failed, demoting to cold");
            }
        }

        match self.cold.append(&frame) {
            Ok(()) => {
                self.metrics.cold_demotions.fetch_add(1, Ordering::Relaxed);
                self.events.emit(AgentEvent::ColdEngaged);
                Ok(Tier::Cold)
            }
            Err(err) => {
                self.metrics.records_dropped.fetch_add(1, Ordering::Relaxed);
                self.events.emit(AgentEvent::RecordsDropped { count: 1 });
                tracing::error!(error = %err, machine_id = %record.machine_id,
                    sequence = record.sequence_number, "record dropped: all tiers exhausted");
                Err(IngestError::Dropped)
            }
        }
    }

    /// Runs the drain loop until shutdown. One drain pass forms and hands off
    /// at most one batch; warm is consulted only when hot yielded nothing.
    ///
    /// Must run at most once per manager: the loop is the single reader of
    /// the hot ring.
    pub async fn run_drain(
        self: Arc<Self>,
        processor: Arc<dyn ProcessorBoxed>,
        shutdown: ShutdownSignal,
    ) {
        if self.drain_running.swap(true, Ordering::AcqRel) {
            tracing::error!("drain loop already running; refusing second reader");
            return;
        }

        let mut pending: Option<PendingBatch> = None;

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            self.fill_from_hot(&mut pending);
            self.fill_from_warm(&mut pending);

            let ready = pending.as_ref().is_some_and(|p| {
                p.batch.len() >= self.policy.size || p.started.elapsed() >= self.policy.timeout
            });

            if ready {
                if let Some(p) = pending.take() {
                    match self.deliver(&p.batch, processor.as_ref(), &shutdown).await {
                        Delivery::Delivered => {
                            self.commit(&p);
                            continue; // more frames may already be waiting
                        }
                        Delivery::Aborted => break, // cursors untouched
                    }
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(DRAIN_POLL) => {}
            }
        }

        // Best-effort flush of whatever is in flight, single attempt.
        self.fill_from_hot(&mut pending);
        if let Some(p) = pending {
            if !p.batch.is_empty() && processor.process_boxed(p.batch.clone()).await.is_ok() {
                self.commit(&p);
            }
        }
        if let Err(err) = self.cold.flush() {
            tracing::warn!(error = %err, "cold log flush failed during shutdown");
        }
    }

    /// Claims newly committed hot frames into the pending batch, up to the
    /// batch size. Claimed bytes stay in the ring until the batch commits.
    fn fill_from_hot(&self, pending: &mut Option<PendingBatch>) {
        if pending.as_ref().is_some_and(|p| p.source != BatchSource::Hot) {
            return;
        }

        let space = self.policy.size - pending.as_ref().map_or(0, |p| p.batch.len());
        if space == 0 {
            return;
        }

        let Some((first, second)) = self.hot.readable() else {
            return;
        };
        let total = first.len() + second.len();
        let claimed = pending.as_ref().map_or(0, |p| p.hot_bytes);
        if total <= claimed {
            return;
        }

        let mut region = Vec::with_capacity(total - claimed);
        if claimed < first.len() {
            region.extend_from_slice(&first[claimed..]);
            region.extend_from_slice(second);
        } else {
            region.extend_from_slice(&second[claimed - first.len()..]);
        }

        let (frames, consumed) = take_frames(&region, space);
        if frames.is_empty() {
            return;
        }

        let p = pending.get_or_insert_with(|| PendingBatch {
            batch: Batch::new(),
            source: BatchSource::Hot,
            hot_bytes: 0,
            warm_next_pos: 0,
            started: Instant::now(),
        });
        for frame in frames {
            p.batch.push(frame);
        }
        p.hot_bytes += consumed;
    }

    /// Opens or tops up a warm-sourced batch, up to the batch size. A batch
    /// is only opened when hot yielded nothing this pass (the caller runs
    /// `fill_from_hot` first, and a hot-sourced batch makes this a no-op);
    /// once open it keeps claiming frames that arrive in later passes, same
    /// as the hot path. Cursor regions holding only padding or corruption
    /// ahead of any batch are committed away on the spot.
    fn fill_from_warm(&self, pending: &mut Option<PendingBatch>) {
        if pending.as_ref().is_some_and(|p| p.source != BatchSource::Warm) {
            return;
        }

        loop {
            let space = self.policy.size - pending.as_ref().map_or(0, |p| p.batch.len());
            if space == 0 {
                return;
            }

            if pending.is_none() {
                if !self.warm.needs_drain() {
                    return;
                }
                let warm_batch = match self.warm.peek(space) {
                    Ok(batch) => batch,
                    Err(err) => {
                        tracing::warn!(error = %err, "warm buffer read failed");
                        return;
                    }
                };

                if warm_batch.frames.is_empty() {
                    let before = self.warm.unread_bytes();
                    self.warm.commit_read(warm_batch.next_read_pos);
                    if self.warm.unread_bytes() >= before {
                        return; // no forward progress possible
                    }
                    continue;
                }

                let mut batch = Batch::new();
                for frame in warm_batch.frames {
                    batch.push(frame);
                }
                *pending = Some(PendingBatch {
                    batch,
                    source: BatchSource::Warm,
                    hot_bytes: 0,
                    warm_next_pos: warm_batch.next_read_pos,
                    started: Instant::now(),
                });
                continue;
            }

            // Top up the open batch with frames written since it was claimed.
            let Some(p) = pending.as_mut() else { return };
            let warm_batch = match self.warm.peek_from(p.warm_next_pos, space) {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(error = %err, "warm buffer read failed");
                    return;
                }
            };
            if warm_batch.next_read_pos <= p.warm_next_pos {
                return; // no new complete frames yet
            }
            // The scan may have advanced over padding or corruption without
            // yielding frames; the claim extends either way.
            p.warm_next_pos = warm_batch.next_read_pos;
            for frame in warm_batch.frames {
                p.batch.push(frame);
            }
        }
    }

    /// Hands a batch to the processor, retrying failures with exponential
    /// backoff (500 ms doubling, capped at 10 s) until success or shutdown.
    async fn deliver(
        &self,
        batch: &Batch,
        processor: &dyn ProcessorBoxed,
        shutdown: &ShutdownSignal,
    ) -> Delivery {
        let mut attempts: u32 = 0;
        loop {
            match processor.process_boxed(batch.clone()).await {
                Ok(()) => {
                    if attempts > 0 {
                        self.events.emit(AgentEvent::DrainRecovered);
                    }
                    return Delivery::Delivered;
                }
                Err(err) => {
                    attempts += 1;
                    self.metrics.delivery_retries.fetch_add(1, Ordering::Relaxed);
                    self.events.emit(AgentEvent::DrainStalled { attempts });
                    tracing::warn!(
                        attempts,
                        frames = batch.len(),
                        processor = processor.name(),
                        error = %err,
                        "batch delivery failed, backing off"
                    );

                    tokio::select! {
                        () = shutdown.cancelled() => return Delivery::Aborted,
                        () = tokio::time::sleep(backoff_delay(attempts)) => {}
                    }
                }
            }
        }
    }

    fn commit(&self, p: &PendingBatch) {
        match p.source {
            BatchSource::Hot => self.hot.commit_read(p.hot_bytes),
            BatchSource::Warm => self.warm.commit_read(p.warm_next_pos),
        }
        self.metrics.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .frames_delivered
            .fetch_add(p.batch.len() as u64, Ordering::Relaxed);
    }
}

/// Retry delay for the nth failed attempt: 500 ms doubling, capped at 10 s.
fn backoff_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(5);
    Duration::from_millis((500u64 << exp).min(10_000))
}

/// Splits a run of whole frames into owned frames, up to `max`.
///
/// The hot ring commits whole frames only, so the region never ends inside
/// one; a short tail here would mean a framing bug upstream.
fn take_frames(buf: &[u8], max: usize) -> (Vec<Vec<u8>>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;

    while frames.len() < max && offset + HEADER_LEN <= buf.len() {
        let declared = u32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) as usize;
        let end = offset + HEADER_LEN + declared;
        if end > buf.len() {
            break;
        }
        frames.push(buf[offset..end].to_vec());
        offset = end;
    }

    (frames, offset)
}
