use std::future::Future;
use thiserror::Error;

/// Error types for batch processing.
///
/// The split drives the drain loop's policy: retriable errors leave the batch
/// in place for another attempt with backoff, fatal errors additionally put
/// the agent into its degraded state.
#[derive(Debug, Error, Clone)]
pub enum ProcessError {
    /// Transient condition (network, broker unavailable, timeout).
    #[error("retriable processing failure: {0}")]
    Retriable(String),
    /// Unrecoverable condition (authorization, topology misconfiguration).
    #[error("fatal processing failure: {0}")]
    Fatal(String),
}

impl ProcessError {
    /// Returns `true` when another attempt may succeed.
    #[inline]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

/// An ordered run of framed records, drawn FIFO from one buffer tier.
///
/// The unit of publish and of acknowledgement: either the whole batch is
/// confirmed and the tier's read cursor advances past it, or none of it is.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    frames: Vec<Vec<u8>>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Vec<u8>) {
        self.frames.push(frame);
    }

    /// Number of frames (records) in the batch.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    /// Concatenates the frames into one transport payload. Each frame already
    /// carries its length prefix, so this is the full wire message.
    pub fn to_payload(&self) -> Vec<u8> {
        let total = self.frames.iter().map(Vec::len).sum();
        let mut payload = Vec::with_capacity(total);
        for frame in &self.frames {
            payload.extend_from_slice(frame);
        }
        payload
    }
}

/// Trait for handing batches downstream (the publisher in production).
///
/// Uses native async fn in traits. Not object-safe; for dynamic dispatch use
/// [`ProcessorBoxed`].
pub trait Processor: Send + Sync {
    /// Processes one batch. Returning `Ok` releases the underlying records.
    fn process(&self, batch: Batch) -> impl Future<Output = Result<(), ProcessError>> + Send;

    /// Returns the processor name for logging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Processor`] for dynamic dispatch.
pub trait ProcessorBoxed: Send + Sync {
    fn process_boxed(
        &self,
        batch: Batch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ProcessError>> + Send + '_>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Processor can be used as ProcessorBoxed.
impl<T: Processor> ProcessorBoxed for T {
    fn process_boxed(
        &self,
        batch: Batch,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), ProcessError>> + Send + '_>> {
        Box::pin(self.process(batch))
    }

    fn name(&self) -> &str {
        Processor::name(self)
    }
}

/// Discards every batch. Useful for buffering-only deployments and benches.
pub struct NullProcessor;

impl Processor for NullProcessor {
    async fn process(&self, _batch: Batch) -> Result<(), ProcessError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records every processed batch for assertions.
    #[derive(Default)]
    pub struct RecordingProcessor {
        batches: Mutex<Vec<Batch>>,
    }

    impl RecordingProcessor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn batches(&self) -> Vec<Batch> {
            self.batches.lock().unwrap().clone()
        }

        /// All frames across all batches, in processing order.
        pub fn frames(&self) -> Vec<Vec<u8>> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .flat_map(|batch| batch.frames().to_vec())
                .collect()
        }
    }

    impl Processor for RecordingProcessor {
        async fn process(&self, batch: Batch) -> Result<(), ProcessError> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Fails while the switch is down, records batches once it is up.
    #[derive(Default)]
    pub struct SwitchableProcessor {
        up: AtomicBool,
        attempts: AtomicU32,
        inner: RecordingProcessor,
    }

    impl SwitchableProcessor {
        pub fn down() -> Self {
            Self::default()
        }

        pub fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::Release);
        }

        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::Relaxed)
        }

        pub fn frames(&self) -> Vec<Vec<u8>> {
            self.inner.frames()
        }
    }

    impl Processor for SwitchableProcessor {
        async fn process(&self, batch: Batch) -> Result<(), ProcessError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if !self.up.load(Ordering::Acquire) {
                return Err(ProcessError::Retriable("link down".to_string()));
            }
            self.inner.process(batch).await
        }

        fn name(&self) -> &str {
            "switchable"
        }
    }
}
