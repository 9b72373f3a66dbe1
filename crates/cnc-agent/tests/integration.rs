//! End-to-end agent scenarios against in-process processors.

use cnc_agent::{
    Agent, AgentConfig, AgentState, Batch, EventBus, ProcessError, Processor, SimulatedSensorBank,
    StateMachine,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemetry_wire::{split_frames, SensorRecord};
use tempfile::TempDir;

/// Records every processed batch for assertions.
#[derive(Default)]
struct RecordingProcessor {
    batches: Mutex<Vec<Batch>>,
}

impl RecordingProcessor {
    fn new() -> Self {
        Self::default()
    }

    fn sequences(&self) -> Vec<u64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.frames().to_vec())
            .map(|frame| {
                let payloads = split_frames(&frame).unwrap();
                let record: SensorRecord = serde_json::from_slice(payloads[0]).unwrap();
                record.sequence_number
            })
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

/// Fails while the switch is down, records once it is up.
#[derive(Default)]
struct SwitchableProcessor {
    up: AtomicBool,
    inner: RecordingProcessor,
}

impl SwitchableProcessor {
    fn down() -> Self {
        Self::default()
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }

    fn sequences(&self) -> Vec<u64> {
        self.inner.sequences()
    }
}

impl Processor for SwitchableProcessor {
    async fn process(&self, batch: Batch) -> Result<(), ProcessError> {
        if !self.up.load(Ordering::Acquire) {
            return Err(ProcessError::Retriable("link down".to_string()));
        }
        self.inner.process(batch).await
    }

    fn name(&self) -> &str {
        "switchable"
    }
}

fn test_config(dir: &TempDir, hot_capacity: usize) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.agent.machine_id = "M1".to_string();
    config.agent.sampling_rate_ms = 2;
    config.buffering.hot_buffer.capacity = hot_capacity;
    config.buffering.warm_buffer.path = dir.path().join("warm.buffer");
    config.buffering.warm_buffer.size = 1 << 20;
    config.buffering.cold_buffer.path = dir.path().join("cold.log");
    config.buffering.cold_buffer.max_size = 1 << 20;
    config.buffering.batching.size = 16;
    config.buffering.batching.timeout_ms = 50;
    config
}

fn fresh_state() -> Arc<StateMachine> {
    let state = Arc::new(StateMachine::new());
    state.transition(AgentState::Connecting).unwrap();
    state
}

fn assert_contiguous_from(sequences: &[u64], first: u64) {
    for (i, seq) in sequences.iter().enumerate() {
        assert_eq!(*seq, first + i as u64, "gap or reorder at position {i}");
    }
}

#[tokio::test]
async fn test_pipeline_delivers_sequenced_records() {
    let dir = TempDir::new().unwrap();
    // Roomy hot ring: this scenario exercises the ordered happy path, not
    // demotion.
    let config = test_config(&dir, 1 << 17);
    let processor = Arc::new(RecordingProcessor::new());
    let state = fresh_state();

    let agent = Agent::start(
        &config,
        SimulatedSensorBank::new(1),
        processor.clone(),
        Arc::clone(&state),
        EventBus::default(),
    )
    .unwrap();
    assert_eq!(agent.state(), AgentState::Online);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let produced = agent.sensor_metrics().records_produced();
    agent.shutdown().await;

    assert!(produced > 10, "expected steady production, got {produced}");
    assert_eq!(state.state(), AgentState::Shutdown);

    // Whatever shipped did so in production order, without gaps, from one.
    let sequences = processor.sequences();
    assert!(!sequences.is_empty());
    assert_contiguous_from(&sequences, 1);
}

#[tokio::test]
async fn test_outage_buffers_then_replays_across_restart() {
    let dir = TempDir::new().unwrap();
    // A hot ring too small for any record forces everything into the warm
    // file, which is what survives the restart.
    let config = test_config(&dir, 16);

    // First run: the link is down for the whole lifetime.
    let first_run_produced = {
        let processor = Arc::new(SwitchableProcessor::down());
        let agent = Agent::start(
            &config,
            SimulatedSensorBank::new(2),
            processor.clone(),
            fresh_state(),
            EventBus::default(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let produced = agent.sensor_metrics().records_produced();
        agent.shutdown().await;

        assert!(processor.sequences().is_empty(), "nothing ships while down");
        produced
    };
    assert!(first_run_produced > 0);

    // Second run: link up. The warm replay ships before this run's records,
    // and sequence numbering resumes where the first run stopped.
    let processor = Arc::new(RecordingProcessor::new());
    let agent = Agent::start(
        &config,
        SimulatedSensorBank::new(3),
        processor.clone(),
        fresh_state(),
        EventBus::default(),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    agent.shutdown().await;

    // The replay covers every first-run record and numbering continued
    // without reuse: one copy each, no holes. New hot records may ship ahead
    // of the replay (hot drains first within a pass), so order is checked on
    // the set, not the stream.
    let mut sequences = processor.sequences();
    assert!(
        sequences.len() >= first_run_produced as usize,
        "replay must cover the first run"
    );
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), processor.sequences().len(), "no duplicates");
    assert_contiguous_from(&sequences, 1);
}

#[tokio::test]
async fn test_recovery_mid_run_preserves_order() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 1 << 16);
    let processor = Arc::new(SwitchableProcessor::down());

    let agent = Agent::start(
        &config,
        SimulatedSensorBank::new(4),
        processor.clone(),
        fresh_state(),
        EventBus::default(),
    )
    .unwrap();

    // Outage window, then recovery.
    tokio::time::sleep(Duration::from_millis(300)).await;
    processor.set_up(true);
    tokio::time::sleep(Duration::from_millis(900)).await;
    agent.shutdown().await;

    let sequences = processor.sequences();
    assert!(!sequences.is_empty());
    assert_contiguous_from(&sequences, 1);
}
