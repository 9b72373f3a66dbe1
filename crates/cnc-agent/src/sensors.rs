//! Sensor polling and the periodic sampling loop.
//!
//! The loop ticks at the configured sampling rate, polls the sensor bank,
//! stamps identity plus the next sequence number on the reading and hands it
//! to the buffer manager. It never blocks on backpressure: ingest failures
//! are counted and surfaced, the next tick proceeds regardless.

use crate::manager::BufferManager;
use crate::shutdown::ShutdownSignal;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_wire::SensorRecord;

/// One poll of the machine's sensors, identity not yet attached.
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub temperature: f64,
    pub spindle_speed: f64,
    pub x_pos_mm: f64,
    pub y_pos_mm: f64,
    pub z_pos_mm: f64,
    pub feed_rate_actual: f64,
    pub spindle_load_percent: f64,
    pub total_power_kw: f64,
    pub machine_state: String,
    pub active_program_line: i32,
}

/// Source of sensor readings, one per machine.
pub trait SensorBank: Send {
    fn sample(&mut self) -> SensorReading;
}

/// Random-walk simulator standing in for a real controller connection.
///
/// Values drift plausibly between samples so batches compress like real
/// telemetry and downstream dashboards have something to show on bench rigs.
pub struct SimulatedSensorBank {
    rng: StdRng,
    temperature: f64,
    spindle_speed: f64,
    x_pos_mm: f64,
    y_pos_mm: f64,
    z_pos_mm: f64,
    program_line: i32,
}

impl SimulatedSensorBank {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            temperature: 32.0,
            spindle_speed: 8000.0,
            x_pos_mm: 0.0,
            y_pos_mm: 0.0,
            z_pos_mm: 50.0,
            program_line: 1,
        }
    }

    fn drift(&mut self, value: f64, step: f64, min: f64, max: f64) -> f64 {
        (value + self.rng.gen_range(-step..=step)).clamp(min, max)
    }
}

impl SensorBank for SimulatedSensorBank {
    fn sample(&mut self) -> SensorReading {
        self.temperature = self.drift(self.temperature, 0.3, 18.0, 85.0);
        self.spindle_speed = self.drift(self.spindle_speed, 150.0, 0.0, 24_000.0);
        self.x_pos_mm = self.drift(self.x_pos_mm, 2.5, -500.0, 500.0);
        self.y_pos_mm = self.drift(self.y_pos_mm, 2.5, -400.0, 400.0);
        self.z_pos_mm = self.drift(self.z_pos_mm, 1.0, 0.0, 300.0);
        self.program_line += i32::from(self.rng.gen_bool(0.4));

        let load = self.rng.gen_range(20.0..75.0);
        SensorReading {
            temperature: self.temperature,
            spindle_speed: self.spindle_speed,
            x_pos_mm: self.x_pos_mm,
            y_pos_mm: self.y_pos_mm,
            z_pos_mm: self.z_pos_mm,
            feed_rate_actual: self.rng.gen_range(800.0..2400.0),
            spindle_load_percent: load,
            total_power_kw: 2.0 + load * 0.12,
            machine_state: "RUNNING".to_string(),
            active_program_line: self.program_line,
        }
    }
}

/// Counters for the sampling loop.
#[derive(Debug, Default)]
pub struct SensorLoopMetrics {
    records_produced: AtomicU64,
    ingest_failures: AtomicU64,
}

impl SensorLoopMetrics {
    pub fn records_produced(&self) -> u64 {
        self.records_produced.load(Ordering::Relaxed)
    }

    pub fn ingest_failures(&self) -> u64 {
        self.ingest_failures.load(Ordering::Relaxed)
    }
}

/// Periodic sampling task for one machine.
pub struct SensorLoop<B: SensorBank> {
    machine_id: String,
    sampling_rate: Duration,
    bank: B,
    manager: Arc<BufferManager>,
    /// Next sequence number to assign; seeded at boot, never zero.
    sequence: Arc<AtomicU64>,
    metrics: Arc<SensorLoopMetrics>,
}

impl<B: SensorBank> SensorLoop<B> {
    /// `first_sequence` is the next number to assign, recovered from
    /// persisted state at boot. Zero is reserved and bumped to one.
    pub fn new(
        machine_id: String,
        sampling_rate: Duration,
        bank: B,
        manager: Arc<BufferManager>,
        first_sequence: u64,
    ) -> Self {
        Self {
            machine_id,
            sampling_rate,
            bank,
            manager,
            sequence: Arc::new(AtomicU64::new(first_sequence.max(1))),
            metrics: Arc::new(SensorLoopMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<SensorLoopMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs until shutdown. Oversampling never queues ticks: a tick that
    /// fires late simply replaces the missed ones.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.sampling_rate);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reading = self.bank.sample();
                    let sequence_number = self.sequence.fetch_add(1, Ordering::Relaxed);
                    let record = SensorRecord {
                        machine_id: self.machine_id.clone(),
                        sequence_number,
                        timestamp: Utc::now(),
                        temperature: reading.temperature,
                        spindle_speed: reading.spindle_speed,
                        x_pos_mm: reading.x_pos_mm,
                        y_pos_mm: reading.y_pos_mm,
                        z_pos_mm: reading.z_pos_mm,
                        feed_rate_actual: reading.feed_rate_actual,
                        spindle_load_percent: reading.spindle_load_percent,
                        total_power_kw: reading.total_power_kw,
                        machine_state: reading.machine_state,
                        active_program_line: reading.active_program_line,
                    };

                    match self.manager.ingest(&record) {
                        Ok(_) => {
                            self.metrics.records_produced.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            self.metrics.ingest_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(error = %err, sequence = sequence_number,
                                "ingest rejected sample");
                        }
                    }
                }
            }
        }

        tracing::info!(
            machine_id = %self.machine_id,
            produced = self.metrics.records_produced(),
            failures = self.metrics.ingest_failures(),
            "sensor loop stopped"
        );
    }
}
