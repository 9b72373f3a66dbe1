//! Agent assembly: wires tiers, drain, sensor loop and supervisor together.

use crate::cold::{ColdBuffer, ColdError};
use crate::config::{AgentConfig, ConfigError};
use crate::events::{AgentEvent, EventBus};
use crate::manager::{BatchPolicy, BufferManager};
use crate::processor::ProcessorBoxed;
use crate::sensors::{SensorBank, SensorLoop, SensorLoopMetrics};
use crate::shutdown::ShutdownSignal;
use crate::state::{AgentState, StateMachine};
use crate::warm::{WarmBuffer, WarmError};
use hotring::{ByteRing, RingConfig};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Error types for agent startup.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),
    #[error("warm buffer: {0}")]
    Warm(#[from] WarmError),
    #[error("cold buffer: {0}")]
    Cold(#[from] ColdError),
}

/// A running edge agent: its task set plus handles for observation.
pub struct Agent {
    manager: Arc<BufferManager>,
    state: Arc<StateMachine>,
    shutdown: ShutdownSignal,
    sensor_metrics: Arc<SensorLoopMetrics>,
    tasks: JoinSet<()>,
}

impl Agent {
    /// Opens the buffer tiers, recovers the sequence counter from the warm
    /// file and spawns the drain, sensor and supervisor tasks.
    ///
    /// The caller owns the state machine and is expected to have driven it
    /// through bootstrap → connecting while establishing the processor's
    /// connection; a successful start transitions it to online.
    pub fn start<B>(
        config: &AgentConfig,
        bank: B,
        processor: Arc<dyn ProcessorBoxed>,
        state: Arc<StateMachine>,
        events: EventBus,
    ) -> Result<Self, AgentError>
    where
        B: SensorBank + 'static,
    {
        config.validate()?;

        let hot = ByteRing::new(RingConfig::new(config.buffering.hot_buffer.capacity, true));
        let warm = WarmBuffer::open(
            &config.buffering.warm_buffer.path,
            config.buffering.warm_buffer.size,
        )?;
        let cold = ColdBuffer::open(
            &config.buffering.cold_buffer.path,
            config.buffering.cold_buffer.max_size,
        )?;

        // Sequence numbering resumes after anything the warm file still
        // holds; it never restarts at zero.
        let first_sequence = warm
            .recover_last_sequence(&config.agent.machine_id)?
            .map_or(1, |last| last + 1);
        tracing::info!(
            machine_id = %config.agent.machine_id,
            first_sequence,
            warm_replay_bytes = warm.unread_bytes(),
            "agent starting"
        );

        let manager = Arc::new(BufferManager::new(
            hot,
            warm,
            cold,
            BatchPolicy {
                size: config.buffering.batching.size,
                timeout: config.buffering.batching.timeout(),
            },
            events.clone(),
        ));

        let sensor_loop = SensorLoop::new(
            config.agent.machine_id.clone(),
            config.agent.sampling_rate(),
            bank,
            Arc::clone(&manager),
            first_sequence,
        );
        let sensor_metrics = sensor_loop.metrics();

        let shutdown = ShutdownSignal::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(run_supervisor(
            Arc::clone(&state),
            events.subscribe(),
            shutdown.clone(),
        ));
        tasks.spawn(Arc::clone(&manager).run_drain(processor, shutdown.clone()));
        tasks.spawn(sensor_loop.run(shutdown.clone()));

        let _ = state.transition(AgentState::Online);

        Ok(Self {
            manager,
            state,
            shutdown,
            sensor_metrics,
            tasks,
        })
    }

    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    pub fn state(&self) -> AgentState {
        self.state.state()
    }

    pub fn sensor_metrics(&self) -> &Arc<SensorLoopMetrics> {
        &self.sensor_metrics
    }

    /// Handle external code can use to trigger shutdown.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Cancels all tasks and waits for them to flush and exit.
    pub async fn shutdown(mut self) {
        self.shutdown.shutdown();
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Maps bus events onto state machine transitions. Repeated or currently
/// impossible transitions are simply ignored; the permission table is the
/// arbiter.
async fn run_supervisor(
    state: Arc<StateMachine>,
    mut events: broadcast::Receiver<AgentEvent>,
    shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = state.transition(AgentState::Shutdown);
                break;
            }
            event = events.recv() => match event {
                Ok(event) => apply_event(&state, &event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "supervisor lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn apply_event(state: &StateMachine, event: &AgentEvent) {
    use AgentEvent::*;

    let target = match event {
        HotFull | WarmEngaged | ColdEngaged | DrainStalled { .. } => Some(AgentState::Buffering),
        DrainRecovered => Some(AgentState::Online),
        PublisherDisconnected { .. } | PublisherFatal { .. } => Some(AgentState::Degraded),
        PublisherRecovered => (state.state() == AgentState::Degraded)
            .then_some(AgentState::Recovering),
        RecordsDropped { count } => {
            tracing::warn!(count, "records dropped at ingest");
            None
        }
    };

    if let Some(target) = target {
        if state.state() != target {
            let _ = state.transition(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_machine() -> StateMachine {
        let sm = StateMachine::new();
        sm.transition(AgentState::Connecting).unwrap();
        sm.transition(AgentState::Online).unwrap();
        sm
    }

    #[test]
    fn test_backpressure_events_enter_buffering() {
        let sm = online_machine();
        apply_event(&sm, &AgentEvent::HotFull);
        assert_eq!(sm.state(), AgentState::Buffering);

        // Repeats are no-ops.
        apply_event(&sm, &AgentEvent::WarmEngaged);
        assert_eq!(sm.state(), AgentState::Buffering);
    }

    #[test]
    fn test_drain_recovery_returns_online() {
        let sm = online_machine();
        apply_event(&sm, &AgentEvent::DrainStalled { attempts: 1 });
        assert_eq!(sm.state(), AgentState::Buffering);
        apply_event(&sm, &AgentEvent::DrainRecovered);
        assert_eq!(sm.state(), AgentState::Online);
    }

    #[test]
    fn test_publisher_fatal_degrades_then_recovers() {
        let sm = online_machine();
        apply_event(
            &sm,
            &AgentEvent::PublisherFatal {
                reason: "authorization violation".to_string(),
            },
        );
        assert_eq!(sm.state(), AgentState::Degraded);

        apply_event(&sm, &AgentEvent::PublisherRecovered);
        assert_eq!(sm.state(), AgentState::Recovering);
        apply_event(&sm, &AgentEvent::DrainRecovered);
        assert_eq!(sm.state(), AgentState::Online);
    }

    #[test]
    fn test_drops_do_not_change_state() {
        let sm = online_machine();
        apply_event(&sm, &AgentEvent::RecordsDropped { count: 10 });
        assert_eq!(sm.state(), AgentState::Online);
    }
}
