//! Agent lifecycle state machine.
//!
//! Transitions are validated against a fixed permission table and never
//! suspend; listener fan-out goes through a broadcast channel *after* the
//! state lock is released, so a slow listener can never block a transition.

use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;

/// Lifecycle states of the edge agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    /// Process start; resources not yet opened.
    Bootstrap,
    /// Establishing the broker connection.
    Connecting,
    /// Publishing normally.
    Online,
    /// Backpressure: records are accumulating in warm/cold tiers.
    Buffering,
    /// Publisher gave up (fatal error or reconnect budget exhausted).
    Degraded,
    /// Replaying buffered data after a recovery.
    Recovering,
    /// Terminal.
    Shutdown,
}

impl AgentState {
    /// Permission table for transitions out of this state.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Bootstrap, Connecting | Shutdown)
                | (Connecting, Online | Buffering | Shutdown)
                | (Online, Buffering | Degraded | Shutdown)
                | (Buffering, Online | Recovering | Degraded | Shutdown)
                | (Degraded, Recovering | Online | Shutdown)
                | (Recovering, Online | Buffering | Degraded | Shutdown)
        )
    }

    /// Shutdown has no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        self == AgentState::Shutdown
    }
}

/// A completed transition, including how long the previous state lasted.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: AgentState,
    pub to: AgentState,
    /// Time spent in `from`.
    pub spent: Duration,
}

/// Error types for state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// The transition is not in the permitted set; state is unchanged.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: AgentState, to: AgentState },
}

struct Current {
    state: AgentState,
    entered_at: Instant,
}

/// Validated state holder with non-blocking listener dispatch.
pub struct StateMachine {
    current: RwLock<Current>,
    tx: broadcast::Sender<Transition>,
}

impl StateMachine {
    /// Starts in [`AgentState::Bootstrap`].
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self {
            current: RwLock::new(Current {
                state: AgentState::Bootstrap,
                entered_at: Instant::now(),
            }),
            tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        self.current.read().unwrap().state
    }

    /// Attempts a transition. On success the completed [`Transition`] — with
    /// the time spent in the previous state — is returned and broadcast to
    /// listeners; on failure the state is unchanged.
    pub fn transition(&self, to: AgentState) -> Result<Transition, StateError> {
        let transition = {
            let mut current = self.current.write().unwrap();
            if !current.state.can_transition_to(to) {
                return Err(StateError::InvalidTransition {
                    from: current.state,
                    to,
                });
            }
            let transition = Transition {
                from: current.state,
                to,
                spent: current.entered_at.elapsed(),
            };
            current.state = to;
            current.entered_at = Instant::now();
            transition
        };

        // Lock released: listeners consume at their own pace.
        let _ = self.tx.send(transition.clone());
        tracing::info!(from = ?transition.from, to = ?transition.to,
            spent_ms = transition.spent.as_millis() as u64, "state transition");
        Ok(transition)
    }

    /// Subscribes to completed transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
