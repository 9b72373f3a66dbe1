//! Typed event bus decoupling the agent's components.
//!
//! The buffer manager, publisher and sensor loop emit events here; the
//! supervisor subscribes and drives state machine transitions. Components
//! depend on the bus handle, never on each other, which keeps the
//! manager ↔ publisher ↔ state machine triangle acyclic.

use tokio::sync::broadcast;

/// Events the supervisor reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The hot ring rejected an append; the record was demoted.
    HotFull,
    /// A record landed in the warm file.
    WarmEngaged,
    /// A record fell through to the cold log.
    ColdEngaged,
    /// Records were lost because every tier refused them.
    RecordsDropped { count: u64 },
    /// A batch failed to publish and is being retried with backoff.
    DrainStalled { attempts: u32 },
    /// A previously stalled batch went through.
    DrainRecovered,
    /// Publish failures crossed the reconnect budget.
    PublisherDisconnected { consecutive_failures: u32 },
    /// A publish succeeded after a failure streak.
    PublisherRecovered,
    /// Unrecoverable publisher condition (authorization, topology).
    PublisherFatal { reason: String },
}

/// Cloneable broadcast handle for [`AgentEvent`]s.
///
/// Emission never blocks and never fails: with no subscribers the event is
/// simply dropped, which keeps emitters oblivious to listener lifecycle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` undelivered events per
    /// subscriber before the slowest one starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: AgentEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(AgentEvent::HotFull);
        bus.emit(AgentEvent::RecordsDropped { count: 3 });

        assert_eq!(rx.recv().await.unwrap(), AgentEvent::HotFull);
        assert_eq!(
            rx.recv().await.unwrap(),
            AgentEvent::RecordsDropped { count: 3 }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.emit(AgentEvent::DrainRecovered);
    }
}
