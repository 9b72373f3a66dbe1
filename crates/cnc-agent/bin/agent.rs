//! Edge agent binary.
//!
//! Runs the full pipeline against a local broker with the simulated sensor
//! bank. Configuration loading is the deployment layer's concern; this binary
//! runs on the typed defaults, which match a stock local NATS server.

use anyhow::Context;
use cnc_agent::{
    Agent, AgentConfig, AgentState, EventBus, JetStreamPublisher, ProcessorBoxed,
    SimulatedSensorBank, StateMachine,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::default();
    config.validate().context("invalid configuration")?;

    let state = Arc::new(StateMachine::new());
    let events = EventBus::default();

    state
        .transition(AgentState::Connecting)
        .context("state machine rejected startup")?;

    let publisher = match JetStreamPublisher::connect(&config.stream, events.clone()).await {
        Ok(publisher) => Arc::new(publisher) as Arc<dyn ProcessorBoxed>,
        Err(err) => {
            let _ = state.transition(AgentState::Shutdown);
            return Err(err).context("broker connection failed");
        }
    };

    let bank = SimulatedSensorBank::new(rand::random());
    let agent = Agent::start(&config, bank, publisher, Arc::clone(&state), events)
        .context("agent startup failed")?;

    tracing::info!(machine_id = %config.agent.machine_id, "agent online, ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("signal handler")?;

    tracing::info!("shutting down");
    agent.shutdown().await;
    Ok(())
}
