//! Connection supervisor - connect, probe, service loop, reconnect
//!
//! ```text
//! Disconnected --Start--> Connecting --ConnectSucceeded--> Connected
//!                          |  ^   |                            |
//!          ConnectFailed --+--+   +--RetriesExhausted--> GivenUp (fatal)
//!                             |                                |
//!                             +--BackoffElapsed-- Retrying <---+ TransportLost
//! ```
//!
//! Every state except `GivenUp` moves to `Disconnected` on `Stop`.

use super::config::SupervisorSettings;
use super::error_handler::{ConstantBackoff, FibonacciBackoff, MaxRetriesExceeded};
use super::transport::{Publication, Transport, TransportError, TransportEvent};
use crate::pipeline::{AggregationEngine, EngineError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const CONNECT_OPERATION: &str = "connect";
const PROBE_OPERATION: &str = "liveness probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Retrying,
    GivenUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Start,
    ConnectSucceeded,
    ConnectFailed,
    RetriesExhausted,
    TransportLost,
    BackoffElapsed,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: SupervisorEvent,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "No transition from {:?} on {:?}", self.from, self.event)
    }
}

impl std::error::Error for InvalidTransition {}

impl ConnectionState {
    /// Transition table
    pub fn on(self, event: SupervisorEvent) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;
        use SupervisorEvent::*;

        match (self, event) {
            (GivenUp, _) => Err(InvalidTransition { from: self, event }),
            (_, Stop) => Ok(Disconnected),
            (Disconnected, Start) => Ok(Connecting),
            (Connecting, ConnectSucceeded) => Ok(Connected),
            (Connecting, ConnectFailed) => Ok(Connecting),
            (Connecting, RetriesExhausted) => Ok(GivenUp),
            (Connected, TransportLost) => Ok(Retrying),
            (Retrying, BackoffElapsed) => Ok(Connecting),
            _ => Err(InvalidTransition { from: self, event }),
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::GivenUp
    }
}

#[derive(Debug)]
pub enum SupervisorError {
    GivenUp(MaxRetriesExceeded),
    InvalidTransition(InvalidTransition),
}

impl From<InvalidTransition> for SupervisorError {
    fn from(err: InvalidTransition) -> Self {
        SupervisorError::InvalidTransition(err)
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::GivenUp(e) => write!(f, "Supervisor gave up: {}", e),
            SupervisorError::InvalidTransition(e) => write!(f, "Supervisor fault: {}", e),
        }
    }
}

impl std::error::Error for SupervisorError {}

/// Requests a cooperative stop; the loop exits after its current tick.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

enum Flow {
    Continue,
    Stopped,
    Lost(String),
}

pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    engine: AggregationEngine,
    settings: SupervisorSettings,
    state: ConnectionState,
    backoff: FibonacciBackoff,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    outbox: VecDeque<Publication>,
    transitions: Vec<ConnectionState>,
    backoff_waits: Vec<Duration>,
    publications_emitted: u64,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(transport: T, engine: AggregationEngine, settings: SupervisorSettings) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let backoff = FibonacciBackoff::new(
            settings.retry_base,
            settings.retry_max_wait,
            settings.retry_max_tries,
        );

        Self {
            transport,
            engine,
            settings,
            state: ConnectionState::Disconnected,
            backoff,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            outbox: VecDeque::new(),
            transitions: vec![ConnectionState::Disconnected],
            backoff_waits: Vec::new(),
            publications_emitted: 0,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Every state entered so far, starting with `Disconnected`
    pub fn transitions(&self) -> &[ConnectionState] {
        &self.transitions
    }

    /// Fibonacci waits slept between connection attempts
    pub fn backoff_waits(&self) -> &[Duration] {
        &self.backoff_waits
    }

    pub fn publications_emitted(&self) -> u64 {
        self.publications_emitted
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Drive the state machine until stopped (`Ok`) or until a retry budget
    /// is exhausted (`Err(GivenUp)`).
    pub async fn run(&mut self) -> Result<(), SupervisorError> {
        log::info!("🚀 Supervisor starting for {}", self.transport.endpoint());
        self.apply(SupervisorEvent::Start)?;

        loop {
            let flow = match self.state {
                ConnectionState::Connecting => self.connect().await?,
                ConnectionState::Connected => self.service().await,
                ConnectionState::Retrying => {
                    let delay = self.backoff.initial_delay();
                    self.backoff_waits.push(delay);
                    log::warn!("🔁 Reconnecting to {} in {:?}", self.transport.endpoint(), delay);
                    if self.wait(delay).await {
                        self.apply(SupervisorEvent::BackoffElapsed)?;
                        Flow::Continue
                    } else {
                        Flow::Stopped
                    }
                }
                ConnectionState::Disconnected | ConnectionState::GivenUp => return Ok(()),
            };

            match flow {
                Flow::Continue => {}
                Flow::Stopped => {
                    self.apply(SupervisorEvent::Stop)?;
                    log::info!("🛑 Supervisor stopped");
                    return Ok(());
                }
                Flow::Lost(reason) => {
                    log::warn!("⚠️  Connection to {} lost: {}", self.transport.endpoint(), reason);
                    self.apply(SupervisorEvent::TransportLost)?;
                }
            }
        }
    }

    fn apply(&mut self, event: SupervisorEvent) -> Result<(), InvalidTransition> {
        let next = self.state.on(event)?;
        log::debug!("🔀 {:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
        self.transitions.push(next);
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Sleep for `delay`; returns false if a stop was requested meanwhile
    async fn wait(&mut self, delay: Duration) -> bool {
        if self.stop_requested() {
            return false;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        (&mut sleep).await;
                        return true;
                    }
                    if *self.stop_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// Connect attempts with Fibonacci backoff until connected, stopped or
    /// out of budget.
    async fn connect(&mut self) -> Result<Flow, SupervisorError> {
        self.backoff.reset();

        loop {
            if self.stop_requested() {
                return Ok(Flow::Stopped);
            }

            match self.try_connect().await {
                Ok(()) => {
                    self.apply(SupervisorEvent::ConnectSucceeded)?;
                    self.backoff.reset();
                    log::info!("✅ Connected to {}", self.transport.endpoint());
                    return Ok(Flow::Continue);
                }
                Err(e) => {
                    if self.stop_requested() {
                        return Ok(Flow::Stopped);
                    }
                    log::error!("❌ Connection to {} failed: {}", self.transport.endpoint(), e);

                    match self.backoff.next_delay(CONNECT_OPERATION) {
                        Ok(delay) => {
                            self.apply(SupervisorEvent::ConnectFailed)?;
                            self.backoff_waits.push(delay);
                            if !self.wait(delay).await {
                                return Ok(Flow::Stopped);
                            }
                        }
                        Err(exhausted) => {
                            self.apply(SupervisorEvent::RetriesExhausted)?;
                            log::error!("💀 {}", exhausted);
                            return Err(SupervisorError::GivenUp(exhausted));
                        }
                    }
                }
            }
        }
    }

    /// One connection attempt: connect, liveness probe, subscriptions
    async fn try_connect(&mut self) -> Result<(), TransportError> {
        self.transport.connect().await?;

        let mut probe = ConstantBackoff::new(self.settings.probe_interval, self.settings.probe_max_tries);
        loop {
            match self.transport.ping().await {
                Ok(()) => break,
                Err(e) => {
                    log::debug!("Liveness probe failed: {}", e);
                    let delay = probe
                        .next_delay(PROBE_OPERATION)
                        .map_err(|exhausted| TransportError::Connection(exhausted.to_string()))?;
                    if !self.wait(delay).await {
                        return Err(TransportError::Connection(
                            "stopped during liveness probe".to_string(),
                        ));
                    }
                }
            }
        }

        for pattern in self.engine.patterns() {
            self.transport.subscribe(&pattern).await?;
            log::info!("📡 Subscribed to: {}", pattern);
        }

        Ok(())
    }

    /// Service loop: poll transport, feed messages, tick aggregators,
    /// publish, sleep.
    async fn service(&mut self) -> Flow {
        loop {
            if self.stop_requested() {
                return Flow::Stopped;
            }

            // Retry publications left over from a previous connection
            if let Err(reason) = self.flush_outbox().await {
                return Flow::Lost(reason);
            }

            let events = match self.transport.poll(self.settings.poll_timeout).await {
                Ok(events) => events,
                Err(e) => return Flow::Lost(e.to_string()),
            };

            for event in events {
                match event {
                    TransportEvent::Message { topic, payload } => {
                        self.handle_message(&topic, &payload);
                    }
                    TransportEvent::Disconnected { reason } => return Flow::Lost(reason),
                }
            }

            let publications = self.engine.tick_all();
            self.outbox.extend(publications);
            if let Err(reason) = self.flush_outbox().await {
                return Flow::Lost(reason);
            }

            if !self.wait(self.settings.poll_interval).await {
                return Flow::Stopped;
            }
        }
    }

    fn handle_message(&mut self, topic: &str, payload: &str) {
        match self.engine.handle_message(topic, payload) {
            Ok(publications) => self.outbox.extend(publications),
            Err(EngineError::Payload(e)) => {
                log::warn!("⚠️  Dropping message on {}: {}", topic, e);
            }
            Err(e) => {
                log::error!("❌ Rejected message on {}: {}", topic, e);
            }
        }
    }

    async fn flush_outbox(&mut self) -> Result<(), String> {
        while let Some(publication) = self.outbox.pop_front() {
            if self.settings.dry_run {
                let rendered = serde_json::to_string(&publication)
                    .unwrap_or_else(|_| format!("{:?}", publication));
                log::info!("🧪 [dry-run] {}", rendered);
                self.publications_emitted += 1;
                continue;
            }

            match self.transport.publish(&publication).await {
                Ok(()) => {
                    log::info!("📤 Pub topic: {}", publication.topic);
                    self.publications_emitted += 1;
                }
                Err(TransportError::Disconnected(reason)) => {
                    self.outbox.push_front(publication);
                    return Err(reason);
                }
                Err(e) => {
                    log::error!("❌ Failed to publish {}: {}", publication.topic, e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;
    use SupervisorEvent::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(Disconnected.on(Start), Ok(Connecting));
        assert_eq!(Connecting.on(ConnectFailed), Ok(Connecting));
        assert_eq!(Connecting.on(ConnectSucceeded), Ok(Connected));
        assert_eq!(Connecting.on(RetriesExhausted), Ok(GivenUp));
        assert_eq!(Connected.on(TransportLost), Ok(Retrying));
        assert_eq!(Retrying.on(BackoffElapsed), Ok(Connecting));
        assert_eq!(Connected.on(Stop), Ok(Disconnected));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(Disconnected.on(ConnectSucceeded).is_err());
        assert!(Connected.on(ConnectFailed).is_err());
        assert!(Retrying.on(ConnectSucceeded).is_err());
        assert!(GivenUp.on(Start).is_err());
        assert!(GivenUp.on(Stop).is_err());
        assert!(GivenUp.is_terminal());
        assert!(!Retrying.is_terminal());
    }
}
