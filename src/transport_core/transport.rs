use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Connection(String),
    Disconnected(String),
    Subscribe(String),
    Publish(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connection(msg) => write!(f, "Connection error: {}", msg),
            TransportError::Disconnected(msg) => write!(f, "Disconnected: {}", msg),
            TransportError::Subscribe(msg) => write!(f, "Subscribe error: {}", msg),
            TransportError::Publish(msg) => write!(f, "Publish error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Events surfaced by `Transport::poll`.
///
/// Delivery happens only through `poll`, so every event is handled by the task
/// that owns the supervisor loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message { topic: String, payload: String },
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl Publication {
    /// At-least-once, retained: late subscribers get the last aggregate
    pub fn retained(topic: String, payload: String) -> Self {
        Self {
            topic,
            payload,
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }
}

/// Publish/subscribe client driven by the connection supervisor
#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Post-connect liveness probe
    async fn ping(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, pattern: &str) -> Result<(), TransportError>;

    /// Service pending I/O for at most `timeout` and return what arrived
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError>;

    async fn publish(&mut self, publication: &Publication) -> Result<(), TransportError>;

    /// Endpoint description for logging
    fn endpoint(&self) -> String;
}
