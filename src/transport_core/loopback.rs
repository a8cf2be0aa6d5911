//! In-process transport
//!
//! Messages are injected through a `LoopbackHandle` and handed out by `poll`.
//! Failures (connect, liveness probe, disconnect) are scripted through the
//! same handle, which makes the supervisor testable without a broker and backs
//! the simulated runtime binary.

use super::transport::{Publication, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct LoopbackState {
    connected: bool,
    connect_attempts: u32,
    connect_failures_remaining: u32,
    probe_failures_remaining: u32,
    inbox: VecDeque<TransportEvent>,
    published: Vec<Publication>,
    subscriptions: Vec<String>,
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LoopbackTransport {
    endpoint: String,
    state: Arc<Mutex<LoopbackState>>,
}

/// Cloneable control side of a `LoopbackTransport`
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new(endpoint: impl Into<String>) -> (Self, LoopbackHandle) {
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        let transport = Self {
            endpoint: endpoint.into(),
            state: state.clone(),
        };
        (transport, LoopbackHandle { state })
    }

    fn drain(&self) -> Vec<TransportEvent> {
        let mut state = lock(&self.state);
        let mut events = Vec::new();
        while let Some(event) = state.inbox.pop_front() {
            let disconnected = matches!(event, TransportEvent::Disconnected { .. });
            events.push(event);
            if disconnected {
                state.connected = false;
                break;
            }
        }
        events
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        if state.connect_failures_remaining > 0 {
            state.connect_failures_remaining -= 1;
            return Err(TransportError::Connection(format!(
                "{} refused connection",
                self.endpoint
            )));
        }
        state.connected = true;
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::Disconnected("not connected".to_string()));
        }
        if state.probe_failures_remaining > 0 {
            state.probe_failures_remaining -= 1;
            return Err(TransportError::Connection("probe unanswered".to_string()));
        }
        Ok(())
    }

    async fn subscribe(&mut self, pattern: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::Subscribe(format!(
                "cannot subscribe to {} while disconnected",
                pattern
            )));
        }
        state.subscriptions.push(pattern.to_string());
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        if !lock(&self.state).connected {
            return Err(TransportError::Disconnected("not connected".to_string()));
        }

        let events = self.drain();
        if !events.is_empty() {
            return Ok(events);
        }

        tokio::time::sleep(timeout).await;
        Ok(self.drain())
    }

    async fn publish(&mut self, publication: &Publication) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::Disconnected(format!(
                "cannot publish to {} while disconnected",
                publication.topic
            )));
        }
        state.published.push(publication.clone());
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

impl LoopbackHandle {
    pub fn inject_message(&self, topic: impl Into<String>, payload: impl Into<String>) {
        lock(&self.state).inbox.push_back(TransportEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Queue a disconnect, delivered after any messages already queued
    pub fn disconnect(&self, reason: impl Into<String>) {
        lock(&self.state).inbox.push_back(TransportEvent::Disconnected {
            reason: reason.into(),
        });
    }

    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.state).connect_failures_remaining = count;
    }

    pub fn fail_next_probes(&self, count: u32) {
        lock(&self.state).probe_failures_remaining = count;
    }

    pub fn published(&self) -> Vec<Publication> {
        lock(&self.state).published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.state).connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let (mut transport, handle) = LoopbackTransport::new("loopback://test");
        handle.fail_next_connects(2);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(handle.connect_attempts(), 3);
        assert!(handle.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_at_disconnect() {
        let (mut transport, handle) = LoopbackTransport::new("loopback://test");
        transport.connect().await.unwrap();

        handle.inject_message("a/b", "1~C 2%");
        handle.disconnect("broker restart");
        handle.inject_message("a/c", "3~C 4%");

        let events = transport.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], TransportEvent::Disconnected { .. }));
        assert!(!handle.is_connected());
        assert!(transport.poll(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let (mut transport, handle) = LoopbackTransport::new("loopback://test");
        let publication = Publication::retained("t".to_string(), "[]".to_string());

        assert!(transport.publish(&publication).await.is_err());
        transport.connect().await.unwrap();
        transport.publish(&publication).await.unwrap();
        assert_eq!(handle.published(), vec![publication]);
    }
}
