//! MQTT broker transport built on rumqttc
//!
//! Each `connect` builds a fresh client/event loop pair and waits for the
//! broker's CONNACK. After that the event loop is only driven from `poll`, so
//! inbound publishes, outbound requests and keep-alives are all serviced on
//! the supervisor's task.

use super::config::RuntimeConfig;
use super::transport::{Publication, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

/// Capacity of the client's request channel
const REQUEST_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl MqttSettings {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_id: config
                .client_id
                .clone()
                .unwrap_or_else(|| format!("topicflow-{}", std::process::id())),
            username: config.username.clone(),
            password: config.password.clone(),
            keep_alive: config.keep_alive,
            connect_timeout: config.connect_timeout,
        }
    }

    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);

        if let Some(user) = &self.username {
            options.set_credentials(user.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub struct MqttTransport {
    settings: MqttSettings,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: None,
            eventloop: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some() && self.eventloop.is_some()
    }

    fn drop_connection(&mut self) {
        self.client = None;
        self.eventloop = None;
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::Disconnected("not connected".to_string()))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.drop_connection();
        let (client, mut eventloop) = AsyncClient::new(self.settings.options(), REQUEST_CAPACITY);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Connection(e.to_string())),
                }
            }
        };

        match timeout(self.settings.connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TransportError::Connection(format!(
                    "no CONNACK from {} within {:?}",
                    self.endpoint(),
                    self.settings.connect_timeout
                )))
            }
        }

        log::info!("🔌 MQTT session open as '{}'", self.settings.client_id);
        self.client = Some(client);
        self.eventloop = Some(eventloop);
        Ok(())
    }

    /// The CONNACK already proved the session; afterwards liveness is the
    /// event loop's keep-alive.
    async fn ping(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Disconnected("not connected".to_string()))
        }
    }

    async fn subscribe(&mut self, pattern: &str) -> Result<(), TransportError> {
        self.client()?
            .try_subscribe(pattern, rumqttc::QoS::AtLeastOnce)
            .map_err(|e| TransportError::Subscribe(format!("{}: {}", pattern, e)))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        let Some(eventloop) = self.eventloop.as_mut() else {
            return Err(TransportError::Disconnected("not connected".to_string()));
        };

        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        let mut lost = None;

        loop {
            match timeout_at(deadline, eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    events.push(TransportEvent::Message {
                        topic: publish.topic,
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    });
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    lost = Some("broker sent DISCONNECT".to_string());
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    lost = Some(e.to_string());
                    break;
                }
            }
        }

        if let Some(reason) = lost {
            self.drop_connection();
            events.push(TransportEvent::Disconnected { reason });
        }
        Ok(events)
    }

    async fn publish(&mut self, publication: &Publication) -> Result<(), TransportError> {
        self.client()?
            .try_publish(
                publication.topic.clone(),
                to_mqtt_qos(publication.qos),
                publication.retain,
                publication.payload.clone().into_bytes(),
            )
            .map_err(|e| TransportError::Publish(format!("{}: {}", publication.topic, e)))
    }

    fn endpoint(&self) -> String {
        match &self.settings.username {
            Some(user) => format!("mqtt://{}@{}:{}", user, self.settings.host, self.settings.port),
            None => format!("mqtt://{}:{}", self.settings.host, self.settings.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16) -> MqttSettings {
        MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            client_id: "topicflow-test".to_string(),
            username: Some("sensor".to_string()),
            password: Some("secret".to_string()),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_options_from_settings() {
        let options = settings(1883).options();
        assert_eq!(options.client_id(), "topicflow-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1883));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_mqtt_qos(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_requires_session_before_io() {
        let mut transport = MqttTransport::new(settings(1883));
        let publication = Publication::retained("t".to_string(), "[]".to_string());

        assert!(matches!(
            transport.publish(&publication).await,
            Err(TransportError::Disconnected(_))
        ));
        assert!(matches!(
            transport.poll(Duration::from_millis(10)).await,
            Err(TransportError::Disconnected(_))
        ));
        assert!(transport.ping().await.is_err());
        assert_eq!(transport.endpoint(), "mqtt://sensor@127.0.0.1:1883");
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_connect() {
        // Nothing listens on port 1
        let mut transport = MqttTransport::new(settings(1));
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connection(_))
        ));
        assert!(!transport.is_connected());
    }
}
