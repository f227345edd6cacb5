//! rumqttc-backed transport
//!
//! [`MqttTransport`] keeps the `AsyncClient` of the current session for
//! publish requests. Each session's `EventLoop` is handed out as an
//! [`MqttEvents`] and polled by its own task, because `EventLoop::poll`
//! loses handshake and write progress when its future is dropped.

use super::connection::{configure_mqtt_options, MqttError, SessionOptions};
use super::message_handler::MessageHandler;
use crate::transport::{EventSource, OutgoingMessage, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use tracing::debug;

/// Bound of the request channel between `AsyncClient` and the event loop
const REQUEST_CAPACITY: usize = 100;

pub struct MqttTransport {
    options: MqttOptions,
    peer: String,
    client: Option<AsyncClient>,
}

impl MqttTransport {
    /// Prepare options; nothing touches the network until a session's
    /// events are polled
    pub fn new(session: &SessionOptions) -> Self {
        Self {
            options: configure_mqtt_options(session),
            peer: session.address.to_string(),
            client: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, MqttError> {
        self.client
            .as_ref()
            .ok_or_else(|| MqttError::PublishFailed("no MQTT session started".into()))
    }
}

/// Event loop of one rumqttc session
pub struct MqttEvents {
    event_loop: EventLoop,
}

#[async_trait]
impl EventSource for MqttEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, MqttError> {
        match self.event_loop.poll().await {
            Ok(event) => Ok(MessageHandler::route_mqtt_event(&event)),
            Err(error) => Err(MqttError::ConnectionFailed(Box::new(error))),
        }
    }
}

impl Transport for MqttTransport {
    type Events = MqttEvents;

    fn connect(&mut self) -> MqttEvents {
        debug!(peer = %self.peer, "Creating MQTT client");
        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        self.client = Some(client);
        MqttEvents { event_loop }
    }

    fn publish(&mut self, message: OutgoingMessage) -> Result<(), MqttError> {
        self.client()?
            .try_publish(message.topic, message.qos, message.retain, message.payload)
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    fn disconnect(&mut self) -> Result<(), MqttError> {
        self.client
            .as_ref()
            .ok_or_else(|| MqttError::DisconnectFailed("no MQTT session started".into()))?
            .try_disconnect()
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::{BrokerAddress, ClientIdentity};
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::QoS;

    fn session() -> SessionOptions {
        SessionOptions::new(
            BrokerAddress::parse("mqtt://127.0.0.1:1").unwrap(),
            ClientIdentity::derive("test", None),
        )
    }

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            seq: 1,
            topic: "rtl_433/test/events".to_string(),
            payload: Bytes::from_static(b"{}"),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    #[tokio::test]
    async fn test_new_transport_does_not_connect() {
        let transport = MqttTransport::new(&session());
        assert_eq!(transport.peer(), "127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_publish_needs_a_session() {
        let mut transport = MqttTransport::new(&session());
        assert!(matches!(
            transport.publish(message()),
            Err(MqttError::PublishFailed(_))
        ));
        assert!(matches!(
            transport.disconnect(),
            Err(MqttError::DisconnectFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_is_queued_without_network() {
        let mut transport = MqttTransport::new(&session());
        let _events = transport.connect();
        assert!(transport.publish(message()).is_ok());

        // a new session replaces the client
        let _events = transport.connect();
        assert!(transport.publish(message()).is_ok());
    }

    #[tokio::test]
    async fn test_events_report_refused_connection() {
        let mut transport = MqttTransport::new(&session());
        let mut events = transport.connect();
        let result = tokio::time::timeout(std::time::Duration::from_secs(10), events.next_event())
            .await
            .expect("connect attempt should finish quickly");
        assert!(matches!(result, Err(MqttError::ConnectionFailed(_))));
    }
}
