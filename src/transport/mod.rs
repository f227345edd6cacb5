//! Transport layer for publishing records
//!
//! Two traits form the seam between the connection supervisor and the MQTT
//! client library. [`Transport`] is the request side the supervisor calls
//! synchronously; [`EventSource`] is the network side of one session,
//! polled by a dedicated task. Both can be replaced by a scripted transport
//! in tests.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;

pub mod mqtt;

pub use mqtt::MqttError;

/// Connection-level happenings surfaced by [`EventSource::next_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the session handshake
    ConnectionAcknowledged,
    /// Broker closed the session with a DISCONNECT packet
    Disconnected,
    /// Our own DISCONNECT has been written to the socket
    DisconnectSent,
    /// Anything else (acks, pings, outgoing publishes)
    Other(String),
}

/// One outgoing publish with its sequence identifier
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub seq: u16,
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Network side of one session.
///
/// `next_event` is not assumed to be cancel safe: the supervisor runs each
/// source in its own task and only drops it when the session is abandoned.
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Drive network I/O until the next connection-level event; an error
    /// means the low-level connection is gone
    async fn next_event(&mut self) -> Result<TransportEvent, MqttError>;
}

/// Request side of a publish/subscribe connection, owned by one supervisor
pub trait Transport: Send {
    type Events: EventSource;

    /// Start a fresh session to the broker, replacing any previous one, and
    /// hand back its event source
    fn connect(&mut self) -> Self::Events;

    /// Queue a message for the current session without waiting on the network
    fn publish(&mut self, message: OutgoingMessage) -> Result<(), MqttError>;

    /// Request a clean disconnect of the current session
    fn disconnect(&mut self) -> Result<(), MqttError>;

    /// Broker address for log messages
    fn peer(&self) -> String;
}
