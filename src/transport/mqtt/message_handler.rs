//! Mapping of rumqttc events onto transport events

use crate::transport::TransportEvent;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure routing of MQTT event loop output
pub struct MessageHandler;

impl MessageHandler {
    /// Classify one event loop notification
    pub fn route_mqtt_event(event: &Event) -> TransportEvent {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) if connack.code == ConnectReturnCode::Success => {
                    TransportEvent::ConnectionAcknowledged
                }
                Packet::Disconnect(_) => TransportEvent::Disconnected,
                other => TransportEvent::Other(Self::packet_name(other).to_string()),
            },
            Event::Outgoing(Outgoing::Disconnect) => TransportEvent::DisconnectSent,
            Event::Outgoing(outgoing) => TransportEvent::Other(format!("{outgoing:?}")),
        }
    }

    fn packet_name(packet: &Packet) -> &'static str {
        match packet {
            Packet::Connect(..) => "Connect",
            Packet::ConnAck(_) => "ConnAck",
            Packet::Publish(_) => "Publish",
            Packet::PubAck(_) => "PubAck",
            Packet::PingReq(_) => "PingReq",
            Packet::PingResp(_) => "PingResp",
            Packet::Disconnect(_) => "Disconnect",
            _ => "Packet",
        }
    }
}
