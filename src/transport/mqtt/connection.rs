//! Connection configuration and state for the MQTT session
//!
//! Pure data and conversions: broker address parsing, client identity,
//! session options and their mapping onto rumqttc [`MqttOptions`].

use crc::{Crc, CRC_16_IBM_3740};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::{Host, Url};

/// Presence payload published (retained) to the last-will topic on connect
pub const LWT_ONLINE: &str = "online";

/// Presence payload the broker delivers on unclean disconnect
pub const LWT_OFFLINE: &str = "offline";

/// Default plain MQTT port
pub const DEFAULT_PORT: u16 = 1883;

/// CRC-16, poly 0x1021, init 0xffff, MSB first
const IDENTITY_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Connection state, owned by the supervisor task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Low-level connection requested, waiting for the broker's ConnAck
    Connecting,
    /// Session accepted, publishes go out
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Retry pacing once a session has been established at least once
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconnectConfig {
    /// Optional pause before each consecutive failed attempt after the
    /// first. Zero by default: every reconnect starts immediately.
    pub retry_delay: Duration,
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Initial connection failed: {0}")]
    InitialConnectFailed(String),
    #[error("Timed out after {0:?} waiting for the broker to accept the session")]
    ConnectTimeout(Duration),
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection supervisor stopped")]
    SupervisorStopped,
}

/// Broker host and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Parse `mqtt://host[:port]`; the scheme may be omitted. IPv6 literals
    /// use brackets: `mqtt://[::1]:1883`.
    pub fn parse(input: &str) -> Result<Self, MqttError> {
        let input = input.trim();
        let with_scheme = if input.contains("://") {
            input.to_string()
        } else {
            format!("mqtt://{input}")
        };
        let url =
            Url::parse(&with_scheme).map_err(|_| MqttError::InvalidBrokerUrl(input.to_string()))?;

        if url.scheme() != "mqtt" {
            return Err(MqttError::InvalidBrokerUrl(format!(
                "{input} (only mqtt:// is supported)"
            )));
        }

        let host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            _ => "localhost".to_string(),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }
}

impl Default for BrokerAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Short client id that is stable across restarts, letting the broker
/// evict a stale session from a previous run of the same host and device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// `rtl_433-XXXXYYYY`: CRC-16 of the host name, then of the discriminator
    pub fn derive(hostname: &str, discriminator: Option<&str>) -> Self {
        let host_crc = IDENTITY_CRC.checksum(hostname.as_bytes());
        let hint_crc = IDENTITY_CRC.checksum(discriminator.unwrap_or_default().as_bytes());
        Self(format!("rtl_433-{host_crc:04x}{hint_crc:04x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Last-will registration: the broker publishes [`LWT_OFFLINE`] to `topic`
/// if the session ends uncleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWillSpec {
    pub topic: String,
    pub retain: bool,
}

/// Everything needed to open a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub address: BrokerAddress,
    pub client_id: ClientIdentity,
    pub credentials: Option<Credentials>,
    pub last_will: Option<LastWillSpec>,
    pub keep_alive: Duration,
}

impl SessionOptions {
    pub fn new(address: BrokerAddress, client_id: ClientIdentity) -> Self {
        Self {
            address,
            client_id,
            credentials: None,
            last_will: None,
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Map session options onto rumqttc options
pub fn configure_mqtt_options(options: &SessionOptions) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        options.client_id.as_str(),
        options.address.host.clone(),
        options.address.port,
    );
    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_start(true);

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    if let Some(will) = &options.last_will {
        let lwt = LastWill::new(&will.topic, LWT_OFFLINE, QoS::AtMostOnce, will.retain, None);
        mqtt_options.set_last_will(lwt);
    }

    mqtt_options
}
