//! MQTT transport and connection supervision
//!
//! - [`connection`] - broker address, session options, client identity, errors
//! - [`health_monitor`] - pure connection state transitions and retry decisions
//! - [`message_handler`] - mapping of rumqttc events onto [`TransportEvent`]
//! - [`client`] - rumqttc-backed [`Transport`] implementation
//! - [`supervisor`] - the task that owns the connection and publishes
//!
//! [`TransportEvent`]: crate::transport::TransportEvent
//! [`Transport`]: crate::transport::Transport
//!
//! # Usage
//!
//! ```rust,no_run
//! use rtl433_mqtt_relay::routing::Publication;
//! use rtl433_mqtt_relay::transport::mqtt::{
//!     BrokerAddress, ClientIdentity, ConnectionSupervisor, MqttTransport, PublishOptions,
//!     SessionOptions,
//! };
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let address = BrokerAddress::parse("mqtt://localhost:1883")?;
//! let session = SessionOptions::new(address, ClientIdentity::derive("pi", None));
//!
//! let transport = MqttTransport::new(&session);
//! let mut handle = ConnectionSupervisor::spawn(transport, PublishOptions::default(), 64);
//! handle.wait_until_connected(Duration::from_secs(5)).await?;
//!
//! handle
//!     .queue()
//!     .submit(vec![Publication::new("rtl_433/pi/states", "{}")])?;
//! handle.shutdown().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod supervisor;

pub use client::{MqttEvents, MqttTransport};
pub use connection::{
    BrokerAddress, ClientIdentity, ConnectionState, Credentials, LastWillSpec, MqttError,
    ReconnectConfig, SessionOptions, LWT_OFFLINE, LWT_ONLINE,
};
pub use health_monitor::{
    ConnectErrorFilter, ConnectionEvent, HealthMonitor, ReconnectionDecision,
};
pub use message_handler::MessageHandler;
pub use supervisor::{
    ConnectionSupervisor, PublishOptions, PublishQueue, SequenceId, SupervisorHandle,
    DEFAULT_QUEUE_CAPACITY,
};
