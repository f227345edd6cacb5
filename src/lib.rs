//! rtl_433 MQTT relay
//!
//! Publishes decoded radio device events to MQTT topic trees.
//!
//! # Overview
//!
//! - [`record`]: the decoded event data model and its JSON ingestion
//! - [`topic`]: topic templates such as `devices[/type][/model][/id]`
//! - [`routing`]: the states, events and devices topic families
//! - [`transport`]: the MQTT connection supervisor with last-will presence
//!   and automatic reconnect
//! - [`publisher`]: routes records and queues them for publishing
//!
//! # Quick Start
//!
//! ```rust
//! use rtl433_mqtt_relay::record::Record;
//! use rtl433_mqtt_relay::routing::EventRouter;
//! use rtl433_mqtt_relay::topic::TopicTemplate;
//!
//! let devices = TopicTemplate::compile("devices[/type][/model][/subtype][/channel][/id]").unwrap();
//! let router = EventRouter::new("host1", Some(devices), None, None);
//!
//! let record = Record::new()
//!     .with("model", "TempSensor")
//!     .with("id", 42)
//!     .with("channel", 2)
//!     .with("temperature_C", 21.5);
//!
//! let publications = router.route(&record);
//! assert_eq!(publications[0].topic, "devices/TempSensor/2/42/id");
//! assert_eq!(publications[0].payload, "42");
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod observability;
pub mod publisher;
pub mod record;
pub mod routing;
pub mod testing;
pub mod topic;
pub mod transport;

pub use config::{ConfigError, MqttSection, RelayConfig, RelaySettings};
pub use error::{RelayError, RelayResult};
pub use format::ValueFormatter;
pub use publisher::Publisher;
pub use record::{Field, Record, Value};
pub use routing::{EventRouter, Publication, TopicFamily};
pub use topic::TopicTemplate;
pub use transport::mqtt::{ConnectionSupervisor, MqttTransport, SupervisorHandle};
