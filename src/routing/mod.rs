//! Event routing
//!
//! Decides which topic families a decoded record belongs to and renders the
//! outgoing `(topic, payload)` publications:
//!
//! - **states**: records without `model`, the whole record as JSON
//! - **events**: records with `model`, the whole record as JSON
//! - **devices**: records with `model`, one publication per field under the
//!   expanded device topic

pub mod router;

pub use router::{
    EventRouter, Publication, RouteError, TopicFamily, EVENT_PAYLOAD_LIMIT, STATE_PAYLOAD_LIMIT,
};
