//! Record to publication routing

use crate::format::ValueFormatter;
use crate::observability::metrics;
use crate::observability::throttle::{FIELD_WARNINGS, PAYLOAD_WARNINGS};
use crate::record::{Record, Value};
use crate::topic::{TopicTemplate, WellKnownFields};
use crate::record_span;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Payload bound for whole-record state documents
pub const STATE_PAYLOAD_LIMIT: usize = 20_000;

/// Payload bound for event documents and single device values
pub const EVENT_PAYLOAD_LIMIT: usize = 1024;

/// Keys never published as device child topics
const EXCLUDED_CHILD_KEYS: [&str; 4] = ["brand", "type", "model", "subtype"];

/// Topic families a record can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicFamily {
    Devices,
    Events,
    States,
}

impl fmt::Display for TopicFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TopicFamily::Devices => "devices",
            TopicFamily::Events => "events",
            TopicFamily::States => "states",
        })
    }
}

/// One outgoing message
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

impl Publication {
    pub fn new<T: Into<String>, P: Into<String>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Per-publication rendering failures; the publication is dropped
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("{family} payload of {size} bytes exceeds the {limit} byte bound")]
    SerializationOverflow {
        family: TopicFamily,
        size: usize,
        limit: usize,
    },
    #[error("Failed to serialize {family} payload: {source}")]
    Serialization {
        family: TopicFamily,
        #[source]
        source: serde_json::Error,
    },
}

/// Routes records to the enabled topic families.
///
/// Stateless between calls: the device topic prefix lives in a buffer local
/// to each [`EventRouter::route`] call, so the router can be shared freely.
#[derive(Debug, Clone)]
pub struct EventRouter {
    hostname: String,
    devices: Option<TopicTemplate>,
    events: Option<TopicTemplate>,
    states: Option<TopicTemplate>,
}

impl EventRouter {
    pub fn new(
        hostname: impl Into<String>,
        devices: Option<TopicTemplate>,
        events: Option<TopicTemplate>,
        states: Option<TopicTemplate>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            devices,
            events,
            states,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn template(&self, family: TopicFamily) -> Option<&TopicTemplate> {
        match family {
            TopicFamily::Devices => self.devices.as_ref(),
            TopicFamily::Events => self.events.as_ref(),
            TopicFamily::States => self.states.as_ref(),
        }
    }

    /// All publications for one record, in issue order: the state document
    /// for model-less records; otherwise the event document followed by the
    /// device values in field order.
    pub fn route(&self, record: &Record) -> Vec<Publication> {
        let _span = record_span!(field_count = record.len()).entered();
        let index = WellKnownFields::scan(record);
        let mut publications = Vec::new();

        if !index.has_model() {
            if let Some(template) = &self.states {
                self.push_document(
                    TopicFamily::States,
                    template,
                    record,
                    &index,
                    STATE_PAYLOAD_LIMIT,
                    &mut publications,
                );
            }
            return publications;
        }

        if let Some(template) = &self.events {
            self.push_document(
                TopicFamily::Events,
                template,
                record,
                &index,
                EVENT_PAYLOAD_LIMIT,
                &mut publications,
            );
        }

        if let Some(template) = &self.devices {
            let mut topic = template.expand(&index, &self.hostname);
            flatten_record(&mut topic, record, &mut publications);
        }

        debug!(count = publications.len(), "Routed record");
        publications
    }

    fn push_document(
        &self,
        family: TopicFamily,
        template: &TopicTemplate,
        record: &Record,
        index: &WellKnownFields<'_>,
        limit: usize,
        publications: &mut Vec<Publication>,
    ) {
        match render_document(family, record, limit) {
            Ok(payload) => publications.push(Publication {
                topic: template.expand(index, &self.hostname),
                payload,
            }),
            Err(e) => report_dropped(&e),
        }
    }
}

/// Serialize the whole record, refusing documents over `limit` bytes
pub fn render_document(
    family: TopicFamily,
    record: &Record,
    limit: usize,
) -> Result<String, RouteError> {
    let payload = record
        .to_json()
        .map_err(|source| RouteError::Serialization { family, source })?;
    check_size(family, payload, limit)
}

fn check_size(family: TopicFamily, payload: String, limit: usize) -> Result<String, RouteError> {
    if payload.len() > limit {
        return Err(RouteError::SerializationOverflow {
            family,
            size: payload.len(),
            limit,
        });
    }
    Ok(payload)
}

fn report_dropped(error: &RouteError) {
    metrics().record_payload_overflow();
    if PAYLOAD_WARNINGS.allow() {
        warn!(
            suppressed = PAYLOAD_WARNINGS.take_suppressed(),
            "Dropping publication: {}", error
        );
    }
}

/// Publish every non-excluded field of `record` below `topic`.
///
/// `topic` is restored to its original length before returning.
fn flatten_record(topic: &mut String, record: &Record, publications: &mut Vec<Publication>) {
    let base_len = topic.len();
    for field in record.fields() {
        if EXCLUDED_CHILD_KEYS.contains(&field.key.as_str()) {
            continue;
        }
        topic.push('/');
        topic.push_str(&ValueFormatter::sanitize_segment(&field.key));
        flatten_value(topic, &field.value, publications);
        topic.truncate(base_len);
    }
}

fn flatten_value(topic: &mut String, value: &Value, publications: &mut Vec<Publication>) {
    match value {
        Value::Array(items) => {
            let base_len = topic.len();
            for (i, item) in items.iter().enumerate() {
                topic.push('/');
                topic.push_str(&i.to_string());
                flatten_value(topic, item, publications);
                topic.truncate(base_len);
            }
        }
        Value::Record(nested) => flatten_record(topic, nested, publications),
        scalar => match ValueFormatter::format_scalar(scalar) {
            Some(payload) => match check_size(TopicFamily::Devices, payload, EVENT_PAYLOAD_LIMIT) {
                Ok(payload) => publications.push(Publication {
                    topic: topic.clone(),
                    payload,
                }),
                Err(e) => report_dropped(&e),
            },
            None => {
                metrics().record_field_skipped();
                if FIELD_WARNINGS.allow() {
                    warn!(topic = %topic, kind = scalar.kind(), "Skipping unrepresentable field");
                }
            }
        },
    }
}
