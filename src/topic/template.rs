//! Topic template compilation and expansion
//!
//! Grammar: literal text interleaved with tokens `[name]`, `[/name]`,
//! `[name:default]` or `[/name:default]`. A leading `/` inside the brackets
//! emits a separator only when the token produces text, so absent optional
//! segments never leave `//` behind.

use super::index::{WellKnownFields, WellKnownKey};
use crate::format::ValueFormatter;
use crate::observability::{metrics, throttle::FIELD_WARNINGS};
use crate::record::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Template compilation errors; always fatal at startup
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("Unterminated token at offset {offset} in topic template \"{template}\"")]
    UnterminatedToken { template: String, offset: usize },
    #[error("Unknown token \"{name}\" in topic template \"{template}\"")]
    UnknownToken { template: String, name: String },
}

/// Resolvers a token may name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenName {
    Hostname,
    Field(WellKnownKey),
}

impl FromStr for TokenName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "hostname" {
            return Ok(TokenName::Hostname);
        }
        WellKnownKey::from_key(s).map(TokenName::Field).ok_or(())
    }
}

impl fmt::Display for TokenName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenName::Hostname => f.write_str("hostname"),
            TokenName::Field(key) => f.write_str(key.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Token {
        name: TokenName,
        leading_slash: bool,
        default: Option<String>,
    },
}

/// Immutable compiled topic template, safe to share across threads
#[derive(Debug, Clone, PartialEq)]
pub struct TopicTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TopicTemplate {
    /// Compile a template, rejecting unterminated and unknown tokens
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while !rest.is_empty() {
            let literal_end = rest.find('[').unwrap_or(rest.len());
            if literal_end > 0 {
                segments.push(Segment::Literal(rest[..literal_end].to_string()));
            }
            rest = &rest[literal_end..];
            let Some(body) = rest.strip_prefix('[') else {
                break;
            };
            let offset = source.len() - rest.len();

            let close = body
                .find(|c: char| c == ']' || c == '[')
                .filter(|&i| body.as_bytes()[i] == b']')
                .ok_or_else(|| TemplateError::UnterminatedToken {
                    template: source.to_string(),
                    offset,
                })?;
            let token = &body[..close];
            rest = &body[close + 1..];

            let (leading_slash, token) = match token.strip_prefix('/') {
                Some(stripped) => (true, stripped),
                None => (false, token),
            };
            let (name, default) = match token.split_once(':') {
                Some((name, default)) => (name, Some(default.to_string())),
                None => (token, None),
            };
            let name = name
                .parse::<TokenName>()
                .map_err(|_| TemplateError::UnknownToken {
                    template: source.to_string(),
                    name: name.to_string(),
                })?;

            segments.push(Segment::Token {
                name,
                leading_slash,
                default,
            });
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expand against one record's well-known fields
    pub fn expand(&self, fields: &WellKnownFields<'_>, hostname: &str) -> String {
        let mut topic = String::with_capacity(self.source.len() + 32);
        self.expand_into(&mut topic, fields, hostname);
        topic
    }

    /// Append the expansion to `topic`
    pub fn expand_into(&self, topic: &mut String, fields: &WellKnownFields<'_>, hostname: &str) {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => topic.push_str(text),
                Segment::Token {
                    name,
                    leading_slash,
                    default,
                } => {
                    let resolved = resolve(*name, fields, hostname)
                        .filter(|s| !s.is_empty())
                        .or_else(|| default.clone().filter(|d| !d.is_empty()));
                    if let Some(text) = resolved {
                        if *leading_slash {
                            topic.push('/');
                        }
                        topic.push_str(&text);
                    }
                }
            }
        }
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn resolve(name: TokenName, fields: &WellKnownFields<'_>, hostname: &str) -> Option<String> {
    match name {
        TokenName::Hostname => Some(ValueFormatter::sanitize_segment(hostname)),
        TokenName::Field(key) => match fields.get(key)? {
            Value::String(s) => Some(ValueFormatter::sanitize_segment(s)),
            Value::Integer(i) => Some(ValueFormatter::format_int(*i)),
            other => {
                metrics().record_field_skipped();
                if FIELD_WARNINGS.allow() {
                    warn!(
                        token = %name,
                        kind = other.kind(),
                        "Can't append field of this kind to topic, omitting token"
                    );
                }
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use proptest::prelude::*;

    const DEVICES: &str = "devices[/type][/model][/subtype][/channel][/id]";

    fn expand(template: &str, record: &Record) -> String {
        let template = TopicTemplate::compile(template).unwrap();
        template.expand(&WellKnownFields::scan(record), "host1")
    }

    #[test]
    fn test_literal_only_template() {
        let record = Record::new();
        assert_eq!(expand("rtl_433/host1/events", &record), "rtl_433/host1/events");
    }

    #[test]
    fn test_optional_tokens_elided() {
        let record = Record::new()
            .with("model", "TempSensor")
            .with("id", 42)
            .with("channel", 2)
            .with("temperature_C", 21.5);
        assert_eq!(expand(DEVICES, &record), "devices/TempSensor/2/42");
    }

    #[test]
    fn test_hostname_and_defaults() {
        let record = Record::new().with("model", "X");
        assert_eq!(
            expand("rtl_433/[hostname]/[type:unknown][/channel:0]", &record),
            "rtl_433/host1/unknown/0"
        );
    }

    #[test]
    fn test_field_values_are_sanitized() {
        let record = Record::new().with("model", "Door/Window#1").with("id", -3);
        assert_eq!(expand("d[/model][/id]", &record), "d/Door_Window_1/-3");
    }

    #[test]
    fn test_empty_string_value_falls_back_to_default_or_elides() {
        let record = Record::new().with("model", "");
        assert_eq!(expand("d[/model]", &record), "d");
        assert_eq!(expand("d[/model:none]", &record), "d/none");
    }

    #[test]
    fn test_non_appendable_kind_is_omitted() {
        let record = Record::new().with("model", "M").with("id", 1.5);
        assert_eq!(expand("d[/model][/id]", &record), "d/M");
    }

    #[test]
    fn test_protocol_token() {
        let record = Record::new().with("model", "M").with("protocol", 19);
        assert_eq!(expand("p[/protocol]/[model]", &record), "p/19/M");
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let err = TopicTemplate::compile("devices[/brand]").unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownToken {
                template: "devices[/brand]".to_string(),
                name: "brand".to_string(),
            }
        );
    }

    #[test]
    fn test_partial_token_names_are_rejected() {
        assert!(TopicTemplate::compile("[host]").is_err());
        assert!(TopicTemplate::compile("[]").is_err());
    }

    #[test]
    fn test_unterminated_token_is_rejected() {
        assert!(matches!(
            TopicTemplate::compile("devices[/model"),
            Err(TemplateError::UnterminatedToken { offset: 7, .. })
        ));
        assert!(matches!(
            TopicTemplate::compile("devices[/model[/id]"),
            Err(TemplateError::UnterminatedToken { .. })
        ));
    }

    #[test]
    fn test_display_shows_source() {
        let template = TopicTemplate::compile(DEVICES).unwrap();
        assert_eq!(template.to_string(), DEVICES);
        assert_eq!(template.source(), DEVICES);
    }

    fn optional_string() -> impl Strategy<Value = Option<String>> {
        proptest::option::of(".{0,12}")
    }

    proptest! {
        #[test]
        fn expansion_is_idempotent(model in ".{1,12}", id in any::<i64>()) {
            let record = Record::new().with("model", model).with("id", id);
            let template = TopicTemplate::compile("rtl_433/[hostname]/[model]/[id]").unwrap();
            let index = WellKnownFields::scan(&record);
            prop_assert_eq!(template.expand(&index, "h"), template.expand(&index, "h"));
        }

        #[test]
        fn devices_topic_has_no_empty_segments(
            kind in optional_string(),
            model in ".{0,12}",
            subtype in optional_string(),
            channel in proptest::option::of(any::<i64>()),
            id in optional_string(),
        ) {
            let mut record = Record::new();
            if let Some(kind) = kind {
                record = record.with("type", kind);
            }
            record = record.with("model", model);
            if let Some(subtype) = subtype {
                record = record.with("subtype", subtype);
            }
            if let Some(channel) = channel {
                record = record.with("channel", channel);
            }
            if let Some(id) = id {
                record = record.with("id", id);
            }

            let topic = expand(DEVICES, &record);
            prop_assert!(!topic.contains("//"), "{}", topic);
            prop_assert!(!topic.ends_with('/'), "{}", topic);
            prop_assert!(topic
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "./_-".contains(c)), "{}", topic);
        }
    }
}
