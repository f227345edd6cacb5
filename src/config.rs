//! Relay configuration
//!
//! Two equivalent sources produce an [`MqttSection`]: the compact output
//! spec `mqtt://host:port,key=val,...` given on the command line, and the
//! `[mqtt]` table of a TOML file. Both reject unknown keys. The section is
//! then resolved against the local host name into [`RelaySettings`]: compiled
//! topic templates, session options and publish options.

use crate::format::ValueFormatter;
use crate::routing::{EventRouter, TopicFamily};
use crate::topic::{TemplateError, TopicTemplate};
use crate::transport::mqtt::{
    BrokerAddress, ClientIdentity, Credentials, LastWillSpec, PublishOptions, SessionOptions,
};
use serde::Deserialize;
use std::path::Path;
use sysinfo::System;
use thiserror::Error;
use tracing::{info, warn};

/// First segment of every default topic
pub const BASE_TOPIC_PREFIX: &str = "rtl_433";

/// Default topic paths below the base topic
pub const DEFAULT_DEVICES_PATH: &str = "devices[/type][/model][/subtype][/channel][/id]";
pub const DEFAULT_EVENTS_PATH: &str = "events";
pub const DEFAULT_STATES_PATH: &str = "states";
pub const DEFAULT_LWT_PATH: &str = "lwt";

const USECHANNEL_REPLACEMENTS: &str = "\
for \"afterid\"   use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/id][/channel]\"
for \"beforeid\"  use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/channel][/id]\"
for \"replaceid\" use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/channel]\"
for \"no\"        use e.g. \"devices=rtl_433/[hostname]/devices[/type][/model][/subtype][/id]\"";

/// Configuration loading errors; all are fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Unknown MQTT option \"{0}\"")]
    UnknownOption(String),
    #[error("Invalid boolean \"{value}\" for option \"{key}\"")]
    InvalidBoolean { key: String, value: String },
    #[error("Invalid broker URL \"{0}\"")]
    InvalidBrokerUrl(String),
    #[error("\"{key}=...\" has been removed. Use a topic format string:\n{replacement}")]
    RemovedOption {
        key: String,
        replacement: &'static str,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// A topic family or last-will setting: on with the default topic, off, or
/// an explicit topic
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TopicOption {
    Enabled(bool),
    Template(String),
}

impl TopicOption {
    /// Bare or empty value means the default topic
    fn from_value(value: Option<&str>) -> Self {
        match value {
            None | Some("") => TopicOption::Enabled(true),
            Some(template) => TopicOption::Template(template.to_string()),
        }
    }
}

/// Top-level TOML document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub mqtt: MqttSection,
}

/// MQTT output options, from either source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqttSection {
    /// `mqtt://host[:port]`; defaults to `localhost:1883`
    pub broker_url: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// Retained flag for normal publishes
    pub retain: Option<bool>,
    /// Last-will topic; not registered unless given
    pub lwt: Option<TopicOption>,
    pub devices: Option<TopicOption>,
    pub events: Option<TopicOption>,
    pub states: Option<TopicOption>,
    /// Discriminator mixed into the client id
    pub client_hint: Option<String>,
}

impl RelayConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

impl MqttSection {
    /// Parse `mqtt[://host[:port]][,key[=value]]...`.
    ///
    /// Keys are case-insensitive; `u`, `p`, `r`, `d`, `e` and `s` abbreviate
    /// `user`, `pass`, `retain`, `devices`, `events` and `states`.
    pub fn from_output_spec(spec: &str) -> Result<Self, ConfigError> {
        let mut parts = spec.split(',');
        let broker = parts.next().unwrap_or_default().trim();

        let mut section = MqttSection {
            broker_url: match broker {
                "" | "mqtt" => None,
                url => Some(url.to_string()),
            },
            ..Default::default()
        };

        for option in parts {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            let (key, value) = match option.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (option, None),
            };
            section.apply_option(key, value)?;
        }

        Ok(section)
    }

    fn apply_option(&mut self, key: &str, value: Option<&str>) -> Result<(), ConfigError> {
        match key.to_ascii_lowercase().as_str() {
            "u" | "user" => self.user = Some(value.unwrap_or_default().to_string()),
            "p" | "pass" => self.pass = Some(value.unwrap_or_default().to_string()),
            "r" | "retain" => self.retain = Some(parse_bool(key, value)?),
            "lwt" => self.lwt = Some(TopicOption::from_value(value)),
            "d" | "devices" => self.devices = Some(TopicOption::from_value(value)),
            "e" | "events" => self.events = Some(TopicOption::from_value(value)),
            "s" | "states" => self.states = Some(TopicOption::from_value(value)),
            "c" | "usechannel" => {
                return Err(ConfigError::RemovedOption {
                    key: key.to_string(),
                    replacement: USECHANNEL_REPLACEMENTS,
                })
            }
            _ => return Err(ConfigError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    /// Options set in `overrides` win
    pub fn merged_with(self, overrides: MqttSection) -> Self {
        Self {
            broker_url: overrides.broker_url.or(self.broker_url),
            user: overrides.user.or(self.user),
            pass: overrides.pass.or(self.pass),
            retain: overrides.retain.or(self.retain),
            lwt: overrides.lwt.or(self.lwt),
            devices: overrides.devices.or(self.devices),
            events: overrides.events.or(self.events),
            states: overrides.states.or(self.states),
            client_hint: overrides.client_hint.or(self.client_hint),
        }
    }

    /// Apply defaults for `hostname` and compile the topic templates.
    ///
    /// When none of devices, events and states is given, all three are
    /// enabled with their default topics.
    pub fn resolve(
        &self,
        hostname: &str,
        device_hint: Option<&str>,
    ) -> Result<RelaySettings, ConfigError> {
        let address = match &self.broker_url {
            Some(url) => BrokerAddress::parse(url)
                .map_err(|_| ConfigError::InvalidBrokerUrl(url.clone()))?,
            None => BrokerAddress::default(),
        };

        let base = format!(
            "{BASE_TOPIC_PREFIX}/{}",
            ValueFormatter::sanitize_segment(hostname)
        );
        let all_by_default =
            self.devices.is_none() && self.events.is_none() && self.states.is_none();
        let devices =
            family_template(self.devices.as_ref(), &base, DEFAULT_DEVICES_PATH, all_by_default)?;
        let events =
            family_template(self.events.as_ref(), &base, DEFAULT_EVENTS_PATH, all_by_default)?;
        let states =
            family_template(self.states.as_ref(), &base, DEFAULT_STATES_PATH, all_by_default)?;

        let lwt_topic = topic_or_default(self.lwt.as_ref(), &base, DEFAULT_LWT_PATH, false);
        let hint = device_hint.or(self.client_hint.as_deref());

        let mut session = SessionOptions::new(address, ClientIdentity::derive(hostname, hint));
        session.credentials = match (&self.user, &self.pass) {
            (Some(user), pass) => Some(Credentials {
                username: user.clone(),
                password: pass.clone().unwrap_or_default(),
            }),
            (None, Some(_)) => {
                warn!("MQTT password given without a user, ignoring credentials");
                None
            }
            (None, None) => None,
        };
        session.last_will = lwt_topic.as_ref().map(|topic| LastWillSpec {
            topic: topic.clone(),
            retain: true,
        });

        let publish = PublishOptions {
            retain: self.retain.unwrap_or(false),
            lwt_topic,
            ..PublishOptions::default()
        };

        Ok(RelaySettings {
            router: EventRouter::new(hostname, devices, events, states),
            session,
            publish,
        })
    }
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub router: EventRouter,
    pub session: SessionOptions,
    pub publish: PublishOptions,
}

impl RelaySettings {
    /// Log each enabled family with its topic template
    pub fn log_summary(&self) {
        let mut any = false;
        for family in [TopicFamily::Devices, TopicFamily::Events, TopicFamily::States] {
            if let Some(template) = self.router.template(family) {
                any = true;
                info!(family = %family, topic = %template, "Publishing {family} info to MQTT");
            }
        }
        if !any {
            warn!("All MQTT topic families are disabled, nothing will be published");
        }
        info!(
            broker = %self.session.address,
            client_id = %self.session.client_id,
            lwt = self.publish.lwt_topic.as_deref().unwrap_or("-"),
            retain = self.publish.retain,
            "MQTT output configured"
        );
    }
}

fn family_template(
    option: Option<&TopicOption>,
    base: &str,
    path: &str,
    enabled_by_default: bool,
) -> Result<Option<TopicTemplate>, ConfigError> {
    topic_or_default(option, base, path, enabled_by_default)
        .map(|source| TopicTemplate::compile(&source))
        .transpose()
        .map_err(ConfigError::from)
}

fn topic_or_default(
    option: Option<&TopicOption>,
    base: &str,
    path: &str,
    enabled_by_default: bool,
) -> Option<String> {
    match option {
        None if enabled_by_default => Some(format!("{base}/{path}")),
        None | Some(TopicOption::Enabled(false)) => None,
        Some(TopicOption::Enabled(true)) => Some(format!("{base}/{path}")),
        Some(TopicOption::Template(template)) if template.is_empty() => {
            Some(format!("{base}/{path}"))
        }
        Some(TopicOption::Template(template)) => Some(template.clone()),
    }
}

/// `true/yes/on/enable/1` or `false/no/off/disable/0`; a bare key is true
pub fn parse_bool(key: &str, value: Option<&str>) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(true);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "on" | "enable" | "1" => Ok(true),
        "false" | "no" | "off" | "disable" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Host name up to the first `.`, or `localhost` when unavailable
pub fn local_hostname() -> String {
    System::host_name()
        .map(|name| short_hostname(&name).to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Drop the domain part of a host name
pub fn short_hostname(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates(settings: &RelaySettings) -> Vec<Option<String>> {
        [TopicFamily::Devices, TopicFamily::Events, TopicFamily::States]
            .into_iter()
            .map(|f| settings.router.template(f).map(|t| t.source().to_string()))
            .collect()
    }

    #[test]
    fn test_bare_output_spec_enables_all_families() {
        let section = MqttSection::from_output_spec("mqtt").unwrap();
        let settings = section.resolve("host1", None).unwrap();

        assert_eq!(
            templates(&settings),
            vec![
                Some("rtl_433/host1/devices[/type][/model][/subtype][/channel][/id]".to_string()),
                Some("rtl_433/host1/events".to_string()),
                Some("rtl_433/host1/states".to_string()),
            ]
        );
        assert_eq!(settings.session.address, BrokerAddress::default());
        assert!(settings.session.last_will.is_none());
        assert!(settings.session.credentials.is_none());
        assert!(!settings.publish.retain);
        assert_eq!(settings.router.hostname(), "host1");
    }

    #[test]
    fn test_output_spec_options() {
        let section = MqttSection::from_output_spec(
            "mqtt://broker.lan:1884,USER=alice,p=secret,retain=yes,lwt,events=sensors/[model]",
        )
        .unwrap();
        let settings = section.resolve("host1", Some("0")).unwrap();

        assert_eq!(settings.session.address.host, "broker.lan");
        assert_eq!(settings.session.address.port, 1884);
        assert_eq!(
            settings.session.credentials,
            Some(Credentials {
                username: "alice".to_string(),
                password: "secret".to_string(),
            })
        );
        assert!(settings.publish.retain);
        assert_eq!(
            settings.publish.lwt_topic.as_deref(),
            Some("rtl_433/host1/lwt")
        );
        assert_eq!(
            settings.session.last_will,
            Some(LastWillSpec {
                topic: "rtl_433/host1/lwt".to_string(),
                retain: true,
            })
        );
        // only the named family is enabled
        assert_eq!(
            templates(&settings),
            vec![None, Some("sensors/[model]".to_string()), None]
        );
        assert_eq!(
            settings.session.client_id,
            ClientIdentity::derive("host1", Some("0"))
        );
    }

    #[test]
    fn test_short_aliases() {
        let section = MqttSection::from_output_spec("mqtt,u=bob,r,d,s=st").unwrap();
        assert_eq!(section.user.as_deref(), Some("bob"));
        assert_eq!(section.retain, Some(true));
        assert_eq!(section.devices, Some(TopicOption::Enabled(true)));
        assert_eq!(section.states, Some(TopicOption::Template("st".to_string())));
        assert_eq!(section.events, None);
    }

    #[test]
    fn test_unknown_option_is_fatal() {
        let err = MqttSection::from_output_spec("mqtt,bogus=1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption(key) if key == "bogus"));
    }

    #[test]
    fn test_usechannel_is_removed() {
        let err = MqttSection::from_output_spec("mqtt,usechannel=afterid").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("has been removed"));
        assert!(message.contains("[/channel][/id]"));
        assert!(matches!(
            MqttSection::from_output_spec("mqtt,c=no"),
            Err(ConfigError::RemovedOption { .. })
        ));
    }

    #[test]
    fn test_invalid_template_is_fatal() {
        let section = MqttSection::from_output_spec("mqtt,devices=d[/brand]").unwrap();
        assert!(matches!(
            section.resolve("host1", None),
            Err(ConfigError::Template(TemplateError::UnknownToken { .. }))
        ));
    }

    #[test]
    fn test_invalid_broker_url() {
        let section = MqttSection::from_output_spec("mqtts://broker:8883").unwrap();
        assert!(matches!(
            section.resolve("host1", None),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_parse_bool() {
        for value in ["true", "YES", "on", "enable", "1"] {
            assert!(parse_bool("retain", Some(value)).unwrap(), "{value}");
        }
        for value in ["false", "No", "off", "disable", "0"] {
            assert!(!parse_bool("retain", Some(value)).unwrap(), "{value}");
        }
        assert!(parse_bool("retain", None).unwrap());
        assert!(matches!(
            parse_bool("retain", Some("maybe")),
            Err(ConfigError::InvalidBoolean { .. })
        ));
    }

    #[test]
    fn test_toml_section() {
        let config = RelayConfig::from_toml_str(
            r#"
[mqtt]
broker_url = "mqtt://[::1]:1883"
retain = true
lwt = true
devices = false
events = "custom/events"
"#,
        )
        .unwrap();
        let settings = config.mqtt.resolve("host1", None).unwrap();

        assert_eq!(settings.session.address.to_string(), "[::1]:1883");
        assert_eq!(
            templates(&settings),
            vec![None, Some("custom/events".to_string()), None]
        );
        assert_eq!(
            settings.publish.lwt_topic.as_deref(),
            Some("rtl_433/host1/lwt")
        );
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(matches!(
            RelayConfig::from_toml_str("[mqtt]\nusechannel = \"afterid\"\n"),
            Err(ConfigError::TomlParse(_))
        ));
        assert!(matches!(
            RelayConfig::from_toml_str("[agent]\nid = \"x\"\n"),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let file = MqttSection {
            broker_url: Some("mqtt://file:1883".to_string()),
            user: Some("file-user".to_string()),
            retain: Some(true),
            ..Default::default()
        };
        let cli = MqttSection::from_output_spec("mqtt://cli:1883,u=cli-user").unwrap();
        let merged = file.merged_with(cli);

        assert_eq!(merged.broker_url.as_deref(), Some("mqtt://cli:1883"));
        assert_eq!(merged.user.as_deref(), Some("cli-user"));
        assert_eq!(merged.retain, Some(true));
    }

    #[test]
    fn test_client_hint_fallback() {
        let section = MqttSection {
            client_hint: Some("rtl0".to_string()),
            ..Default::default()
        };
        let from_file = section.resolve("host1", None).unwrap();
        let from_cli = section.resolve("host1", Some("rtl1")).unwrap();

        assert_eq!(
            from_file.session.client_id,
            ClientIdentity::derive("host1", Some("rtl0"))
        );
        assert_eq!(
            from_cli.session.client_id,
            ClientIdentity::derive("host1", Some("rtl1"))
        );
    }

    #[test]
    fn test_default_topics_sanitize_hostname() {
        let settings = MqttSection::from_output_spec("mqtt,lwt")
            .unwrap()
            .resolve("my host[1]/x", None)
            .unwrap();

        assert_eq!(
            templates(&settings),
            vec![
                Some("rtl_433/my_host_1__x/devices[/type][/model][/subtype][/channel][/id]".to_string()),
                Some("rtl_433/my_host_1__x/events".to_string()),
                Some("rtl_433/my_host_1__x/states".to_string()),
            ]
        );
        assert_eq!(
            settings.publish.lwt_topic.as_deref(),
            Some("rtl_433/my_host_1__x/lwt")
        );
    }

    #[test]
    fn test_short_hostname() {
        assert_eq!(short_hostname("pi.example.com"), "pi");
        assert_eq!(short_hostname("pi"), "pi");
        assert!(!local_hostname().is_empty());
        assert!(!local_hostname().contains('.'));
    }
}
