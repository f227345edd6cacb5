//! Structured logging on stderr
//!
//! stdout and stdin belong to the decoder pipeline, so every log line goes
//! to stderr. Settings come from the environment:
//!
//! - `LOG_LEVEL`: error, warn, info, debug or trace (default info)
//! - `LOG_FORMAT`: `json`, `pretty` or `compact` (default json)
//! - `LOG_SPANS`: `true` to log span open and close
//! - `RUST_LOG`: full filter directive, replaces `LOG_LEVEL` when set
//!
//! ```bash
//! rtl_433 -F json | LOG_FORMAT=compact rtl433-mqtt-relay mqtt://broker,retain
//! ```

use std::env;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose chatter is capped at warn unless `RUST_LOG` says otherwise
const NOISY_TARGETS: &[&str] = &["rumqttc", "tokio", "mio"];

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Newline-delimited JSON for journald or log shippers
    #[default]
    Json,
    /// Multi-line with colors
    Pretty,
    /// One line per event, suited to a terminal next to the decoder output
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Resolved logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    /// Raw `RUST_LOG` directive, wins over `level`
    pub directive: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
            include_spans: false,
            directive: None,
        }
    }
}

impl LogSettings {
    /// Read settings through `lookup`; unparsable values keep the default
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            level: lookup("LOG_LEVEL")
                .and_then(|v| Level::from_str(v.trim()).ok())
                .unwrap_or(defaults.level),
            format: lookup("LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.format),
            include_spans: lookup("LOG_SPANS")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.include_spans),
            directive: lookup("RUST_LOG").filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Filter for the subscriber: `RUST_LOG` verbatim, else the level with
    /// noisy dependencies held at warn
    pub fn filter(&self) -> EnvFilter {
        if let Some(directive) = &self.directive {
            return EnvFilter::new(directive);
        }
        NOISY_TARGETS.iter().fold(
            EnvFilter::new(self.level.to_string()),
            |filter, target| filter.add_directive(quiet_directive(target)),
        )
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

fn quiet_directive(target: &str) -> Directive {
    Directive::from_str(&format!("{target}=warn"))
        .unwrap_or_else(|_| Directive::from(LevelFilter::WARN))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(settings: &LogSettings) {
    let subscriber = tracing_subscriber::registry().with(settings.filter());
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(settings.span_events());

    let installed = match settings.format {
        LogFormat::Compact => subscriber
            .with(layer.compact().with_target(false))
            .try_init(),
        LogFormat::Pretty => subscriber.with(layer.pretty()).try_init(),
        LogFormat::Json => subscriber
            .with(layer.json().with_ansi(false).with_current_span(true))
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Install the subscriber configured from the environment
pub fn init_default_logging() {
    init_logging(&LogSettings::from_env());
}

/// Span covering the routing of one record
#[macro_export]
macro_rules! record_span {
    ($($field:tt)*) => {
        tracing::debug_span!("record", $($field)*)
    };
}

/// Span covering one supervised MQTT connection
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_connection", $($field)*)
    };
}

pub use {mqtt_span, record_span};
