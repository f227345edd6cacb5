//! Pure connection state and reconnection logic
//!
//! Everything here is synchronous and side-effect free apart from logging,
//! so the supervisor's decisions can be tested without a broker.

use super::connection::{ConnectionState, ReconnectConfig};
use tracing::{debug, info, warn};

/// Pure state-transition and retry decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether to retry after the low-level connection went away.
    ///
    /// A failure before the first session was ever accepted is fatal. After
    /// that, retries are unlimited and immediate unless `config.retry_delay`
    /// paces consecutive failures.
    pub fn should_attempt_reconnection(
        ever_connected: bool,
        shutdown_requested: bool,
        consecutive_failures: u32,
        config: &ReconnectConfig,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        if !ever_connected {
            return ReconnectionDecision::AbortInitialConnectFailed;
        }

        let attempt = consecutive_failures.saturating_add(1);
        let delay_ms = if attempt <= 1 {
            0
        } else {
            u64::try_from(config.retry_delay.as_millis()).unwrap_or(u64::MAX)
        };
        ReconnectionDecision::Proceed { attempt, delay_ms }
    }

    /// Next state after a connection event
    pub fn determine_next_state(
        current: ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectRequested => match current {
                ConnectionState::Connected => ConnectionState::Connected,
                _ => ConnectionState::Connecting,
            },
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker | ConnectionEvent::NetworkError(_) => {
                ConnectionState::Disconnected
            }
        }
    }

    /// Publishes are dropped unless the session is up
    pub fn can_publish(state: ConnectionState) -> bool {
        state.is_connected()
    }

    pub fn log_state_transition(from: ConnectionState, to: ConnectionState, peer: &str) {
        match (from, to) {
            (ConnectionState::Connected, ConnectionState::Connected) => {}
            (_, ConnectionState::Connected) => info!(peer, "MQTT connection established"),
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                warn!(peer, "MQTT connection lost")
            }
            (from, to) if from != to => debug!(peer, "MQTT connection state: {from:?} -> {to:?}"),
            _ => {}
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    /// The broker never accepted a session
    AbortInitialConnectFailed,
}

/// Connection events that drive state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnectRequested,
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
}

/// Suppresses repeats of the same connect error while the broker stays
/// unreachable; a successful session re-arms it.
#[derive(Debug, Default)]
pub struct ConnectErrorFilter {
    last_reported: Option<String>,
}

impl ConnectErrorFilter {
    /// True if `message` differs from the last reported one
    pub fn should_report(&mut self, message: &str) -> bool {
        if self.last_reported.as_deref() == Some(message) {
            return false;
        }
        self.last_reported = Some(message.to_string());
        true
    }

    pub fn reset(&mut self) {
        self.last_reported = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            retry_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_default_reconnects_never_wait() {
        let defaults = ReconnectConfig::default();
        assert_eq!(defaults.retry_delay, Duration::ZERO);

        for failures in [0, 1, 2, 10, u32::MAX] {
            let decision =
                HealthMonitor::should_attempt_reconnection(true, false, failures, &defaults);
            assert!(
                matches!(decision, ReconnectionDecision::Proceed { delay_ms: 0, .. }),
                "{failures}: {decision:?}"
            );
        }
    }

    #[test]
    fn test_shutdown_aborts_reconnection() {
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(true, true, 0, &config()),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_initial_failure_is_fatal() {
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(false, false, 0, &config()),
            ReconnectionDecision::AbortInitialConnectFailed
        );
    }

    #[test]
    fn test_configured_delay_paces_consecutive_failures() {
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(true, false, 0, &config()),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay_ms: 0
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(true, false, 4, &config()),
            ReconnectionDecision::Proceed {
                attempt: 5,
                delay_ms: 250
            }
        );
    }

    #[test]
    fn test_retry_counter_saturates() {
        let decision = HealthMonitor::should_attempt_reconnection(true, false, u32::MAX, &config());
        assert!(matches!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: u32::MAX,
                ..
            }
        ));
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;

        assert_eq!(
            HealthMonitor::determine_next_state(Disconnected, &ConnectionEvent::ConnectRequested),
            Connecting
        );
        assert_eq!(
            HealthMonitor::determine_next_state(Connecting, &ConnectionEvent::ConnAckReceived),
            Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                Connected,
                &ConnectionEvent::NetworkError("reset".to_string())
            ),
            Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(Connected, &ConnectionEvent::DisconnectedByBroker),
            Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(Connected, &ConnectionEvent::ConnectRequested),
            Connected
        );
    }

    #[test]
    fn test_can_publish_only_when_connected() {
        assert!(HealthMonitor::can_publish(ConnectionState::Connected));
        assert!(!HealthMonitor::can_publish(ConnectionState::Connecting));
        assert!(!HealthMonitor::can_publish(ConnectionState::Disconnected));
    }

    #[test]
    fn test_connect_error_filter_reports_changes_only() {
        let mut filter = ConnectErrorFilter::default();

        assert!(filter.should_report("connection refused"));
        assert!(!filter.should_report("connection refused"));
        assert!(filter.should_report("host unreachable"));
        assert!(filter.should_report("connection refused"));

        filter.reset();
        assert!(filter.should_report("connection refused"));
    }
}
