//! Connection supervisor task
//!
//! One spawned task owns the [`Transport`], the [`ConnectionState`] and the
//! sequence counter. Publishers never touch the connection: they hand
//! whole per-record batches to the task through a bounded channel. Each
//! session's [`EventSource`] is polled by its own task and its events arrive
//! on a second channel, so the `select!` loop only ever races channel
//! receives.

use super::connection::{ConnectionState, MqttError, ReconnectConfig, LWT_OFFLINE, LWT_ONLINE};
use super::health_monitor::{
    ConnectErrorFilter, ConnectionEvent, HealthMonitor, ReconnectionDecision,
};
use crate::mqtt_span;
use crate::observability::metrics;
use crate::observability::throttle::PUBLISH_WARNINGS;
use crate::routing::Publication;
use crate::transport::{EventSource, OutgoingMessage, Transport, TransportEvent};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use std::error::Error as _;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

/// Default bound of the publish queue, in record batches
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Connection events buffered between a session's poll task and the loop
const SESSION_EVENT_CAPACITY: usize = 16;

/// Publish behaviour fixed at startup
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub qos: QoS,
    /// Retained flag for normal publishes; presence markers are always retained
    pub retain: bool,
    /// Topic for the `online`/`offline` presence markers
    pub lwt_topic: Option<String>,
    pub reconnect: ReconnectConfig,
    /// How long shutdown waits for the DISCONNECT to be written
    pub shutdown_timeout: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            retain: false,
            lwt_topic: None,
            reconnect: ReconnectConfig::default(),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// Wrapping 16-bit publish sequence; zero is never issued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceId(u16);

impl SequenceId {
    pub fn starting_at(value: u16) -> Self {
        Self(value)
    }

    pub fn next(&mut self) -> u16 {
        self.0 = match self.0.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.0
    }

    pub fn current(&self) -> u16 {
        self.0
    }
}

/// Cloneable, non-blocking entry point for publishers
#[derive(Debug, Clone)]
pub struct PublishQueue {
    tx: mpsc::Sender<Vec<Publication>>,
}

impl PublishQueue {
    /// Hand one record's publications to the supervisor without waiting.
    ///
    /// A full queue drops the batch with a warning; only a stopped
    /// supervisor is an error.
    pub fn submit(&self, batch: Vec<Publication>) -> Result<(), MqttError> {
        if batch.is_empty() {
            return Ok(());
        }
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => {
                metrics().record_dropped(batch.len() as u64);
                if PUBLISH_WARNINGS.allow() {
                    warn!(
                        count = batch.len(),
                        suppressed = PUBLISH_WARNINGS.take_suppressed(),
                        "Publish queue full, dropping record"
                    );
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(MqttError::SupervisorStopped),
        }
    }
}

/// Owner-side handle of a running supervisor
#[derive(Debug)]
pub struct SupervisorHandle {
    queue: PublishQueue,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<(), MqttError>>>,
}

impl SupervisorHandle {
    pub fn queue(&self) -> PublishQueue {
        self.queue.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait for the first accepted session. Fails with the supervisor's own
    /// error if it stopped first (initial connect failure).
    pub async fn wait_until_connected(&mut self, timeout: Duration) -> Result<(), MqttError> {
        let mut state_rx = self.state_rx.clone();
        let waited = tokio::time::timeout(timeout, async {
            state_rx.wait_for(|state| state.is_connected()).await.is_ok()
        })
        .await;

        match waited {
            Ok(true) => Ok(()),
            Ok(false) => match self.join().await {
                Ok(()) => Err(MqttError::SupervisorStopped),
                Err(e) => Err(e),
            },
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }

    /// Resolve when the supervisor task ends; cancel safe
    pub async fn join(&mut self) -> Result<(), MqttError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        match result {
            Ok(result) => result,
            Err(join_error) => Err(MqttError::ConnectionFailed(Box::new(join_error))),
        }
    }

    /// Publish `offline`, disconnect cleanly and stop the task
    pub async fn shutdown(mut self) -> Result<(), MqttError> {
        self.shutdown_tx.send_replace(true);
        self.join().await
    }
}

/// State machine driving one logical MQTT session
pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    options: PublishOptions,
    peer: String,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    sequence: SequenceId,
    ever_connected: bool,
    consecutive_failures: u32,
    connect_errors: ConnectErrorFilter,
}

/// Connection events of the current session, forwarded by its poll task.
/// Dropping it abandons the session.
struct Session {
    events: mpsc::Receiver<Result<TransportEvent, MqttError>>,
    poller: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// Poll one session's event source until the session ends.
///
/// The `next_event` future is never dropped while in flight, so handshake
/// and partial writes survive however busy the publish queue is.
async fn drive_session<E: EventSource>(
    mut source: E,
    events: mpsc::Sender<Result<TransportEvent, MqttError>>,
) {
    loop {
        let event = source.next_event().await;
        if let Ok(TransportEvent::Other(name)) = &event {
            trace!(event = %name, "MQTT event");
            continue;
        }
        let last = matches!(event, Err(_) | Ok(TransportEvent::Disconnected));
        if events.send(event).await.is_err() || last {
            break;
        }
    }
}

impl<T: Transport + 'static> ConnectionSupervisor<T> {
    /// Start the supervisor task; the first connection attempt begins
    /// immediately
    pub fn spawn(transport: T, options: PublishOptions, capacity: usize) -> SupervisorHandle {
        let (batch_tx, batch_rx) = mpsc::channel(capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Self {
            peer: transport.peer(),
            transport,
            options,
            state: ConnectionState::Disconnected,
            state_tx,
            sequence: SequenceId::default(),
            ever_connected: false,
            consecutive_failures: 0,
            connect_errors: ConnectErrorFilter::default(),
        };
        let span = mqtt_span!(peer = %supervisor.peer);
        let task = tokio::spawn(supervisor.run(batch_rx, shutdown_rx).instrument(span));

        SupervisorHandle {
            queue: PublishQueue { tx: batch_tx },
            state_rx,
            shutdown_tx,
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        mut batches: mpsc::Receiver<Vec<Publication>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), MqttError> {
        info!("Connecting to MQTT broker");
        let mut session = self.open_session();
        let mut batches_open = true;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }

                event = session.events.recv() => {
                    let event = event.unwrap_or_else(|| {
                        Err(MqttError::ConnectionFailed("MQTT event loop stopped".into()))
                    });
                    let keep_running = match event {
                        Ok(TransportEvent::ConnectionAcknowledged) => {
                            self.on_connected();
                            true
                        }
                        Ok(TransportEvent::Disconnected) => {
                            let reason = MqttError::ConnectionFailed("broker sent DISCONNECT".into());
                            self.handle_connection_loss(reason, &mut session, &mut shutdown_rx).await?
                        }
                        Ok(other) => {
                            trace!(event = ?other, "MQTT event");
                            true
                        }
                        Err(error) => {
                            self.handle_connection_loss(error, &mut session, &mut shutdown_rx).await?
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }

                batch = batches.recv(), if batches_open => match batch {
                    Some(batch) => self.publish_batch(batch),
                    None => {
                        debug!("All publishers gone");
                        batches_open = false;
                    }
                },
            }
        }

        self.close(&mut session).await;
        Ok(())
    }

    /// Create a fresh client and start polling its events
    fn open_session(&mut self) -> Session {
        let source = self.transport.connect();
        let (events_tx, events) = mpsc::channel(SESSION_EVENT_CAPACITY);
        let poller = tokio::spawn(drive_session(source, events_tx).in_current_span());
        self.transition(ConnectionEvent::ConnectRequested);
        Session { events, poller }
    }

    fn on_connected(&mut self) {
        self.transition(ConnectionEvent::ConnAckReceived);
        self.ever_connected = true;
        self.consecutive_failures = 0;
        self.connect_errors.reset();
        metrics().record_connected();

        if let Some(topic) = self.options.lwt_topic.clone() {
            self.send(topic, Bytes::from_static(LWT_ONLINE.as_bytes()), true);
        }
    }

    /// Returns `Ok(false)` to stop the loop, `Err` when the very first
    /// connection never succeeded
    async fn handle_connection_loss(
        &mut self,
        error: MqttError,
        session: &mut Session,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<bool, MqttError> {
        let reason = describe(&error);
        if self.state.is_connected() {
            metrics().record_disconnected();
        }
        self.transition(ConnectionEvent::NetworkError(reason.clone()));
        if self.connect_errors.should_report(&reason) {
            warn!(error = %reason, "MQTT connection error");
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            self.ever_connected,
            *shutdown_rx.borrow(),
            self.consecutive_failures,
            &self.options.reconnect,
        );
        match decision {
            ReconnectionDecision::AbortShutdownRequested => Ok(false),
            ReconnectionDecision::AbortInitialConnectFailed => {
                error!(error = %reason, "Could not connect to MQTT broker");
                Err(MqttError::InitialConnectFailed(reason))
            }
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.consecutive_failures = attempt;
                metrics().record_reconnect_attempt();
                info!(attempt, "Reconnecting to MQTT broker");

                if delay_ms > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return Ok(false);
                            }
                        }
                    }
                }

                *session = self.open_session();
                Ok(true)
            }
        }
    }

    fn publish_batch(&mut self, batch: Vec<Publication>) {
        if !HealthMonitor::can_publish(self.state) {
            metrics().record_dropped(batch.len() as u64);
            debug!(count = batch.len(), "Not connected, dropping publications");
            return;
        }
        let retain = self.options.retain;
        for publication in batch {
            self.send(publication.topic, Bytes::from(publication.payload), retain);
        }
    }

    fn send(&mut self, topic: String, payload: Bytes, retain: bool) {
        let seq = self.sequence.next();
        trace!(seq, topic = %topic, size = payload.len(), "Publishing");
        let message = OutgoingMessage {
            seq,
            topic,
            payload,
            qos: self.options.qos,
            retain,
        };

        match self.transport.publish(message) {
            Ok(()) => metrics().record_published(),
            Err(e) => {
                metrics().record_dropped(1);
                if PUBLISH_WARNINGS.allow() {
                    warn!(seq, error = %describe(&e), "Dropping publish");
                }
            }
        }
    }

    /// Best-effort `offline` marker and clean DISCONNECT
    async fn close(&mut self, session: &mut Session) {
        if self.state.is_connected() {
            if let Some(topic) = self.options.lwt_topic.clone() {
                self.send(topic, Bytes::from_static(LWT_OFFLINE.as_bytes()), true);
            }
            match self.transport.disconnect() {
                Ok(()) => {
                    let flushed = tokio::time::timeout(self.options.shutdown_timeout, async {
                        loop {
                            match session.events.recv().await {
                                Some(Ok(TransportEvent::DisconnectSent)) | Some(Err(_)) | None => {
                                    break
                                }
                                Some(Ok(_)) => continue,
                            }
                        }
                    })
                    .await;
                    if flushed.is_err() {
                        warn!("Timed out waiting for MQTT disconnect to complete");
                    }
                }
                Err(e) => warn!(error = %describe(&e), "MQTT disconnect failed"),
            }
            metrics().record_disconnected();
        }

        self.state = ConnectionState::Disconnected;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("MQTT connection closed");
    }

    fn transition(&mut self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(self.state, &event);
        HealthMonitor::log_state_transition(self.state, next, &self.peer);
        self.state = next;
        self.state_tx.send_replace(next);
    }
}

/// Error text including its immediate cause
fn describe(error: &MqttError) -> String {
    match error.source() {
        Some(source) => format!("{error}: {source}"),
        None => error.to_string(),
    }
}
