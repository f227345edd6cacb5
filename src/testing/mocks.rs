//! Mock implementations for testing
//!
//! [`MockTransport`] hands out [`MockEvents`] that replay connection events
//! scripted through the paired [`MockBroker`], and records every publish, so
//! the supervisor can be exercised without a broker.
//!
//! A handshake delay makes each session spend that long "connecting" on its
//! first poll. Like a real client's handshake, the progress is lost if the
//! poll is dropped before it completes.

use crate::transport::{EventSource, MqttError, OutgoingMessage, Transport, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

type ScriptedEvent = Result<TransportEvent, MqttError>;
type Script = Arc<AsyncMutex<mpsc::UnboundedReceiver<ScriptedEvent>>>;

#[derive(Debug, Default)]
struct Shared {
    published: Mutex<Vec<OutgoingMessage>>,
    sessions: AtomicU32,
    handshakes_started: AtomicU32,
    handshakes_completed: AtomicU32,
    handshake_delay_ms: AtomicU64,
    disconnects: AtomicU32,
    fail_publishes: AtomicBool,
}

/// Transport whose network side is driven by a [`MockBroker`]
#[derive(Debug)]
pub struct MockTransport {
    script: Script,
    script_tx: mpsc::UnboundedSender<ScriptedEvent>,
    shared: Arc<Shared>,
}

/// Event source of one mock session
#[derive(Debug)]
pub struct MockEvents {
    script: Script,
    shared: Arc<Shared>,
    handshaken: bool,
}

/// Test-side controller of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockBroker {
    events: mpsc::UnboundedSender<ScriptedEvent>,
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> (Self, MockBroker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let transport = Self {
            script: Arc::new(AsyncMutex::new(rx)),
            script_tx: tx.clone(),
            shared: shared.clone(),
        };
        (transport, MockBroker { events: tx, shared })
    }
}

#[async_trait]
impl EventSource for MockEvents {
    async fn next_event(&mut self) -> Result<TransportEvent, MqttError> {
        if !self.handshaken {
            self.shared.handshakes_started.fetch_add(1, Ordering::SeqCst);
            let delay = self.shared.handshake_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.handshaken = true;
            self.shared.handshakes_completed.fetch_add(1, Ordering::SeqCst);
        }

        let mut script = self.script.lock().await;
        match script.recv().await {
            Some(event) => event,
            // the transport keeps a sender, so this only happens on teardown
            None => std::future::pending().await,
        }
    }
}

impl Transport for MockTransport {
    type Events = MockEvents;

    fn connect(&mut self) -> MockEvents {
        self.shared.sessions.fetch_add(1, Ordering::SeqCst);
        MockEvents {
            script: self.script.clone(),
            shared: self.shared.clone(),
            handshaken: false,
        }
    }

    fn publish(&mut self, message: OutgoingMessage) -> Result<(), MqttError> {
        if self.shared.fail_publishes.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("mock publish failure".into()));
        }
        lock(&self.shared.published).push(message);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), MqttError> {
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        let _ = self.script_tx.send(Ok(TransportEvent::DisconnectSent));
        Ok(())
    }

    fn peer(&self) -> String {
        "mock:1883".to_string()
    }
}

impl MockBroker {
    /// Script a ConnAck
    pub fn accept(&self) {
        self.send(Ok(TransportEvent::ConnectionAcknowledged));
    }

    /// Script a low-level connection failure
    pub fn fail(&self, reason: &str) {
        self.send(Err(MqttError::ConnectionFailed(reason.to_string().into())));
    }

    /// Script a broker-initiated DISCONNECT
    pub fn disconnect(&self) {
        self.send(Ok(TransportEvent::Disconnected));
    }

    pub fn send(&self, event: ScriptedEvent) {
        // receiver gone means the supervisor stopped; nothing left to script
        let _ = self.events.send(event);
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.shared.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Time every later session spends in its handshake before it can
    /// deliver scripted events
    pub fn set_handshake_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.shared.handshake_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<OutgoingMessage> {
        lock(&self.shared.published).clone()
    }

    /// Published `(topic, payload)` pairs as text
    pub fn published_text(&self) -> Vec<(String, String)> {
        self.published()
            .into_iter()
            .map(|m| (m.topic, String::from_utf8_lossy(&m.payload).into_owned()))
            .collect()
    }

    /// Sessions started after the first one
    pub fn reconnects(&self) -> u32 {
        self.shared.sessions.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Handshakes begun, including ones abandoned midway
    pub fn handshakes_started(&self) -> u32 {
        self.shared.handshakes_started.load(Ordering::SeqCst)
    }

    pub fn handshakes_completed(&self) -> u32 {
        self.shared.handshakes_completed.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` messages were published, or `timeout`
    /// elapses; returns whatever was published by then
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> Vec<OutgoingMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let published = self.published();
            if published.len() >= count || tokio::time::Instant::now() >= deadline {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until the transport started at least `count` reconnect sessions
    pub async fn wait_for_reconnects(&self, count: u32, timeout: Duration) -> u32 {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let reconnects = self.reconnects();
            if reconnects >= count || tokio::time::Instant::now() >= deadline {
                return reconnects;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
