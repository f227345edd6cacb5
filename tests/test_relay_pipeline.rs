//! End-to-end relay behavior against a scripted transport
//!
//! Configuration resolves into a router and publish options, records flow
//! through the publisher, and the mock broker observes what would go out on
//! the wire.

use rtl433_mqtt_relay::config::MqttSection;
use rtl433_mqtt_relay::record::{Record, Value};
use rtl433_mqtt_relay::testing::{MockBroker, MockTransport};
use rtl433_mqtt_relay::transport::mqtt::{
    ConnectionState, ConnectionSupervisor, ReconnectConfig, SupervisorHandle,
};
use rtl433_mqtt_relay::Publisher;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

async fn start(spec: &str) -> (Publisher, SupervisorHandle, MockBroker) {
    let settings = MqttSection::from_output_spec(spec)
        .unwrap()
        .resolve("host1", None)
        .unwrap();
    let mut options = settings.publish.clone();
    options.reconnect = ReconnectConfig {
        retry_delay: Duration::ZERO,
    };

    let (transport, broker) = MockTransport::new();
    let mut handle = ConnectionSupervisor::spawn(transport, options, 16);
    broker.accept();
    handle.wait_until_connected(WAIT).await.unwrap();

    let publisher = Publisher::new(settings.router, handle.queue());
    (publisher, handle, broker)
}

fn sensor_record() -> Record {
    Record::new()
        .with("model", "TempSensor")
        .with("id", 42)
        .with("channel", 2)
        .with("temperature_C", 21.5)
}

#[tokio::test]
async fn test_online_marker_before_device_data() {
    let (publisher, _handle, broker) = start("mqtt,lwt,devices").await;

    publisher.publish(&sensor_record()).unwrap();
    let published = broker.wait_for_published(4, WAIT).await;
    let text = broker.published_text();

    assert_eq!(published.len(), 4);
    assert_eq!(
        text[0],
        ("rtl_433/host1/lwt".to_string(), "online".to_string())
    );
    assert!(published[0].retain);

    let base = "rtl_433/host1/devices/TempSensor/2/42";
    assert_eq!(
        text[1..].to_vec(),
        vec![
            (format!("{base}/id"), "42".to_string()),
            (format!("{base}/channel"), "2".to_string()),
            (format!("{base}/temperature_C"), "21.5".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_state_records_only_reach_states_topic() {
    let (publisher, _handle, broker) = start("mqtt").await;

    let state = Record::new()
        .with("time", "2024-01-01 00:00:00")
        .with("frequencies", vec![Value::from(433_920_000)]);
    publisher.publish(&state).unwrap();

    broker.wait_for_published(1, WAIT).await;
    let text = broker.published_text();
    assert_eq!(text.len(), 1);
    assert_eq!(text[0].0, "rtl_433/host1/states");
    assert_eq!(
        text[0].1,
        r#"{"time":"2024-01-01 00:00:00","frequencies":[433920000]}"#
    );
}

#[tokio::test]
async fn test_event_document_then_devices() {
    let (publisher, _handle, broker) = start("mqtt,retain").await;

    publisher.publish(&sensor_record()).unwrap();
    let published = broker.wait_for_published(4, WAIT).await;

    assert_eq!(published[0].topic, "rtl_433/host1/events");
    assert_eq!(
        String::from_utf8_lossy(&published[0].payload),
        r#"{"model":"TempSensor","id":42,"channel":2,"temperature_C":21.5}"#
    );
    assert!(published.iter().all(|m| m.retain));
    assert!(published[1..]
        .iter()
        .all(|m| m.topic.starts_with("rtl_433/host1/devices/TempSensor/2/42/")));
}

#[tokio::test]
async fn test_records_are_not_interleaved() {
    let (publisher, _handle, broker) = start("mqtt,devices=d[/model][/id]").await;

    for id in 0..10 {
        let record = Record::new()
            .with("model", "M")
            .with("id", id)
            .with("a", 1)
            .with("b", 2);
        publisher.publish(&record).unwrap();
    }
    let published = broker.wait_for_published(30, WAIT).await;
    assert_eq!(published.len(), 30);

    for (n, chunk) in published.chunks(3).enumerate() {
        let prefix = format!("d/M/{n}/");
        assert!(chunk.iter().all(|m| m.topic.starts_with(&prefix)), "{chunk:?}");
    }
    let seqs: Vec<u16> = published.iter().map(|m| m.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_relay_survives_connection_loss() {
    let (publisher, handle, broker) = start("mqtt,lwt,events").await;

    broker.fail("connection reset by peer");
    assert_eq!(broker.wait_for_reconnects(1, WAIT).await, 1);

    // dropped while the session is down, never an error for the caller
    publisher.publish(&sensor_record()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    broker.accept();
    let mut state = handle.subscribe_state();
    let reconnected = tokio::time::timeout(
        WAIT,
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .map(|waited| waited.is_ok());
    assert_eq!(reconnected, Ok(true));

    publisher.publish(&sensor_record()).unwrap();
    let published = broker.wait_for_published(3, WAIT).await;
    let topics: Vec<&str> = published.iter().map(|m| m.topic.as_str()).collect();
    assert_eq!(
        topics,
        vec![
            "rtl_433/host1/lwt",
            "rtl_433/host1/lwt",
            "rtl_433/host1/events"
        ]
    );
}

#[tokio::test]
async fn test_graceful_shutdown_marks_offline() {
    let (publisher, handle, broker) = start("mqtt,lwt,events").await;
    publisher.publish(&sensor_record()).unwrap();
    broker.wait_for_published(2, WAIT).await;

    handle.shutdown().await.unwrap();

    let text = broker.published_text();
    assert_eq!(
        text.last(),
        Some(&("rtl_433/host1/lwt".to_string(), "offline".to_string()))
    );
    assert_eq!(broker.disconnects(), 1);
    assert!(publisher.publish(&sensor_record()).is_err());
}
