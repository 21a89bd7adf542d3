use crate::config::AppConfig;
use crate::models::realtime::{RealtimeEnvelope, Room};
use crate::notify::{NotifyError, RealtimePublisher};
use async_trait::async_trait;
use chrono::Utc;
use prost::Message;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

fn envelope(room: Room, event: &str, payload: &Value) -> Result<RealtimeEnvelope, NotifyError> {
    Ok(RealtimeEnvelope {
        room: room.to_string(),
        event: event.to_string(),
        payload_json: serde_json::to_string(payload)?,
        emitted_at_ms: Utc::now().timestamp_millis(),
    })
}

/// Publishes protobuf envelopes to the topic the socket gateway consumes,
/// keyed by room so a room's events stay ordered within a partition.
pub struct KafkaRealtimePublisher {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaRealtimePublisher {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        info!("Initializing Kafka producer for topic: {}", config.kafka_realtime_topic);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("message.timeout.ms", config.kafka_message_timeout_ms.to_string())
            .set("security.protocol", &config.kafka_security_protocol);

        if config.kafka_security_protocol.starts_with("SASL") {
            client_config
                .set("sasl.mechanism", &config.kafka_sasl_mechanism)
                .set("sasl.username", &config.kafka_username)
                .set("sasl.password", &config.kafka_password);
        }

        let producer: FutureProducer = client_config.create()?;

        Ok(Self {
            producer,
            topic: config.kafka_realtime_topic.clone(),
            queue_timeout: Duration::from_millis(config.kafka_message_timeout_ms),
        })
    }
}

#[async_trait]
impl RealtimePublisher for KafkaRealtimePublisher {
    async fn emit(&self, room: Room, event: &str, payload: &Value) -> Result<(), NotifyError> {
        let envelope = envelope(room, event, payload)?;
        let bytes = envelope.encode_to_vec();

        let record = FutureRecord::to(&self.topic)
            .key(&envelope.room)
            .payload(&bytes);

        let (partition, offset) = self
            .producer
            .send(record, self.queue_timeout)
            .await
            .map_err(|(e, _)| NotifyError::Unavailable(e.to_string()))?;

        debug!(
            "Emitted '{}' to {} (partition {}, offset {})",
            event, envelope.room, partition, offset
        );
        Ok(())
    }
}

/// Stand-in used when Kafka is disabled: logs each emit instead of sending it.
pub struct TracingRealtimePublisher;

#[async_trait]
impl RealtimePublisher for TracingRealtimePublisher {
    async fn emit(&self, room: Room, event: &str, payload: &Value) -> Result<(), NotifyError> {
        let envelope = envelope(room, event, payload)?;
        info!(
            "Realtime '{}' -> {}: {}",
            envelope.event, envelope.room, envelope.payload_json
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use serde_json::json;

    #[test]
    fn test_envelope_carries_room_and_payload() {
        let env = envelope(Room::Role(Role::Admin), "emergency", &json!({ "k": 1 })).unwrap();
        assert_eq!(env.room, "role:admin");
        assert_eq!(env.event, "emergency");
        assert_eq!(env.payload_json, r#"{"k":1}"#);
        assert!(env.emitted_at_ms > 0);
    }

    #[tokio::test]
    async fn test_tracing_publisher_accepts_everything() {
        let publisher = TracingRealtimePublisher;
        publisher
            .emit_to_role(Role::Hospital, "emergency", &json!({ "requestId": "x" }))
            .await
            .unwrap();
    }
}
