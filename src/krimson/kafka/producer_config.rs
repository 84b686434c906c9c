use std::time::Duration;

use rdkafka::config::ClientConfig;

use crate::krimson::kafka::common_config::CommonKafkaConfig;

/// Configuration for the producer with sensible defaults
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Common configuration shared with consumer
    pub common: CommonKafkaConfig,
    /// Default topic for requests that do not name one
    pub topic: Option<String>,
    /// Message delivery timeout (librdkafka `message.timeout.ms`)
    pub message_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            common: CommonKafkaConfig::default(),
            topic: None,
            message_timeout: Duration::from_secs(30),
        }
    }
}

impl ProducerConfig {
    /// Create a new config with the given broker list
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            common: CommonKafkaConfig::new(brokers),
            ..Default::default()
        }
    }

    /// Set client ID
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.common = self.common.client_id(client_id);
        self
    }

    /// Set the default output topic
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the message delivery timeout
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Add custom configuration property
    pub fn custom_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.common = self.common.custom_property(key, value);
        self
    }

    /// Convenience accessor for the broker list
    pub fn brokers(&self) -> &str {
        &self.common.brokers
    }

    /// Assemble the rdkafka client configuration.
    pub(crate) fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        self.common.apply(&mut config);
        config.set(
            "message.timeout.ms",
            self.message_timeout.as_millis().to_string(),
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_topic() {
        let config = ProducerConfig::default();
        assert!(config.topic.is_none());
        assert_eq!(config.common.brokers, "localhost:9092");
    }

    #[test]
    fn test_builder_pattern() {
        let config = ProducerConfig::new("broker1:9092")
            .client_id("test-producer")
            .topic("events")
            .message_timeout(Duration::from_secs(10));

        assert_eq!(config.topic, Some("events".to_string()));
        assert_eq!(config.common.client_id, Some("test-producer".to_string()));
        assert_eq!(config.message_timeout, Duration::from_secs(10));
    }
}
