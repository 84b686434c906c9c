use std::collections::HashMap;
use std::time::Duration;

/// Common configuration fields shared between producer, consumer and reader
///
/// This struct contains the configuration fields that are identical across
/// the broker-facing clients, eliminating duplication and ensuring
/// consistency.
#[derive(Debug, Clone)]
pub struct CommonKafkaConfig {
    /// Kafka broker list (e.g., "localhost:9092" or "broker1:9092,broker2:9092")
    pub brokers: String,
    /// Client ID for this client instance
    pub client_id: Option<String>,
    /// Request timeout for Kafka operations
    pub request_timeout: Duration,
    /// Retry backoff time between failed requests
    pub retry_backoff: Duration,
    /// Additional custom configuration properties
    pub custom_config: HashMap<String, String>,
}

impl Default for CommonKafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: None,
            request_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(100),
            custom_config: HashMap::new(),
        }
    }
}

impl CommonKafkaConfig {
    /// Create a new config with the given broker list
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            ..Default::default()
        }
    }

    /// Set client ID
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set retry backoff
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Add custom configuration property
    pub fn custom_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_config.insert(key.into(), value.into());
        self
    }

    /// Apply the common fields to an rdkafka client configuration
    pub(crate) fn apply(&self, config: &mut rdkafka::config::ClientConfig) {
        config.set("bootstrap.servers", &self.brokers);
        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        config.set(
            "request.timeout.ms",
            self.request_timeout.as_millis().to_string(),
        );
        config.set(
            "retry.backoff.ms",
            self.retry_backoff.as_millis().to_string(),
        );
        for (key, value) in &self.custom_config {
            config.set(key, value);
        }
    }
}
