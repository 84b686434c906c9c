use std::time::Duration;

use rdkafka::config::ClientConfig;

use crate::krimson::kafka::common_config::CommonKafkaConfig;

/// Auto offset reset behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    /// Reset to earliest available offset
    Earliest,
    /// Reset to latest offset
    Latest,
    /// Throw error if no initial offset
    None,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
            OffsetReset::None => "none",
        }
    }
}

/// Configuration for the consumer adapter with sensible defaults
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Common configuration shared with producer
    pub common: CommonKafkaConfig,
    /// Consumer group ID
    pub group_id: String,
    /// Auto offset reset behavior
    pub auto_offset_reset: OffsetReset,
    /// Interval between periodic commits of tracked positions
    pub auto_commit_interval: Duration,
    /// Session timeout
    pub session_timeout: Duration,
    /// Heartbeat interval
    pub heartbeat_interval: Duration,
    /// Emit a partition-end signal when a partition catches up to its end
    /// offset. Used by bounded readers.
    pub partition_eof: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            common: CommonKafkaConfig::default(),
            group_id: "default-group".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            auto_commit_interval: Duration::from_secs(5),
            session_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(3),
            partition_eof: false,
        }
    }
}

impl ConsumerConfig {
    /// Create a new config with brokers and group ID
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            common: CommonKafkaConfig::new(brokers),
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    /// Set client ID
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.common = self.common.client_id(client_id);
        self
    }

    /// Set auto offset reset behavior
    pub fn auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    /// Set the periodic commit interval for tracked positions
    pub fn auto_commit_interval(mut self, interval: Duration) -> Self {
        self.auto_commit_interval = interval;
        self
    }

    /// Set session and heartbeat timeouts
    pub fn session_config(
        mut self,
        session_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        self.session_timeout = session_timeout;
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Enable partition-end signalling
    pub fn partition_eof(mut self, enabled: bool) -> Self {
        self.partition_eof = enabled;
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
    ///
    /// Auto commit is always disabled; positions are committed explicitly
    /// from the tracked frontier.
    pub(crate) fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        self.common.apply(&mut config);
        config
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", self.auto_offset_reset.as_str())
            .set(
                "session.timeout.ms",
                self.session_timeout.as_millis().to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.heartbeat_interval.as_millis().to_string(),
            )
            .set(
                "enable.partition.eof",
                if self.partition_eof { "true" } else { "false" },
            );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConsumerConfig::default();
        assert_eq!(config.common.brokers, "localhost:9092");
        assert_eq!(config.group_id, "default-group");
        assert_eq!(config.auto_offset_reset.as_str(), "earliest");
        assert!(!config.partition_eof);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConsumerConfig::new("broker1:9092", "my-group")
            .client_id("test-consumer")
            .auto_offset_reset(OffsetReset::Latest)
            .auto_commit_interval(Duration::from_secs(10))
            .partition_eof(true);

        assert_eq!(config.common.brokers, "broker1:9092");
        assert_eq!(config.group_id, "my-group");
        assert_eq!(config.common.client_id, Some("test-consumer".to_string()));
        assert_eq!(config.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(config.auto_commit_interval, Duration::from_secs(10));
        assert!(config.partition_eof);
    }
}
