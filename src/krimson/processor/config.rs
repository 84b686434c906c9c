use std::time::Duration;

use crate::krimson::kafka::common_config::CommonKafkaConfig;
use crate::krimson::kafka::consumer_config::{ConsumerConfig, OffsetReset};
use crate::krimson::kafka::producer_config::ProducerConfig;

/// Configuration for a processor
///
/// One subscription (group + input topics), one producer (optional default
/// output topic), one broker connection shared by both sides.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Common configuration (brokers, client id)
    pub common: CommonKafkaConfig,
    /// Consumer group ID
    pub group_id: String,
    /// Input topics; at least one is required
    pub input_topics: Vec<String>,
    /// Default topic for output requests that do not name one
    pub output_topic: Option<String>,
    /// Auto offset reset behavior for the subscription
    pub auto_offset_reset: OffsetReset,
    /// Interval between periodic commits of tracked positions
    pub commit_interval: Duration,
}

impl ProcessorConfig {
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            common: CommonKafkaConfig::new(brokers),
            group_id: group_id.into(),
            input_topics: Vec::new(),
            output_topic: None,
            auto_offset_reset: OffsetReset::Earliest,
            commit_interval: Duration::from_secs(5),
        }
    }

    /// Set client ID
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.common = self.common.client_id(client_id);
        self
    }

    /// Add one input topic
    pub fn input_topic(mut self, topic: impl Into<String>) -> Self {
        self.input_topics.push(topic.into());
        self
    }

    /// Add several input topics
    pub fn input_topics<I, T>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.input_topics.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Set the default output topic
    pub fn output_topic(mut self, topic: impl Into<String>) -> Self {
        self.output_topic = Some(topic.into());
        self
    }

    /// Set auto offset reset behavior
    pub fn auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    /// Set the periodic commit interval
    pub fn commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    /// The processor's display name: the client id when set, else the group.
    pub fn name(&self) -> &str {
        self.common.client_id.as_deref().unwrap_or(&self.group_id)
    }

    pub(crate) fn consumer_config(&self) -> ConsumerConfig {
        let mut config = ConsumerConfig::new(self.common.brokers.clone(), self.group_id.clone())
            .auto_offset_reset(self.auto_offset_reset)
            .auto_commit_interval(self.commit_interval);
        config.common = self.common.clone();
        config
    }

    pub(crate) fn producer_config(&self) -> ProducerConfig {
        let mut config = ProducerConfig::new(self.common.brokers.clone());
        config.common = self.common.clone();
        config.topic = self.output_topic.clone();
        config
    }
}
