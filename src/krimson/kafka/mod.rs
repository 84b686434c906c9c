//! Broker-facing building blocks: records, headers, serialization, the
//! producer, the consumer adapter and the bounded reader.

pub mod common_config;
pub mod consumer;
pub mod consumer_config;
pub mod headers;
pub mod kafka_error;
pub mod positions;
pub mod producer;
pub mod producer_config;
pub mod reader;
pub mod record;
pub mod serialization;

pub use common_config::CommonKafkaConfig;
pub use consumer::{KrimsonConsumer, KrimsonConsumerContext, PartitionEndHook, RevokeHook};
pub use consumer_config::{ConsumerConfig, OffsetReset};
pub use headers::Headers;
pub use kafka_error::{ConsumerError, ProducerError, ReaderError};
pub use positions::{commit_list, PositionTracker, SubscriptionTopicGap};
pub use producer::{
    DeliveryCallback, KrimsonProducer, ProducerLogContext, ProducerRequest, ProducerResult,
    RecordSink,
};
pub use producer_config::ProducerConfig;
pub use reader::{KrimsonReader, ReaderConfig, StartPosition};
pub use record::{
    KrimsonRecord, RecordId, RecordPosition, RequestId, TopicPartition, EVENT_TIME_HEADER,
    NO_EVENT_TIME,
};
pub use serialization::{
    from_json, to_json, BytesSerializer, JsonSerializer, SerializationError, Serializer,
    StringSerializer,
};

