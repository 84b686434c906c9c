//! Krimson is a message-streaming application toolkit for Kafka-compatible
//! brokers.
//!
//! Applications consume records from input topics, transform them through a
//! routed handler pipeline and produce derived records to output topics.
//! Source connectors ingest external data on a periodic schedule and publish
//! it as first-class stream records, deduplicated against per-topic
//! event-time checkpoints read back from the broker itself.
//!
//! The main pieces:
//! - [`KrimsonProcessor`]: subscription loop, router dispatch, output
//!   tracking, commit-after-ack, graceful termination.
//! - [`KrimsonProducer`]: async produce with per-request delivery callbacks
//!   and a flush/close discipline.
//! - [`KrimsonConsumer`]: a polling consumer as a one-record-at-a-time
//!   asynchronous sequence with position tracking.
//! - [`KrimsonReader`]: stateless bounded reads (topic tails, latest
//!   positions, last records per partition).
//! - [`SourceConnectorRuntime`]: periodic polling of an external origin with
//!   event-time checkpoint dedup.

pub mod krimson;

pub use krimson::kafka::{
    BytesSerializer, CommonKafkaConfig, ConsumerConfig, ConsumerError, DeliveryCallback, Headers,
    JsonSerializer, KrimsonConsumer, KrimsonProducer, KrimsonReader, KrimsonRecord, OffsetReset,
    PositionTracker, ProducerConfig, ProducerError, ProducerRequest, ProducerResult, ReaderConfig,
    ReaderError, RecordId, RecordPosition, RecordSink, RequestId, SerializationError, Serializer,
    StartPosition, StringSerializer, SubscriptionTopicGap, TopicPartition, EVENT_TIME_HEADER,
};
pub use krimson::connector::{
    CheckpointSource, ConnectorError, ProcessingState, SourceCheckpoint, SourceCheckpointManager,
    SourceConnector, SourceConnectorContext, SourceConnectorOptions, SourceConnectorRuntime,
    SourceOperation, SourceRecord,
};
pub use krimson::processor::{
    HandlerError, Interceptor, InterceptorChain, KrimsonProcessor, ProcessorConfig,
    ProcessorError, ProcessorEvent, ProcessorStatus, RecordContext, RecordHandler, Router,
    TopicRouter,
};
