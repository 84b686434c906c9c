//! Broker-facing error types for the producer, consumer and reader.

use rdkafka::error::KafkaError;
use std::error::Error;
use std::fmt;

use crate::krimson::kafka::serialization::SerializationError;

/// Error type for producer operations
#[derive(Debug)]
pub enum ProducerError {
    /// Kafka client error
    Kafka(KafkaError),
    /// Serialization error
    Serialization(SerializationError),
    /// Configuration error, e.g. no topic on the request and no default
    Configuration(String),
    /// Produce attempted after the producer was closed
    Closed,
    /// Flush did not drain within the given timeout
    FlushTimeout,
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerError::Kafka(err) => write!(f, "Kafka error: {}", err),
            ProducerError::Serialization(err) => write!(f, "Serialization error: {}", err),
            ProducerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ProducerError::Closed => write!(f, "Producer is closed"),
            ProducerError::FlushTimeout => write!(f, "Flush timed out with messages in flight"),
        }
    }
}

impl Error for ProducerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProducerError::Kafka(err) => Some(err),
            ProducerError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KafkaError> for ProducerError {
    fn from(err: KafkaError) -> Self {
        ProducerError::Kafka(err)
    }
}

impl From<SerializationError> for ProducerError {
    fn from(err: SerializationError) -> Self {
        ProducerError::Serialization(err)
    }
}

/// Error type for consumer operations
#[derive(Debug)]
pub enum ConsumerError {
    /// Kafka client error
    Kafka(KafkaError),
    /// Serialization error
    Serialization(SerializationError),
    /// Stop was called on an already stopped consumer
    AlreadyStopped,
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerError::Kafka(err) => write!(f, "Kafka error: {}", err),
            ConsumerError::Serialization(err) => write!(f, "Serialization error: {}", err),
            ConsumerError::AlreadyStopped => write!(f, "Consumer is already stopped"),
        }
    }
}

impl Error for ConsumerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConsumerError::Kafka(err) => Some(err),
            ConsumerError::Serialization(err) => Some(err),
            ConsumerError::AlreadyStopped => None,
        }
    }
}

impl From<KafkaError> for ConsumerError {
    fn from(err: KafkaError) -> Self {
        ConsumerError::Kafka(err)
    }
}

impl From<SerializationError> for ConsumerError {
    fn from(err: SerializationError) -> Self {
        ConsumerError::Serialization(err)
    }
}

/// Error type for reader operations
#[derive(Debug)]
pub enum ReaderError {
    /// Kafka client error
    Kafka(KafkaError),
    /// Serialization error
    Serialization(SerializationError),
    /// Topic has no partitions or does not exist
    UnknownTopic(String),
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::Kafka(err) => write!(f, "Kafka error: {}", err),
            ReaderError::Serialization(err) => write!(f, "Serialization error: {}", err),
            ReaderError::UnknownTopic(topic) => write!(f, "Unknown topic: {}", topic),
        }
    }
}

impl Error for ReaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReaderError::Kafka(err) => Some(err),
            ReaderError::Serialization(err) => Some(err),
            ReaderError::UnknownTopic(_) => None,
        }
    }
}

impl From<KafkaError> for ReaderError {
    fn from(err: KafkaError) -> Self {
        ReaderError::Kafka(err)
    }
}

impl From<SerializationError> for ReaderError {
    fn from(err: SerializationError) -> Self {
        ReaderError::Serialization(err)
    }
}
