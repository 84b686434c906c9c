//! Lifecycle event fan-out.
//!
//! Events are emitted by the consumer adapter, the producer delivery path
//! and the processor itself, and delivered in declaration order to a fixed
//! chain of observers. Observers must not influence the pipeline; a
//! panicking observer is logged and isolated.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error, info, warn};
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::error::KafkaError;

use crate::krimson::kafka::positions::SubscriptionTopicGap;
use crate::krimson::kafka::producer::ProducerResult;
use crate::krimson::kafka::record::{KrimsonRecord, TopicPartition};
use crate::krimson::processor::error::ProcessorError;

/// Error detail carried by observer events.
pub type EventError = Arc<dyn std::error::Error + Send + Sync>;

/// Lifecycle events delivered to interceptors
///
/// A closed vocabulary: every observable transition of the consumer, the
/// producer delivery path and the processor state machine maps to exactly
/// one variant.
pub enum ProcessorEvent<V> {
    /// A log line surfaced by the broker client
    ConsumerLog {
        level: log::Level,
        facility: String,
        message: String,
    },
    /// An error surfaced by the broker client
    ConsumerError { error: KafkaError, reason: String },
    PartitionsAssigned(Vec<TopicPartition>),
    PartitionsRevoked(Vec<TopicPartition>),
    PartitionsLost(Vec<TopicPartition>),
    PositionsCommitted {
        positions: Vec<(TopicPartition, i64)>,
        error: Option<KafkaError>,
    },
    PartitionEndReached(TopicPartition),
    ProcessorActivated {
        processor: String,
        topics: Vec<String>,
    },
    ProcessorTerminating { processor: String },
    ProcessorTerminated {
        processor: String,
        gaps: Vec<SubscriptionTopicGap>,
        error: Option<Arc<ProcessorError>>,
    },
    /// A record was received and will be dispatched
    InputReady { record: Arc<KrimsonRecord<V>> },
    /// The router declined the record; its position is tracked as-is
    InputSkipped { record: Arc<KrimsonRecord<V>> },
    /// The handler finished; outputs (possibly zero) were captured
    InputConsumed {
        record: Arc<KrimsonRecord<V>>,
        outputs: usize,
    },
    /// All outputs for the record were acknowledged and its position tracked
    InputProcessed {
        record: Arc<KrimsonRecord<V>>,
        outputs: usize,
    },
    InputError {
        record: Arc<KrimsonRecord<V>>,
        error: EventError,
    },
    /// One output delivery completed (successfully or not)
    OutputProcessed {
        record: Arc<KrimsonRecord<V>>,
        result: ProducerResult,
    },
    /// The user's termination handler itself failed
    ProcessorTerminatedUserHandlingError {
        processor: String,
        detail: String,
    },
}

impl<V> ProcessorEvent<V> {
    /// Stable name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorEvent::ConsumerLog { .. } => "ConsumerLog",
            ProcessorEvent::ConsumerError { .. } => "ConsumerError",
            ProcessorEvent::PartitionsAssigned(_) => "PartitionsAssigned",
            ProcessorEvent::PartitionsRevoked(_) => "PartitionsRevoked",
            ProcessorEvent::PartitionsLost(_) => "PartitionsLost",
            ProcessorEvent::PositionsCommitted { .. } => "PositionsCommitted",
            ProcessorEvent::PartitionEndReached(_) => "PartitionEndReached",
            ProcessorEvent::ProcessorActivated { .. } => "ProcessorActivated",
            ProcessorEvent::ProcessorTerminating { .. } => "ProcessorTerminating",
            ProcessorEvent::ProcessorTerminated { .. } => "ProcessorTerminated",
            ProcessorEvent::InputReady { .. } => "InputReady",
            ProcessorEvent::InputSkipped { .. } => "InputSkipped",
            ProcessorEvent::InputConsumed { .. } => "InputConsumed",
            ProcessorEvent::InputProcessed { .. } => "InputProcessed",
            ProcessorEvent::InputError { .. } => "InputError",
            ProcessorEvent::OutputProcessed { .. } => "OutputProcessed",
            ProcessorEvent::ProcessorTerminatedUserHandlingError { .. } => {
                "ProcessorTerminatedUserHandlingError"
            }
        }
    }
}

/// Observer of processor lifecycle events
///
/// Interceptors are pure observers: they receive each event by reference
/// and must not assume any ordering between events from different
/// partitions. Delivery may happen from the poll loop or from producer
/// delivery tasks, so implementations must be thread-safe.
pub trait Interceptor<V>: Send + Sync {
    fn intercept(&self, event: &ProcessorEvent<V>);
}

/// Ordered, immutable chain of interceptors
///
/// Composed once at processor construction: the two built-in observers
/// ([`LoggingInterceptor`] and [`ClientLogInterceptor`]) run first, followed
/// by user interceptors in registration order. A panicking interceptor is
/// caught, logged and skipped; it never alters pipeline behavior.
pub struct InterceptorChain<V> {
    interceptors: Vec<Box<dyn Interceptor<V>>>,
}

impl<V> InterceptorChain<V> {
    /// Builds the standard chain: built-ins followed by user interceptors.
    pub fn new(user_interceptors: Vec<Box<dyn Interceptor<V>>>) -> Self {
        let mut interceptors: Vec<Box<dyn Interceptor<V>>> =
            vec![Box::new(LoggingInterceptor), Box::new(ClientLogInterceptor)];
        interceptors.extend(user_interceptors);
        Self { interceptors }
    }

    /// A chain with no observers. Used by transient clients (readers).
    pub fn empty() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Delivers an event to every interceptor in order, isolating panics.
    pub fn emit(&self, event: ProcessorEvent<V>) {
        for interceptor in &self.interceptors {
            let outcome = catch_unwind(AssertUnwindSafe(|| interceptor.intercept(&event)));
            if outcome.is_err() {
                error!("Interceptor panicked while handling {}", event.kind());
            }
        }
    }
}

impl<V> Default for InterceptorChain<V> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Built-in observer that logs lifecycle events through the `log` crate.
pub struct LoggingInterceptor;

impl<V> Interceptor<V> for LoggingInterceptor {
    fn intercept(&self, event: &ProcessorEvent<V>) {
        match event {
            // Broker client log lines are handled by ClientLogInterceptor.
            ProcessorEvent::ConsumerLog { .. } => {}
            ProcessorEvent::ConsumerError { error, reason } => {
                error!("Consumer error: {} ({})", error, reason);
            }
            ProcessorEvent::PartitionsAssigned(partitions) => {
                info!("Partitions assigned: {}", format_partitions(partitions));
            }
            ProcessorEvent::PartitionsRevoked(partitions) => {
                info!("Partitions revoked: {}", format_partitions(partitions));
            }
            ProcessorEvent::PartitionsLost(partitions) => {
                warn!("Partitions lost: {}", format_partitions(partitions));
            }
            ProcessorEvent::PositionsCommitted { positions, error } => match error {
                Some(err) => warn!("Commit failed for {} partitions: {}", positions.len(), err),
                None => debug!(
                    "Committed positions: {}",
                    positions
                        .iter()
                        .map(|(tp, offset)| format!("{}@{}", tp, offset))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
            ProcessorEvent::PartitionEndReached(tp) => {
                debug!("Partition end reached: {}", tp);
            }
            ProcessorEvent::ProcessorActivated { processor, topics } => {
                info!("Processor '{}' activated on topics {:?}", processor, topics);
            }
            ProcessorEvent::ProcessorTerminating { processor } => {
                info!("Processor '{}' terminating", processor);
            }
            ProcessorEvent::ProcessorTerminated {
                processor,
                gaps,
                error,
            } => {
                let lagging = gaps.iter().filter(|gap| !gap.caught_up()).count();
                match error {
                    Some(err) => warn!(
                        "Processor '{}' terminated with error: {} ({} partitions lagging)",
                        processor, err, lagging
                    ),
                    None => info!(
                        "Processor '{}' terminated ({} partitions lagging)",
                        processor, lagging
                    ),
                }
            }
            ProcessorEvent::InputReady { record } => {
                debug!("Input ready: {}", record.position());
            }
            ProcessorEvent::InputSkipped { record } => {
                debug!("Input skipped: {}", record.position());
            }
            ProcessorEvent::InputConsumed { record, outputs } => {
                debug!("Input consumed: {} ({} outputs)", record.position(), outputs);
            }
            ProcessorEvent::InputProcessed { record, outputs } => {
                debug!(
                    "Input processed: {} ({} outputs)",
                    record.position(),
                    outputs
                );
            }
            ProcessorEvent::InputError { record, error } => {
                error!("Input {} failed: {}", record.position(), error);
            }
            ProcessorEvent::OutputProcessed { record, result } => match result.record_id() {
                Some(record_id) => {
                    debug!("Output for {} delivered as {}", record.position(), record_id)
                }
                None => warn!(
                    "Output for {} failed: {}",
                    record.position(),
                    result
                        .error()
                        .map(|err| err.to_string())
                        .unwrap_or_default()
                ),
            },
            ProcessorEvent::ProcessorTerminatedUserHandlingError { processor, detail } => {
                error!(
                    "Termination handler of processor '{}' failed: {}",
                    processor, detail
                );
            }
        }
    }
}

/// Maps librdkafka's syslog-style severities onto `log` levels for
/// [`ProcessorEvent::ConsumerLog`] events and producer-side client logs.
/// The arms are dictated by the client's variant set.
pub fn broker_log_level(level: RDKafkaLogLevel) -> log::Level {
    match level {
        RDKafkaLogLevel::Emerg
        | RDKafkaLogLevel::Alert
        | RDKafkaLogLevel::Critical
        | RDKafkaLogLevel::Error => log::Level::Error,
        RDKafkaLogLevel::Warning => log::Level::Warn,
        RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => log::Level::Info,
        RDKafkaLogLevel::Debug => log::Level::Debug,
    }
}

/// Built-in observer that forwards broker client log lines to the `log`
/// crate at the level the client reported.
pub struct ClientLogInterceptor;

impl<V> Interceptor<V> for ClientLogInterceptor {
    fn intercept(&self, event: &ProcessorEvent<V>) {
        if let ProcessorEvent::ConsumerLog {
            level,
            facility,
            message,
        } = event
        {
            log::log!(*level, "Kafka log ({}): {}", facility, message);
        }
    }
}

fn format_partitions(partitions: &[TopicPartition]) -> String {
    partitions
        .iter()
        .map(|tp| tp.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
