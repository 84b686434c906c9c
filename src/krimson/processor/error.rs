//! Processor error types.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::krimson::kafka::kafka_error::{ConsumerError, ProducerError};

/// Error type for processor operations
#[derive(Debug)]
pub enum ProcessorError {
    /// Consumer-side failure (poll, commit, stop)
    Consumer(ConsumerError),
    /// Output delivery failure
    Producer(Arc<ProducerError>),
    /// A routed handler failed
    Handler(Arc<dyn Error + Send + Sync>),
    /// Invalid configuration detected at build time
    Configuration(String),
    /// A lifecycle operation was called in the wrong state
    InvalidOperation(String),
    /// Multiple failures collected during termination
    Aggregate(Vec<ProcessorError>),
}

impl ProcessorError {
    /// Combines an optional prior cause with a later failure, flattening
    /// nested aggregates so readers see a single level.
    pub fn aggregate(first: Option<ProcessorError>, second: ProcessorError) -> ProcessorError {
        match first {
            None => second,
            Some(first) => {
                let mut causes = Vec::new();
                match first {
                    ProcessorError::Aggregate(inner) => causes.extend(inner),
                    other => causes.push(other),
                }
                match second {
                    ProcessorError::Aggregate(inner) => causes.extend(inner),
                    other => causes.push(other),
                }
                ProcessorError::Aggregate(causes)
            }
        }
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::Consumer(err) => write!(f, "Consumer error: {}", err),
            ProcessorError::Producer(err) => write!(f, "Producer error: {}", err),
            ProcessorError::Handler(err) => write!(f, "Handler error: {}", err),
            ProcessorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ProcessorError::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            ProcessorError::Aggregate(causes) => {
                write!(f, "Multiple errors: [")?;
                for (i, cause) in causes.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", cause)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Error for ProcessorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProcessorError::Consumer(err) => Some(err),
            ProcessorError::Producer(err) => Some(err.as_ref()),
            ProcessorError::Handler(err) => Some(err.as_ref()),
            ProcessorError::Aggregate(causes) => causes.first().map(|c| c as &(dyn Error)),
            _ => None,
        }
    }
}

impl From<ConsumerError> for ProcessorError {
    fn from(err: ConsumerError) -> Self {
        ProcessorError::Consumer(err)
    }
}

impl From<Arc<ProducerError>> for ProcessorError {
    fn from(err: Arc<ProducerError>) -> Self {
        ProcessorError::Producer(err)
    }
}
