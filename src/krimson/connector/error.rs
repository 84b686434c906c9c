//! Source connector error types.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::krimson::kafka::kafka_error::{ProducerError, ReaderError};

/// Error type for connector ticks
#[derive(Debug)]
pub enum ConnectorError {
    /// Invalid connector or record configuration
    Configuration(String),
    /// The connector's record parser failed
    Parse(Box<dyn Error + Send + Sync>),
    /// An output delivery failed
    Producer(Arc<ProducerError>),
    /// Checkpoint rehydration failed
    Reader(ReaderError),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ConnectorError::Parse(err) => write!(f, "Parse error: {}", err),
            ConnectorError::Producer(err) => write!(f, "Producer error: {}", err),
            ConnectorError::Reader(err) => write!(f, "Reader error: {}", err),
        }
    }
}

impl Error for ConnectorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConnectorError::Configuration(_) => None,
            ConnectorError::Parse(err) => Some(err.as_ref()),
            ConnectorError::Producer(err) => Some(err.as_ref()),
            ConnectorError::Reader(err) => Some(err),
        }
    }
}

impl From<ReaderError> for ConnectorError {
    fn from(err: ReaderError) -> Self {
        ConnectorError::Reader(err)
    }
}

impl From<Arc<ProducerError>> for ConnectorError {
    fn from(err: Arc<ProducerError>) -> Self {
        ConnectorError::Producer(err)
    }
}
