use std::sync::Arc;

use tokio::sync::watch;

use crate::krimson::kafka::headers::Headers;
use crate::krimson::kafka::kafka_error::ProducerError;
use crate::krimson::kafka::record::{RecordId, RequestId};

/// What the upstream change represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOperation {
    Snapshot,
    Insert,
    Update,
    Delete,
}

impl SourceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOperation::Snapshot => "snapshot",
            SourceOperation::Insert => "insert",
            SourceOperation::Update => "update",
            SourceOperation::Delete => "delete",
        }
    }
}

/// Terminal-state machine of one source record.
///
/// A record starts `Pending` and moves exactly once to one of the terminal
/// states; later transitions are ignored.
#[derive(Debug, Clone)]
pub enum ProcessingState {
    Pending,
    /// Deduplicated away: its event time did not exceed the checkpoint
    Skipped,
    /// Produced and acknowledged
    Acked(RecordId),
    /// Produce failed
    Nacked(Arc<ProducerError>),
}

impl ProcessingState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingState::Pending)
    }

    pub fn is_acked(&self) -> bool {
        matches!(self, ProcessingState::Acked(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessingState::Skipped)
    }
}

/// A record parsed from an external data origin
///
/// Superset of a produce request: carries the connector-domain identity
/// (`id`, `source`, `operation`), the destination topic, the payload, and a
/// one-shot completion cell. Delivery callbacks resolve the cell through
/// [`SourceRecord::ack`] / [`SourceRecord::nak`]; dedup resolves it through
/// [`SourceRecord::skip`]. [`SourceRecord::ensure_processed`] awaits the
/// first terminal state.
#[derive(Debug)]
pub struct SourceRecord<V> {
    pub id: String,
    pub source: Option<String>,
    pub destination_topic: Option<String>,
    pub key: Option<Vec<u8>>,
    pub value: Option<V>,
    pub headers: Headers,
    pub event_time: i64,
    pub record_type: Option<String>,
    pub operation: SourceOperation,
    pub request_id: RequestId,
    state: watch::Sender<ProcessingState>,
}

impl<V> SourceRecord<V> {
    pub fn new(id: impl Into<String>, event_time: i64) -> Self {
        let (state, _) = watch::channel(ProcessingState::Pending);
        Self {
            id: id.into(),
            source: None,
            destination_topic: None,
            key: None,
            value: None,
            headers: Headers::new(),
            event_time,
            record_type: None,
            operation: SourceOperation::Insert,
            request_id: RequestId::new(),
            state,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn destination_topic(mut self, topic: impl Into<String>) -> Self {
        self.destination_topic = Some(topic.into());
        self
    }

    pub fn key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: V) -> Self {
        self.value = Some(value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn operation(mut self, operation: SourceOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Current processing state.
    pub fn processing_state(&self) -> ProcessingState {
        self.state.borrow().clone()
    }

    /// Marks the record as produced. First terminal state wins; later calls
    /// are ignored.
    pub fn ack(&self, record_id: RecordId) -> bool {
        self.transition(ProcessingState::Acked(record_id))
    }

    /// Marks the record's produce as failed.
    pub fn nak(&self, error: Arc<ProducerError>) -> bool {
        self.transition(ProcessingState::Nacked(error))
    }

    /// Marks the record as deduplicated away.
    pub fn skip(&self) -> bool {
        self.transition(ProcessingState::Skipped)
    }

    /// Resolves when the record reaches a terminal state.
    pub async fn ensure_processed(&self) -> ProcessingState {
        let mut rx = self.state.subscribe();
        let result = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => state.clone(),
            // The sender lives on self; this arm is unreachable while the
            // record exists.
            Err(_) => self.processing_state(),
        };
        result
    }

    fn transition(&self, next: ProcessingState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = next;
                true
            }
        })
    }
}
