use std::fmt;

use uuid::Uuid;

use crate::krimson::kafka::headers::Headers;

/// Header name carrying an application-assigned event time, in unix
/// milliseconds encoded as a UTF-8 decimal string. When present on a consumed
/// record it overrides the broker timestamp.
pub const EVENT_TIME_HEADER: &str = "event-time";

/// Event time value meaning "unknown".
pub const NO_EVENT_TIME: i64 = -1;

/// A topic/partition pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// The broker's notion of a record location, plus the log-append timestamp
/// when the broker reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Broker timestamp in unix milliseconds, [`NO_EVENT_TIME`] when absent.
    pub log_append_time: i64,
}

impl RecordPosition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            log_append_time: NO_EVENT_TIME,
        }
    }

    pub fn with_log_append_time(mut self, timestamp: i64) -> Self {
        self.log_append_time = timestamp;
        self
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Identity of a durably produced record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl RecordId {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl From<&RecordPosition> for RecordId {
    fn from(position: &RecordPosition) -> Self {
        RecordId::new(position.topic.clone(), position.partition, position.offset)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Opaque correlation tag attached to produce requests by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An immutable consumed record
///
/// Carries the broker position, the raw key bytes, the deserialized value,
/// the ordered headers, and the resolved event time. The value is `None` for
/// tombstones (null payloads).
///
/// Event time resolution: an [`EVENT_TIME_HEADER`] override wins, otherwise
/// the broker timestamp from the position is used, otherwise
/// [`NO_EVENT_TIME`].
#[derive(Debug, Clone)]
pub struct KrimsonRecord<V> {
    pub position: RecordPosition,
    pub key: Option<Vec<u8>>,
    pub value: Option<V>,
    pub headers: Headers,
    pub event_time: i64,
}

impl<V> KrimsonRecord<V> {
    /// Builds a record, resolving the event time from the headers and the
    /// position's log-append time.
    pub fn new(
        position: RecordPosition,
        key: Option<Vec<u8>>,
        value: Option<V>,
        headers: Headers,
    ) -> Self {
        let event_time = resolve_event_time(&headers, position.log_append_time);
        Self {
            position,
            key,
            value,
            headers,
            event_time,
        }
    }

    pub fn position(&self) -> &RecordPosition {
        &self.position
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Key decoded as UTF-8, `None` when absent or not valid UTF-8.
    pub fn key_str(&self) -> Option<&str> {
        self.key().and_then(|k| std::str::from_utf8(k).ok())
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn topic(&self) -> &str {
        &self.position.topic
    }

    /// Identity derived from the record's position.
    pub fn record_id(&self) -> RecordId {
        RecordId::from(&self.position)
    }
}

fn resolve_event_time(headers: &Headers, log_append_time: i64) -> i64 {
    if let Some(raw) = headers.get_str(EVENT_TIME_HEADER) {
        if let Ok(ms) = raw.parse::<i64>() {
            return ms;
        }
    }
    log_append_time
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_time_defaults_to_log_append_time() {
        let position = RecordPosition::new("orders", 0, 42).with_log_append_time(1700000000000);
        let record: KrimsonRecord<String> =
            KrimsonRecord::new(position, None, Some("v".into()), Headers::new());

        assert_eq!(record.event_time, 1700000000000);
    }

    #[test]
    fn test_event_time_header_overrides_broker_timestamp() {
        let position = RecordPosition::new("orders", 0, 42).with_log_append_time(1700000000000);
        let headers = Headers::new().insert(EVENT_TIME_HEADER, "1234");
        let record: KrimsonRecord<String> =
            KrimsonRecord::new(position, None, Some("v".into()), headers);

        assert_eq!(record.event_time, 1234);
    }

    #[test]
    fn test_malformed_event_time_header_is_ignored() {
        let position = RecordPosition::new("orders", 0, 42).with_log_append_time(777);
        let headers = Headers::new().insert(EVENT_TIME_HEADER, "not-a-number");
        let record: KrimsonRecord<String> =
            KrimsonRecord::new(position, None, Some("v".into()), headers);

        assert_eq!(record.event_time, 777);
    }

    #[test]
    fn test_record_id_from_position() {
        let position = RecordPosition::new("orders", 3, 9);
        let record: KrimsonRecord<String> =
            KrimsonRecord::new(position, None, None, Headers::new());

        assert_eq!(record.record_id(), RecordId::new("orders", 3, 9));
        assert_eq!(record.record_id().to_string(), "orders:3@9");
    }
}
