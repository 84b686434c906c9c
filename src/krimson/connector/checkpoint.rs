//! Event-time checkpoints derived from destination topics.
//!
//! There is no checkpoint store: the truth is the output topic itself. The
//! manager rehydrates a topic's checkpoint lazily by scanning partition
//! tails and afterwards advances it in memory, monotonically, as ticks
//! complete.
//!
//! Known limitation: if a destination topic's retention deletes its most
//! recent records, rehydration regresses to whatever tail survives and
//! previously produced items may be produced again. Delivery stays
//! at-least-once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use crate::krimson::kafka::kafka_error::ReaderError;
use crate::krimson::kafka::reader::KrimsonReader;
use crate::krimson::kafka::record::{KrimsonRecord, RecordId, NO_EVENT_TIME};
use crate::krimson::kafka::serialization::Serializer;

/// The greatest event time observed on one destination topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCheckpoint {
    pub record_id: Option<RecordId>,
    pub event_time: i64,
}

impl SourceCheckpoint {
    /// The empty checkpoint: every real event time exceeds it.
    pub fn none() -> Self {
        Self {
            record_id: None,
            event_time: NO_EVENT_TIME,
        }
    }

    pub fn new(record_id: RecordId, event_time: i64) -> Self {
        Self {
            record_id: Some(record_id),
            event_time,
        }
    }

    pub fn from_record<V>(record: &KrimsonRecord<V>) -> Self {
        Self::new(record.record_id(), record.event_time)
    }

    /// True when the given event time is newer than this checkpoint.
    pub fn precedes(&self, event_time: i64) -> bool {
        event_time > self.event_time
    }
}

/// Where checkpoint rehydration reads topic tails from. [`KrimsonReader`]
/// is the broker-backed implementation; tests substitute in-memory tails.
#[async_trait]
pub trait CheckpointSource<V>: Send + Sync {
    /// The last record on each non-empty partition of the topic.
    async fn last_records(&self, topic: &str) -> Result<Vec<KrimsonRecord<V>>, ReaderError>;
}

#[async_trait]
impl<V, VS> CheckpointSource<V> for KrimsonReader<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V> + Clone + 'static,
{
    async fn last_records(&self, topic: &str) -> Result<Vec<KrimsonRecord<V>>, ReaderError> {
        KrimsonReader::last_records(self, topic).await
    }
}

/// Per-destination-topic checkpoint cache
///
/// Mutated only by the connector runtime under its one-tick-at-a-time
/// constraint; updates are monotonic on event time.
pub struct SourceCheckpointManager<V> {
    source: Arc<dyn CheckpointSource<V>>,
    checkpoints: Mutex<HashMap<String, SourceCheckpoint>>,
}

impl<V> SourceCheckpointManager<V> {
    pub fn new(source: Arc<dyn CheckpointSource<V>>) -> Self {
        Self {
            source,
            checkpoints: Mutex::new(HashMap::new()),
        }
    }

    /// The active checkpoint for a destination topic, rehydrating it from
    /// the topic's partition tails on first access.
    pub async fn get_checkpoint(&self, topic: &str) -> Result<SourceCheckpoint, ReaderError> {
        let mut checkpoints = self.checkpoints.lock().await;
        if let Some(checkpoint) = checkpoints.get(topic) {
            return Ok(checkpoint.clone());
        }

        let tails = self.source.last_records(topic).await?;
        let checkpoint = tails
            .iter()
            .max_by_key(|record| record.event_time)
            .map(SourceCheckpoint::from_record)
            .unwrap_or_else(SourceCheckpoint::none);
        debug!(
            "Rehydrated checkpoint for '{}': event time {}",
            topic, checkpoint.event_time
        );

        checkpoints.insert(topic.to_string(), checkpoint.clone());
        Ok(checkpoint)
    }

    /// Advances a topic's checkpoint. Non-monotonic updates are rejected.
    pub async fn track_checkpoint(&self, topic: &str, checkpoint: SourceCheckpoint) -> bool {
        let mut checkpoints = self.checkpoints.lock().await;
        let current = checkpoints
            .entry(topic.to_string())
            .or_insert_with(SourceCheckpoint::none);
        if checkpoint.event_time > current.event_time {
            *current = checkpoint;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krimson::kafka::headers::Headers;
    use crate::krimson::kafka::record::RecordPosition;

    struct FixedTails(Vec<KrimsonRecord<String>>);

    #[async_trait]
    impl CheckpointSource<String> for FixedTails {
        async fn last_records(
            &self,
            _topic: &str,
        ) -> Result<Vec<KrimsonRecord<String>>, ReaderError> {
            Ok(self.0.clone())
        }
    }

    fn tail_record(partition: i32, offset: i64, event_time: i64) -> KrimsonRecord<String> {
        KrimsonRecord::new(
            RecordPosition::new("meters", partition, offset).with_log_append_time(event_time),
            None,
            Some("v".to_string()),
            Headers::new(),
        )
    }

    #[tokio::test]
    async fn test_rehydrates_from_greatest_event_time() {
        let manager = SourceCheckpointManager::new(Arc::new(FixedTails(vec![
            tail_record(0, 10, 100),
            tail_record(1, 4, 300),
            tail_record(2, 7, 200),
        ])));

        let checkpoint = manager.get_checkpoint("meters").await.unwrap();
        assert_eq!(checkpoint.event_time, 300);
        assert_eq!(checkpoint.record_id, Some(RecordId::new("meters", 1, 4)));
    }

    #[tokio::test]
    async fn test_empty_topic_rehydrates_to_none() {
        let manager: SourceCheckpointManager<String> =
            SourceCheckpointManager::new(Arc::new(FixedTails(Vec::new())));

        let checkpoint = manager.get_checkpoint("meters").await.unwrap();
        assert_eq!(checkpoint, SourceCheckpoint::none());
        assert!(checkpoint.precedes(0));
    }

    #[tokio::test]
    async fn test_rehydration_is_cached() {
        let manager =
            SourceCheckpointManager::new(Arc::new(FixedTails(vec![tail_record(0, 10, 100)])));

        let first = manager.get_checkpoint("meters").await.unwrap();
        manager
            .track_checkpoint("meters", SourceCheckpoint::new(RecordId::new("meters", 0, 11), 150))
            .await;
        // A second read must see the tracked value, not a rescan.
        let second = manager.get_checkpoint("meters").await.unwrap();
        assert!(second.event_time > first.event_time);
        assert_eq!(second.event_time, 150);
    }

    #[tokio::test]
    async fn test_track_checkpoint_rejects_regression() {
        let manager: SourceCheckpointManager<String> =
            SourceCheckpointManager::new(Arc::new(FixedTails(Vec::new())));

        assert!(
            manager
                .track_checkpoint("meters", SourceCheckpoint::new(RecordId::new("meters", 0, 1), 200))
                .await
        );
        assert!(
            !manager
                .track_checkpoint("meters", SourceCheckpoint::new(RecordId::new("meters", 0, 2), 150))
                .await
        );

        let checkpoint = manager.get_checkpoint("meters").await.unwrap();
        assert_eq!(checkpoint.event_time, 200);
    }
}
