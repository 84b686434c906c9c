use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::Stream;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};

use crate::krimson::kafka::common_config::CommonKafkaConfig;
use crate::krimson::kafka::consumer::{ConsumerEvent, KrimsonConsumer};
use crate::krimson::kafka::consumer_config::{ConsumerConfig, OffsetReset};
use crate::krimson::kafka::kafka_error::ReaderError;
use crate::krimson::kafka::record::{KrimsonRecord, RecordPosition};
use crate::krimson::kafka::serialization::Serializer;
use crate::krimson::processor::interceptor::InterceptorChain;

/// Configuration for the reader
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Common configuration (brokers, client id)
    pub common: CommonKafkaConfig,
    /// Read-only consumer group; transient groups are fine, the reader
    /// never commits.
    pub group_id: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            common: CommonKafkaConfig::default(),
            group_id: "krimson-reader".to_string(),
        }
    }
}

impl ReaderConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            common: CommonKafkaConfig::new(brokers),
            ..Default::default()
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.common = self.common.client_id(client_id);
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }
}

/// Where a bounded read begins on each partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Beginning,
    Offset(i64),
}

/// Stateless, bounded reads over a topic
///
/// Every call constructs a fresh consumer, so concurrent reads are fully
/// independent and no subscription state is reused. Reads are bounded: end
/// offsets are captured when partitions are assigned and the sequence
/// completes once every assigned partition reaches its captured end (or
/// reports end-of-partition, whichever comes first). Records appended after
/// the snapshot are not yielded.
///
/// # Examples
///
/// ```rust,no_run
/// # use krimson::{KrimsonReader, ReaderConfig, JsonSerializer};
/// # use futures::StreamExt;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let reader = KrimsonReader::<String, _>::new(
///     ReaderConfig::new("localhost:9092"),
///     JsonSerializer,
/// );
///
/// let records = reader.records("meters").await?;
/// futures::pin_mut!(records);
/// while let Some(record) = records.next().await {
///     println!("{}", record?.position());
/// }
/// # Ok(())
/// # }
/// ```
pub struct KrimsonReader<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V> + Clone,
{
    config: ReaderConfig,
    deserializer: VS,
    _phantom: std::marker::PhantomData<fn(V) -> V>,
}

impl<V, VS> KrimsonReader<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V> + Clone,
{
    pub fn new(config: ReaderConfig, deserializer: VS) -> Self {
        Self {
            config,
            deserializer,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Reads all partitions of a topic from the beginning.
    pub async fn records(
        &self,
        topic: &str,
    ) -> Result<impl Stream<Item = Result<KrimsonRecord<V>, ReaderError>>, ReaderError> {
        self.bounded_records(topic, None, StartPosition::Beginning)
            .await
    }

    /// Reads a single partition from the given start position.
    pub async fn records_from(
        &self,
        topic: &str,
        partition: i32,
        start: StartPosition,
    ) -> Result<impl Stream<Item = Result<KrimsonRecord<V>, ReaderError>>, ReaderError> {
        self.bounded_records(topic, Some(partition), start).await
    }

    /// End offset per partition of the topic.
    pub async fn latest_positions(&self, topic: &str) -> Result<Vec<RecordPosition>, ReaderError> {
        let consumer = self.create_consumer()?;
        let partitions = self.partitions(&consumer, topic)?;

        let mut positions = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let (_, high) = self.watermarks(&consumer, topic, partition)?;
            positions.push(RecordPosition::new(topic, partition, high));
        }
        Ok(positions)
    }

    /// The last committed record on each non-empty partition of the topic.
    /// Empty partitions are skipped.
    pub async fn last_records(&self, topic: &str) -> Result<Vec<KrimsonRecord<V>>, ReaderError> {
        let consumer = self.create_consumer()?;
        let partitions = self.partitions(&consumer, topic)?;

        let mut assignment = TopicPartitionList::new();
        let mut remaining = HashSet::new();
        for partition in partitions {
            let (low, high) = self.watermarks(&consumer, topic, partition)?;
            if high <= low {
                continue;
            }
            assignment
                .add_partition_offset(topic, partition, Offset::Offset(high - 1))
                .map_err(ReaderError::Kafka)?;
            remaining.insert(partition);
        }
        if remaining.is_empty() {
            return Ok(Vec::new());
        }

        consumer.assign(&assignment).map_err(reader_error)?;

        let mut records: Vec<KrimsonRecord<V>> = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            match consumer.recv_event().await.map_err(reader_error)? {
                ConsumerEvent::Record(record) => {
                    if remaining.remove(&record.position.partition) {
                        records.push(record);
                    }
                }
                ConsumerEvent::PartitionEnd(partition) => {
                    remaining.remove(&partition);
                }
            }
        }

        records.sort_by_key(|record| record.position.partition);
        Ok(records)
    }

    async fn bounded_records(
        &self,
        topic: &str,
        partition: Option<i32>,
        start: StartPosition,
    ) -> Result<impl Stream<Item = Result<KrimsonRecord<V>, ReaderError>>, ReaderError> {
        let consumer = self.create_consumer()?;
        let partitions = match partition {
            Some(partition) => vec![partition],
            None => self.partitions(&consumer, topic)?,
        };

        // Ends are captured here, before assignment; later appends fall
        // outside the bounded range.
        let mut assignment = TopicPartitionList::new();
        let mut ends: HashMap<i32, i64> = HashMap::new();
        let mut remaining = HashSet::new();
        for partition in partitions {
            let (low, high) = self.watermarks(&consumer, topic, partition)?;
            let offset = match start {
                StartPosition::Beginning => Offset::Beginning,
                StartPosition::Offset(offset) => Offset::Offset(offset),
            };
            let first = match start {
                StartPosition::Beginning => low,
                StartPosition::Offset(offset) => offset.max(low),
            };
            if first >= high {
                continue;
            }
            assignment
                .add_partition_offset(topic, partition, offset)
                .map_err(ReaderError::Kafka)?;
            ends.insert(partition, high);
            remaining.insert(partition);
        }

        if !remaining.is_empty() {
            consumer.assign(&assignment).map_err(reader_error)?;
        }

        let state = BoundedRead {
            consumer,
            ends,
            remaining,
        };
        Ok(futures::stream::unfold(state, |mut state| async move {
            state.next().await.map(|item| (item, state))
        }))
    }

    fn create_consumer(&self) -> Result<KrimsonConsumer<V, VS>, ReaderError> {
        let mut config = ConsumerConfig::new(self.config.common.brokers.clone(), &self.config.group_id)
            .auto_offset_reset(OffsetReset::Earliest)
            .partition_eof(true);
        config.common = self.config.common.clone();
        KrimsonConsumer::new(
            config,
            self.deserializer.clone(),
            Arc::new(InterceptorChain::empty()),
        )
        .map_err(reader_error)
    }

    fn partitions(
        &self,
        consumer: &KrimsonConsumer<V, VS>,
        topic: &str,
    ) -> Result<Vec<i32>, ReaderError> {
        let partitions = consumer
            .fetch_partitions(topic, self.config.common.request_timeout)
            .map_err(ReaderError::Kafka)?;
        if partitions.is_empty() {
            return Err(ReaderError::UnknownTopic(topic.to_string()));
        }
        Ok(partitions)
    }

    fn watermarks(
        &self,
        consumer: &KrimsonConsumer<V, VS>,
        topic: &str,
        partition: i32,
    ) -> Result<(i64, i64), ReaderError> {
        consumer
            .fetch_watermarks(topic, partition, self.config.common.request_timeout)
            .map_err(ReaderError::Kafka)
    }
}

fn reader_error(err: crate::krimson::kafka::kafka_error::ConsumerError) -> ReaderError {
    use crate::krimson::kafka::kafka_error::ConsumerError;
    match err {
        ConsumerError::Kafka(err) => ReaderError::Kafka(err),
        ConsumerError::Serialization(err) => ReaderError::Serialization(err),
        // Reader consumers are never stopped explicitly.
        ConsumerError::AlreadyStopped => {
            ReaderError::Kafka(rdkafka::error::KafkaError::Canceled)
        }
    }
}

struct BoundedRead<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V>,
{
    consumer: KrimsonConsumer<V, VS>,
    ends: HashMap<i32, i64>,
    remaining: HashSet<i32>,
}

impl<V, VS> BoundedRead<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V>,
{
    async fn next(&mut self) -> Option<Result<KrimsonRecord<V>, ReaderError>> {
        loop {
            if self.remaining.is_empty() {
                return None;
            }
            match self.consumer.recv_event().await {
                Ok(ConsumerEvent::Record(record)) => {
                    let partition = record.position.partition;
                    if !self.remaining.contains(&partition) {
                        continue;
                    }
                    let end = *self.ends.get(&partition).unwrap_or(&0);
                    if record.position.offset >= end {
                        // Appended after the snapshot; partition is done.
                        self.remaining.remove(&partition);
                        continue;
                    }
                    if record.position.offset >= end - 1 {
                        self.remaining.remove(&partition);
                    }
                    return Some(Ok(record));
                }
                Ok(ConsumerEvent::PartitionEnd(partition)) => {
                    self.remaining.remove(&partition);
                }
                Err(err) => {
                    self.remaining.clear();
                    return Some(Err(reader_error(err)));
                }
            }
        }
    }
}
