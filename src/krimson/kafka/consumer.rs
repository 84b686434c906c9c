use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::Stream;
use log::{error, warn};
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message as KafkaMessage};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::ClientContext;

use crate::krimson::kafka::consumer_config::ConsumerConfig;
use crate::krimson::kafka::headers::Headers;
use crate::krimson::kafka::kafka_error::ConsumerError;
use crate::krimson::kafka::positions::{commit_list, PositionTracker, SubscriptionTopicGap};
use crate::krimson::kafka::record::{
    KrimsonRecord, RecordPosition, TopicPartition, NO_EVENT_TIME,
};
use crate::krimson::kafka::serialization::Serializer;
use crate::krimson::processor::interceptor::{broker_log_level, InterceptorChain, ProcessorEvent};

/// Hook run on partition revocation, before tracked positions are committed.
/// The processor registers a producer flush here so committed offsets never
/// precede durable outputs.
pub type RevokeHook = Box<dyn Fn() + Send + Sync>;

/// Hook fired when an assigned partition catches up to its end offset.
pub type PartitionEndHook = Box<dyn Fn(TopicPartition) + Send + Sync>;

/// One poll outcome: a record, or a partition catching up to its end.
pub(crate) enum ConsumerEvent<V> {
    Record(KrimsonRecord<V>),
    PartitionEnd(i32),
}

/// Consumer context that fans broker callbacks into the interceptor chain
/// and drives the revocation discipline: flush hook first, then a
/// synchronous commit of every tracked position, then tracker cleanup.
///
/// Rebalance callbacks run on the client's poll path, so everything here is
/// synchronous and shared state is `Arc`-held.
pub struct KrimsonConsumerContext<V> {
    chain: Arc<InterceptorChain<V>>,
    tracker: Arc<PositionTracker>,
    revoke_hook: Mutex<Option<RevokeHook>>,
}

impl<V> KrimsonConsumerContext<V> {
    fn new(chain: Arc<InterceptorChain<V>>, tracker: Arc<PositionTracker>) -> Self {
        Self {
            chain,
            tracker,
            revoke_hook: Mutex::new(None),
        }
    }

    fn run_revoke_hook(&self) {
        if let Some(hook) = self.revoke_hook.lock().unwrap().as_ref() {
            hook();
        }
    }
}

impl<V> ClientContext for KrimsonConsumerContext<V>
where
    V: Send + Sync + 'static,
{
    fn log(&self, level: RDKafkaLogLevel, fac: &str, message: &str) {
        self.chain.emit(ProcessorEvent::ConsumerLog {
            level: broker_log_level(level),
            facility: fac.to_string(),
            message: message.to_string(),
        });
    }

    fn error(&self, error: KafkaError, reason: &str) {
        self.chain.emit(ProcessorEvent::ConsumerError {
            error,
            reason: reason.to_string(),
        });
    }
}

impl<V> ConsumerContext for KrimsonConsumerContext<V>
where
    V: Send + Sync + 'static,
{
    fn pre_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let partitions = topic_partitions(tpl);
                self.chain
                    .emit(ProcessorEvent::PartitionsRevoked(partitions.clone()));

                // Flush in-flight outputs before committing so offsets never
                // run ahead of durable outputs.
                self.run_revoke_hook();

                let committable = self.tracker.committable();
                if !committable.is_empty() {
                    match base_consumer.commit(&commit_list(&committable), CommitMode::Sync) {
                        Ok(()) => self.tracker.mark_committed(&committable),
                        Err(err) => warn!("Commit on revocation failed: {}", err),
                    }
                }

                self.tracker.remove_partitions(&partitions);
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(err) => {
                // The group has already fenced this consumer; committing
                // here would be rejected, so only report.
                error!("Rebalance error, assignment lost: {}", err);
                self.chain.emit(ProcessorEvent::PartitionsLost(Vec::new()));
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            self.chain
                .emit(ProcessorEvent::PartitionsAssigned(topic_partitions(tpl)));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        self.chain.emit(ProcessorEvent::PositionsCommitted {
            positions: committed_positions(offsets),
            error: result.err(),
        });
    }
}

fn topic_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

fn committed_positions(tpl: &TopicPartitionList) -> Vec<(TopicPartition, i64)> {
    tpl.elements()
        .iter()
        .filter_map(|e| match e.offset() {
            Offset::Offset(offset) => {
                Some((TopicPartition::new(e.topic(), e.partition()), offset))
            }
            _ => None,
        })
        .collect()
}

/// Asynchronous record sequence over a polling consumer
///
/// Wraps an rdkafka `StreamConsumer` and yields one [`KrimsonRecord`] at a
/// time: the caller's consumption rate is the poll rate, nothing is buffered
/// above the client. Position tracking, periodic commits and the
/// stop-with-gap-snapshot discipline live here; the processor composes this
/// with a router and a producer.
///
/// # Examples
///
/// ```rust,no_run
/// # use krimson::{KrimsonConsumer, ConsumerConfig, InterceptorChain, JsonSerializer};
/// # use std::sync::Arc;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let consumer = KrimsonConsumer::<String, _>::new(
///     ConsumerConfig::new("localhost:9092", "readings"),
///     JsonSerializer,
///     Arc::new(InterceptorChain::empty()),
/// )?;
/// consumer.subscribe(&["meters"])?;
///
/// let record = consumer.recv().await?;
/// consumer.track_position(&record);
/// # Ok(())
/// # }
/// ```
pub struct KrimsonConsumer<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V>,
{
    consumer: StreamConsumer<KrimsonConsumerContext<V>>,
    deserializer: VS,
    config: ConsumerConfig,
    tracker: Arc<PositionTracker>,
    chain: Arc<InterceptorChain<V>>,
    subscribed: Mutex<Vec<String>>,
    stopped: AtomicBool,
    partition_end_hook: Mutex<Option<PartitionEndHook>>,
}

impl<V, VS> KrimsonConsumer<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V>,
{
    /// Creates a consumer that reports lifecycle events to the given chain
    pub fn new(
        config: ConsumerConfig,
        deserializer: VS,
        chain: Arc<InterceptorChain<V>>,
    ) -> Result<Self, ConsumerError> {
        let tracker = Arc::new(PositionTracker::new());
        let context = KrimsonConsumerContext::new(chain.clone(), tracker.clone());
        let consumer: StreamConsumer<KrimsonConsumerContext<V>> =
            config.to_client_config().create_with_context(context)?;

        Ok(Self {
            consumer,
            deserializer,
            config,
            tracker,
            chain,
            subscribed: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            partition_end_hook: Mutex::new(None),
        })
    }

    /// Subscribe to topics
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), ConsumerError> {
        self.consumer.subscribe(topics)?;
        *self.subscribed.lock().unwrap() = topics.iter().map(|t| t.to_string()).collect();
        Ok(())
    }

    /// Assign explicit partitions and offsets (no consumer group flow).
    pub(crate) fn assign(&self, assignment: &TopicPartitionList) -> Result<(), ConsumerError> {
        self.consumer.assign(assignment)?;
        let mut topics: Vec<String> = assignment
            .elements()
            .iter()
            .map(|e| e.topic().to_string())
            .collect();
        topics.sort();
        topics.dedup();
        *self.subscribed.lock().unwrap() = topics;
        Ok(())
    }

    /// Registers the flush hook run on partition revocation and stop.
    pub fn set_revoke_hook(&self, hook: RevokeHook) {
        self.consumer
            .context()
            .revoke_hook
            .lock()
            .unwrap()
            .replace(hook);
    }

    /// Registers the hook fired when a partition reaches its end offset.
    /// Requires [`ConsumerConfig::partition_eof`].
    pub fn set_partition_end_hook(&self, hook: PartitionEndHook) {
        self.partition_end_hook.lock().unwrap().replace(hook);
    }

    /// The shared position tracker for this subscription.
    pub fn tracker(&self) -> Arc<PositionTracker> {
        self.tracker.clone()
    }

    /// Receives the next record. Partition-end signals are reported through
    /// the hook and the interceptor chain, then polling continues.
    pub async fn recv(&self) -> Result<KrimsonRecord<V>, ConsumerError> {
        loop {
            match self.recv_event().await? {
                ConsumerEvent::Record(record) => return Ok(record),
                ConsumerEvent::PartitionEnd(_) => {}
            }
        }
    }

    /// Like [`KrimsonConsumer::recv`], but surfaces partition-end signals to
    /// the caller. Bounded readers use this to detect completion.
    pub(crate) async fn recv_event(&self) -> Result<ConsumerEvent<V>, ConsumerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ConsumerError::AlreadyStopped);
        }
        match self.consumer.recv().await {
            Ok(message) => Ok(ConsumerEvent::Record(self.convert(&message)?)),
            Err(KafkaError::PartitionEOF(partition)) => {
                self.handle_partition_end(partition);
                Ok(ConsumerEvent::PartitionEnd(partition))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Adapts [`KrimsonConsumer::recv`] to a `futures::Stream`. The stream
    /// ends when the consumer is stopped.
    pub fn stream(&self) -> impl Stream<Item = Result<KrimsonRecord<V>, ConsumerError>> + '_ {
        futures::stream::unfold(self, |consumer| async move {
            match consumer.recv().await {
                Err(ConsumerError::AlreadyStopped) => None,
                item => Some((item, consumer)),
            }
        })
    }

    /// Marks a record's position as ready to commit. Returns true when the
    /// partition's committable frontier advanced.
    pub fn track_position(&self, record: &KrimsonRecord<V>) -> bool {
        self.tracker.track(&record.position)
    }

    /// Commits every tracked position that advanced since the last commit.
    pub fn commit_tracked(&self, mode: CommitMode) -> Result<(), ConsumerError> {
        let committable = self.tracker.committable();
        if committable.is_empty() {
            return Ok(());
        }
        self.consumer.commit(&commit_list(&committable), mode)?;
        self.tracker.mark_committed(&committable);
        Ok(())
    }

    /// Stops the subscription: snapshots the per-partition gaps, runs the
    /// revoke discipline (flush hook, then a final synchronous commit) and
    /// unsubscribes. Calling stop twice is an error.
    pub fn stop(&self) -> Result<Vec<SubscriptionTopicGap>, ConsumerError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(ConsumerError::AlreadyStopped);
        }

        let gaps = self.subscription_gaps();

        self.consumer.context().run_revoke_hook();
        let committable = self.tracker.committable();
        if !committable.is_empty() {
            match self
                .consumer
                .commit(&commit_list(&committable), CommitMode::Sync)
            {
                Ok(()) => self.tracker.mark_committed(&committable),
                Err(err) => warn!("Final commit on stop failed: {}", err),
            }
        }

        self.consumer.unsubscribe();
        Ok(gaps)
    }

    /// True once [`KrimsonConsumer::stop`] has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Partition ids of a topic, from broker metadata.
    pub fn fetch_partitions(
        &self,
        topic: &str,
        timeout: std::time::Duration,
    ) -> Result<Vec<i32>, KafkaError> {
        let metadata = self.consumer.fetch_metadata(Some(topic), timeout)?;
        Ok(metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic)
            .flat_map(|t| t.partitions().iter().map(|p| p.id()))
            .collect())
    }

    /// Low and high watermark offsets for a partition.
    pub fn fetch_watermarks(
        &self,
        topic: &str,
        partition: i32,
        timeout: std::time::Duration,
    ) -> Result<(i64, i64), KafkaError> {
        self.consumer.fetch_watermarks(topic, partition, timeout)
    }

    fn convert(&self, message: &BorrowedMessage<'_>) -> Result<KrimsonRecord<V>, ConsumerError> {
        let log_append_time = message.timestamp().to_millis().unwrap_or(NO_EVENT_TIME);
        let position = RecordPosition::new(message.topic(), message.partition(), message.offset())
            .with_log_append_time(log_append_time);

        let value = match message.payload() {
            Some(bytes) => Some(self.deserializer.deserialize(bytes)?),
            None => None,
        };
        let key = message.key().map(|k| k.to_vec());
        let headers = match message.headers() {
            Some(kafka_headers) => Headers::from_rdkafka_headers(kafka_headers),
            None => Headers::new(),
        };

        Ok(KrimsonRecord::new(position, key, value, headers))
    }

    fn handle_partition_end(&self, partition: i32) {
        // The client reports only the partition id; resolve the topic when
        // the subscription is unambiguous (readers always are).
        let subscribed = self.subscribed.lock().unwrap();
        let topic = match subscribed.as_slice() {
            [single] => single.clone(),
            _ => {
                log::debug!("Partition {} reached end on multi-topic subscription", partition);
                return;
            }
        };
        drop(subscribed);

        let tp = TopicPartition::new(topic, partition);
        self.chain
            .emit(ProcessorEvent::PartitionEndReached(tp.clone()));
        if let Some(hook) = self.partition_end_hook.lock().unwrap().as_ref() {
            hook(tp);
        }
    }

    fn subscription_gaps(&self) -> Vec<SubscriptionTopicGap> {
        let assignment = match self.consumer.assignment() {
            Ok(assignment) => assignment,
            Err(err) => {
                warn!("Could not read assignment for gap snapshot: {}", err);
                return Vec::new();
            }
        };
        if assignment.count() == 0 {
            return Vec::new();
        }

        let committed: Vec<(TopicPartition, i64)> = self
            .consumer
            .committed(self.config.common.request_timeout)
            .map(|tpl| committed_positions(&tpl))
            .unwrap_or_default();
        let tracked = self.tracker.current_positions();

        let mut gaps = Vec::new();
        for element in assignment.elements() {
            let tp = TopicPartition::new(element.topic(), element.partition());
            let (low, high) = match self.consumer.fetch_watermarks(
                element.topic(),
                element.partition(),
                self.config.common.request_timeout,
            ) {
                Ok(watermarks) => watermarks,
                Err(err) => {
                    warn!("Watermark query failed for {}: {}", tp, err);
                    continue;
                }
            };

            let current = tracked
                .iter()
                .chain(committed.iter())
                .filter(|(candidate, _)| *candidate == tp)
                .map(|(_, offset)| *offset)
                .max()
                .unwrap_or(low);

            gaps.push(SubscriptionTopicGap::new(
                tp.topic,
                tp.partition,
                current,
                high,
            ));
        }
        gaps
    }
}
