use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::krimson::connector::checkpoint::{
    CheckpointSource, SourceCheckpoint, SourceCheckpointManager,
};
use crate::krimson::connector::source_connector::{SourceConnector, SourceConnectorContext};
use crate::krimson::connector::error::ConnectorError;
use crate::krimson::connector::source_record::{ProcessingState, SourceRecord};
use crate::krimson::kafka::kafka_error::ProducerError;
use crate::krimson::kafka::producer::{ProducerRequest, ProducerResult, RecordSink};
use crate::krimson::kafka::record::EVENT_TIME_HEADER;

/// Header carrying the name of the connector that produced a record.
pub const SOURCE_NAME_HEADER: &str = "source-name";
/// Header carrying the upstream operation of a produced record.
pub const SOURCE_OPERATION_HEADER: &str = "source-operation";
/// Header carrying the record type, when the connector sets one.
pub const SOURCE_TYPE_HEADER: &str = "source-type";

/// Options for a source connector runtime
#[derive(Debug, Clone)]
pub struct SourceConnectorOptions {
    /// Overrides the connector's own name
    pub name: Option<String>,
    /// When true, every produce awaits its delivery inline; when false,
    /// produces are asynchronous and a batch flush precedes completion.
    pub synchronous: bool,
    /// Pause between polls, and after a failed tick.
    pub back_off: Duration,
}

impl Default for SourceConnectorOptions {
    fn default() -> Self {
        Self {
            name: None,
            synchronous: false,
            back_off: Duration::from_secs(30),
        }
    }
}

impl SourceConnectorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn back_off(mut self, back_off: Duration) -> Self {
        self.back_off = back_off;
        self
    }
}

/// Drives a [`SourceConnector`] on a periodic schedule
///
/// One tick: poll the origin, order records by ascending event time,
/// deduplicate each against its destination topic's checkpoint, produce the
/// unseen ones, flush, await every record's terminal state, then advance
/// the checkpoints. Ticks run strictly one at a time; the back-off sleep
/// between polls means an overlapping trigger cannot exist, and a failed
/// tick waits the same back-off before the next attempt.
///
/// # Examples
///
/// ```rust,no_run
/// # use ::krimson::*;
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # struct MeterPoller;
/// # #[async_trait]
/// # impl SourceConnector<String> for MeterPoller {
/// #     async fn parse_records(&mut self, _ctx: &SourceConnectorContext)
/// #         -> Result<Vec<SourceRecord<String>>, Box<dyn std::error::Error + Send + Sync>> { Ok(vec![]) }
/// # }
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let producer = Arc::new(KrimsonProducer::<String, _>::new(
///     ProducerConfig::new("localhost:9092").topic("meters"),
///     JsonSerializer,
/// )?);
/// let reader = Arc::new(KrimsonReader::<String, _>::new(
///     ReaderConfig::new("localhost:9092"),
///     JsonSerializer,
/// ));
///
/// let mut runtime = SourceConnectorRuntime::new(
///     MeterPoller,
///     SourceConnectorOptions::new().back_off(std::time::Duration::from_secs(10)),
///     producer,
///     reader,
/// );
/// runtime.run(tokio_util::sync::CancellationToken::new()).await;
/// # Ok(())
/// # }
/// ```
pub struct SourceConnectorRuntime<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: SourceConnector<V>,
{
    connector: C,
    name: String,
    options: SourceConnectorOptions,
    sink: Arc<dyn RecordSink<V>>,
    checkpoints: SourceCheckpointManager<V>,
    tick: u64,
}

impl<V, C> SourceConnectorRuntime<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: SourceConnector<V>,
{
    pub fn new(
        connector: C,
        options: SourceConnectorOptions,
        sink: Arc<dyn RecordSink<V>>,
        checkpoint_source: Arc<dyn CheckpointSource<V>>,
    ) -> Self {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| connector.name());
        Self {
            connector,
            name,
            options,
            sink,
            checkpoints: SourceCheckpointManager::new(checkpoint_source),
            tick: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Polls and processes until the token is cancelled.
    pub async fn run(&mut self, token: CancellationToken) {
        info!(
            "Source connector '{}' started (back-off {:?}, synchronous: {})",
            self.name, self.options.back_off, self.options.synchronous
        );

        while !token.is_cancelled() {
            match self.process(token.child_token()).await {
                Ok(records) => {
                    debug!(
                        "Connector '{}' tick {} processed {} records",
                        self.name,
                        self.tick,
                        records.len()
                    );
                }
                Err(err) => {
                    warn!("Connector '{}' tick {} failed: {}", self.name, self.tick, err);
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.options.back_off) => {}
            }
        }

        info!("Source connector '{}' stopped", self.name);
    }

    /// Runs one tick. The success and error handlers of the connector are
    /// invoked here, isolated from the runtime.
    pub async fn process(
        &mut self,
        token: CancellationToken,
    ) -> Result<Vec<Arc<SourceRecord<V>>>, ConnectorError> {
        self.tick += 1;
        let ctx = SourceConnectorContext {
            token,
            tick: self.tick,
        };

        match self.process_tick(&ctx).await {
            Ok(records) => {
                let handled =
                    AssertUnwindSafe(self.connector.on_success(&ctx, &records)).catch_unwind();
                if handled.await.is_err() {
                    error!("Connector '{}' on_success handler panicked", self.name);
                }
                Ok(records)
            }
            Err(err) => {
                let handled =
                    AssertUnwindSafe(self.connector.on_error(&ctx, &err)).catch_unwind();
                if handled.await.is_err() {
                    error!("Connector '{}' on_error handler panicked", self.name);
                }
                Err(err)
            }
        }
    }

    async fn process_tick(
        &mut self,
        ctx: &SourceConnectorContext,
    ) -> Result<Vec<Arc<SourceRecord<V>>>, ConnectorError> {
        let mut parsed = self
            .connector
            .parse_records(ctx)
            .await
            .map_err(ConnectorError::Parse)?;

        // Stable ascending order so equal event times keep parse order.
        parsed.sort_by_key(|record| record.event_time);

        let default_topic = self.sink.default_topic().map(str::to_string);
        let records: Vec<Arc<SourceRecord<V>>> = parsed
            .into_iter()
            .map(|mut record| {
                if record.source.is_none() {
                    record.source = Some(self.name.clone());
                }
                if record.destination_topic.is_none() {
                    record.destination_topic = default_topic.clone();
                }
                Arc::new(record)
            })
            .collect();

        for (index, record) in records.iter().enumerate() {
            self.process_record(record, index).await?;
        }

        if !self.options.synchronous {
            self.sink
                .flush(None)
                .await
                .map_err(|err| ConnectorError::Producer(Arc::new(err)))?;
        }
        for record in records.iter() {
            record.ensure_processed().await;
        }

        // Checkpoints advance for whatever was durably produced before
        // failures are surfaced; a retried tick must not re-produce the
        // acked records.
        self.advance_checkpoints(&records).await;

        for record in records.iter() {
            if let ProcessingState::Nacked(err) = record.processing_state() {
                return Err(ConnectorError::Producer(err));
            }
        }

        Ok(records)
    }

    async fn process_record(
        &self,
        record: &Arc<SourceRecord<V>>,
        index: usize,
    ) -> Result<(), ConnectorError> {
        let topic = record.destination_topic.clone().ok_or_else(|| {
            ConnectorError::Configuration(format!(
                "record '{}' has no destination topic and the producer has no default",
                record.id
            ))
        })?;

        let checkpoint = self.checkpoints.get_checkpoint(&topic).await?;
        if !checkpoint.precedes(record.event_time) {
            debug!(
                "Connector '{}' skipping record {} ('{}'): event time {} <= checkpoint {}",
                self.name, index, record.id, record.event_time, checkpoint.event_time
            );
            record.skip();
            return Ok(());
        }

        let request = self.build_request(record, topic);
        if self.options.synchronous {
            let result = self.sink.send(request).await;
            apply_outcome(record, result);
        } else {
            let record = record.clone();
            self.sink
                .produce(request, Box::new(move |result| apply_outcome(&record, result)));
        }
        Ok(())
    }

    fn build_request(&self, record: &Arc<SourceRecord<V>>, topic: String) -> ProducerRequest<V> {
        let mut headers = record.headers.clone();
        headers = headers.insert(
            SOURCE_NAME_HEADER,
            record.source.clone().unwrap_or_else(|| self.name.clone()),
        );
        headers = headers.insert(SOURCE_OPERATION_HEADER, record.operation.as_str());
        if let Some(record_type) = &record.record_type {
            headers = headers.insert(SOURCE_TYPE_HEADER, record_type.as_str());
        }
        // Event time rides a header as well as the broker timestamp, so
        // rehydration survives topics configured for log-append time.
        headers = headers.insert(EVENT_TIME_HEADER, record.event_time.to_string());

        let mut request = ProducerRequest::to(topic)
            .headers(headers)
            .event_time(record.event_time)
            .request_id(record.request_id);
        if let Some(key) = &record.key {
            request = request.key(key.clone());
        }
        if let Some(value) = &record.value {
            request = request.value(value.clone());
        }
        request
    }

    async fn advance_checkpoints(&self, records: &[Arc<SourceRecord<V>>]) {
        let mut skipped = 0usize;
        let mut produced = 0usize;
        // Records are in ascending event-time order, so the last acked
        // record per topic carries that topic's greatest event time.
        let mut latest: HashMap<String, SourceCheckpoint> = HashMap::new();
        for record in records {
            match record.processing_state() {
                ProcessingState::Skipped => skipped += 1,
                ProcessingState::Acked(record_id) => {
                    produced += 1;
                    if let Some(topic) = &record.destination_topic {
                        latest.insert(
                            topic.clone(),
                            SourceCheckpoint::new(record_id, record.event_time),
                        );
                    }
                }
                _ => {}
            }
        }

        for (topic, checkpoint) in latest {
            info!(
                "Connector '{}' advanced checkpoint on '{}' to {} ({})",
                self.name,
                topic,
                checkpoint.event_time,
                checkpoint
                    .record_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default()
            );
            self.checkpoints.track_checkpoint(&topic, checkpoint).await;
        }

        info!(
            "Connector '{}' tick {}: {} produced, {} skipped",
            self.name, self.tick, produced, skipped
        );
    }
}

fn apply_outcome<V>(record: &SourceRecord<V>, result: ProducerResult) {
    match result.record_id() {
        Some(record_id) => {
            record.ack(record_id.clone());
        }
        None => {
            let error = result
                .error()
                .cloned()
                .unwrap_or_else(|| Arc::new(ProducerError::Closed));
            record.nak(error);
        }
    }
}
