use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use tokio::sync::{oneshot, watch};

use crate::krimson::kafka::headers::Headers;
use crate::krimson::kafka::kafka_error::ProducerError;
use crate::krimson::kafka::producer_config::ProducerConfig;
use crate::krimson::kafka::record::{RecordId, RequestId};
use crate::krimson::kafka::serialization::Serializer;
use crate::krimson::processor::interceptor::broker_log_level;

/// A request to produce one record
///
/// `topic` may be left unset when the producer is configured with a default
/// output topic. `request_id` is an opaque correlation tag echoed back on the
/// [`ProducerResult`]; a fresh one is generated unless the caller pins it.
#[derive(Debug, Clone)]
pub struct ProducerRequest<V> {
    pub topic: Option<String>,
    pub key: Option<Vec<u8>>,
    pub value: Option<V>,
    pub headers: Headers,
    pub event_time: Option<i64>,
    pub request_id: RequestId,
}

impl<V> ProducerRequest<V> {
    pub fn new() -> Self {
        Self {
            topic: None,
            key: None,
            value: None,
            headers: Headers::new(),
            event_time: None,
            request_id: RequestId::new(),
        }
    }

    /// Creates a request addressed to a specific topic
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::new()
        }
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

    pub fn event_time(mut self, event_time: i64) -> Self {
        self.event_time = Some(event_time);
        self
    }

    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }
}

impl<V> Default for ProducerRequest<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one produce request, reported exactly once per request
#[derive(Debug, Clone)]
pub struct ProducerResult {
    request_id: RequestId,
    outcome: Result<RecordId, Arc<ProducerError>>,
}

impl ProducerResult {
    pub fn success(request_id: RequestId, record_id: RecordId) -> Self {
        Self {
            request_id,
            outcome: Ok(record_id),
        }
    }

    pub fn failure(request_id: RequestId, error: ProducerError) -> Self {
        Self {
            request_id,
            outcome: Err(Arc::new(error)),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The produced record's identity, populated only on success.
    pub fn record_id(&self) -> Option<&RecordId> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Arc<ProducerError>> {
        self.outcome.as_ref().err()
    }
}

/// Delivery callback invoked exactly once per produce request.
pub type DeliveryCallback = Box<dyn FnOnce(ProducerResult) + Send + 'static>;

/// Produce-side seam consumed by the processor pipeline and the connector
/// runtime. [`KrimsonProducer`] is the broker-backed implementation; tests
/// substitute in-memory sinks.
#[async_trait]
pub trait RecordSink<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Enqueues a send and returns immediately. All failures, including
    /// configuration and serialization failures, are reported through the
    /// callback.
    fn produce(&self, request: ProducerRequest<V>, on_delivery: DeliveryCallback);

    /// Produces and awaits the delivery outcome.
    async fn send(&self, request: ProducerRequest<V>) -> ProducerResult {
        let request_id = request.request_id;
        let (tx, rx) = oneshot::channel();
        self.produce(
            request,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        match rx.await {
            Ok(result) => result,
            // The callback contract makes this unreachable; fail closed.
            Err(_) => ProducerResult::failure(request_id, ProducerError::Closed),
        }
    }

    /// Blocks until every queued request has been acknowledged or failed.
    async fn flush(&self, timeout: Option<Duration>) -> Result<(), ProducerError>;

    /// The configured default output topic, when any.
    fn default_topic(&self) -> Option<&str>;
}

/// Client context that forwards librdkafka logs to the `log` crate.
pub struct ProducerLogContext;

impl ClientContext for ProducerLogContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, message: &str) {
        log::log!(broker_log_level(level), "Kafka log ({}): {}", fac, message);
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!("Kafka client error: {:?}, reason: {}", error, reason);
    }
}

struct PreparedRecord {
    topic: String,
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
    headers: Headers,
    event_time: Option<i64>,
}

/// Asynchronous producer with per-request delivery callbacks
///
/// Wraps an rdkafka `FutureProducer`. Requests are enqueued in call order
/// (per-partition ordering is the client's), each delivery callback runs
/// exactly once, and [`KrimsonProducer::flush`] waits until every callback
/// has run, not merely until the client queue drained.
///
/// The producer does not retry at the application layer; retry policy
/// belongs to the underlying client configuration.
///
/// # Examples
///
/// ```rust,no_run
/// # use krimson::{KrimsonProducer, ProducerConfig, ProducerRequest, JsonSerializer};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let producer = KrimsonProducer::<String, _>::new(
///     ProducerConfig::new("localhost:9092").topic("events"),
///     JsonSerializer,
/// )?;
///
/// let result = producer
///     .send(ProducerRequest::new().key("order-1").value("created".to_string()))
///     .await;
/// println!("delivered: {:?}", result.record_id());
///
/// producer.close().await;
/// # Ok(())
/// # }
/// ```
pub struct KrimsonProducer<V, VS>
where
    VS: Serializer<V>,
{
    producer: FutureProducer<ProducerLogContext>,
    config: ProducerConfig,
    serializer: VS,
    in_flight: watch::Sender<usize>,
    closed: AtomicBool,
    _phantom: PhantomData<fn(V) -> V>,
}

impl<V, VS> KrimsonProducer<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V>,
{
    /// Creates a new producer from the given configuration
    pub fn new(config: ProducerConfig, serializer: VS) -> Result<Self, ProducerError> {
        let producer: FutureProducer<ProducerLogContext> = config
            .to_client_config()
            .create_with_context(ProducerLogContext)?;

        info!(
            "Created producer connected to {} (default topic: {})",
            config.brokers(),
            config.topic.as_deref().unwrap_or("<none>")
        );

        let (in_flight, _) = watch::channel(0usize);
        Ok(Self {
            producer,
            config,
            serializer,
            in_flight,
            closed: AtomicBool::new(false),
            _phantom: PhantomData,
        })
    }

    /// Number of requests whose delivery callback has not run yet
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// True once [`KrimsonProducer::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueues a send; the callback receives the outcome exactly once.
    pub fn produce(&self, request: ProducerRequest<V>, on_delivery: DeliveryCallback) {
        let request_id = request.request_id;

        if self.is_closed() {
            on_delivery(ProducerResult::failure(request_id, ProducerError::Closed));
            return;
        }

        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(err) => {
                on_delivery(ProducerResult::failure(request_id, err));
                return;
            }
        };

        // Enqueue synchronously so two produce calls from the same caller
        // keep their order in the client queue.
        let owned_headers = prepared.headers.to_rdkafka_headers();
        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&prepared.topic).headers(owned_headers);
        if let Some(key) = prepared.key.as_deref() {
            record = record.key(key);
        }
        if let Some(payload) = prepared.payload.as_deref() {
            record = record.payload(payload);
        }
        if let Some(event_time) = prepared.event_time {
            record = record.timestamp(event_time);
        }

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((err, _)) => {
                on_delivery(ProducerResult::failure(request_id, ProducerError::Kafka(err)));
                return;
            }
        };

        self.in_flight.send_modify(|count| *count += 1);

        let topic = prepared.topic;
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let result = match delivery.await {
                Ok(Ok(delivery)) => ProducerResult::success(
                    request_id,
                    RecordId::new(topic, delivery.partition, delivery.offset),
                ),
                Ok(Err((err, _message))) => {
                    warn!("Delivery failed for {} on '{}': {}", request_id, topic, err);
                    ProducerResult::failure(request_id, ProducerError::Kafka(err))
                }
                Err(_canceled) => {
                    warn!("Delivery failed for {} on '{}': {}", request_id, topic, KafkaError::Canceled);
                    ProducerResult::failure(request_id, ProducerError::Kafka(KafkaError::Canceled))
                }
            };
            on_delivery(result);
            in_flight.send_modify(|count| *count -= 1);
        });
    }

    /// Produces and awaits the delivery outcome.
    pub async fn send(&self, request: ProducerRequest<V>) -> ProducerResult {
        RecordSink::send(self, request).await
    }

    /// Waits until every callback has run. With a timeout, fails with
    /// [`ProducerError::FlushTimeout`] when requests are still in flight.
    pub async fn flush(&self, timeout: Option<Duration>) -> Result<(), ProducerError> {
        let mut rx = self.in_flight.subscribe();
        let drained = rx.wait_for(|count| *count == 0);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, drained).await {
                Ok(_) => Ok(()),
                Err(_) => Err(ProducerError::FlushTimeout),
            },
            None => {
                let _ = drained.await;
                Ok(())
            }
        }
    }

    /// Blocking drain of the client queue. For use from synchronous broker
    /// callbacks (rebalance); asynchronous callers use [`KrimsonProducer::flush`].
    pub fn flush_blocking(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.producer.flush(Timeout::After(timeout))?;
        Ok(())
    }

    /// Flush then close; idempotent. Produce calls after close fail their
    /// callback with [`ProducerError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Producer already closed");
            return;
        }
        if let Err(err) = self.flush(Some(self.config.message_timeout)).await {
            warn!("Flush during close did not drain cleanly: {}", err);
        }
        info!("Producer closed");
    }

    fn prepare(&self, request: ProducerRequest<V>) -> Result<PreparedRecord, ProducerError> {
        let topic = request
            .topic
            .or_else(|| self.config.topic.clone())
            .ok_or_else(|| {
                ProducerError::Configuration(
                    "request has no topic and no default topic is configured".to_string(),
                )
            })?;

        let payload = match &request.value {
            Some(value) => Some(self.serializer.serialize(value)?),
            None => None,
        };

        Ok(PreparedRecord {
            topic,
            key: request.key,
            payload,
            headers: request.headers,
            event_time: request.event_time,
        })
    }
}

#[async_trait]
impl<V, VS> RecordSink<V> for KrimsonProducer<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V>,
{
    fn produce(&self, request: ProducerRequest<V>, on_delivery: DeliveryCallback) {
        KrimsonProducer::produce(self, request, on_delivery);
    }

    async fn flush(&self, timeout: Option<Duration>) -> Result<(), ProducerError> {
        KrimsonProducer::flush(self, timeout).await
    }

    fn default_topic(&self) -> Option<&str> {
        self.config.topic.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_generates_request_id() {
        let a: ProducerRequest<String> = ProducerRequest::to("events").value("x".into());
        let b: ProducerRequest<String> = ProducerRequest::to("events").value("x".into());
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.topic.as_deref(), Some("events"));
    }

    #[test]
    fn test_result_accessors() {
        let request_id = RequestId::new();
        let ok = ProducerResult::success(request_id, RecordId::new("events", 1, 42));
        assert!(ok.is_success());
        assert_eq!(ok.record_id(), Some(&RecordId::new("events", 1, 42)));
        assert!(ok.error().is_none());

        let failed = ProducerResult::failure(
            request_id,
            ProducerError::Configuration("no topic".to_string()),
        );
        assert!(!failed.is_success());
        assert!(failed.record_id().is_none());
        assert!(failed.error().is_some());
    }
}
