use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;
use rdkafka::consumer::CommitMode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::krimson::kafka::consumer::KrimsonConsumer;
use crate::krimson::kafka::positions::SubscriptionTopicGap;
use crate::krimson::kafka::producer::{KrimsonProducer, RecordSink};
use crate::krimson::kafka::serialization::Serializer;
use crate::krimson::processor::config::ProcessorConfig;
use crate::krimson::processor::error::ProcessorError;
use crate::krimson::processor::interceptor::{Interceptor, InterceptorChain, ProcessorEvent};
use crate::krimson::processor::pipeline::RecordPipeline;
use crate::krimson::processor::router::Router;

/// Lifecycle states of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorStatus {
    Terminated,
    Activated,
    Terminating,
}

/// Invoked exactly once when the processor has fully terminated, with the
/// final gap snapshot and the aggregated termination cause.
pub type TerminatedHandler =
    Box<dyn FnOnce(Vec<SubscriptionTopicGap>, Option<Arc<ProcessorError>>) + Send>;

/// Subscription-driven stream processor
///
/// Owns its consumer and producer for its lifetime. Records from the input
/// topics are dispatched through the router; emitted outputs are produced
/// asynchronously and each input's position becomes committable only after
/// all of its outputs are acknowledged. Tracked positions are committed on
/// the configured interval, on partition revocation and on termination.
///
/// # Lifecycle
///
/// `Terminated → Activated → Terminating → Terminated`. A processor
/// instance activates once; [`KrimsonProcessor::activate`] runs the poll
/// loop until the termination token fires or a failure escapes, then drives
/// the shutdown sequence: flush producer, stop consumer (final commit, gap
/// snapshot), close producer.
///
/// # Examples
///
/// ```rust,no_run
/// # use ::krimson::*;
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # struct Audit;
/// # #[async_trait]
/// # impl RecordHandler<String> for Audit {
/// #     async fn process(&self, ctx: &mut RecordContext<String>) -> Result<(), HandlerError> { Ok(()) }
/// # }
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let processor = KrimsonProcessor::new(
///     ProcessorConfig::new("localhost:9092", "orders-audit").input_topic("orders"),
///     JsonSerializer,
///     Arc::new(TopicRouter::new().route("orders", Audit)),
///     Vec::new(),
/// )?;
///
/// let termination = tokio_util::sync::CancellationToken::new();
/// processor.activate(termination.clone(), None).await?;
/// # Ok(())
/// # }
/// ```
pub struct KrimsonProcessor<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V> + Clone + 'static,
{
    name: String,
    input_topics: Vec<String>,
    commit_interval: std::time::Duration,
    consumer: Arc<KrimsonConsumer<V, VS>>,
    producer: Arc<KrimsonProducer<V, VS>>,
    pipeline: RecordPipeline<V>,
    chain: Arc<InterceptorChain<V>>,
    status: Mutex<ProcessorStatus>,
    cancel: CancellationToken,
    activated: AtomicBool,
    fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<ProcessorError>>>,
    on_terminated: Mutex<Option<TerminatedHandler>>,
}

impl<V, VS> KrimsonProcessor<V, VS>
where
    V: Send + Sync + 'static,
    VS: Serializer<V> + Clone + 'static,
{
    /// Builds the processor: interceptor chain, consumer, producer and
    /// dispatch pipeline. Configuration problems surface here, never at
    /// steady state.
    pub fn new(
        config: ProcessorConfig,
        serde: VS,
        router: Arc<dyn Router<V>>,
        interceptors: Vec<Box<dyn Interceptor<V>>>,
    ) -> Result<Self, ProcessorError> {
        if config.input_topics.is_empty() {
            return Err(ProcessorError::Configuration(
                "at least one input topic is required".to_string(),
            ));
        }

        let name = config.name().to_string();
        let chain = Arc::new(InterceptorChain::new(interceptors));

        let consumer = Arc::new(
            KrimsonConsumer::new(config.consumer_config(), serde.clone(), chain.clone())
                .map_err(ProcessorError::Consumer)?,
        );
        let producer_config = config.producer_config();
        let flush_timeout = producer_config.message_timeout;
        let producer = Arc::new(
            KrimsonProducer::new(producer_config, serde)
                .map_err(|err| ProcessorError::Producer(Arc::new(err)))?,
        );

        // Revocation discipline: drain the producer before the rebalance
        // commit so committed offsets never precede durable outputs.
        let flush_producer = producer.clone();
        consumer.set_revoke_hook(Box::new(move || {
            if let Err(err) = flush_producer.flush_blocking(flush_timeout) {
                warn!("Producer flush on revocation failed: {}", err);
            }
        }));

        let cancel = CancellationToken::new();
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn RecordSink<V>> = producer.clone();
        let pipeline = RecordPipeline::new(
            name.clone(),
            router,
            sink,
            consumer.tracker(),
            chain.clone(),
            cancel.clone(),
            fatal_tx,
        );

        Ok(Self {
            name,
            input_topics: config.input_topics,
            commit_interval: config.commit_interval,
            consumer,
            producer,
            pipeline,
            chain,
            status: Mutex::new(ProcessorStatus::Terminated),
            cancel,
            activated: AtomicBool::new(false),
            fatal_rx: Mutex::new(Some(fatal_rx)),
            on_terminated: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProcessorStatus {
        *self.status.lock().unwrap()
    }

    /// Subscribes, runs the poll loop until the termination token fires or
    /// a failure escapes, then terminates. Returns after termination has
    /// completed. A processor activates at most once.
    pub async fn activate(
        &self,
        termination_token: CancellationToken,
        on_terminated: Option<TerminatedHandler>,
    ) -> Result<(), ProcessorError> {
        if self.activated.swap(true, Ordering::AcqRel) {
            return Err(ProcessorError::InvalidOperation(
                "processor is already activated".to_string(),
            ));
        }

        let mut fatal_rx = self
            .fatal_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| {
                ProcessorError::InvalidOperation("processor cannot be reactivated".to_string())
            })?;
        *self.on_terminated.lock().unwrap() = on_terminated;

        let topics: Vec<&str> = self.input_topics.iter().map(|t| t.as_str()).collect();
        if let Err(err) = self.consumer.subscribe(&topics) {
            return Err(ProcessorError::Consumer(err));
        }

        self.chain.emit(ProcessorEvent::ProcessorActivated {
            processor: self.name.clone(),
            topics: self.input_topics.clone(),
        });
        *self.status.lock().unwrap() = ProcessorStatus::Activated;

        let mut commit_timer = tokio::time::interval(self.commit_interval);
        commit_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let cause = loop {
            let record = tokio::select! {
                _ = termination_token.cancelled() => break None,
                _ = self.cancel.cancelled() => break None,
                fatal = fatal_rx.recv() => match fatal {
                    Some(err) => break Some(err),
                    None => continue,
                },
                _ = commit_timer.tick() => {
                    match self.consumer.commit_tracked(CommitMode::Async) {
                        Ok(()) => continue,
                        Err(err) => break Some(ProcessorError::Consumer(err)),
                    }
                },
                result = self.consumer.recv() => match result {
                    Ok(record) => record,
                    Err(err) => break Some(ProcessorError::Consumer(err)),
                },
            };

            if let Err(err) = self.pipeline.dispatch(record).await {
                break Some(err);
            }
        };

        self.terminate(cause).await;
        Ok(())
    }

    /// Terminates the processor: cancel, flush, stop-and-commit, close.
    /// Idempotent; a second call emits a diagnostic `ProcessorTerminated`
    /// and changes nothing.
    pub async fn terminate(&self, cause: Option<ProcessorError>) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }

        let proceed = {
            let mut status = self.status.lock().unwrap();
            if *status == ProcessorStatus::Activated {
                *status = ProcessorStatus::Terminating;
                true
            } else {
                false
            }
        };
        if !proceed {
            let detail = match &cause {
                Some(cause) => format!("terminate called while not activated: {}", cause),
                None => "terminate called while not activated".to_string(),
            };
            self.chain.emit(ProcessorEvent::ProcessorTerminated {
                processor: self.name.clone(),
                gaps: Vec::new(),
                error: Some(Arc::new(ProcessorError::InvalidOperation(detail))),
            });
            return;
        }

        self.chain.emit(ProcessorEvent::ProcessorTerminating {
            processor: self.name.clone(),
        });

        let mut cause = cause;

        // Drain every in-flight delivery (callbacks included) so the final
        // commit sees all tracked positions.
        if let Err(err) = self.producer.flush(None).await {
            cause = Some(ProcessorError::aggregate(
                cause,
                ProcessorError::Producer(Arc::new(err)),
            ));
        }

        let gaps = match self.consumer.stop() {
            Ok(gaps) => gaps,
            Err(err) => {
                cause = Some(ProcessorError::aggregate(
                    cause,
                    ProcessorError::Consumer(err),
                ));
                Vec::new()
            }
        };

        self.producer.close().await;

        *self.status.lock().unwrap() = ProcessorStatus::Terminated;
        let error = cause.map(Arc::new);
        self.chain.emit(ProcessorEvent::ProcessorTerminated {
            processor: self.name.clone(),
            gaps: gaps.clone(),
            error: error.clone(),
        });

        let handler = self.on_terminated.lock().unwrap().take();
        if let Some(handler) = handler {
            let outcome = catch_unwind(AssertUnwindSafe(move || handler(gaps, error)));
            if let Err(panic) = outcome {
                self.chain
                    .emit(ProcessorEvent::ProcessorTerminatedUserHandlingError {
                        processor: self.name.clone(),
                        detail: panic_detail(panic.as_ref()),
                    });
            }
        }
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "termination handler panicked".to_string()
    }
}
