//! Record dispatch and output tracking.
//!
//! [`RecordPipeline`] is the processor's dispatch core, kept free of broker
//! plumbing: records come in from the poll loop, outputs go out through a
//! [`RecordSink`], and positions become committable only after every output
//! of a record is acknowledged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::krimson::kafka::positions::PositionTracker;
use crate::krimson::kafka::producer::{ProducerRequest, RecordSink};
use crate::krimson::kafka::record::KrimsonRecord;
use crate::krimson::processor::error::ProcessorError;
use crate::krimson::processor::interceptor::{EventError, InterceptorChain, ProcessorEvent};
use crate::krimson::processor::router::{RecordContext, Router};

/// Dispatches records through the router and tracks their outputs
///
/// Contract per record:
/// - declined by the router: position tracked immediately, `InputSkipped`;
/// - handler fails: `InputError`, the error is returned to the poll loop
///   (which terminates the processor); nothing is tracked;
/// - handler succeeds with no outputs: position tracked, `InputProcessed`;
/// - handler succeeds with outputs: each output is produced; the position
///   is tracked and `InputProcessed` emitted only when the last output is
///   acknowledged. A failed delivery emits `InputError` and pushes the
///   cause into the fatal channel; the position is never tracked.
pub struct RecordPipeline<V> {
    processor: String,
    router: Arc<dyn Router<V>>,
    sink: Arc<dyn RecordSink<V>>,
    tracker: Arc<PositionTracker>,
    chain: Arc<InterceptorChain<V>>,
    token: CancellationToken,
    fatal_tx: mpsc::UnboundedSender<ProcessorError>,
}

impl<V> RecordPipeline<V>
where
    V: Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        processor: String,
        router: Arc<dyn Router<V>>,
        sink: Arc<dyn RecordSink<V>>,
        tracker: Arc<PositionTracker>,
        chain: Arc<InterceptorChain<V>>,
        token: CancellationToken,
        fatal_tx: mpsc::UnboundedSender<ProcessorError>,
    ) -> Self {
        Self {
            processor,
            router,
            sink,
            tracker,
            chain,
            token,
            fatal_tx,
        }
    }

    /// Processes one record. An `Err` means the handler failed and the
    /// processor must terminate with that cause.
    pub async fn dispatch(&self, record: KrimsonRecord<V>) -> Result<(), ProcessorError> {
        let record = Arc::new(record);

        if !self.router.can_route(&record) {
            self.tracker.track(&record.position);
            self.chain.emit(ProcessorEvent::InputSkipped { record });
            return Ok(());
        }

        self.chain.emit(ProcessorEvent::InputReady {
            record: record.clone(),
        });

        let mut ctx = RecordContext::new(
            record.clone(),
            self.token.child_token(),
            self.processor.clone(),
        );
        match self.router.process(&mut ctx).await {
            Err(err) => {
                if self.token.is_cancelled() {
                    // Termination raced the handler; not an error.
                    return Ok(());
                }
                let error: EventError = Arc::from(err);
                self.chain.emit(ProcessorEvent::InputError {
                    record,
                    error: error.clone(),
                });
                Err(ProcessorError::Handler(error))
            }
            Ok(()) => {
                let outputs = ctx.into_outputs();
                self.chain.emit(ProcessorEvent::InputConsumed {
                    record: record.clone(),
                    outputs: outputs.len(),
                });
                self.process_output(record, outputs);
                Ok(())
            }
        }
    }

    /// Produces the outputs of one record and arranges for its position to
    /// be tracked once all of them are acknowledged. Does not await
    /// deliveries; the poll loop keeps flowing while outputs are in flight.
    fn process_output(&self, record: Arc<KrimsonRecord<V>>, outputs: Vec<ProducerRequest<V>>) {
        if outputs.is_empty() {
            self.tracker.track(&record.position);
            self.chain.emit(ProcessorEvent::InputProcessed { record, outputs: 0 });
            return;
        }

        let total = outputs.len();
        let succeeded = Arc::new(AtomicUsize::new(0));
        for request in outputs {
            let record = record.clone();
            let chain = self.chain.clone();
            let tracker = self.tracker.clone();
            let succeeded = succeeded.clone();
            let fatal_tx = self.fatal_tx.clone();

            self.sink.produce(
                request,
                Box::new(move |result| {
                    chain.emit(ProcessorEvent::OutputProcessed {
                        record: record.clone(),
                        result: result.clone(),
                    });

                    match result.error() {
                        None => {
                            if succeeded.fetch_add(1, Ordering::SeqCst) + 1 == total {
                                tracker.track(&record.position);
                                chain.emit(ProcessorEvent::InputProcessed {
                                    record,
                                    outputs: total,
                                });
                            }
                        }
                        Some(error) => {
                            report_output_failure(&chain, &fatal_tx, record, error.clone());
                        }
                    }
                }),
            );
        }
    }
}

fn report_output_failure<V>(
    chain: &InterceptorChain<V>,
    fatal_tx: &mpsc::UnboundedSender<ProcessorError>,
    record: Arc<KrimsonRecord<V>>,
    error: Arc<crate::krimson::kafka::kafka_error::ProducerError>,
) {
    chain.emit(ProcessorEvent::InputError {
        record,
        error: error.clone(),
    });
    // Fire-and-forget: the poll loop picks the cause up and terminates.
    let _ = fatal_tx.send(ProcessorError::Producer(error));
}
