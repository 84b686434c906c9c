//! Dispatch-pipeline behavior: fan-out, commit-after-ack, poison records,
//! skip semantics and processor lifecycle edges. Everything runs against an
//! in-memory record sink; no broker is required.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::{kinds, CollectingInterceptor, MockSink};
use krimson::krimson::processor::pipeline::RecordPipeline;
use krimson::{
    HandlerError, Headers, InterceptorChain, JsonSerializer, KrimsonProcessor, KrimsonRecord,
    PositionTracker, ProcessorConfig, ProcessorError, ProcessorStatus, ProducerRequest,
    RecordContext, RecordHandler, RecordPosition, Router, TopicPartition, TopicRouter,
};

struct FanOut {
    topics: Vec<&'static str>,
}

#[async_trait]
impl RecordHandler<String> for FanOut {
    async fn process(&self, ctx: &mut RecordContext<String>) -> Result<(), HandlerError> {
        let key = ctx.record().key.clone();
        let value = ctx.record().value().cloned().unwrap_or_default();
        for topic in &self.topics {
            let mut request = ProducerRequest::to(*topic).value(value.clone());
            if let Some(key) = &key {
                request = request.key(key.clone());
            }
            ctx.output(request);
        }
        Ok(())
    }
}

struct PoisonAt {
    offset: i64,
}

#[async_trait]
impl RecordHandler<String> for PoisonAt {
    async fn process(&self, ctx: &mut RecordContext<String>) -> Result<(), HandlerError> {
        if ctx.record().position.offset == self.offset {
            return Err("handler rejected the record".into());
        }
        Ok(())
    }
}

struct Harness {
    pipeline: RecordPipeline<String>,
    sink: Arc<MockSink>,
    tracker: Arc<PositionTracker>,
    events: Arc<Mutex<Vec<(String, Option<i64>)>>>,
    fatal_rx: mpsc::UnboundedReceiver<ProcessorError>,
    token: CancellationToken,
}

fn harness(router: Arc<dyn Router<String>>, sink: MockSink) -> Harness {
    let sink = Arc::new(sink);
    let tracker = Arc::new(PositionTracker::new());
    let (collector, events) = CollectingInterceptor::new();
    let chain = Arc::new(InterceptorChain::new(vec![Box::new(collector)]));
    let token = CancellationToken::new();
    let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

    let pipeline = RecordPipeline::new(
        "test-processor".to_string(),
        router,
        sink.clone(),
        tracker.clone(),
        chain,
        token.clone(),
        fatal_tx,
    );

    Harness {
        pipeline,
        sink,
        tracker,
        events,
        fatal_rx,
        token,
    }
}

fn record(topic: &str, offset: i64, key: &str) -> KrimsonRecord<String> {
    KrimsonRecord::new(
        RecordPosition::new(topic, 0, offset).with_log_append_time(1_700_000_000_000 + offset),
        Some(key.as_bytes().to_vec()),
        Some(format!("payload-{}", offset)),
        Headers::new(),
    )
}

#[tokio::test]
async fn test_fan_out_tracks_position_after_all_deliveries() {
    let router = Arc::new(TopicRouter::new().route(
        "orders",
        FanOut {
            topics: vec!["events", "audit"],
        },
    ));
    let h = harness(router, MockSink::new());

    for (offset, key) in [(0, "a"), (1, "b"), (2, "a")] {
        h.pipeline.dispatch(record("orders", offset, key)).await.unwrap();
    }

    let requests = h.sink.requests();
    assert_eq!(requests.len(), 6);

    // Order within each output topic follows input order.
    let event_keys: Vec<String> = h
        .sink
        .requests_for("events")
        .iter()
        .map(|r| String::from_utf8(r.key.clone().unwrap()).unwrap())
        .collect();
    assert_eq!(event_keys, vec!["a", "b", "a"]);
    assert_eq!(h.sink.requests_for("audit").len(), 3);

    // All three inputs fully acknowledged: the frontier covers offsets 0-2.
    assert_eq!(
        h.tracker.committable(),
        vec![(TopicPartition::new("orders", 0), 3)]
    );

    let processed: Vec<i64> = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|(kind, _)| kind == "InputProcessed")
        .map(|(_, offset)| offset.unwrap())
        .collect();
    assert_eq!(processed, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_position_is_tracked_only_after_last_delivery() {
    let router = Arc::new(TopicRouter::new().route(
        "orders",
        FanOut {
            topics: vec!["events", "audit"],
        },
    ));
    let h = harness(router, MockSink::new());
    h.sink.hold_deliveries();

    h.pipeline.dispatch(record("orders", 0, "a")).await.unwrap();
    assert_eq!(h.sink.held_count(), 2);
    assert!(h.tracker.committable().is_empty());

    h.sink.release_one();
    assert!(h.tracker.committable().is_empty());
    assert!(!kinds(&h.events).contains(&"InputProcessed".to_string()));

    h.sink.release_one();
    assert_eq!(
        h.tracker.committable(),
        vec![(TopicPartition::new("orders", 0), 1)]
    );
    assert!(kinds(&h.events).contains(&"InputProcessed".to_string()));
}

#[tokio::test]
async fn test_poison_record_fails_dispatch_and_is_not_tracked() {
    let router = Arc::new(TopicRouter::new().route("orders", PoisonAt { offset: 1 }));
    let mut h = harness(router, MockSink::new());

    h.pipeline.dispatch(record("orders", 0, "a")).await.unwrap();
    let err = h
        .pipeline
        .dispatch(record("orders", 1, "b"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessorError::Handler(_)));

    // First input committed, poisoned one not.
    assert_eq!(
        h.tracker.committable(),
        vec![(TopicPartition::new("orders", 0), 1)]
    );

    let events = h.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|(kind, offset)| kind == "InputError" && *offset == Some(1)));
    drop(events);
    assert!(h.fatal_rx.try_recv().is_err());
}

struct IdentityTo {
    topic: &'static str,
}

#[async_trait]
impl RecordHandler<String> for IdentityTo {
    async fn process(&self, ctx: &mut RecordContext<String>) -> Result<(), HandlerError> {
        let record = ctx.record();
        let mut request = ProducerRequest::to(self.topic)
            .headers(record.headers.clone())
            .event_time(record.event_time);
        if let Some(key) = &record.key {
            request = request.key(key.clone());
        }
        if let Some(value) = record.value() {
            request = request.value(value.clone());
        }
        ctx.output(request);
        Ok(())
    }
}

#[tokio::test]
async fn test_identity_handler_preserves_record_content() {
    let router = Arc::new(TopicRouter::new().route("orders", IdentityTo { topic: "mirror" }));
    let h = harness(router, MockSink::new());

    let mut input = record("orders", 4, "k");
    input.headers = Headers::new()
        .insert("trace-id", "abc")
        .insert("raw", vec![0x00, 0xff]);
    let headers = input.headers.clone();
    h.pipeline.dispatch(input).await.unwrap();

    let requests = h.sink.requests_for("mirror");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].key.as_deref(), Some("k".as_bytes()));
    assert_eq!(requests[0].value.as_deref(), Some("payload-4"));
    assert_eq!(requests[0].headers, headers);
    assert_eq!(requests[0].event_time, Some(1_700_000_000_004));
}

#[tokio::test]
async fn test_unrouted_record_is_skipped_and_tracked() {
    let router: Arc<TopicRouter<String>> = Arc::new(TopicRouter::new());
    let h = harness(router, MockSink::new());

    h.pipeline.dispatch(record("other", 5, "x")).await.unwrap();

    assert!(h.sink.requests().is_empty());
    assert_eq!(
        h.tracker.committable(),
        vec![(TopicPartition::new("other", 0), 6)]
    );
    assert_eq!(kinds(&h.events), vec!["InputSkipped".to_string()]);
}

#[tokio::test]
async fn test_record_with_no_outputs_is_processed_immediately() {
    let router = Arc::new(TopicRouter::new().route("orders", PoisonAt { offset: -1 }));
    let h = harness(router, MockSink::new());

    h.pipeline.dispatch(record("orders", 0, "a")).await.unwrap();

    assert_eq!(
        kinds(&h.events),
        vec![
            "InputReady".to_string(),
            "InputConsumed".to_string(),
            "InputProcessed".to_string(),
        ]
    );
    assert_eq!(
        h.tracker.committable(),
        vec![(TopicPartition::new("orders", 0), 1)]
    );
}

#[tokio::test]
async fn test_failed_delivery_reports_fatal_and_never_tracks() {
    let router = Arc::new(TopicRouter::new().route(
        "orders",
        FanOut {
            topics: vec!["events"],
        },
    ));
    let mut h = harness(router, MockSink::new());
    h.sink.fail_topic("events");

    h.pipeline.dispatch(record("orders", 0, "a")).await.unwrap();

    let fatal = h.fatal_rx.recv().await.unwrap();
    assert!(matches!(fatal, ProcessorError::Producer(_)));
    assert!(h.tracker.committable().is_empty());

    let event_kinds = kinds(&h.events);
    assert!(event_kinds.contains(&"InputError".to_string()));
    assert!(!event_kinds.contains(&"InputProcessed".to_string()));
}

#[tokio::test]
async fn test_handler_error_after_cancellation_is_benign() {
    let router = Arc::new(TopicRouter::new().route("orders", PoisonAt { offset: 0 }));
    let h = harness(router, MockSink::new());
    h.token.cancel();

    h.pipeline.dispatch(record("orders", 0, "a")).await.unwrap();

    assert!(!kinds(&h.events).contains(&"InputError".to_string()));
    assert!(h.tracker.committable().is_empty());
}

fn offline_processor(
    group: &str,
) -> (
    KrimsonProcessor<String, JsonSerializer>,
    Arc<Mutex<Vec<(String, Option<i64>)>>>,
) {
    let (collector, events) = CollectingInterceptor::new();
    let mut config = ProcessorConfig::new("localhost:9092", group)
        .client_id("offline-test")
        .input_topic("orders");
    config.common = config.common.clone().request_timeout(Duration::from_millis(200));

    let processor = KrimsonProcessor::new(
        config,
        JsonSerializer,
        Arc::new(TopicRouter::<String>::new()),
        vec![Box::new(collector)],
    )
    .unwrap();
    (processor, events)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_activate_with_cancelled_token_terminates_cleanly() {
    let (processor, events) = offline_processor("lifecycle-clean");
    let invoked = Arc::new(Mutex::new(0usize));
    let seen = invoked.clone();

    let token = CancellationToken::new();
    token.cancel();
    processor
        .activate(
            token,
            Some(Box::new(move |_gaps, error| {
                assert!(error.is_none());
                *seen.lock().unwrap() += 1;
            })),
        )
        .await
        .unwrap();

    assert_eq!(processor.status(), ProcessorStatus::Terminated);
    assert_eq!(*invoked.lock().unwrap(), 1);

    let event_kinds = kinds(&events);
    let activated = event_kinds.iter().position(|k| k == "ProcessorActivated");
    let terminating = event_kinds.iter().position(|k| k == "ProcessorTerminating");
    let terminated = event_kinds.iter().position(|k| k == "ProcessorTerminated");
    assert!(activated.is_some() && terminating.is_some() && terminated.is_some());
    assert!(activated < terminating && terminating < terminated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_activate_is_rejected() {
    let (processor, _events) = offline_processor("lifecycle-reactivate");

    let token = CancellationToken::new();
    token.cancel();
    processor.activate(token.clone(), None).await.unwrap();

    let err = processor.activate(token, None).await.unwrap_err();
    assert!(matches!(err, ProcessorError::InvalidOperation(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_terminate_when_not_activated_is_diagnostic_only() {
    let (processor, events) = offline_processor("lifecycle-diagnostic");

    processor.terminate(None).await;
    processor.terminate(None).await;

    assert_eq!(processor.status(), ProcessorStatus::Terminated);
    let terminated = kinds(&events)
        .iter()
        .filter(|k| *k == "ProcessorTerminated")
        .count();
    assert_eq!(terminated, 2);
}
