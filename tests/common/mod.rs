//! In-memory fakes shared by the pipeline and connector tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use krimson::{
    DeliveryCallback, Interceptor, KrimsonRecord, ProcessorEvent, ProducerError, ProducerRequest,
    ProducerResult, RecordId, RecordSink,
};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

/// Record sink that acknowledges from memory.
///
/// Immediate mode invokes each delivery callback inline with a success (or
/// a simulated failure for topics in `fail_topics`). Hold mode parks the
/// callbacks so tests control when deliveries complete.
pub struct MockSink {
    default_topic: Option<String>,
    hold: AtomicBool,
    fail_topics: Mutex<HashSet<String>>,
    offsets: Mutex<HashMap<String, i64>>,
    requests: Mutex<Vec<ProducerRequest<String>>>,
    held: Mutex<Vec<(ProducerResult, DeliveryCallback)>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            default_topic: None,
            hold: AtomicBool::new(false),
            fail_topics: Mutex::new(HashSet::new()),
            offsets: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_topic(topic: &str) -> Self {
        Self {
            default_topic: Some(topic.to_string()),
            ..Self::new()
        }
    }

    pub fn hold_deliveries(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn fail_topic(&self, topic: &str) {
        self.fail_topics.lock().unwrap().insert(topic.to_string());
    }

    /// Completes the oldest held delivery. Panics when nothing is held.
    pub fn release_one(&self) {
        let (result, callback) = self.held.lock().unwrap().remove(0);
        callback(result);
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Every produced request, in produce order.
    pub fn requests(&self) -> Vec<ProducerRequest<String>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, topic: &str) -> Vec<ProducerRequest<String>> {
        self.requests()
            .into_iter()
            .filter(|r| r.topic.as_deref() == Some(topic))
            .collect()
    }
}

#[async_trait]
impl RecordSink<String> for MockSink {
    fn produce(&self, request: ProducerRequest<String>, on_delivery: DeliveryCallback) {
        let request_id = request.request_id;
        let topic = match request
            .topic
            .clone()
            .or_else(|| self.default_topic.clone())
        {
            Some(topic) => topic,
            None => {
                on_delivery(ProducerResult::failure(
                    request_id,
                    ProducerError::Configuration("no topic and no default".to_string()),
                ));
                return;
            }
        };

        let mut recorded = request;
        recorded.topic = Some(topic.clone());
        self.requests.lock().unwrap().push(recorded);

        let result = if self.fail_topics.lock().unwrap().contains(&topic) {
            ProducerResult::failure(
                request_id,
                ProducerError::Kafka(KafkaError::MessageProduction(
                    RDKafkaErrorCode::MessageTimedOut,
                )),
            )
        } else {
            let mut offsets = self.offsets.lock().unwrap();
            let offset = offsets.entry(topic.clone()).or_insert(0);
            let result = ProducerResult::success(request_id, RecordId::new(topic, 0, *offset));
            *offset += 1;
            result
        };

        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push((result, on_delivery));
        } else {
            on_delivery(result);
        }
    }

    async fn flush(&self, _timeout: Option<Duration>) -> Result<(), ProducerError> {
        Ok(())
    }

    fn default_topic(&self) -> Option<&str> {
        self.default_topic.as_deref()
    }
}

/// Interceptor that records every event kind, with the record offset when
/// the event carries a record.
pub struct CollectingInterceptor {
    events: Arc<Mutex<Vec<(String, Option<i64>)>>>,
}

impl CollectingInterceptor {
    pub fn new() -> (Self, Arc<Mutex<Vec<(String, Option<i64>)>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: events.clone(),
            },
            events,
        )
    }
}

impl Interceptor<String> for CollectingInterceptor {
    fn intercept(&self, event: &ProcessorEvent<String>) {
        let offset = event_record(event).map(|record| record.position.offset);
        self.events
            .lock()
            .unwrap()
            .push((event.kind().to_string(), offset));
    }
}

fn event_record<'a>(event: &'a ProcessorEvent<String>) -> Option<&'a Arc<KrimsonRecord<String>>> {
    match event {
        ProcessorEvent::InputReady { record }
        | ProcessorEvent::InputSkipped { record }
        | ProcessorEvent::InputConsumed { record, .. }
        | ProcessorEvent::InputProcessed { record, .. }
        | ProcessorEvent::InputError { record, .. }
        | ProcessorEvent::OutputProcessed { record, .. } => Some(record),
        _ => None,
    }
}

/// Kinds seen so far, for assertions that ignore payload detail.
pub fn kinds(events: &Arc<Mutex<Vec<(String, Option<i64>)>>>) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .map(|(kind, _)| kind.clone())
        .collect()
}
