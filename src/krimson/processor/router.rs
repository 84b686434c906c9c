use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::krimson::kafka::producer::ProducerRequest;
use crate::krimson::kafka::record::KrimsonRecord;

/// Error returned by record handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Per-record dispatch context
///
/// Carries the record being processed, a cancellation token linked to the
/// processor's termination, and accumulates the outputs the handler emits.
/// The processor takes the outputs after the handler completes; handlers
/// never produce directly.
pub struct RecordContext<V> {
    record: Arc<KrimsonRecord<V>>,
    token: CancellationToken,
    processor: String,
    outputs: Vec<ProducerRequest<V>>,
}

impl<V> RecordContext<V> {
    pub fn new(record: Arc<KrimsonRecord<V>>, token: CancellationToken, processor: String) -> Self {
        Self {
            record,
            token,
            processor,
            outputs: Vec::new(),
        }
    }

    pub fn record(&self) -> &KrimsonRecord<V> {
        &self.record
    }

    /// Cancelled when the processor is terminating; long-running handlers
    /// should observe it.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Name of the processor driving this dispatch, for contextual logging.
    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Queues one output to be produced after the handler returns.
    pub fn output(&mut self, request: ProducerRequest<V>) {
        self.outputs.push(request);
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// The outputs generated by the handler, in emission order.
    pub fn into_outputs(self) -> Vec<ProducerRequest<V>> {
        self.outputs
    }
}

/// Handler for records of one route.
#[async_trait]
pub trait RecordHandler<V>: Send + Sync {
    async fn process(&self, ctx: &mut RecordContext<V>) -> Result<(), HandlerError>;
}

/// Selects a handler for each record and runs it
///
/// A record the router declines ([`Router::can_route`] returns false) is
/// skipped by the processor: its position is tracked without dispatch.
#[async_trait]
pub trait Router<V>: Send + Sync {
    fn can_route(&self, record: &KrimsonRecord<V>) -> bool;

    /// Dispatches the context's record to the matching handler. Outputs are
    /// appended to the context.
    async fn process(&self, ctx: &mut RecordContext<V>) -> Result<(), HandlerError>;
}

/// Router keyed by input topic
///
/// The common routing shape: one registered handler per input topic.
///
/// # Examples
///
/// ```rust,no_run
/// # use krimson::{TopicRouter, RecordHandler, RecordContext, HandlerError, ProducerRequest};
/// # use async_trait::async_trait;
/// struct Enrich;
///
/// #[async_trait]
/// impl RecordHandler<String> for Enrich {
///     async fn process(&self, ctx: &mut RecordContext<String>) -> Result<(), HandlerError> {
///         let value = ctx.record().value().cloned().unwrap_or_default();
///         ctx.output(ProducerRequest::to("enriched").value(value));
///         Ok(())
///     }
/// }
///
/// let router = TopicRouter::new().route("orders", Enrich);
/// ```
pub struct TopicRouter<V> {
    handlers: HashMap<String, Box<dyn RecordHandler<V>>>,
}

impl<V> TopicRouter<V> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler for one input topic, replacing any prior one.
    pub fn route(mut self, topic: impl Into<String>, handler: impl RecordHandler<V> + 'static) -> Self {
        self.handlers.insert(topic.into(), Box::new(handler));
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|k| k.as_str())
    }
}

impl<V> Default for TopicRouter<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Router<V> for TopicRouter<V>
where
    V: Send + Sync + 'static,
{
    fn can_route(&self, record: &KrimsonRecord<V>) -> bool {
        self.handlers.contains_key(record.topic())
    }

    async fn process(&self, ctx: &mut RecordContext<V>) -> Result<(), HandlerError> {
        let topic = ctx.record().topic().to_string();
        match self.handlers.get(&topic) {
            Some(handler) => handler.process(ctx).await,
            None => Err(format!("no handler registered for topic '{}'", topic).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krimson::kafka::headers::Headers;
    use crate::krimson::kafka::record::RecordPosition;

    struct Echo;

    #[async_trait]
    impl RecordHandler<String> for Echo {
        async fn process(&self, ctx: &mut RecordContext<String>) -> Result<(), HandlerError> {
            let value = ctx.record().value().cloned().unwrap_or_default();
            ctx.output(ProducerRequest::to("echo").value(value));
            Ok(())
        }
    }

    fn record(topic: &str) -> Arc<KrimsonRecord<String>> {
        Arc::new(KrimsonRecord::new(
            RecordPosition::new(topic, 0, 1),
            None,
            Some("v".to_string()),
            Headers::new(),
        ))
    }

    #[test]
    fn test_can_route_by_topic() {
        let router = TopicRouter::new().route("orders", Echo);
        assert!(router.can_route(&record("orders")));
        assert!(!router.can_route(&record("payments")));
    }

    #[tokio::test]
    async fn test_process_appends_outputs() {
        let router = TopicRouter::new().route("orders", Echo);
        let mut ctx =
            RecordContext::new(record("orders"), CancellationToken::new(), "test".to_string());

        router.process(&mut ctx).await.unwrap();
        let outputs = ctx.into_outputs();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].topic.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn test_process_unrouted_topic_fails() {
        let router: TopicRouter<String> = TopicRouter::new();
        let mut ctx =
            RecordContext::new(record("orders"), CancellationToken::new(), "test".to_string());

        assert!(router.process(&mut ctx).await.is_err());
    }
}
