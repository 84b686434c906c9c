use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::krimson::connector::error::ConnectorError;
use crate::krimson::connector::source_record::SourceRecord;

/// Per-tick context handed to connector callbacks.
pub struct SourceConnectorContext {
    /// Cancelled when the runtime is shutting down.
    pub token: CancellationToken,
    /// Ordinal of this tick, starting at 1.
    pub tick: u64,
}

/// A periodic source of records from an external data origin
///
/// Implementations own their upstream client and override
/// [`SourceConnector::parse_records`] to turn one poll of the origin into
/// source records. Event-time ordering, checkpoint dedup, producing,
/// flushing and completion are the runtime's job.
///
/// `on_success` / `on_error` are optional observers of tick outcomes; they
/// are isolated, a panic in either never affects the runtime.
///
/// # Examples
///
/// ```rust,no_run
/// # use krimson::{SourceConnector, SourceConnectorContext, SourceRecord};
/// # use async_trait::async_trait;
/// struct MeterPoller;
///
/// #[async_trait]
/// impl SourceConnector<String> for MeterPoller {
///     async fn parse_records(
///         &mut self,
///         _ctx: &SourceConnectorContext,
///     ) -> Result<Vec<SourceRecord<String>>, Box<dyn std::error::Error + Send + Sync>> {
///         // one upstream fetch -> zero or more records
///         Ok(vec![SourceRecord::new("meter-7", 1700000000000)
///             .key("meter-7")
///             .value("reading=42".to_string())])
///     }
/// }
/// ```
#[async_trait]
pub trait SourceConnector<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Connector name; defaults to the implementing type's name. Used for
    /// the `source-name` header and as the default record source.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    /// Polls the external origin once and parses the result into records.
    async fn parse_records(
        &mut self,
        ctx: &SourceConnectorContext,
    ) -> Result<Vec<SourceRecord<V>>, Box<dyn std::error::Error + Send + Sync>>;

    /// Called after a successful tick with every record the tick processed
    /// (skipped records included).
    async fn on_success(
        &mut self,
        _ctx: &SourceConnectorContext,
        _processed: &[Arc<SourceRecord<V>>],
    ) {
    }

    /// Called when a tick fails; the runtime backs off and tries again.
    async fn on_error(&mut self, _ctx: &SourceConnectorContext, _error: &ConnectorError) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WeatherFeed;

    #[async_trait]
    impl SourceConnector<String> for WeatherFeed {
        async fn parse_records(
            &mut self,
            _ctx: &SourceConnectorContext,
        ) -> Result<Vec<SourceRecord<String>>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_name_defaults_to_type_name() {
        assert_eq!(WeatherFeed.name(), "WeatherFeed");
    }
}
