//! The source-connector runtime: periodic polling of an external origin,
//! event-time checkpoint dedup and produce-and-flush ticks.

pub mod checkpoint;
pub mod error;
pub mod runtime;
pub mod source_connector;
pub mod source_record;

pub use checkpoint::{CheckpointSource, SourceCheckpoint, SourceCheckpointManager};
pub use error::ConnectorError;
pub use runtime::{
    SourceConnectorOptions, SourceConnectorRuntime, SOURCE_NAME_HEADER, SOURCE_OPERATION_HEADER,
    SOURCE_TYPE_HEADER,
};
pub use source_connector::{SourceConnector, SourceConnectorContext};
pub use source_record::{ProcessingState, SourceOperation, SourceRecord};
