//! The stream processor: interceptor chain, routing, dispatch pipeline and
//! the processor lifecycle.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod pipeline;
pub mod processor;
pub mod router;

pub use config::ProcessorConfig;
pub use error::ProcessorError;
pub use interceptor::{
    broker_log_level, ClientLogInterceptor, EventError, Interceptor, InterceptorChain,
    LoggingInterceptor, ProcessorEvent,
};
pub use pipeline::RecordPipeline;
pub use processor::{KrimsonProcessor, ProcessorStatus, TerminatedHandler};
pub use router::{HandlerError, RecordContext, RecordHandler, Router, TopicRouter};
