pub mod analysis_hook;
pub mod batch_sink;
pub mod error;
pub mod model;
pub mod processor;
pub mod signature;
pub mod tenant_directory;

pub use analysis_hook::{AnalysisHook, CallAnalysisJob, NoopAnalysisHook};
pub use batch_sink::{BatchCallEvent, BatchEventSink, NoopBatchEventSink};
pub use error::WebhookError;
pub use model::{CallEndedResponse, CallStartedResponse};
pub use processor::WebhookProcessor;
pub use tenant_directory::{InboundAssistant, SqlTenantDirectory, TenantDirectory};
