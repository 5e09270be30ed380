pub use app_error::{AppError, AppResult};
pub use config::{InputKafkaConfig, DEFAULT_QUEUE_CAPACITY};
pub use diagnostic::{DiagnosticSink, MemorySink, Severity, TracingSink};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod diagnostic;
mod shutdown;
mod tracing_config;
