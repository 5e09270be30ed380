mod consumer;
mod input;
mod message;
mod service;

pub use consumer::{
    BrokerConsumer, ConsumerError, ConsumerProvider, MockConsumer, MockPartition,
    PartitionConsumer,
};
pub use input::{KafkaInput, PartitionState};
pub use message::{ConsumerMessage, HttpEnvelope, TopicPartition};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, DiagnosticSink, InputKafkaConfig,
    MemorySink, Severity, Shutdown, TracingSink, DEFAULT_QUEUE_CAPACITY,
};
