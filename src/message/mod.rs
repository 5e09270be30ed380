pub use consumer_message::ConsumerMessage;
pub use envelope::HttpEnvelope;
pub use topic_partition::TopicPartition;

mod consumer_message;
mod envelope;
mod topic_partition;
