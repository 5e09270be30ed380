use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::TopicPartition;

/// One record taken from a partition, as handed to the shared queue.
///
/// Only `value` is rendered by the reader; the rest is broker metadata kept
/// for callers of [`KafkaInput::next_message`](crate::KafkaInput::next_message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerMessage {
    pub topic_partition: TopicPartition,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: BTreeMap<String, Bytes>,
    pub timestamp: Option<DateTime<Utc>>,
    /// partition high watermark observed when the record was fetched
    pub high_watermark: i64,
}

impl ConsumerMessage {
    pub fn new(topic_partition: TopicPartition, offset: i64, value: impl Into<Bytes>) -> Self {
        Self {
            topic_partition,
            offset,
            key: None,
            value: value.into(),
            headers: BTreeMap::new(),
            timestamp: None,
            high_watermark: offset + 1,
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn partition(&self) -> i32 {
        self.topic_partition.partition
    }

    pub fn payload(&self) -> &[u8] {
        &self.value
    }
}
