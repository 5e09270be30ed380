// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory provider for tests.
//!
//! Every partition that should be consumed is registered up front with
//! [`MockConsumer::expect_consume_partition`]; the returned [`MockPartition`]
//! handle then feeds messages and errors into the subscription and closes it.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::message::{ConsumerMessage, TopicPartition};
use crate::{AppError, AppResult};

use super::{ConsumerError, ConsumerProvider, PartitionConsumer};

struct Expectation {
    messages: async_channel::Receiver<ConsumerMessage>,
    errors: async_channel::Receiver<ConsumerError>,
    error_tx: async_channel::Sender<ConsumerError>,
    released: Arc<AtomicUsize>,
}

#[derive(Default)]
pub struct MockConsumer {
    topics: DashMap<String, Vec<i32>>,
    expectations: DashMap<TopicPartition, Option<Expectation>>,
    metadata_error: Mutex<Option<String>>,
}

impl MockConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the partitions of `topic` without expecting them to be
    /// consumed.
    pub fn set_topic_metadata(&self, topic: &str, partitions: &[i32]) {
        self.topics.insert(topic.to_string(), partitions.to_vec());
    }

    /// Makes every partition lookup fail with `reason`.
    pub fn fail_metadata(&self, reason: impl Into<String>) {
        *self.metadata_error.lock() = Some(reason.into());
    }

    /// Expects `topic`/`partition` to be consumed once and returns the handle
    /// driving it. The partition is added to the topic metadata.
    pub fn expect_consume_partition(&self, topic: &str, partition: i32) -> MockPartition {
        let topic_partition = TopicPartition::new(topic, partition);
        let (message_tx, message_rx) = async_channel::unbounded();
        let (error_tx, error_rx) = async_channel::unbounded();
        let released = Arc::new(AtomicUsize::new(0));

        {
            let mut partitions = self.topics.entry(topic.to_string()).or_default();
            if !partitions.contains(&partition) {
                partitions.push(partition);
            }
        }
        self.expectations.insert(
            topic_partition.clone(),
            Some(Expectation {
                messages: message_rx,
                errors: error_rx,
                error_tx: error_tx.clone(),
                released: released.clone(),
            }),
        );

        MockPartition {
            topic_partition,
            message_tx,
            error_tx,
            next_offset: Arc::new(AtomicI64::new(0)),
            released,
        }
    }
}

impl ConsumerProvider for MockConsumer {
    async fn partitions(&self, topic: &str) -> AppResult<Vec<i32>> {
        if let Some(reason) = self.metadata_error.lock().as_ref() {
            return Err(AppError::Startup(reason.clone()));
        }
        self.topics
            .get(topic)
            .map(|partitions| partitions.value().clone())
            .ok_or_else(|| AppError::Startup(format!("unknown topic: {topic}")))
    }

    async fn consume_partition(&self, topic: &str, partition: i32) -> AppResult<PartitionConsumer> {
        let topic_partition = TopicPartition::new(topic, partition);
        let expectation = self
            .expectations
            .get_mut(&topic_partition)
            .and_then(|mut entry| entry.take())
            .ok_or_else(|| {
                AppError::Startup(format!(
                    "no pending expectation to consume {topic_partition}"
                ))
            })?;
        trace!("mock subscription of {topic_partition} opened");

        let Expectation {
            messages,
            errors,
            error_tx,
            released,
        } = expectation;
        Ok(PartitionConsumer::new(
            topic_partition,
            messages,
            errors,
            move || {
                released.fetch_add(1, Ordering::SeqCst);
                error_tx.close();
            },
        ))
    }
}

/// Test-side handle of one expected partition subscription.
#[derive(Clone)]
pub struct MockPartition {
    topic_partition: TopicPartition,
    message_tx: async_channel::Sender<ConsumerMessage>,
    error_tx: async_channel::Sender<ConsumerError>,
    next_offset: Arc<AtomicI64>,
    released: Arc<AtomicUsize>,
}

impl MockPartition {
    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    /// Appends a message at the next offset and returns that offset.
    /// Messages yielded after the subscription was released are discarded.
    pub fn yield_message(&self, payload: impl Into<Bytes>) -> i64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let message = ConsumerMessage::new(self.topic_partition.clone(), offset, payload);
        let _ = self.message_tx.try_send(message);
        offset
    }

    pub fn yield_error(&self, error: AppError) {
        let error = ConsumerError {
            topic_partition: self.topic_partition.clone(),
            error,
        };
        let _ = self.error_tx.try_send(error);
    }

    /// Ends the partition stream. Messages already yielded are still
    /// delivered.
    pub fn close(&self) {
        self.message_tx.close();
    }

    /// Messages yielded but not yet taken by the subscriber.
    pub fn pending(&self) -> usize {
        self.message_tx.len()
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_partitions_follow_expectations() {
        let mock = MockConsumer::new();
        mock.expect_consume_partition("logs", 0);
        mock.expect_consume_partition("logs", 2);
        mock.expect_consume_partition("logs", 2);

        let mut partitions = mock.partitions("logs").await.unwrap();
        partitions.sort();
        assert_eq!(partitions, vec![0, 2]);
        assert!(matches!(
            mock.partitions("metrics").await,
            Err(AppError::Startup(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_failure() {
        let mock = MockConsumer::new();
        mock.expect_consume_partition("logs", 0);
        mock.fail_metadata("broker unreachable");
        let err = mock.partitions("logs").await.unwrap_err();
        assert!(err.to_string().contains("broker unreachable"));
    }

    #[tokio::test]
    async fn test_consume_once() {
        let mock = MockConsumer::new();
        let partition = mock.expect_consume_partition("logs", 0);

        let consumer = mock.consume_partition("logs", 0).await.unwrap();
        assert!(mock.consume_partition("logs", 0).await.is_err());
        assert!(mock.consume_partition("logs", 1).await.is_err());

        assert_eq!(partition.yield_message("alpha"), 0);
        assert_eq!(partition.yield_message("beta"), 1);
        assert_eq!(partition.pending(), 2);
        partition.close();

        let first = consumer.recv().await.unwrap();
        assert_eq!((first.offset, first.payload()), (0, b"alpha".as_slice()));
        let second = consumer.recv().await.unwrap();
        assert_eq!((second.offset, second.payload()), (1, b"beta".as_slice()));
        assert!(consumer.recv().await.is_none());

        assert!(!partition.is_released());
        drop(consumer);
        assert_eq!(partition.release_count(), 1);
    }

    #[tokio::test]
    async fn test_errors_reach_error_stream() {
        let mock = MockConsumer::new();
        let partition = mock.expect_consume_partition("logs", 3);
        let consumer = mock.consume_partition("logs", 3).await.unwrap();
        let errors = consumer.errors();

        partition.yield_error(AppError::InvalidOperation("leader moved".to_string()));
        let error = errors.recv().await.unwrap();
        assert_eq!(error.topic_partition, TopicPartition::new("logs", 3));
        assert!(error.to_string().contains("logs-3"));
        assert!(error.to_string().contains("leader moved"));

        drop(consumer);
        assert!(errors.recv().await.is_err());
    }
}
