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

//! Partition subscriptions and the providers that open them.
//!
//! A [`ConsumerProvider`] discovers the partitions of a topic and opens one
//! [`PartitionConsumer`] per partition, positioned at the newest offset. The
//! input never knows which provider it got: [`BrokerConsumer`] talks to a
//! real cluster, [`MockConsumer`] is fed by hand from tests.

use std::fmt::{Debug, Formatter};
use std::future::Future;

use crate::message::{ConsumerMessage, TopicPartition};
use crate::{AppError, AppResult};

pub use broker_consumer::BrokerConsumer;
pub use mock::{MockConsumer, MockPartition};

mod broker_consumer;
mod mock;

/// Opens partition subscriptions for a topic.
pub trait ConsumerProvider: Send + Sync + 'static {
    /// Partition ids of `topic`.
    fn partitions(&self, topic: &str) -> impl Future<Output = AppResult<Vec<i32>>> + Send;

    /// Subscribes to one partition starting at the newest offset, so no
    /// backlog is replayed.
    fn consume_partition(
        &self,
        topic: &str,
        partition: i32,
    ) -> impl Future<Output = AppResult<PartitionConsumer>> + Send;
}

/// A failure reported on a partition's error stream.
#[derive(Debug, thiserror::Error)]
#[error("kafka: error while consuming {topic_partition}: {error}")]
pub struct ConsumerError {
    pub topic_partition: TopicPartition,
    pub error: AppError,
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync + 'static>;

/// One open partition subscription.
///
/// Messages and errors arrive on separate streams. The subscription is
/// released exactly once, when the consumer is dropped.
pub struct PartitionConsumer {
    topic_partition: TopicPartition,
    messages: async_channel::Receiver<ConsumerMessage>,
    errors: async_channel::Receiver<ConsumerError>,
    release: Option<ReleaseFn>,
}

impl PartitionConsumer {
    pub fn new(
        topic_partition: TopicPartition,
        messages: async_channel::Receiver<ConsumerMessage>,
        errors: async_channel::Receiver<ConsumerError>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            topic_partition,
            messages,
            errors,
            release: Some(Box::new(release)),
        }
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    /// Next message, `None` once the partition stream has ended.
    pub async fn recv(&self) -> Option<ConsumerMessage> {
        self.messages.recv().await.ok()
    }

    /// A handle on the error stream; it closes when the consumer is released.
    pub fn errors(&self) -> async_channel::Receiver<ConsumerError> {
        self.errors.clone()
    }
}

impl Debug for PartitionConsumer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionConsumer")
            .field("topic_partition", &self.topic_partition)
            .field("pending", &self.messages.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}

impl Drop for PartitionConsumer {
    fn drop(&mut self) {
        self.messages.close();
        self.errors.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
