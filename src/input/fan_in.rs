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

//! Per-partition tasks feeding the shared queue.
//!
//! Every partition gets two long lived tasks:
//! - a forwarder moving messages from the subscription into the bounded
//!   queue. A full queue suspends the forwarder, which stops draining the
//!   subscription and pushes the slowdown back to the fetch loop.
//! - an error drain reporting everything on the partition's error stream at
//!   debug severity. It never touches the queue.
//!
//! The forwarder owns the subscription and drops it when it exits, which
//! releases it and closes the error stream behind it.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::consumer::{ConsumerError, PartitionConsumer};
use crate::message::{ConsumerMessage, TopicPartition};
use crate::service::{DiagnosticSink, Severity};
use crate::Shutdown;

/// Lifecycle of one partition worker. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Opened,
    Forwarding,
    Closed,
}

impl Display for PartitionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PartitionState::Opened => "opened",
            PartitionState::Forwarding => "forwarding",
            PartitionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StateCell(Mutex<PartitionState>);

impl StateCell {
    fn get(&self) -> PartitionState {
        *self.0.lock()
    }

    /// Moves forward only; a closed worker stays closed.
    fn advance(&self, next: PartitionState) {
        let mut state = self.0.lock();
        let allowed = matches!(
            (*state, next),
            (PartitionState::Opened, PartitionState::Forwarding)
                | (PartitionState::Opened, PartitionState::Closed)
                | (PartitionState::Forwarding, PartitionState::Closed)
        );
        if allowed {
            *state = next;
        }
    }
}

/// Handles of the two tasks serving one partition.
#[derive(Debug)]
pub(crate) struct PartitionWorker {
    topic_partition: TopicPartition,
    state: Arc<StateCell>,
    forwarder: JoinHandle<()>,
    error_drain: JoinHandle<()>,
}

impl PartitionWorker {
    /// Spawns the forwarder and the error drain of `consumer` on `runtime`.
    pub(crate) fn spawn(
        runtime: &Runtime,
        consumer: PartitionConsumer,
        queue: async_channel::Sender<ConsumerMessage>,
        notify_shutdown: &broadcast::Sender<()>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let topic_partition = consumer.topic_partition().clone();
        let state = Arc::new(StateCell(Mutex::new(PartitionState::Opened)));

        let error_drain = runtime.spawn(drain_errors(consumer.errors(), sink));
        let forwarder = runtime.spawn(forward(
            consumer,
            queue,
            Shutdown::new(notify_shutdown.subscribe()),
            state.clone(),
        ));

        Self {
            topic_partition,
            state,
            forwarder,
            error_drain,
        }
    }

    pub(crate) fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    pub(crate) fn partition(&self) -> i32 {
        self.topic_partition.partition
    }

    pub(crate) fn state(&self) -> PartitionState {
        self.state.get()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.forwarder.is_finished() && self.error_drain.is_finished()
    }
}

async fn forward(
    consumer: PartitionConsumer,
    queue: async_channel::Sender<ConsumerMessage>,
    mut shutdown: Shutdown,
    state: Arc<StateCell>,
) {
    let topic_partition = consumer.topic_partition().clone();
    state.advance(PartitionState::Forwarding);
    debug!("forwarder of {topic_partition} started");

    loop {
        let message = tokio::select! {
            received = consumer.recv() => match received {
                Some(message) => message,
                None => {
                    debug!("partition stream of {topic_partition} ended");
                    break;
                }
            },
            _ = shutdown.recv() => {
                debug!("forwarder of {topic_partition} received shutdown signal");
                break;
            }
        };

        trace!("forwarding {} offset {}", topic_partition, message.offset);
        // suspends while the queue is full
        if queue.send(message).await.is_err() {
            debug!("queue closed, forwarder of {topic_partition} exiting");
            break;
        }
    }

    drop(consumer);
    state.advance(PartitionState::Closed);
    debug!("forwarder of {topic_partition} closed");
}

async fn drain_errors(
    errors: async_channel::Receiver<ConsumerError>,
    sink: Arc<dyn DiagnosticSink>,
) {
    while let Ok(error) = errors.recv().await {
        sink.report(Severity::Debug, &error.to_string());
    }
}
