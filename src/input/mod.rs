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

//! Blocking reader over every partition of a topic.
//!
//! [`KafkaInput`] owns a small tokio runtime. At construction it subscribes to
//! all partitions of the configured topic and spawns one partition worker
//! per partition; the workers fan their messages into one bounded queue.
//! Readers pull from that queue on their own thread through
//! [`KafkaInput::read_message`] or [`std::io::Read`].
//!
//! Message order is kept within a partition only. Each message is handed to
//! exactly one read call.

use std::fmt::{Display, Formatter};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::{self, Runtime};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::consumer::{BrokerConsumer, ConsumerProvider};
use crate::message::{ConsumerMessage, HttpEnvelope};
use crate::service::{DiagnosticSink, InputKafkaConfig, Severity, TracingSink};
use crate::{AppError, AppResult};

pub use fan_in::PartitionState;
use fan_in::PartitionWorker;

mod fan_in;

pub struct KafkaInput {
    config: InputKafkaConfig,
    queue: async_channel::Receiver<ConsumerMessage>,
    workers: Vec<PartitionWorker>,
    notify_shutdown: broadcast::Sender<()>,
    sink: Arc<dyn DiagnosticSink>,
    closed: AtomicBool,
    runtime: Option<Runtime>,
}

impl KafkaInput {
    /// Connects to the brokers named by `config` and subscribes to every
    /// partition of its topic.
    ///
    /// Blocks on an internal runtime, so it must not be called from within
    /// a tokio runtime.
    pub fn connect(config: InputKafkaConfig) -> AppResult<Self> {
        config.validate()?;
        let runtime = Self::build_runtime(&config)?;
        let provider = runtime.block_on(BrokerConsumer::connect(config.brokers()))?;
        Self::start(config, provider, Arc::new(TracingSink), runtime)
    }

    /// Subscribes through an already built provider, e.g. a
    /// [`MockConsumer`](crate::MockConsumer). Same thread restriction as
    /// [`connect`](Self::connect).
    pub fn new<P: ConsumerProvider>(config: InputKafkaConfig, provider: P) -> AppResult<Self> {
        Self::with_sink(config, provider, Arc::new(TracingSink))
    }

    /// Like [`new`](Self::new), reporting diagnostics to `sink`. Must not be
    /// called from within a tokio runtime.
    pub fn with_sink<P: ConsumerProvider>(
        config: InputKafkaConfig,
        provider: P,
        sink: Arc<dyn DiagnosticSink>,
    ) -> AppResult<Self> {
        config.validate()?;
        let runtime = Self::build_runtime(&config)?;
        Self::start(config, provider, sink, runtime)
    }

    fn build_runtime(config: &InputKafkaConfig) -> AppResult<Runtime> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads())
            .thread_name("kafka-input")
            .enable_all()
            .build()?;
        Ok(runtime)
    }

    fn start<P: ConsumerProvider>(
        config: InputKafkaConfig,
        provider: P,
        sink: Arc<dyn DiagnosticSink>,
        runtime: Runtime,
    ) -> AppResult<Self> {
        let topic = config.topic.clone();
        let partitions = runtime.block_on(provider.partitions(&topic))?;
        if partitions.is_empty() {
            return Err(AppError::Startup(format!("topic {topic} has no partitions")));
        }

        // every subscription is opened before any worker starts, a failure
        // drops the ones already opened
        let consumers = runtime.block_on(async {
            let mut consumers = Vec::with_capacity(partitions.len());
            for partition in &partitions {
                consumers.push(provider.consume_partition(&topic, *partition).await?);
            }
            Ok::<_, AppError>(consumers)
        })?;

        let (queue_tx, queue_rx) = async_channel::bounded(config.queue_capacity);
        let (notify_shutdown, _) = broadcast::channel(1);

        let workers = consumers
            .into_iter()
            .map(|consumer| {
                PartitionWorker::spawn(
                    &runtime,
                    consumer,
                    queue_tx.clone(),
                    &notify_shutdown,
                    sink.clone(),
                )
            })
            .collect::<Vec<_>>();
        // the queue closes once every forwarder has dropped its sender
        drop(queue_tx);

        info!(
            "kafka input on {} consuming {} partitions: {:?}",
            config.host,
            workers.len(),
            partitions
        );

        Ok(Self {
            config,
            queue: queue_rx,
            workers,
            notify_shutdown,
            sink,
            closed: AtomicBool::new(false),
            runtime: Some(runtime),
        })
    }

    /// Blocks until a message is available and renders it into `buf`.
    ///
    /// Raw mode copies the payload; json mode copies the rendered envelope.
    /// A payload longer than `buf` is cut to `buf.len()` bytes and the rest
    /// is discarded. An envelope that fails to decode consumes its message,
    /// writes nothing and returns [`AppError::Decode`].
    ///
    /// Returns `Ok(0)` without consuming anything when `buf` is empty, and
    /// `Ok(0)` once every partition has closed and the queue is drained.
    /// Zero-length raw payloads are skipped, so `Ok(0)` never stands for an
    /// empty message.
    ///
    /// Must not be called from a thread driving a tokio runtime.
    pub fn read_message(&self, buf: &mut [u8]) -> AppResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if !self.config.use_json {
            loop {
                let Some(message) = self.next_message() else {
                    return Ok(0);
                };
                if !message.payload().is_empty() {
                    return Ok(self.copy_into(buf, &message, message.payload()));
                }
                self.sink.report(
                    Severity::Debug,
                    &format!(
                        "skipping empty message from {} offset {}",
                        message.topic_partition, message.offset
                    ),
                );
            }
        }

        let Some(message) = self.next_message() else {
            return Ok(0);
        };

        match HttpEnvelope::render(message.payload()) {
            Ok(rendered) => Ok(self.copy_into(buf, &message, &rendered)),
            Err(err) => {
                self.sink.report(
                    Severity::Debug,
                    &format!(
                        "failed to decode access log entry from {} offset {}: {err}",
                        message.topic_partition, message.offset
                    ),
                );
                Err(err)
            }
        }
    }

    fn copy_into(&self, buf: &mut [u8], message: &ConsumerMessage, data: &[u8]) -> usize {
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        if n < data.len() {
            self.sink.report(
                Severity::Warn,
                &format!(
                    "message from {} offset {} truncated to {} of {} bytes",
                    message.topic_partition,
                    message.offset,
                    n,
                    data.len()
                ),
            );
        }
        n
    }

    /// Blocks until a message is available and returns it with its broker
    /// metadata. `None` once every partition has closed and the queue is
    /// drained.
    ///
    /// Must not be called from a thread driving a tokio runtime.
    pub fn next_message(&self) -> Option<ConsumerMessage> {
        self.queue.recv_blocking().ok()
    }

    /// Non-blocking variant of [`next_message`](Self::next_message).
    pub fn try_next_message(&self) -> Option<ConsumerMessage> {
        self.queue.try_recv().ok()
    }

    pub fn config(&self) -> &InputKafkaConfig {
        &self.config
    }

    /// Messages currently buffered in the shared queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.config.queue_capacity
    }

    /// Subscribed partition ids, in discovery order.
    pub fn partitions(&self) -> Vec<i32> {
        self.workers.iter().map(PartitionWorker::partition).collect()
    }

    pub fn partition_state(&self, partition: i32) -> Option<PartitionState> {
        self.workers
            .iter()
            .find(|worker| worker.partition() == partition)
            .map(PartitionWorker::state)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops every partition worker and closes the queue. Messages already
    /// queued can still be read. Calling it again does nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing {}", self);
        let _ = self.notify_shutdown.send(());
        self.queue.close();
        for worker in &self.workers {
            debug!(
                "partition {} is {}, tasks finished: {}",
                worker.topic_partition(),
                worker.state(),
                worker.is_finished()
            );
        }
    }
}

impl Display for KafkaInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Kafka Input: {}/{}", self.config.host, self.config.topic)
    }
}

impl io::Read for KafkaInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_message(buf)?)
    }
}

impl io::Read for &KafkaInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_message(buf)?)
    }
}

impl Drop for KafkaInput {
    fn drop(&mut self) {
        self.close();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::service::{setup_local_tracing, MemorySink};
    use crate::MockConsumer;

    #[fixture]
    fn setup() {
        setup_local_tracing().expect("failed to setup tracing");
    }

    fn config(use_json: bool) -> InputKafkaConfig {
        InputKafkaConfig::new("127.0.0.1:9092", "access-log", use_json).with_worker_threads(2)
    }

    #[rstest]
    fn test_display(_setup: ()) {
        let mock = MockConsumer::new();
        mock.expect_consume_partition("access-log", 0);
        let input = KafkaInput::new(config(false), mock).unwrap();
        assert_eq!(input.to_string(), "Kafka Input: 127.0.0.1:9092/access-log");
    }

    #[rstest]
    fn test_empty_buffer_does_not_consume(_setup: ()) {
        let mock = MockConsumer::new();
        let partition = mock.expect_consume_partition("access-log", 0);
        let input = KafkaInput::new(config(false), mock).unwrap();
        partition.yield_message("alpha");

        assert_eq!(input.read_message(&mut []).unwrap(), 0);
        let mut buf = [0u8; 8];
        let n = input.read_message(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"alpha");
    }

    #[rstest]
    fn test_empty_payload_is_skipped(_setup: ()) {
        let mock = MockConsumer::new();
        let partition = mock.expect_consume_partition("access-log", 0);
        let sink = Arc::new(MemorySink::new());
        let input = KafkaInput::with_sink(config(false), mock, sink.clone()).unwrap();
        partition.yield_message("");
        partition.yield_message("alpha");

        let mut buf = [0u8; 8];
        assert_eq!(input.read_message(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"alpha");
        assert!(sink.contains(Severity::Debug, "skipping empty message from access-log-0 offset 0"));

        // the metadata view still hands out empty messages
        partition.yield_message("");
        let message = input.next_message().unwrap();
        assert_eq!((message.offset, message.payload()), (2, b"".as_slice()));
    }

    #[rstest]
    fn test_truncation_is_reported(_setup: ()) {
        let mock = MockConsumer::new();
        let partition = mock.expect_consume_partition("access-log", 0);
        let sink = Arc::new(MemorySink::new());
        let input = KafkaInput::with_sink(config(false), mock, sink.clone()).unwrap();
        partition.yield_message("0123456789");

        let mut buf = [0u8; 4];
        assert_eq!(input.read_message(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert!(sink.contains(Severity::Warn, "truncated to 4 of 10 bytes"));
    }

    #[rstest]
    fn test_no_partitions_is_a_startup_error(_setup: ()) {
        let mock = MockConsumer::new();
        mock.set_topic_metadata("access-log", &[]);
        let result = KafkaInput::new(config(false), mock);
        assert!(matches!(result, Err(AppError::Startup(_))));
    }

    #[rstest]
    fn test_invalid_config_is_rejected(_setup: ()) {
        let mock = MockConsumer::new();
        mock.expect_consume_partition("access-log", 0);
        let result = KafkaInput::new(config(false).with_queue_capacity(0), mock);
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
    }

    #[rstest]
    fn test_failed_subscription_releases_opened_ones(_setup: ()) {
        let mock = MockConsumer::new();
        let first = mock.expect_consume_partition("access-log", 0);
        // partition 1 is announced but cannot be consumed
        mock.set_topic_metadata("access-log", &[0, 1]);

        let result = KafkaInput::new(config(false), mock);
        assert!(matches!(result, Err(AppError::Startup(_))));
        assert_eq!(first.release_count(), 1);
    }

    #[rstest]
    fn test_close_ends_reads(_setup: ()) {
        let mock = MockConsumer::new();
        let partition = mock.expect_consume_partition("access-log", 0);
        let input = KafkaInput::new(config(false), mock).unwrap();
        assert_eq!(input.partitions(), vec![0]);

        input.close();
        input.close();
        assert!(input.is_closed());

        let mut buf = [0u8; 8];
        assert_eq!(input.read_message(&mut buf).unwrap(), 0);

        for _ in 0..500 {
            if input.partition_state(0) == Some(PartitionState::Closed) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(input.partition_state(0), Some(PartitionState::Closed));
        assert_eq!(partition.release_count(), 1);
        assert_eq!(input.partition_state(7), None);
    }
}
