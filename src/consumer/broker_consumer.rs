use std::sync::Arc;

use bytes::Bytes;
use rskafka::client::consumer::{StartOffset, StreamConsumerBuilder};
use rskafka::client::partition::UnknownTopicHandling;
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::RecordAndOffset;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace};

use crate::message::{ConsumerMessage, TopicPartition};
use crate::{AppError, AppResult};

use super::{ConsumerError, ConsumerProvider, PartitionConsumer};

/// Messages buffered per partition between the fetch loop and the fan-in
/// task. Once full the fetch loop stops polling the broker.
const PARTITION_CHANNEL_SIZE: usize = 256;
const ERROR_CHANNEL_SIZE: usize = 256;
const FETCH_MAX_WAIT_MS: i32 = 500;

/// Provider backed by a live cluster.
pub struct BrokerConsumer {
    client: Client,
}

impl BrokerConsumer {
    /// Connects to the bootstrap brokers. Must be called from within a tokio
    /// runtime.
    pub async fn connect(brokers: Vec<String>) -> AppResult<Self> {
        if brokers.is_empty() {
            return Err(AppError::Startup(
                "no bootstrap broker configured".to_string(),
            ));
        }
        info!("connecting to kafka brokers {}", brokers.join(","));
        let client = ClientBuilder::new(brokers.clone())
            .build()
            .await
            .map_err(|err| {
                AppError::Startup(format!(
                    "failed to connect to kafka brokers {}: {err}",
                    brokers.join(",")
                ))
            })?;
        Ok(Self { client })
    }

    fn to_message(
        topic_partition: &TopicPartition,
        record_and_offset: RecordAndOffset,
        high_watermark: i64,
    ) -> ConsumerMessage {
        let RecordAndOffset { record, offset } = record_and_offset;
        ConsumerMessage {
            topic_partition: topic_partition.clone(),
            offset,
            key: record.key.map(Bytes::from),
            value: record.value.map(Bytes::from).unwrap_or_default(),
            headers: record
                .headers
                .into_iter()
                .map(|(name, value)| (name, Bytes::from(value)))
                .collect(),
            timestamp: Some(record.timestamp),
            high_watermark,
        }
    }
}

impl ConsumerProvider for BrokerConsumer {
    async fn partitions(&self, topic: &str) -> AppResult<Vec<i32>> {
        let topics = self.client.list_topics().await.map_err(|err| {
            AppError::Startup(format!("failed to list partitions of {topic}: {err}"))
        })?;
        let topic_meta = topics
            .into_iter()
            .find(|t| t.name == topic)
            .ok_or_else(|| AppError::Startup(format!("unknown topic: {topic}")))?;
        Ok(topic_meta.partitions.into_iter().collect())
    }

    async fn consume_partition(&self, topic: &str, partition: i32) -> AppResult<PartitionConsumer> {
        let topic_partition = TopicPartition::new(topic, partition);
        let partition_client = self
            .client
            .partition_client(topic, partition, UnknownTopicHandling::Error)
            .await
            .map_err(|err| {
                AppError::Startup(format!("failed to subscribe to {topic_partition}: {err}"))
            })?;

        let mut stream = Box::pin(
            StreamConsumerBuilder::new(Arc::new(partition_client), StartOffset::Latest)
                .with_max_wait_ms(FETCH_MAX_WAIT_MS)
                .build(),
        );

        let (message_tx, message_rx) = async_channel::bounded(PARTITION_CHANNEL_SIZE);
        let (error_tx, error_rx) = async_channel::bounded(ERROR_CHANNEL_SIZE);

        let tp = topic_partition.clone();
        let release_errors = error_tx.clone();
        let fetch_loop = tokio::spawn(async move {
            debug!("fetch loop of {tp} started at latest offset");
            while let Some(fetched) = stream.next().await {
                match fetched {
                    Ok((record, high_watermark)) => {
                        let message = Self::to_message(&tp, record, high_watermark);
                        trace!("fetched {} offset {}", tp, message.offset);
                        if message_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let error = ConsumerError {
                            topic_partition: tp.clone(),
                            error: AppError::Broker(err),
                        };
                        if error_tx.send(error).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("fetch loop of {tp} stopped");
        });

        Ok(PartitionConsumer::new(
            topic_partition,
            message_rx,
            error_rx,
            move || {
                fetch_loop.abort();
                release_errors.close();
            },
        ))
    }
}
