//! Kafka bus backend.
//!
//! Endpoint form: `kafka://host:port[,host:port...]`.
//!
//! The broker connection is opened on first use, so building the bus never
//! blocks; an unreachable cluster surfaces when the bridge subscribes.
//!
//! Each subscription reads every partition of its topic, starting at the end
//! of the log as it stood when `subscribe` returned. Group offsets are not
//! committed to the cluster: a restarted consumer does not replay what it
//! missed while it was down. Topics must already exist.
//!
//! Keyed messages go to `fnv1a(key) % partitions`, so every reply for one
//! request id lands on the same partition; unkeyed messages rotate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, SelectAll, StreamExt};
use rskafka::client::consumer::{StartOffset, StreamConsumerBuilder};
use rskafka::client::partition::{Compression, OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use tokio::sync::{watch, OnceCell};

use crate::bus::{BusError, BusMessage, MessageBus, Subscription};
use crate::resilience::with_timeout;

pub const SCHEME: &str = "kafka";

/// Limit on the initial broker handshake and metadata fetch.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest a fetch waits on the broker for new records.
const FETCH_MAX_WAIT_MS: i32 = 500;

/// Broker list parsed from a `kafka://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaEndpoint {
    pub brokers: Vec<String>,
}

impl KafkaEndpoint {
    pub fn parse(endpoint: &str) -> Result<Self, BusError> {
        let invalid = |reason: String| BusError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let rest = endpoint
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| invalid(format!("expected {SCHEME}://host:port")))?;
        let rest = rest.split(['/', '?']).next().unwrap_or_default();

        let mut brokers = Vec::new();
        for broker in rest.split(',').map(str::trim).filter(|b| !b.is_empty()) {
            let (host, port) = broker
                .rsplit_once(':')
                .ok_or_else(|| invalid(format!("broker {broker:?} has no port")))?;
            if host.is_empty() {
                return Err(invalid(format!("broker {broker:?} has no host")));
            }
            if port.parse::<u16>().is_err() {
                return Err(invalid(format!("broker {broker:?} has an invalid port")));
            }
            brokers.push(broker.to_string());
        }

        if brokers.is_empty() {
            return Err(invalid("no brokers given".to_string()));
        }
        Ok(Self { brokers })
    }
}

/// [`MessageBus`] on a Kafka cluster.
pub struct KafkaBus {
    endpoint: KafkaEndpoint,
    connect_timeout: Duration,
    client: OnceCell<Arc<Client>>,
    producers: DashMap<String, Arc<TopicProducer>>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

struct TopicProducer {
    partitions: Vec<PartitionClient>,
    next: AtomicUsize,
}

impl KafkaBus {
    pub fn new(endpoint: KafkaEndpoint) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client: OnceCell::new(),
            producers: DashMap::new(),
            closed: AtomicBool::new(false),
            close_tx,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &KafkaEndpoint {
        &self.endpoint
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }

    async fn client(&self) -> Result<Arc<Client>, BusError> {
        self.client
            .get_or_try_init(|| async {
                let unreachable = |reason: String| BusError::Unreachable {
                    endpoint: self.endpoint.brokers.join(","),
                    reason,
                };
                let build = ClientBuilder::new(self.endpoint.brokers.clone()).build();
                let client = with_timeout("kafka connect", self.connect_timeout, build)
                    .await
                    .map_err(|e| unreachable(e.to_string()))?
                    .map_err(|e| unreachable(e.to_string()))?;
                tracing::info!(brokers = ?self.endpoint.brokers, "Connected to Kafka");
                Ok::<_, BusError>(Arc::new(client))
            })
            .await
            .cloned()
    }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BusError> {
        let client = self.client().await?;
        let topics = client
            .list_topics()
            .await
            .map_err(|e| BusError::Consume(format!("listing topics: {e}")))?;

        topics
            .into_iter()
            .find(|t| t.name == topic)
            .map(|t| t.partitions.into_iter().collect::<Vec<_>>())
            .filter(|partitions| !partitions.is_empty())
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))
    }

    async fn partition_client(&self, topic: &str, partition: i32) -> Result<PartitionClient, BusError> {
        self.client()
            .await?
            .partition_client(topic.to_string(), partition, UnknownTopicHandling::Error)
            .await
            .map_err(|e| BusError::Consume(format!("{topic}/{partition}: {e}")))
    }

    async fn producer(&self, topic: &str) -> Result<Arc<TopicProducer>, BusError> {
        if let Some(producer) = self.producers.get(topic) {
            return Ok(Arc::clone(producer.value()));
        }

        let mut partitions = Vec::new();
        for partition in self.partitions(topic).await? {
            partitions.push(self.partition_client(topic, partition).await?);
        }
        let producer = Arc::new(TopicProducer {
            partitions,
            next: AtomicUsize::new(0),
        });

        // A concurrent first publish may have won; either copy works.
        let entry = self
            .producers
            .entry(topic.to_string())
            .or_insert(producer);
        Ok(Arc::clone(entry.value()))
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        self.ensure_open()?;
        let producer = self.producer(topic).await.map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        let index = match &message.key {
            Some(key) => partition_for_key(key, producer.partitions.len()),
            None => producer.next.fetch_add(1, Ordering::Relaxed) % producer.partitions.len(),
        };
        let record = Record {
            key: message.key.map(String::into_bytes),
            value: Some(message.payload.to_vec()),
            headers: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        };

        producer.partitions[index]
            .produce(vec![record], Compression::NoCompression)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        self.ensure_open()?;

        let mut streams: SelectAll<BoxStream<'static, Result<BusMessage, BusError>>> =
            stream::select_all(Vec::new());
        for partition in self.partitions(topic).await? {
            let client = self.partition_client(topic, partition).await?;
            let start = client
                .get_offset(OffsetAt::Latest)
                .await
                .map_err(|e| BusError::Consume(format!("{topic}/{partition}: {e}")))?;

            let label = format!("{topic}/{partition}");
            let records = StreamConsumerBuilder::new(Arc::new(client), StartOffset::At(start))
                .with_max_wait_ms(FETCH_MAX_WAIT_MS)
                .build()
                .map(move |item| match item {
                    Ok((record, _high_watermark)) => Ok(into_message(record.record)),
                    Err(e) => Err(BusError::Consume(format!("{label}: {e}"))),
                });
            streams.push(records.boxed());
        }

        tracing::info!(topic, group, partitions = streams.len(), "Subscribed to Kafka topic");
        Ok(Box::new(KafkaSubscription {
            records: streams,
            closed: self.close_tx.subscribe(),
        }))
    }

    async fn close(&self) -> Result<(), BusError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.close_tx.send_replace(true);
            self.producers.clear();
            tracing::info!("Kafka bus closed");
        }
        Ok(())
    }
}

struct KafkaSubscription {
    records: SelectAll<BoxStream<'static, Result<BusMessage, BusError>>>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError> {
        loop {
            if *self.closed.borrow_and_update() {
                return Ok(None);
            }

            tokio::select! {
                biased;
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
                next = self.records.next() => return next.transpose(),
            }
        }
    }
}

fn into_message(record: Record) -> BusMessage {
    BusMessage {
        key: record
            .key
            .map(|key| String::from_utf8_lossy(&key).into_owned()),
        payload: record.value.map(Bytes::from).unwrap_or_default(),
    }
}

/// FNV-1a over the key bytes, reduced to a partition index.
fn partition_for_key(key: &str, partitions: usize) -> usize {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;

    let hash = key
        .bytes()
        .fold(OFFSET_BASIS, |h, b| (h ^ u64::from(b)).wrapping_mul(PRIME));
    (hash % partitions.max(1) as u64) as usize
}
