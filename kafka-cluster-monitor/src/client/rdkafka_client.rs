//! librdkafka implementation of the broker client capability.
//!
//! One `BaseConsumer` per cluster, used without a consumer group: it fetches metadata, lists
//! groups and resolves offsets. librdkafka routes each ListOffsets request to the partition
//! leaders itself, so a per-broker batch becomes one `offsets_for_times` call containing only
//! that broker's partitions. All librdkafka calls block, so they run on the blocking pool.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::metadata::Metadata;
use rdkafka::{Offset, TopicPartitionList};
use tracing::debug;

use crate::client::config::ClientConfigBuilder;
use crate::client::{Broker, BrokerClient, Connector, OffsetRequest, OffsetResponse, OffsetTime};
use crate::config::ClientProfile;
use crate::error::ClientError;
use crate::version::KafkaVersion;

/// Metadata copied out of librdkafka after each refresh.
#[derive(Debug, Default)]
struct ClusterMetadata {
    brokers: HashMap<i32, String>,
    topics: BTreeMap<String, Vec<PartitionMetadata>>,
}

#[derive(Debug)]
struct PartitionMetadata {
    id: i32,
    leader: i32,
}

impl From<&Metadata> for ClusterMetadata {
    fn from(metadata: &Metadata) -> Self {
        let brokers = metadata
            .brokers()
            .iter()
            .map(|b| (b.id(), format!("{}:{}", b.host(), b.port())))
            .collect();

        let topics = metadata
            .topics()
            .iter()
            // A topic that errored and carries no partitions is not usable yet (being created,
            // or already gone)
            .filter(|t| t.error().is_none() || !t.partitions().is_empty())
            .map(|t| {
                let mut partitions: Vec<_> = t
                    .partitions()
                    .iter()
                    .map(|p| PartitionMetadata {
                        id: p.id(),
                        leader: p.leader(),
                    })
                    .collect();
                partitions.sort_by_key(|p| p.id);
                (t.name().to_string(), partitions)
            })
            .collect();

        Self { brokers, topics }
    }
}

pub struct RdKafkaConnector {
    profile: ClientProfile,
}

impl RdKafkaConnector {
    pub fn new(profile: ClientProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl Connector for RdKafkaConnector {
    type Client = RdKafkaClient;

    /// Create the consumer and fetch metadata once: librdkafka connects lazily, so the metadata
    /// round trip is what proves the brokers are reachable at this version.
    async fn connect(
        &self,
        servers: &[String],
        version: KafkaVersion,
    ) -> Result<RdKafkaClient, ClientError> {
        let config =
            ClientConfigBuilder::from_profile(&servers.join(","), &self.profile, version).build();
        let timeout = self.profile.request_timeout;

        let (consumer, metadata) = tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = config
                .create()
                .map_err(|e| ClientError::kafka("create_client", e))?;
            let metadata = consumer
                .fetch_metadata(None, timeout)
                .map_err(|e| ClientError::kafka("fetch_metadata", e))?;
            Ok::<_, ClientError>((consumer, ClusterMetadata::from(&metadata)))
        })
        .await??;

        Ok(RdKafkaClient {
            consumer: Arc::new(consumer),
            version,
            timeout,
            metadata: RwLock::new(Some(Arc::new(metadata))),
            brokers: Mutex::new(HashMap::new()),
        })
    }
}

pub struct RdKafkaClient {
    consumer: Arc<BaseConsumer>,
    version: KafkaVersion,
    timeout: Duration,
    metadata: RwLock<Option<Arc<ClusterMetadata>>>,
    brokers: Mutex<HashMap<i32, Arc<RdKafkaBroker>>>,
}

impl RdKafkaClient {
    fn metadata(&self) -> Result<Arc<ClusterMetadata>, ClientError> {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    fn broker(&self, id: i32, address: &str) -> Arc<RdKafkaBroker> {
        let mut brokers = self.brokers.lock().unwrap_or_else(PoisonError::into_inner);
        brokers
            .entry(id)
            .or_insert_with(|| {
                Arc::new(RdKafkaBroker {
                    id,
                    address: address.to_string(),
                    consumer: self.consumer.clone(),
                    timeout: self.timeout,
                })
            })
            .clone()
    }
}

#[async_trait]
impl BrokerClient for RdKafkaClient {
    fn version(&self) -> KafkaVersion {
        self.version
    }

    async fn refresh_metadata(&self) -> Result<(), ClientError> {
        let consumer = self.consumer.clone();
        let timeout = self.timeout;

        let metadata = tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, timeout)
                .map(|m| ClusterMetadata::from(&m))
                .map_err(|e| ClientError::kafka("fetch_metadata", e))
        })
        .await??;

        *self.metadata.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(metadata));
        Ok(())
    }

    fn topics(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.metadata()?.topics.keys().cloned().collect())
    }

    fn partitions(&self, topic: &str) -> Result<Vec<i32>, ClientError> {
        self.metadata()?
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().map(|p| p.id).collect())
            .ok_or_else(|| ClientError::UnknownTopic(topic.to_string()))
    }

    fn leader(&self, topic: &str, partition: i32) -> Result<Arc<dyn Broker>, ClientError> {
        let metadata = self.metadata()?;
        let leader_not_available = || ClientError::LeaderNotAvailable {
            topic: topic.to_string(),
            partition,
        };

        let leader = metadata
            .topics
            .get(topic)
            .ok_or_else(|| ClientError::UnknownTopic(topic.to_string()))?
            .iter()
            .find(|p| p.id == partition)
            .ok_or_else(leader_not_available)?
            .leader;

        if leader < 0 {
            return Err(leader_not_available());
        }

        let address = metadata
            .brokers
            .get(&leader)
            .ok_or(ClientError::UnknownBroker(leader))?;

        Ok(self.broker(leader, address))
    }

    async fn list_consumer_groups(&self) -> Result<HashSet<String>, ClientError> {
        if !self.version.supports_group_listing() {
            return Err(ClientError::UnsupportedVersion {
                operation: "list_consumer_groups",
                version: self.version,
            });
        }

        let consumer = self.consumer.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_group_list(None, timeout)
                .map(|list| list.groups().iter().map(|g| g.name().to_string()).collect())
                .map_err(|e| ClientError::kafka("fetch_group_list", e))
        })
        .await?
    }

    async fn close(&self) {
        self.brokers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.metadata.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct RdKafkaBroker {
    id: i32,
    address: String,
    consumer: Arc<BaseConsumer>,
    timeout: Duration,
}

#[async_trait]
impl Broker for RdKafkaBroker {
    fn id(&self) -> i32 {
        self.id
    }

    async fn fetch_offsets(&self, request: &OffsetRequest) -> Result<OffsetResponse, ClientError> {
        let mut tpl = TopicPartitionList::with_capacity(request.len());
        for ((topic, partition), block) in &request.blocks {
            let offset = match block.time {
                OffsetTime::Newest => Offset::End,
            };
            tpl.add_partition_offset(topic, *partition, offset)
                .map_err(|e| ClientError::kafka("build_offset_request", e))?;
        }

        debug!(
            broker = self.id,
            address = %self.address,
            partitions = request.len(),
            request_version = request.version,
            "fetching offsets"
        );

        let consumer = self.consumer.clone();
        let timeout = self.timeout;
        let resolved = tokio::task::spawn_blocking(move || {
            consumer
                .offsets_for_times(tpl, timeout)
                .map_err(|e| ClientError::kafka("list_offsets", e))
        })
        .await??;

        let mut response = OffsetResponse::default();
        for elem in resolved.elements() {
            match (elem.error(), elem.offset()) {
                (Err(e), _) => response.add_error(elem.topic(), elem.partition(), e.to_string()),
                (Ok(()), Offset::Offset(offset)) => {
                    response.add_offset(elem.topic(), elem.partition(), offset)
                }
                (Ok(()), other) => response.add_error(
                    elem.topic(),
                    elem.partition(),
                    format!("offset not available: {other:?}"),
                ),
            }
        }

        Ok(response)
    }

    async fn close(&self) {
        // librdkafka owns the broker sockets and reconnects on the next request by itself
        debug!(broker = self.id, address = %self.address, "releasing broker handle");
    }
}
