//! The broker client capability the coordinator is written against.
//!
//! The coordinator never talks to librdkafka directly: it sees a `Connector` that produces a
//! `BrokerClient` for a given protocol version, and `Broker` handles for partition leaders. The
//! rdkafka-backed implementation lives in [`rdkafka_client`]; tests use the in-memory fake from
//! `test_utils`.

pub mod config;
pub mod rdkafka_client;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::version::KafkaVersion;

pub use self::config::ClientConfigBuilder;
pub use self::rdkafka_client::{RdKafkaBroker, RdKafkaClient, RdKafkaConnector};

/// Which offset of the log a block asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetTime {
    /// The log-end offset
    Newest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBlock {
    pub time: OffsetTime,
    pub max_offsets: i32,
}

/// One batched ListOffsets request, destined for a single broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetRequest {
    pub version: i16,
    pub blocks: BTreeMap<(String, i32), OffsetBlock>,
}

impl OffsetRequest {
    pub fn new(version: i16) -> Self {
        Self {
            version,
            blocks: BTreeMap::new(),
        }
    }

    pub fn add_block(&mut self, topic: &str, partition: i32, time: OffsetTime, max_offsets: i32) {
        self.blocks.insert(
            (topic.to_string(), partition),
            OffsetBlock { time, max_offsets },
        );
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionOffsetResponse {
    pub offsets: Vec<i64>,
    /// Protocol level error reported by the broker for this partition
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetResponse {
    pub blocks: HashMap<String, HashMap<i32, PartitionOffsetResponse>>,
}

impl OffsetResponse {
    pub fn add_offset(&mut self, topic: &str, partition: i32, offset: i64) {
        self.insert(
            topic,
            partition,
            PartitionOffsetResponse {
                offsets: vec![offset],
                error: None,
            },
        );
    }

    pub fn add_error(&mut self, topic: &str, partition: i32, error: impl Into<String>) {
        self.insert(
            topic,
            partition,
            PartitionOffsetResponse {
                offsets: Vec::new(),
                error: Some(error.into()),
            },
        );
    }

    fn insert(&mut self, topic: &str, partition: i32, block: PartitionOffsetResponse) {
        self.blocks
            .entry(topic.to_string())
            .or_default()
            .insert(partition, block);
    }
}

/// A single broker, as returned when resolving a partition leader.
#[async_trait]
pub trait Broker: Send + Sync {
    fn id(&self) -> i32;

    async fn fetch_offsets(&self, request: &OffsetRequest) -> Result<OffsetResponse, ClientError>;

    /// Drop the connection to this broker; the next request reconnects.
    async fn close(&self);
}

/// A connected client for one cluster.
///
/// `topics`, `partitions` and `leader` answer from the metadata cached by the last successful
/// `refresh_metadata`.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn version(&self) -> KafkaVersion;

    async fn refresh_metadata(&self) -> Result<(), ClientError>;

    fn topics(&self) -> Result<Vec<String>, ClientError>;

    fn partitions(&self, topic: &str) -> Result<Vec<i32>, ClientError>;

    fn leader(&self, topic: &str, partition: i32) -> Result<Arc<dyn Broker>, ClientError>;

    async fn list_consumer_groups(&self) -> Result<HashSet<String>, ClientError>;

    async fn close(&self);
}

/// Creates clients for a cluster at a given protocol version.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: BrokerClient + 'static;

    async fn connect(
        &self,
        servers: &[String],
        version: KafkaVersion,
    ) -> Result<Self::Client, ClientError>;
}
