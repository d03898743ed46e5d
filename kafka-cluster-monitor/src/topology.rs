//! Topic/partition topology of one cluster.
//!
//! A snapshot maps each topic to the partitions that currently have a resolvable leader. It is
//! replaced wholesale by every successful refresh, never patched; the previous snapshot is only
//! kept long enough to find topics that disappeared.

use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use tracing::{error, info, warn};

use crate::client::BrokerClient;
use crate::error::ClientError;
use crate::metrics::{record_topic_partition_count, MetricsSink};
use crate::metrics_consts::{TOPIC_COUNT, TOPOLOGY_REFRESHES, TOPOLOGY_REFRESH_DURATION_MS};
use crate::storage::{StorageRequest, StorageSender};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPartitions {
    /// Partitions with a leader at refresh time, ascending
    pub partitions: Vec<i32>,
    /// Every partition the brokers reported for the topic, leaderless ones included
    pub partition_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    topics: HashMap<String, TopicPartitions>,
}

impl TopologySnapshot {
    pub fn insert(&mut self, topic: &str, partitions: Vec<i32>, partition_count: i32) {
        self.topics.insert(
            topic.to_string(),
            TopicPartitions {
                partitions,
                partition_count,
            },
        );
    }

    pub fn get(&self, topic: &str) -> Option<&TopicPartitions> {
        self.topics.get(topic)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn partition_count(&self, topic: &str) -> i32 {
        self.get(topic).map_or(0, |t| t.partition_count)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, TopicPartitions> {
        self.topics.iter()
    }

    /// Topics present in `previous` and absent here, sorted
    pub fn deleted_since(&self, previous: &TopologySnapshot) -> Vec<String> {
        let mut deleted: Vec<String> = previous
            .topics
            .keys()
            .filter(|topic| !self.topics.contains_key(*topic))
            .cloned()
            .collect();
        deleted.sort();
        deleted
    }

    /// Partition counts by topic, shared read-only with the per-broker offset workers
    pub fn partition_counts(&self) -> Arc<HashMap<String, i32>> {
        Arc::new(
            self.topics
                .iter()
                .map(|(topic, t)| (topic.clone(), t.partition_count))
                .collect(),
        )
    }
}

/// Query the client for a fresh snapshot. Partitions without a leader are left out; any
/// enumeration failure aborts the whole pass.
pub async fn fetch_topology<C>(client: &C, cluster: &str) -> Result<TopologySnapshot, ClientError>
where
    C: BrokerClient + ?Sized,
{
    if let Err(e) = client.refresh_metadata().await {
        // Whatever is still cached is used; listing below fails if there is nothing
        warn!(cluster, error = %e, "failed to refresh metadata");
    }

    let topics = client.topics().inspect_err(|e| {
        error!(cluster, error = %e, "failed to fetch topic list");
    })?;

    let mut snapshot = TopologySnapshot::default();
    for topic in topics {
        let partitions = client.partitions(&topic).inspect_err(|e| {
            error!(cluster, topic = %topic, error = %e, "failed to fetch partition list");
        })?;

        let partition_count = i32::try_from(partitions.len()).unwrap_or(i32::MAX);
        let mut led = Vec::with_capacity(partitions.len());
        for partition in partitions {
            match client.leader(&topic, partition) {
                Ok(_) => led.push(partition),
                Err(e) => warn!(
                    cluster,
                    topic = %topic,
                    partition,
                    error = %e,
                    "failed to fetch leader for partition"
                ),
            }
        }

        snapshot.insert(&topic, led, partition_count);
    }

    Ok(snapshot)
}

/// Refreshes the topology and reports vanished topics to storage and metrics.
pub struct TopologyTracker {
    cluster: String,
    storage: StorageSender,
    metrics: Arc<dyn MetricsSink>,
    send_timeout: Duration,
}

impl TopologyTracker {
    pub fn new(
        cluster: &str,
        storage: StorageSender,
        metrics: Arc<dyn MetricsSink>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            storage,
            metrics,
            send_timeout,
        }
    }

    /// Build a new snapshot and diff it against `previous`.
    ///
    /// Returns `None` if the pass failed: the caller keeps `previous` as the live snapshot and
    /// must try again next cycle. Only whole-topic disappearance is reported, a topic that lost
    /// partitions is not.
    pub async fn refresh<C>(
        &self,
        client: &C,
        previous: Option<&TopologySnapshot>,
    ) -> Option<TopologySnapshot>
    where
        C: BrokerClient + ?Sized,
    {
        let start = Instant::now();
        let result = fetch_topology(client, &self.cluster).await;
        histogram!(TOPOLOGY_REFRESH_DURATION_MS, "cluster" => self.cluster.clone())
            .record(start.elapsed().as_millis() as f64);

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(_) => {
                counter!(TOPOLOGY_REFRESHES, "cluster" => self.cluster.clone(), "outcome" => "failed")
                    .increment(1);
                return None;
            }
        };
        counter!(TOPOLOGY_REFRESHES, "cluster" => self.cluster.clone(), "outcome" => "success")
            .increment(1);

        if let Some(previous) = previous {
            for topic in snapshot.deleted_since(previous) {
                info!(cluster = %self.cluster, topic = %topic, "topic no longer exists, removing it");
                self.storage
                    .send(
                        StorageRequest::DeleteTopic {
                            cluster: self.cluster.clone(),
                            topic: topic.clone(),
                        },
                        self.send_timeout,
                    )
                    .await;
                self.metrics.delete_topic_metrics(&self.cluster, &topic);
            }
        }

        for (topic, partitions) in snapshot.iter() {
            record_topic_partition_count(&self.cluster, topic, partitions.partition_count);
        }
        gauge!(TOPIC_COUNT, "cluster" => self.cluster.clone()).set(snapshot.len() as f64);

        Some(snapshot)
    }
}
