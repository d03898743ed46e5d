//! Offset fan-out: one ListOffsets request per leader broker, all in flight at once.
//!
//! Each cycle optionally refreshes the topology, buckets every partition of the live snapshot
//! under its leader, then queries the brokers concurrently. Workers hand their facts to storage
//! themselves and return what went wrong; nothing is shared between them but the read-only
//! partition counts. The cycle only ends once every worker has returned.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::client::{Broker, BrokerClient, OffsetRequest, OffsetTime};
use crate::error::ClientError;
use crate::metrics::MetricsSink;
use crate::metrics_consts::{
    BROKER_OFFSET_REQUESTS, OFFSET_CYCLE_DURATION_MS, OFFSET_FACTS_EMITTED,
    PARTITION_LEADER_ERRORS, PARTITION_OFFSET_ERRORS,
};
use crate::storage::{OffsetFact, StorageRequest, StorageSender};
use crate::topology::{TopologySnapshot, TopologyTracker};

/// Partitions led by one broker, and the request that asks it for their log-end offsets.
pub struct BrokerBatch {
    pub broker: Arc<dyn Broker>,
    pub request: OffsetRequest,
}

/// Requests for one cycle, keyed by broker id.
#[derive(Default)]
pub struct OffsetRequests {
    pub batches: BTreeMap<i32, BrokerBatch>,
    /// Partitions skipped because their leader could not be resolved
    pub leader_errors: usize,
}

/// Bucket every partition of the snapshot under its current leader.
///
/// A partition whose leader cannot be resolved is skipped and counted; the caller must refresh
/// the topology before the next cycle.
pub fn build_requests<C>(client: &C, cluster: &str, snapshot: &TopologySnapshot) -> OffsetRequests
where
    C: BrokerClient + ?Sized,
{
    let request_version = client.version().offset_request_version();
    let mut requests = OffsetRequests::default();

    let mut topics: Vec<_> = snapshot.iter().collect();
    topics.sort_by(|a, b| a.0.cmp(b.0));

    for (topic, partitions) in topics {
        for &partition in &partitions.partitions {
            let broker = match client.leader(topic, partition) {
                Ok(broker) => broker,
                Err(e) => {
                    warn!(
                        cluster,
                        topic = %topic,
                        partition,
                        error = %e,
                        "failed to fetch leader for partition"
                    );
                    counter!(PARTITION_LEADER_ERRORS, "cluster" => cluster.to_string())
                        .increment(1);
                    requests.leader_errors += 1;
                    continue;
                }
            };

            requests
                .batches
                .entry(broker.id())
                .or_insert_with(|| BrokerBatch {
                    broker: broker.clone(),
                    request: OffsetRequest::new(request_version),
                })
                .request
                .add_block(topic, partition, OffsetTime::Newest, 1);
        }
    }

    requests
}

/// What one offset cycle did. `metadata_dirty` tells the caller whether the next cycle must
/// refresh the topology first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetCycleReport {
    pub topology_refreshed: bool,
    pub brokers_queried: usize,
    pub brokers_failed: usize,
    pub facts_emitted: usize,
    pub leader_errors: usize,
    pub errored_topics: BTreeSet<String>,
    pub metadata_dirty: bool,
}

#[derive(Debug, Default)]
struct BrokerOffsets {
    facts_emitted: usize,
    errored_topics: BTreeSet<String>,
}

pub struct OffsetFetcher {
    cluster: String,
    storage: StorageSender,
    metrics: Arc<dyn MetricsSink>,
    send_timeout: Duration,
    concurrency: Arc<Semaphore>,
    topology: TopologyTracker,
}

impl OffsetFetcher {
    pub fn new(
        cluster: &str,
        storage: StorageSender,
        metrics: Arc<dyn MetricsSink>,
        send_timeout: Duration,
        max_concurrent_broker_requests: usize,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            topology: TopologyTracker::new(cluster, storage.clone(), metrics.clone(), send_timeout),
            storage,
            metrics,
            send_timeout,
            concurrency: Arc::new(Semaphore::new(max_concurrent_broker_requests.max(1))),
        }
    }

    /// Run one offset cycle against the live `snapshot`.
    ///
    /// With `refresh_metadata` set, the topology is refreshed first and the snapshot replaced if
    /// that succeeds; if it fails the old snapshot is used and the report stays dirty.
    pub async fn fetch_offsets<C>(
        &self,
        client: &C,
        snapshot: &mut Option<TopologySnapshot>,
        refresh_metadata: bool,
    ) -> OffsetCycleReport
    where
        C: BrokerClient + ?Sized,
    {
        let start = Instant::now();
        let mut report = OffsetCycleReport::default();

        if refresh_metadata {
            match self.topology.refresh(client, snapshot.as_ref()).await {
                Some(refreshed) => {
                    *snapshot = Some(refreshed);
                    report.topology_refreshed = true;
                }
                None => report.metadata_dirty = true,
            }
        }

        let Some(current) = snapshot.as_ref() else {
            debug!(cluster = %self.cluster, "no topology yet, skipping offset cycle");
            report.metadata_dirty = true;
            return report;
        };

        let requests = build_requests(client, &self.cluster, current);
        report.leader_errors = requests.leader_errors;
        report.brokers_queried = requests.batches.len();

        let partition_counts = current.partition_counts();
        let mut workers = JoinSet::new();
        for (broker_id, batch) in requests.batches {
            workers.spawn(query_broker(
                self.cluster.clone(),
                broker_id,
                batch,
                partition_counts.clone(),
                self.storage.clone(),
                self.metrics.clone(),
                self.send_timeout,
                self.concurrency.clone(),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(offsets)) => {
                    report.facts_emitted += offsets.facts_emitted;
                    report.errored_topics.extend(offsets.errored_topics);
                }
                Ok(Err(_)) => report.brokers_failed += 1,
                Err(e) => {
                    error!(cluster = %self.cluster, error = %e, "broker offset worker panicked");
                    report.brokers_failed += 1;
                }
            }
        }

        // Stale leadership is the usual cause of per-partition errors
        if report.leader_errors > 0 || !report.errored_topics.is_empty() {
            report.metadata_dirty = true;
        }

        histogram!(OFFSET_CYCLE_DURATION_MS, "cluster" => self.cluster.clone())
            .record(start.elapsed().as_millis() as f64);

        report
    }
}

async fn query_broker(
    cluster: String,
    broker_id: i32,
    batch: BrokerBatch,
    partition_counts: Arc<HashMap<String, i32>>,
    storage: StorageSender,
    metrics: Arc<dyn MetricsSink>,
    send_timeout: Duration,
    concurrency: Arc<Semaphore>,
) -> Result<BrokerOffsets, ClientError> {
    let _permit = concurrency
        .acquire_owned()
        .await
        .map_err(|e| ClientError::Task(e.to_string()))?;

    let response = match batch.broker.fetch_offsets(&batch.request).await {
        Ok(response) => response,
        Err(e) => {
            error!(cluster = %cluster, broker = broker_id, error = %e, "failed to fetch offsets from broker");
            counter!(BROKER_OFFSET_REQUESTS,
                "cluster" => cluster.clone(),
                "outcome" => "failed",
                "error_type" => e.error_type(),
            )
            .increment(1);
            batch.broker.close().await;
            return Err(e);
        }
    };
    counter!(BROKER_OFFSET_REQUESTS,
        "cluster" => cluster.clone(),
        "outcome" => "success",
        "error_type" => "none",
    )
    .increment(1);

    let timestamp = chrono::Utc::now().timestamp_millis();
    let mut result = BrokerOffsets::default();

    for (topic, partitions) in response.blocks {
        for (partition, block) in partitions {
            let offset = match (&block.error, block.offsets.first()) {
                (None, Some(offset)) => *offset,
                (error, _) => {
                    warn!(
                        cluster = %cluster,
                        broker = broker_id,
                        topic = %topic,
                        partition,
                        error = error.as_deref().unwrap_or("no offset returned"),
                        "error in offset response"
                    );
                    counter!(PARTITION_OFFSET_ERRORS, "cluster" => cluster.clone()).increment(1);
                    result.errored_topics.insert(topic.clone());
                    continue;
                }
            };

            let fact = OffsetFact {
                cluster: cluster.clone(),
                topic: topic.clone(),
                partition,
                offset,
                timestamp,
                topic_partition_count: partition_counts.get(&topic).copied().unwrap_or(0),
            };

            metrics.record_partition_offset(&cluster, &topic, partition, offset);
            if storage
                .send(StorageRequest::SetBrokerOffset(fact), send_timeout)
                .await
            {
                result.facts_emitted += 1;
            }
        }
    }

    counter!(OFFSET_FACTS_EMITTED, "cluster" => cluster.clone())
        .increment(result.facts_emitted as u64);

    Ok(result)
}
