//! In-memory stand-ins for a Kafka cluster, the storage subsystem and the metrics sink.
//!
//! `FakeCluster` is the shared state; clients and brokers created from it read and record
//! through the same handle, so a test can change the cluster between cycles and inspect what
//! the coordinator asked for afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::client::{Broker, BrokerClient, Connector, OffsetRequest, OffsetResponse};
use crate::error::ClientError;
use crate::metrics::MetricsSink;
use crate::storage::{OffsetFact, StorageRequest, StorageSender};
use crate::version::KafkaVersion;

mock! {
    pub Metrics {}

    impl MetricsSink for Metrics {
        fn record_partition_offset(&self, cluster: &str, topic: &str, partition: i32, offset: i64);
        fn delete_topic_metrics(&self, cluster: &str, topic: &str);
        fn delete_consumer_metrics(&self, cluster: &str, group: &str);
    }
}

/// Partition id to leader broker id; `None` when no leader is elected.
type TopicLayout = BTreeMap<i32, Option<i32>>;

#[derive(Debug)]
struct FakeState {
    reachable_up_to: Option<KafkaVersion>,
    connect_attempts: Vec<KafkaVersion>,

    topics: BTreeMap<String, TopicLayout>,
    cached: Option<BTreeMap<String, TopicLayout>>,
    fail_metadata_refresh: bool,
    fail_topic_listing: bool,
    fail_partitions_for: HashSet<String>,
    refresh_count: usize,

    offsets: HashMap<(String, i32), i64>,
    partition_errors: HashMap<(String, i32), String>,
    failing_brokers: HashSet<i32>,
    broker_delays: HashMap<i32, Duration>,
    offset_requests: Vec<(i32, OffsetRequest)>,
    in_flight: usize,
    max_in_flight: usize,
    closed_brokers: Vec<i32>,

    groups: HashSet<String>,
    fail_group_listing: bool,
    group_listings: usize,
    client_closed: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            reachable_up_to: Some(KafkaVersion::V3_6_0_0),
            connect_attempts: Vec::new(),
            topics: BTreeMap::new(),
            cached: None,
            fail_metadata_refresh: false,
            fail_topic_listing: false,
            fail_partitions_for: HashSet::new(),
            refresh_count: 0,
            offsets: HashMap::new(),
            partition_errors: HashMap::new(),
            failing_brokers: HashSet::new(),
            broker_delays: HashMap::new(),
            offset_requests: Vec::new(),
            in_flight: 0,
            max_in_flight: 0,
            closed_brokers: Vec::new(),
            groups: HashSet::new(),
            fail_group_listing: false,
            group_listings: 0,
            client_closed: false,
        }
    }
}

/// A scriptable cluster. Cloning shares the underlying state.
#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connections succeed at `version` or older; `None` makes the cluster unreachable.
    pub fn set_reachable_up_to(&self, version: Option<KafkaVersion>) {
        self.state().reachable_up_to = version;
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            cluster: self.clone(),
        }
    }

    /// A client already connected at 2.1.0, with metadata loaded.
    pub fn connect_now(&self) -> FakeClient {
        self.connect_at(KafkaVersion::V2_1_0_0)
    }

    pub fn connect_at(&self, version: KafkaVersion) -> FakeClient {
        let mut state = self.state();
        state.cached = Some(state.topics.clone());
        FakeClient {
            cluster: self.clone(),
            version,
        }
    }

    pub fn connect_attempts(&self) -> Vec<KafkaVersion> {
        self.state().connect_attempts.clone()
    }

    /// Create or replace a topic whose partitions are all led by `leader`.
    pub fn add_topic(&self, topic: &str, partitions: i32, leader: i32) {
        let layout = (0..partitions).map(|p| (p, Some(leader))).collect();
        self.state().topics.insert(topic.to_string(), layout);
    }

    /// Create or replace a topic with an explicit leader per partition, in partition order.
    pub fn add_topic_with_leaders(&self, topic: &str, leaders: &[Option<i32>]) {
        let layout = (0..).zip(leaders.iter().copied()).collect();
        self.state().topics.insert(topic.to_string(), layout);
    }

    pub fn remove_topic(&self, topic: &str) {
        self.state().topics.remove(topic);
    }

    /// Change the leader in the cluster; clients see it after their next metadata refresh.
    pub fn set_leader(&self, topic: &str, partition: i32, leader: Option<i32>) {
        if let Some(layout) = self.state().topics.get_mut(topic) {
            layout.insert(partition, leader);
        }
    }

    /// Forget the leader in the client's cached metadata only, leaving the cluster untouched.
    pub fn drop_cached_leader(&self, topic: &str, partition: i32) {
        let mut state = self.state();
        if let Some(layout) = state.cached.as_mut().and_then(|c| c.get_mut(topic)) {
            layout.insert(partition, None);
        }
    }

    pub fn fail_metadata_refresh(&self, fail: bool) {
        self.state().fail_metadata_refresh = fail;
    }

    pub fn fail_topic_listing(&self, fail: bool) {
        self.state().fail_topic_listing = fail;
    }

    pub fn fail_partition_listing(&self, topic: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.fail_partitions_for.insert(topic.to_string());
        } else {
            state.fail_partitions_for.remove(topic);
        }
    }

    /// Log-end offset a broker reports for the partition; unset partitions report 0.
    pub fn set_offset(&self, topic: &str, partition: i32, offset: i64) {
        self.state()
            .offsets
            .insert((topic.to_string(), partition), offset);
    }

    pub fn set_partition_error(&self, topic: &str, partition: i32, error: Option<&str>) {
        let mut state = self.state();
        let key = (topic.to_string(), partition);
        match error {
            Some(e) => state.partition_errors.insert(key, e.to_string()),
            None => state.partition_errors.remove(&key),
        };
    }

    /// Make every offset request to `broker` fail outright.
    pub fn fail_broker(&self, broker: i32, fail: bool) {
        let mut state = self.state();
        if fail {
            state.failing_brokers.insert(broker);
        } else {
            state.failing_brokers.remove(&broker);
        }
    }

    pub fn delay_broker(&self, broker: i32, delay: Duration) {
        self.state().broker_delays.insert(broker, delay);
    }

    pub fn set_groups(&self, groups: &[&str]) {
        self.state().groups = groups.iter().map(|g| g.to_string()).collect();
    }

    pub fn fail_group_listing(&self, fail: bool) {
        self.state().fail_group_listing = fail;
    }

    pub fn refresh_count(&self) -> usize {
        self.state().refresh_count
    }

    /// Every offset request issued so far, with the broker it was sent to.
    pub fn offset_requests(&self) -> Vec<(i32, OffsetRequest)> {
        self.state().offset_requests.clone()
    }

    pub fn clear_offset_requests(&self) {
        self.state().offset_requests.clear();
    }

    /// Highest number of offset requests that were outstanding at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn closed_brokers(&self) -> Vec<i32> {
        self.state().closed_brokers.clone()
    }

    pub fn group_listings(&self) -> usize {
        self.state().group_listings
    }

    pub fn client_closed(&self) -> bool {
        self.state().client_closed
    }
}

#[derive(Clone, Debug)]
pub struct FakeConnector {
    cluster: FakeCluster,
}

#[async_trait]
impl Connector for FakeConnector {
    type Client = FakeClient;

    async fn connect(
        &self,
        _servers: &[String],
        version: KafkaVersion,
    ) -> Result<FakeClient, ClientError> {
        {
            let mut state = self.cluster.state();
            state.connect_attempts.push(version);
            if !matches!(state.reachable_up_to, Some(limit) if version <= limit) {
                return Err(ClientError::Timeout {
                    operation: "connect",
                });
            }
        }
        Ok(self.cluster.connect_at(version))
    }
}

#[derive(Debug)]
pub struct FakeClient {
    cluster: FakeCluster,
    version: KafkaVersion,
}

impl FakeClient {
    fn cached_topic<T>(
        &self,
        topic: &str,
        f: impl FnOnce(&TopicLayout) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let state = self.cluster.state();
        let cached = state.cached.as_ref().ok_or(ClientError::NotConnected)?;
        let layout = cached
            .get(topic)
            .ok_or_else(|| ClientError::UnknownTopic(topic.to_string()))?;
        f(layout)
    }
}

#[async_trait]
impl BrokerClient for FakeClient {
    fn version(&self) -> KafkaVersion {
        self.version
    }

    async fn refresh_metadata(&self) -> Result<(), ClientError> {
        let mut state = self.cluster.state();
        state.refresh_count += 1;
        if state.fail_metadata_refresh {
            return Err(ClientError::Timeout {
                operation: "fetch_metadata",
            });
        }
        state.cached = Some(state.topics.clone());
        Ok(())
    }

    fn topics(&self) -> Result<Vec<String>, ClientError> {
        let state = self.cluster.state();
        if state.fail_topic_listing {
            return Err(ClientError::Timeout {
                operation: "topics",
            });
        }
        let cached = state.cached.as_ref().ok_or(ClientError::NotConnected)?;
        Ok(cached.keys().cloned().collect())
    }

    fn partitions(&self, topic: &str) -> Result<Vec<i32>, ClientError> {
        if self.cluster.state().fail_partitions_for.contains(topic) {
            return Err(ClientError::Timeout {
                operation: "partitions",
            });
        }
        self.cached_topic(topic, |layout| Ok(layout.keys().copied().collect()))
    }

    fn leader(&self, topic: &str, partition: i32) -> Result<Arc<dyn Broker>, ClientError> {
        let leader = self.cached_topic(topic, |layout| {
            layout
                .get(&partition)
                .copied()
                .flatten()
                .ok_or_else(|| ClientError::LeaderNotAvailable {
                    topic: topic.to_string(),
                    partition,
                })
        })?;

        Ok(Arc::new(FakeBroker {
            id: leader,
            cluster: self.cluster.clone(),
        }))
    }

    async fn list_consumer_groups(&self) -> Result<HashSet<String>, ClientError> {
        if !self.version.supports_group_listing() {
            return Err(ClientError::UnsupportedVersion {
                operation: "list_consumer_groups",
                version: self.version,
            });
        }

        let mut state = self.cluster.state();
        state.group_listings += 1;
        if state.fail_group_listing {
            return Err(ClientError::Timeout {
                operation: "list_consumer_groups",
            });
        }
        Ok(state.groups.clone())
    }

    async fn close(&self) {
        let mut state = self.cluster.state();
        state.client_closed = true;
        state.cached = None;
    }
}

#[derive(Debug)]
pub struct FakeBroker {
    id: i32,
    cluster: FakeCluster,
}

#[async_trait]
impl Broker for FakeBroker {
    fn id(&self) -> i32 {
        self.id
    }

    async fn fetch_offsets(&self, request: &OffsetRequest) -> Result<OffsetResponse, ClientError> {
        let delay = {
            let mut state = self.cluster.state();
            state.offset_requests.push((self.id, request.clone()));
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.broker_delays.get(&self.id).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.cluster.state();
        state.in_flight -= 1;

        if state.failing_brokers.contains(&self.id) {
            return Err(ClientError::Timeout {
                operation: "list_offsets",
            });
        }

        let mut response = OffsetResponse::default();
        for (topic, partition) in request.blocks.keys() {
            let key = (topic.clone(), *partition);
            match state.partition_errors.get(&key) {
                Some(error) => response.add_error(topic, *partition, error.clone()),
                None => response.add_offset(
                    topic,
                    *partition,
                    state.offsets.get(&key).copied().unwrap_or(0),
                ),
            }
        }
        Ok(response)
    }

    async fn close(&self) {
        self.cluster.state().closed_brokers.push(self.id);
    }
}

/// Take every request currently queued on a storage channel.
pub fn drain_storage(rx: &mut mpsc::Receiver<StorageRequest>) -> Vec<StorageRequest> {
    let mut requests = Vec::new();
    while let Ok(request) = rx.try_recv() {
        requests.push(request);
    }
    requests
}

#[derive(Debug, Default)]
struct StorageState {
    requests: Vec<StorageRequest>,
    groups: HashMap<String, Vec<String>>,
    responsive: bool,
    consumer_fetches: usize,
    // Replies held back while unresponsive, so callers time out instead of seeing a drop
    stalled: Vec<oneshot::Sender<Vec<String>>>,
}

/// A storage task that records every request and answers consumer list queries.
#[derive(Debug)]
pub struct FakeStorage {
    state: Arc<Mutex<StorageState>>,
    tx: mpsc::Sender<StorageRequest>,
    handle: JoinHandle<()>,
}

impl FakeStorage {
    pub fn start(capacity: usize) -> (StorageSender, FakeStorage) {
        let (tx, mut rx) = mpsc::channel(capacity);
        let state = Arc::new(Mutex::new(StorageState {
            responsive: true,
            ..Default::default()
        }));

        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let mut state = task_state.lock().unwrap_or_else(PoisonError::into_inner);
                match request {
                    StorageRequest::FetchConsumers { cluster, reply } => {
                        state.consumer_fetches += 1;
                        if state.responsive {
                            let groups = state.groups.get(&cluster).cloned().unwrap_or_default();
                            drop(reply.send(groups));
                        } else {
                            state.stalled.push(reply);
                        }
                    }
                    other => state.requests.push(other),
                }
            }
        });

        (
            StorageSender::new(tx.clone()),
            FakeStorage { state, tx, handle },
        )
    }

    fn state(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_groups(&self, cluster: &str, groups: &[&str]) {
        self.state().groups.insert(
            cluster.to_string(),
            groups.iter().map(|g| g.to_string()).collect(),
        );
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.state().responsive = responsive;
    }

    pub fn consumer_fetches(&self) -> usize {
        self.state().consumer_fetches
    }

    /// Wait until every queued request has been taken off the channel and recorded.
    pub async fn flush(&self) {
        while self.tx.capacity() < self.tx.max_capacity() {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
    }

    pub fn offset_facts(&self) -> Vec<OffsetFact> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                StorageRequest::SetBrokerOffset(fact) => Some(fact.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_topics(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                StorageRequest::DeleteTopic { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_groups(&self) -> Vec<String> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                StorageRequest::DeleteGroup { group, .. } => Some(group.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.state().requests.clear();
    }
}

impl Drop for FakeStorage {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Metrics sink that only remembers what it was told, for tests that don't care about call
/// counts.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    partition_offsets: Mutex<Vec<(String, String, i32, i64)>>,
    deleted_topics: Mutex<Vec<(String, String)>>,
    deleted_groups: Mutex<Vec<(String, String)>>,
}

impl RecordingMetrics {
    /// Every exported partition offset as (cluster, topic, partition, offset), in call order
    pub fn partition_offsets(&self) -> Vec<(String, String, i32, i64)> {
        self.partition_offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn deleted_topics(&self) -> Vec<(String, String)> {
        self.deleted_topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn deleted_groups(&self) -> Vec<(String, String)> {
        self.deleted_groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_partition_offset(&self, cluster: &str, topic: &str, partition: i32, offset: i64) {
        self.partition_offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((cluster.to_string(), topic.to_string(), partition, offset));
    }

    fn delete_topic_metrics(&self, cluster: &str, topic: &str) {
        self.deleted_topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((cluster.to_string(), topic.to_string()));
    }

    fn delete_consumer_metrics(&self, cluster: &str, group: &str) {
        self.deleted_groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((cluster.to_string(), group.to_string()));
    }
}
