//! Per-cluster coordinator: negotiation at start, then a single run loop servicing the offset,
//! topology and reaper timers until shutdown.
//!
//! The topology timer only marks the metadata dirty; the refresh itself happens at the start of
//! the next offset cycle. Snapshot and dirty flag belong to the run loop and are never shared
//! with the broker workers.

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::{BrokerClient, Connector};
use crate::config::ClusterConfig;
use crate::error::CoordinatorError;
use crate::metrics::MetricsSink;
use crate::metrics_consts::COORDINATOR_RUNNING;
use crate::negotiate::negotiate;
use crate::offsets::{OffsetCycleReport, OffsetFetcher};
use crate::reaper::GroupReaper;
use crate::storage::StorageSender;
use crate::topology::TopologySnapshot;
use crate::version::KafkaVersion;

/// State carried from one offset cycle to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    pub snapshot: Option<TopologySnapshot>,
    /// When set, the next offset cycle refreshes the topology before building requests
    pub metadata_dirty: bool,
}

impl ClusterState {
    /// Fold a finished cycle into the state.
    pub fn apply(&mut self, report: &OffsetCycleReport) {
        self.metadata_dirty = report.metadata_dirty;
    }
}

struct Running<C> {
    client: Arc<C>,
    version: KafkaVersion,
    reaper_enabled: bool,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Monitors one Kafka cluster.
pub struct KafkaCluster<K: Connector> {
    config: ClusterConfig,
    connector: K,
    storage: StorageSender,
    metrics: Arc<dyn MetricsSink>,
    running: Option<Running<K::Client>>,
}

impl<K: Connector> KafkaCluster<K> {
    pub fn new(
        config: ClusterConfig,
        connector: K,
        storage: StorageSender,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            connector,
            storage,
            metrics,
            running: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Negotiated protocol version, while running
    pub fn version(&self) -> Option<KafkaVersion> {
        self.running.as_ref().map(|r| r.version)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn reaper_enabled(&self) -> bool {
        self.running.as_ref().is_some_and(|r| r.reaper_enabled)
    }

    /// Connect, run one offset cycle with a forced topology refresh, then hand over to the run
    /// loop. Fails only if no supported version can reach the brokers.
    pub async fn start(&mut self) -> Result<(), CoordinatorError> {
        if self.running.is_some() {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let cluster = self.config.name.clone();
        info!(cluster = %cluster, servers = %self.config.bootstrap_servers(), "starting cluster coordinator");

        let negotiated = negotiate(
            &self.connector,
            &cluster,
            &self.config.servers,
            &self.config.profile,
        )
        .await?;
        let client = Arc::new(negotiated.client);
        let version = negotiated.version;

        let reaper_refresh = match self.config.groups_reaper_refresh {
            Some(_) if !version.supports_group_listing() => {
                warn!(
                    cluster = %cluster,
                    version = %version,
                    "groups reaper disabled: listing consumer groups needs kafka 0.11.0 or newer"
                );
                None
            }
            refresh => refresh,
        };

        let shutdown = CancellationToken::new();
        let mut cluster_loop = ClusterLoop {
            client: client.clone(),
            fetcher: OffsetFetcher::new(
                &cluster,
                self.storage.clone(),
                self.metrics.clone(),
                self.config.storage_send_timeout,
                self.config.max_concurrent_broker_requests,
            ),
            reaper: reaper_refresh.map(|period| {
                (
                    GroupReaper::new(
                        &cluster,
                        self.storage.clone(),
                        self.metrics.clone(),
                        self.config.storage_send_timeout,
                        self.config.storage_reply_timeout,
                    ),
                    period,
                )
            }),
            offset_refresh: self.config.offset_refresh,
            topic_refresh: self.config.topic_refresh,
            state: ClusterState {
                snapshot: None,
                metadata_dirty: true,
            },
            shutdown: shutdown.clone(),
        };

        let span = info_span!("cluster", cluster = %cluster);
        cluster_loop.offset_cycle().instrument(span.clone()).await;

        let handle = tokio::spawn(cluster_loop.run().instrument(span));
        gauge!(COORDINATOR_RUNNING, "cluster" => cluster).set(1.0);

        self.running = Some(Running {
            client,
            version,
            reaper_enabled: reaper_refresh.is_some(),
            shutdown,
            handle,
        });

        Ok(())
    }

    /// Stop the timers, let any in-flight cycle finish, then close the client.
    pub async fn stop(&mut self) -> Result<(), CoordinatorError> {
        let running = self.running.take().ok_or(CoordinatorError::NotStarted)?;
        let cluster = &self.config.name;
        info!(cluster = %cluster, "stopping cluster coordinator");

        running.shutdown.cancel();
        if let Err(e) = running.handle.await {
            error!(cluster = %cluster, error = %e, "cluster run loop ended abnormally");
        }
        running.client.close().await;

        gauge!(COORDINATOR_RUNNING, "cluster" => cluster.clone()).set(0.0);
        info!(cluster = %cluster, "stopped cluster coordinator");
        Ok(())
    }
}

struct ClusterLoop<C> {
    client: Arc<C>,
    fetcher: OffsetFetcher,
    reaper: Option<(GroupReaper, Duration)>,
    offset_refresh: Duration,
    topic_refresh: Duration,
    state: ClusterState,
    shutdown: CancellationToken,
}

impl<C: BrokerClient + 'static> ClusterLoop<C> {
    async fn run(mut self) {
        let now = Instant::now();
        let mut offset_ticker = ticker(now, self.offset_refresh);
        let mut topic_ticker = ticker(now, self.topic_refresh);
        let mut reaper_ticker = self.reaper.as_ref().map(|(_, period)| ticker(now, *period));
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = offset_ticker.tick() => self.offset_cycle().await,
                _ = topic_ticker.tick() => {
                    debug!("topology refresh due on next offset cycle");
                    self.state.metadata_dirty = true;
                }
                _ = tick(&mut reaper_ticker) => self.reap().await,
            }
        }

        debug!("cluster run loop exited");
    }

    async fn offset_cycle(&mut self) {
        let report = self
            .fetcher
            .fetch_offsets(
                self.client.as_ref(),
                &mut self.state.snapshot,
                self.state.metadata_dirty,
            )
            .await;

        debug!(
            topology_refreshed = report.topology_refreshed,
            brokers = report.brokers_queried,
            brokers_failed = report.brokers_failed,
            facts = report.facts_emitted,
            leader_errors = report.leader_errors,
            errored_topics = report.errored_topics.len(),
            "offset cycle finished"
        );
        self.state.apply(&report);
    }

    async fn reap(&mut self) {
        if let Some((reaper, _)) = &self.reaper {
            let outcome = reaper.reap(self.client.as_ref()).await;
            debug!(?outcome, "groups reaper finished");
        }
    }
}

/// Interval whose first tick is one full period away.
fn ticker(now: Instant, period: Duration) -> Interval {
    let mut interval = interval_at(now + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Tick an optional interval; a missing one never fires.
async fn tick(interval: &mut Option<Interval>) -> Instant {
    match interval {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}
