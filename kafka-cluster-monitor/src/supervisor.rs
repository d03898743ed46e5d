use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info, warn};

use crate::client::Connector;
use crate::config::ClusterConfig;
use crate::coordinator::KafkaCluster;
use crate::metrics::MetricsSink;
use crate::storage::StorageSender;

/// Runs one coordinator per configured cluster. A cluster that cannot start is logged and left
/// out; the others keep running.
pub struct ClusterSupervisor<K: Connector> {
    clusters: Vec<KafkaCluster<K>>,
}

impl<K: Connector> ClusterSupervisor<K> {
    /// Start every cluster concurrently.
    pub async fn start<F>(
        configs: Vec<ClusterConfig>,
        make_connector: F,
        storage: StorageSender,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self
    where
        F: Fn(&ClusterConfig) -> K,
    {
        let starts = configs.into_iter().map(|config| {
            let connector = make_connector(&config);
            let mut cluster =
                KafkaCluster::new(config, connector, storage.clone(), metrics.clone());
            async move {
                let result = cluster.start().await;
                (cluster, result)
            }
        });

        let mut clusters = Vec::new();
        for (cluster, result) in join_all(starts).await {
            match result {
                Ok(()) => clusters.push(cluster),
                Err(e) => error!(
                    cluster = %cluster.name(),
                    error = %e,
                    "cluster failed to start, skipping it"
                ),
            }
        }

        info!(running = clusters.len(), "cluster coordinators started");
        Self { clusters }
    }

    pub fn running(&self) -> Vec<&str> {
        self.clusters.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Stop every coordinator. Returns false if they did not all stop within `timeout`; the
    /// clusters still stopping are logged and their run loops left detached.
    pub async fn stop_all(&mut self, timeout: Duration) -> bool {
        let mut pending: BTreeSet<String> =
            self.clusters.iter().map(|c| c.name().to_string()).collect();

        let mut stops: FuturesUnordered<_> = self
            .clusters
            .iter_mut()
            .map(|c| async move {
                let name = c.name().to_string();
                let result = c.stop().await;
                (name, result)
            })
            .collect();

        let stopped = tokio::time::timeout(timeout, async {
            while let Some((name, result)) = stops.next().await {
                if let Err(e) = result {
                    warn!(cluster = %name, error = %e, "cluster coordinator did not stop cleanly");
                }
                pending.remove(&name);
            }
        })
        .await;
        drop(stops);

        match stopped {
            Ok(()) => {
                info!("all cluster coordinators stopped");
                true
            }
            Err(_) => {
                error!(
                    clusters = ?pending,
                    timeout_secs = timeout.as_secs(),
                    "timed out waiting for cluster coordinators to stop"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeCluster, FakeStorage, RecordingMetrics};
    use std::collections::HashMap;

    #[tokio::test(start_paused = true)]
    async fn stop_all_gives_up_on_a_stuck_cluster() {
        let quick = FakeCluster::new();
        quick.add_topic("events", 1, 1);
        let stuck = FakeCluster::new();
        stuck.add_topic("events", 1, 1);

        let fakes = HashMap::from([("quick", quick.clone()), ("stuck", stuck.clone())]);
        let configs = vec![
            ClusterConfig::new("quick", vec!["a:9092".to_string()]),
            ClusterConfig::new("stuck", vec!["b:9092".to_string()]),
        ];

        let (storage, _recorded) = FakeStorage::start(64);
        let mut supervisor = ClusterSupervisor::start(
            configs,
            |config| fakes[config.name.as_str()].connector(),
            storage,
            Arc::new(RecordingMetrics::default()),
        )
        .await;
        assert_eq!(supervisor.running().len(), 2);

        // The next offset cycle of "stuck" hangs on its only broker
        stuck.delay_broker(1, Duration::from_secs(600));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(!supervisor.stop_all(Duration::from_secs(5)).await);
        assert!(quick.client_closed());
        assert!(!stuck.client_closed());
    }
}
