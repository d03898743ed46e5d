use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{error, info, warn};

use crate::client::BrokerClient;
use crate::metrics::MetricsSink;
use crate::metrics_consts::REAPER_RUNS;
use crate::storage::{StorageRequest, StorageSender};

/// Result of one reaper pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapOutcome {
    /// Groups storage tracked that are gone from the brokers, in the order they were removed
    Reaped(Vec<String>),
    /// Brokers could not list their groups
    GroupListingFailed,
    /// Storage did not answer with its group list in time
    StorageUnavailable,
}

/// Removes consumer groups from storage once the brokers no longer know them.
pub struct GroupReaper {
    cluster: String,
    reserved_group: String,
    storage: StorageSender,
    metrics: Arc<dyn MetricsSink>,
    send_timeout: Duration,
    reply_timeout: Duration,
}

impl GroupReaper {
    pub fn new(
        cluster: &str,
        storage: StorageSender,
        metrics: Arc<dyn MetricsSink>,
        send_timeout: Duration,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            reserved_group: format!("burrow-{cluster}"),
            storage,
            metrics,
            send_timeout,
            reply_timeout,
        }
    }

    /// The group this monitor reports for itself. It is never reaped.
    pub fn reserved_group(&self) -> &str {
        &self.reserved_group
    }

    pub async fn reap<C>(&self, client: &C) -> ReapOutcome
    where
        C: BrokerClient + ?Sized,
    {
        let outcome = self.run(client).await;
        let label = match &outcome {
            ReapOutcome::Reaped(_) => "success",
            ReapOutcome::GroupListingFailed => "group_listing_failed",
            ReapOutcome::StorageUnavailable => "storage_unavailable",
        };
        counter!(REAPER_RUNS, "cluster" => self.cluster.clone(), "outcome" => label).increment(1);
        outcome
    }

    async fn run<C>(&self, client: &C) -> ReapOutcome
    where
        C: BrokerClient + ?Sized,
    {
        let live = match client.list_consumer_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                error!(cluster = %self.cluster, error = %e, "failed to get the list of available consumer groups");
                return ReapOutcome::GroupListingFailed;
            }
        };

        let Some(tracked) = self
            .storage
            .fetch_consumers(&self.cluster, self.reply_timeout)
            .await
        else {
            warn!(cluster = %self.cluster, "no consumer list from storage, skipping reap");
            return ReapOutcome::StorageUnavailable;
        };

        let tracked: BTreeSet<String> = tracked.into_iter().collect();
        let mut reaped = Vec::new();

        for group in tracked {
            if group == self.reserved_group || live.contains(&group) {
                continue;
            }

            info!(cluster = %self.cluster, group = %group, "consumer group no longer exists, removing it");
            self.storage
                .send(
                    StorageRequest::DeleteGroup {
                        cluster: self.cluster.clone(),
                        group: group.clone(),
                    },
                    self.send_timeout,
                )
                .await;
            self.metrics.delete_consumer_metrics(&self.cluster, &group);
            reaped.push(group);
        }

        ReapOutcome::Reaped(reaped)
    }
}
