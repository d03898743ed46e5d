use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use axum::{routing::get, Router};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::metrics_consts::{
    BROKER_PARTITION_OFFSET, GROUPS_DELETED, TOPICS_DELETED, TOPIC_PARTITION_COUNT,
};

/// Side-effecting sink for the series keyed by topic, partition or group. It is told every
/// partition offset it exports and when a topic or consumer group disappears, so that those
/// series can be cleaned up.
pub trait MetricsSink: Send + Sync {
    fn record_partition_offset(&self, cluster: &str, topic: &str, partition: i32, offset: i64);

    fn delete_topic_metrics(&self, cluster: &str, topic: &str);

    fn delete_consumer_metrics(&self, cluster: &str, group: &str);
}

/// Sink backed by the global `metrics` recorder. The facade cannot unregister a series, so
/// gauges owned by this crate are zeroed and the deletion is counted. Partitions whose offset
/// gauge was written are remembered per topic until the topic is deleted.
#[derive(Debug, Default)]
pub struct RecorderMetricsSink {
    exported_partitions: Mutex<HashMap<(String, String), BTreeSet<i32>>>,
}

impl MetricsSink for RecorderMetricsSink {
    fn record_partition_offset(&self, cluster: &str, topic: &str, partition: i32, offset: i64) {
        record_broker_offset(cluster, topic, partition, offset);
        self.exported_partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((cluster.to_string(), topic.to_string()))
            .or_default()
            .insert(partition);
    }

    fn delete_topic_metrics(&self, cluster: &str, topic: &str) {
        let partitions = self
            .exported_partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(cluster.to_string(), topic.to_string()))
            .unwrap_or_default();
        for partition in partitions {
            record_broker_offset(cluster, topic, partition, 0);
        }

        gauge!(TOPIC_PARTITION_COUNT,
            "cluster" => cluster.to_string(),
            "topic" => topic.to_string(),
        )
        .set(0.0);
        counter!(TOPICS_DELETED, "cluster" => cluster.to_string()).increment(1);
    }

    fn delete_consumer_metrics(&self, cluster: &str, _group: &str) {
        counter!(GROUPS_DELETED, "cluster" => cluster.to_string()).increment(1);
    }
}

/// Record the partition count of a topic in the live snapshot
pub fn record_topic_partition_count(cluster: &str, topic: &str, count: i32) {
    gauge!(TOPIC_PARTITION_COUNT,
        "cluster" => cluster.to_string(),
        "topic" => topic.to_string(),
    )
    .set(f64::from(count));
}

/// Record the latest broker offset of a partition
pub fn record_broker_offset(cluster: &str, topic: &str, partition: i32, offset: i64) {
    gauge!(BROKER_PARTITION_OFFSET,
        "cluster" => cluster.to_string(),
        "topic" => topic.to_string(),
        "partition" => partition.to_string(),
    )
    .set(offset as f64);
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

/// Add the prometheus endpoint to a router.
pub fn setup_metrics_routes(router: Router, recorder_handle: PrometheusHandle) -> Router {
    router.route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}
