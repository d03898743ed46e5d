use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use kafka_cluster_monitor::client::RdKafkaConnector;
use kafka_cluster_monitor::config::Config;
use kafka_cluster_monitor::metrics::{
    serve, setup_metrics_recorder, setup_metrics_routes, RecorderMetricsSink,
};
use kafka_cluster_monitor::storage::{StorageRequest, StorageSender};
use kafka_cluster_monitor::ClusterSupervisor;

fn start_server(config: &Config) -> Result<JoinHandle<()>> {
    let router = Router::new()
        .route("/", get(|| async { "kafka cluster monitor" }))
        .route("/_readiness", get(|| async { "ok" }))
        .route("/_liveness", get(|| async { "ok" }));

    let router = if config.export_prometheus {
        let recorder_handle =
            setup_metrics_recorder().context("Failed to install metrics recorder")?;
        setup_metrics_routes(router, recorder_handle)
    } else {
        router
    };

    let bind = config.bind_address();

    Ok(tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!(error = %e, "metrics server failed");
        }
    }))
}

/// Stand-in storage subsystem: logs what the coordinators hand over and tracks no groups.
fn start_storage_drain(mut rx: mpsc::Receiver<StorageRequest>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                StorageRequest::SetBrokerOffset(fact) => debug!(
                    cluster = %fact.cluster,
                    topic = %fact.topic,
                    partition = fact.partition,
                    offset = fact.offset,
                    partition_count = fact.topic_partition_count,
                    "broker offset"
                ),
                StorageRequest::DeleteTopic { cluster, topic } => {
                    info!(cluster = %cluster, topic = %topic, "topic deleted")
                }
                StorageRequest::DeleteGroup { cluster, group } => {
                    info!(cluster = %cluster, group = %group, "consumer group deleted")
                }
                StorageRequest::FetchConsumers { cluster, reply } => {
                    if reply.send(Vec::new()).is_err() {
                        debug!(cluster = %cluster, "consumer list requester went away");
                    }
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;

    // Initialize tracing
    let log_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_filter(EnvFilter::from_default_env())
        .boxed();

    tracing_subscriber::registry().with(log_layer).init();

    info!("Starting kafka cluster monitor");

    let clusters = config
        .cluster_configs()
        .context("Invalid cluster configuration")?;

    let server_handle = start_server(&config)?;
    info!("Started metrics server on {}", config.bind_address());

    let (storage, storage_rx) = StorageSender::channel(config.storage_channel_size);
    let drain_handle = start_storage_drain(storage_rx);

    let mut supervisor = ClusterSupervisor::start(
        clusters,
        |cluster| RdKafkaConnector::new(cluster.profile.clone()),
        storage,
        Arc::new(RecorderMetricsSink::default()),
    )
    .await;

    if supervisor.is_empty() {
        error!("No cluster coordinator could be started");
    } else {
        info!(clusters = ?supervisor.running(), "Monitoring kafka clusters");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");
    }

    supervisor.stop_all(config.shutdown_timeout()).await;

    drain_handle.abort();
    server_handle.abort();

    Ok(())
}
