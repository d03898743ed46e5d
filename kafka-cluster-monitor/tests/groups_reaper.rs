use std::sync::Arc;
use std::time::Duration;

use kafka_cluster_monitor::config::ClusterConfig;
use kafka_cluster_monitor::reaper::{GroupReaper, ReapOutcome};
use kafka_cluster_monitor::test_utils::{FakeCluster, FakeStorage, RecordingMetrics};
use kafka_cluster_monitor::KafkaCluster;

#[tokio::test]
async fn reaper_skips_its_own_group() {
    let cluster = FakeCluster::new();
    cluster.set_groups(&["g1"]);
    let client = cluster.connect_now();

    let (sender, storage) = FakeStorage::start(16);
    storage.set_groups("clusterA", &["burrow-clusterA", "g1", "g2"]);
    let metrics = Arc::new(RecordingMetrics::default());

    let reaper = GroupReaper::new(
        "clusterA",
        sender,
        metrics.clone(),
        Duration::from_secs(1),
        Duration::from_secs(20),
    );
    assert_eq!(reaper.reserved_group(), "burrow-clusterA");

    let outcome = reaper.reap(&client).await;
    assert_eq!(outcome, ReapOutcome::Reaped(vec!["g2".to_string()]));

    storage.flush().await;
    assert_eq!(storage.deleted_groups(), vec!["g2"]);
    assert_eq!(
        metrics.deleted_groups(),
        vec![("clusterA".to_string(), "g2".to_string())]
    );

    // A second pass still leaves the reserved group alone
    reaper.reap(&client).await;
    storage.flush().await;
    assert!(!storage
        .deleted_groups()
        .contains(&"burrow-clusterA".to_string()));
}

#[tokio::test(start_paused = true)]
async fn coordinator_reaps_on_its_own_timer() {
    let cluster = FakeCluster::new();
    cluster.set_groups(&["g1"]);

    let (sender, storage) = FakeStorage::start(64);
    storage.set_groups("clusterA", &["burrow-clusterA", "g1", "g2"]);

    let mut config = ClusterConfig::new("clusterA", vec!["localhost:9092".to_string()]);
    config.groups_reaper_refresh = Some(Duration::from_secs(30));

    let mut coordinator = KafkaCluster::new(
        config,
        cluster.connector(),
        sender,
        Arc::new(RecordingMetrics::default()),
    );
    coordinator.start().await.unwrap();
    assert!(coordinator.reaper_enabled());

    tokio::time::sleep(Duration::from_secs(20)).await;
    storage.flush().await;
    assert_eq!(cluster.group_listings(), 0);

    tokio::time::sleep(Duration::from_secs(15)).await;
    storage.flush().await;
    assert_eq!(cluster.group_listings(), 1);
    assert_eq!(storage.deleted_groups(), vec!["g2"]);

    coordinator.stop().await.unwrap();
}
