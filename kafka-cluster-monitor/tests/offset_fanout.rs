use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use kafka_cluster_monitor::offsets::OffsetFetcher;
use kafka_cluster_monitor::storage::StorageSender;
use kafka_cluster_monitor::test_utils::{FakeCluster, FakeStorage, RecordingMetrics};

fn fetcher(storage: StorageSender) -> OffsetFetcher {
    OffsetFetcher::new(
        "local",
        storage,
        Arc::new(RecordingMetrics::default()),
        Duration::from_secs(1),
        32,
    )
}

/// Four brokers, each leading its own topic of three partitions.
fn four_broker_cluster() -> FakeCluster {
    let cluster = FakeCluster::new();
    for broker in 1..=4 {
        let topic = format!("topic-{broker}");
        cluster.add_topic(&topic, 3, broker);
        for partition in 0..3 {
            cluster.set_offset(&topic, partition, i64::from(broker * 1000 + partition));
        }
    }
    cluster
}

#[tokio::test(start_paused = true)]
async fn every_broker_is_queried_before_the_cycle_completes() {
    for delays in [[400, 300, 200, 100], [100, 200, 300, 400]] {
        let cluster = four_broker_cluster();
        for (broker, delay) in (1..=4).zip(delays) {
            cluster.delay_broker(broker, Duration::from_millis(delay));
        }
        let client = cluster.connect_now();

        let (sender, storage) = FakeStorage::start(64);
        let mut snapshot = None;
        let report = fetcher(sender)
            .fetch_offsets(&client, &mut snapshot, true)
            .await;

        // All four were outstanding at once: none was held back waiting for another
        assert_eq!(cluster.max_in_flight(), 4);
        assert_eq!(report.brokers_queried, 4);
        assert_eq!(report.facts_emitted, 12);

        let queried: BTreeSet<i32> = cluster.offset_requests().iter().map(|(b, _)| *b).collect();
        assert_eq!(queried, BTreeSet::from([1, 2, 3, 4]));

        storage.flush().await;
        let facts: BTreeMap<(String, i32), i64> = storage
            .offset_facts()
            .into_iter()
            .map(|f| ((f.topic, f.partition), f.offset))
            .collect();
        assert_eq!(facts.len(), 12);
        assert_eq!(facts[&("topic-3".to_string(), 2)], 3002);
    }
}

#[tokio::test]
async fn partition_error_forces_refresh_next_cycle() {
    let cluster = four_broker_cluster();
    cluster.set_partition_error("topic-2", 1, Some("NotLeaderForPartition"));
    let client = cluster.connect_now();

    let (sender, storage) = FakeStorage::start(64);
    let fetcher = fetcher(sender);
    let mut snapshot = None;

    let first = fetcher.fetch_offsets(&client, &mut snapshot, true).await;
    assert!(first.metadata_dirty);
    assert_eq!(first.errored_topics, BTreeSet::from(["topic-2".to_string()]));

    storage.flush().await;
    let facts = storage.offset_facts();
    assert_eq!(facts.len(), 11);
    assert!(!facts
        .iter()
        .any(|f| f.topic == "topic-2" && f.partition == 1));

    // Leadership settles; the next cycle refreshes before building requests
    cluster.set_partition_error("topic-2", 1, None);
    let refreshes = cluster.refresh_count();
    cluster.clear_offset_requests();

    let second = fetcher
        .fetch_offsets(&client, &mut snapshot, first.metadata_dirty)
        .await;
    assert!(second.topology_refreshed);
    assert!(!second.metadata_dirty);
    assert_eq!(cluster.refresh_count(), refreshes + 1);
    assert_eq!(second.facts_emitted, 12);
}

#[tokio::test]
async fn stale_leader_forces_refresh_next_cycle() {
    let cluster = four_broker_cluster();
    let client = cluster.connect_now();

    let (sender, _storage) = FakeStorage::start(64);
    let fetcher = fetcher(sender);
    let mut snapshot = None;
    fetcher.fetch_offsets(&client, &mut snapshot, true).await;

    cluster.drop_cached_leader("topic-4", 0);
    let report = fetcher.fetch_offsets(&client, &mut snapshot, false).await;
    assert_eq!(report.leader_errors, 1);
    assert_eq!(report.facts_emitted, 11);
    assert!(report.metadata_dirty);
}

#[tokio::test]
async fn back_to_back_cycles_emit_two_facts_per_partition() {
    let cluster = four_broker_cluster();
    let client = cluster.connect_now();

    let (sender, storage) = FakeStorage::start(64);
    let fetcher = fetcher(sender);
    let mut snapshot = None;

    let first = fetcher.fetch_offsets(&client, &mut snapshot, true).await;
    assert!(!first.metadata_dirty);
    let after_first = snapshot.clone();

    cluster.set_offset("topic-1", 0, 5000);
    let second = fetcher
        .fetch_offsets(&client, &mut snapshot, first.metadata_dirty)
        .await;
    assert!(!second.topology_refreshed);
    assert_eq!(snapshot, after_first);

    storage.flush().await;
    let mut per_partition: BTreeMap<(String, i32), Vec<i64>> = BTreeMap::new();
    for fact in storage.offset_facts() {
        per_partition
            .entry((fact.topic, fact.partition))
            .or_default()
            .push(fact.offset);
    }

    assert_eq!(per_partition.len(), 12);
    for offsets in per_partition.values() {
        assert_eq!(offsets.len(), 2);
        assert!(offsets[0] <= offsets[1]);
    }
    assert_eq!(per_partition[&("topic-1".to_string(), 0)], vec![1000, 5000]);
}
