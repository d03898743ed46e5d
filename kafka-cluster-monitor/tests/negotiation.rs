use std::time::Duration;

use kafka_cluster_monitor::config::ClientProfile;
use kafka_cluster_monitor::negotiate::negotiate;
use kafka_cluster_monitor::test_utils::FakeCluster;
use kafka_cluster_monitor::version::{self, KafkaVersion};

fn profile(version: KafkaVersion) -> ClientProfile {
    ClientProfile {
        client_id: "negotiation-test".to_string(),
        version,
        version_pinned: false,
        tls: false,
        sasl: None,
        request_timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn every_reachable_ceiling_is_found_walking_down() {
    let servers = vec!["localhost:9092".to_string()];

    for ceiling in version::newest_first() {
        let cluster = FakeCluster::new();
        cluster.set_reachable_up_to(Some(ceiling));

        let negotiated = negotiate(
            &cluster.connector(),
            "local",
            &servers,
            &profile(KafkaVersion::V3_6_0_0),
        )
        .await
        .unwrap();

        assert_eq!(negotiated.version, ceiling);

        let attempts = cluster.connect_attempts();
        assert!(
            attempts.windows(2).all(|w| w[0] > w[1]),
            "attempts out of order for {ceiling}: {attempts:?}"
        );
        assert!(attempts[..attempts.len() - 1].iter().all(|v| *v > ceiling));
    }
}

#[tokio::test]
async fn unreachable_cluster_tries_every_version_once() {
    let cluster = FakeCluster::new();
    cluster.set_reachable_up_to(None);

    let result = negotiate(
        &cluster.connector(),
        "down",
        &["localhost:9092".to_string()],
        &profile(KafkaVersion::V2_0_0_0),
    )
    .await;
    assert!(result.is_err());

    let attempts = cluster.connect_attempts();
    assert_eq!(attempts, version::newest_first().collect::<Vec<_>>());
}
