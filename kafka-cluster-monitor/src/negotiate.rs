use metrics::counter;
use tracing::{error, info, warn};

use crate::client::Connector;
use crate::config::ClientProfile;
use crate::error::CoordinatorError;
use crate::metrics_consts::NEGOTIATION_ATTEMPTS;
use crate::version::{self, KafkaVersion};

/// A client connected at the version that negotiation settled on.
#[derive(Debug)]
pub struct Negotiated<C> {
    pub client: C,
    pub version: KafkaVersion,
    /// Versions tried, in order, the successful one last
    pub attempted: Vec<KafkaVersion>,
}

/// Connect to the cluster, downgrading through the supported versions until one works.
///
/// A pinned version is tried first and kept if it connects. Otherwise, or if it fails, every
/// supported version is tried from newest to oldest and the first to connect wins. Exhausting
/// the list is fatal for this cluster only.
pub async fn negotiate<K: Connector>(
    connector: &K,
    cluster: &str,
    servers: &[String],
    profile: &ClientProfile,
) -> Result<Negotiated<K::Client>, CoordinatorError> {
    let mut attempted = Vec::new();

    let pinned = profile.version_pinned.then_some(profile.version);
    let candidates = pinned
        .into_iter()
        .chain(version::newest_first().filter(|v| Some(*v) != pinned));

    for version in candidates {
        attempted.push(version);
        match connector.connect(servers, version).await {
            Ok(client) => {
                counter!(NEGOTIATION_ATTEMPTS, "outcome" => "connected").increment(1);
                info!(
                    cluster,
                    version = %version,
                    attempts = attempted.len(),
                    "connected to kafka cluster"
                );
                return Ok(Negotiated {
                    client,
                    version,
                    attempted,
                });
            }
            Err(e) => {
                counter!(NEGOTIATION_ATTEMPTS, "outcome" => "failed").increment(1);
                warn!(cluster, version = %version, error = %e, "failed to start client at version");
            }
        }
    }

    error!(
        cluster,
        attempts = attempted.len(),
        "could not connect to kafka cluster with any supported version"
    );
    Err(CoordinatorError::Negotiation {
        cluster: cluster.to_string(),
        attempts: attempted.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::FakeCluster;
    use crate::version::SUPPORTED_VERSIONS;

    fn profile(version: KafkaVersion, pinned: bool) -> ClientProfile {
        ClientProfile {
            client_id: "test".to_string(),
            version,
            version_pinned: pinned,
            tls: false,
            sasl: None,
            request_timeout: Duration::from_secs(1),
        }
    }

    fn servers() -> Vec<String> {
        vec!["localhost:9092".to_string()]
    }

    #[tokio::test]
    async fn walks_down_to_a_reachable_version() {
        let reachable = KafkaVersion::new(0, 10, 2, 1);
        let cluster = FakeCluster::new();
        cluster.set_reachable_up_to(Some(reachable));

        let negotiated = negotiate(
            &cluster.connector(),
            "local",
            &servers(),
            &profile(KafkaVersion::V2_1_0_0, false),
        )
        .await
        .unwrap();

        assert!(negotiated.version <= reachable);
        assert_eq!(negotiated.version, reachable);
        assert!(negotiated.attempted.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(negotiated.attempted.first(), Some(&KafkaVersion::V3_6_0_0));
        assert_eq!(cluster.connect_attempts(), negotiated.attempted);
    }

    #[tokio::test]
    async fn unpinned_negotiation_prefers_newest() {
        let cluster = FakeCluster::new();

        let negotiated = negotiate(
            &cluster.connector(),
            "local",
            &servers(),
            &profile(KafkaVersion::V0_11_0_0, false),
        )
        .await
        .unwrap();

        assert_eq!(negotiated.version, KafkaVersion::V3_6_0_0);
        assert_eq!(negotiated.attempted, vec![KafkaVersion::V3_6_0_0]);
    }

    #[tokio::test]
    async fn pinned_version_is_kept_when_it_connects() {
        let cluster = FakeCluster::new();

        let negotiated = negotiate(
            &cluster.connector(),
            "local",
            &servers(),
            &profile(KafkaVersion::V0_11_0_0, true),
        )
        .await
        .unwrap();

        assert_eq!(negotiated.version, KafkaVersion::V0_11_0_0);
        assert_eq!(negotiated.attempted, vec![KafkaVersion::V0_11_0_0]);
    }

    #[tokio::test]
    async fn pinned_version_falls_back_when_unreachable() {
        let cluster = FakeCluster::new();
        cluster.set_reachable_up_to(Some(KafkaVersion::V2_0_0_0));

        let negotiated = negotiate(
            &cluster.connector(),
            "local",
            &servers(),
            &profile(KafkaVersion::V2_1_0_0, true),
        )
        .await
        .unwrap();

        assert_eq!(negotiated.version, KafkaVersion::V2_0_0_0);
        assert_eq!(negotiated.attempted[0], KafkaVersion::V2_1_0_0);
        // The pinned version is not retried during the walk
        assert_eq!(
            negotiated
                .attempted
                .iter()
                .filter(|v| **v == KafkaVersion::V2_1_0_0)
                .count(),
            1
        );
        assert!(negotiated.attempted[1..].windows(2).all(|w| w[0] > w[1]));
    }

    #[tokio::test]
    async fn exhausting_every_version_is_fatal() {
        let cluster = FakeCluster::new();
        cluster.set_reachable_up_to(None);

        let err = negotiate(
            &cluster.connector(),
            "down",
            &servers(),
            &profile(KafkaVersion::V2_0_0_0, false),
        )
        .await
        .unwrap_err();

        match err {
            CoordinatorError::Negotiation { cluster, attempts } => {
                assert_eq!(cluster, "down");
                assert_eq!(attempts, SUPPORTED_VERSIONS.len());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
