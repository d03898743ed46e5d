use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::version::{KafkaVersion, VersionParseError};

/// Failures surfaced by the broker client capability.
///
/// None of these escape a coordinator's run loop: they are logged and turned into a skipped
/// partition, a skipped broker, or a metadata refresh on the next cycle.
#[derive(Error, Debug)]
pub enum ClientError {
    /// librdkafka returned an error
    #[error("kafka error during {operation}: {source}")]
    Kafka {
        operation: &'static str,
        #[source]
        source: KafkaError,
    },

    /// No broker is currently elected (or known) as leader of the partition
    #[error("no leader available for partition {topic}/{partition}")]
    LeaderNotAvailable { topic: String, partition: i32 },

    #[error("topic {0} is not present in the cluster metadata")]
    UnknownTopic(String),

    #[error("broker {0} is not present in the cluster metadata")]
    UnknownBroker(i32),

    #[error("{operation} is not supported by kafka version {version}")]
    UnsupportedVersion {
        operation: &'static str,
        version: KafkaVersion,
    },

    #[error("client is not connected")]
    NotConnected,

    #[error("timeout during {operation}")]
    Timeout { operation: &'static str },

    /// A blocking client call could not be joined
    #[error("client task failed: {0}")]
    Task(String),
}

impl ClientError {
    pub fn kafka(operation: &'static str, source: KafkaError) -> Self {
        ClientError::Kafka { operation, source }
    }

    /// Returns the error type tag for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            ClientError::Kafka { .. } => "kafka_error",
            ClientError::LeaderNotAvailable { .. } => "leader_not_available",
            ClientError::UnknownTopic(_) => "unknown_topic",
            ClientError::UnknownBroker(_) => "unknown_broker",
            ClientError::UnsupportedVersion { .. } => "unsupported_version",
            ClientError::NotConnected => "not_connected",
            ClientError::Timeout { .. } => "timeout",
            ClientError::Task(_) => "task",
        }
    }
}

impl From<tokio::task::JoinError> for ClientError {
    fn from(e: tokio::task::JoinError) -> Self {
        ClientError::Task(e.to_string())
    }
}

/// Invalid configuration, caught before any coordinator starts.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no kafka brokers specified for cluster '{0}'")]
    NoServers(String),

    #[error("cluster '{cluster}' has an improperly formatted server '{server}' (must be host:port)")]
    InvalidServer { cluster: String, server: String },

    #[error(transparent)]
    InvalidVersion(#[from] VersionParseError),

    #[error("invalid cluster definition '{0}' (must be name=host:port[,host:port...][|key=value...])")]
    InvalidClusterDefinition(String),

    #[error("cluster '{cluster}' has an invalid override '{option}'")]
    InvalidClusterOption { cluster: String, option: String },

    #[error("cluster '{0}' is defined more than once")]
    DuplicateCluster(String),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Fatal for this cluster only: no supported version could reach the brokers.
    #[error("cluster '{cluster}': could not connect to any broker after {attempts} attempts")]
    Negotiation { cluster: String, attempts: usize },

    #[error("coordinator already started")]
    AlreadyStarted,

    #[error("coordinator not started")]
    NotStarted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::types::RDKafkaErrorCode;

    #[test]
    fn client_error_types() {
        let kafka = ClientError::kafka(
            "fetch_metadata",
            KafkaError::MetadataFetch(RDKafkaErrorCode::BrokerTransportFailure),
        );
        assert_eq!(kafka.error_type(), "kafka_error");
        assert!(kafka.to_string().contains("fetch_metadata"));

        let leader = ClientError::LeaderNotAvailable {
            topic: "events".to_string(),
            partition: 3,
        };
        assert_eq!(leader.error_type(), "leader_not_available");
        assert_eq!(
            leader.to_string(),
            "no leader available for partition events/3"
        );

        let unsupported = ClientError::UnsupportedVersion {
            operation: "list_consumer_groups",
            version: KafkaVersion::V0_10_1_0,
        };
        assert_eq!(
            unsupported.to_string(),
            "list_consumer_groups is not supported by kafka version 0.10.1.0"
        );
    }

    #[test]
    fn negotiation_error_names_the_cluster() {
        let err = CoordinatorError::Negotiation {
            cluster: "prod".to_string(),
            attempts: 37,
        };
        assert_eq!(
            err.to_string(),
            "cluster 'prod': could not connect to any broker after 37 attempts"
        );
    }
}
