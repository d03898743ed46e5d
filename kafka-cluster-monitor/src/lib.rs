//! Kafka cluster monitor.
//!
//! One coordinator per configured cluster negotiates a protocol version, keeps a snapshot of the
//! cluster topology, fetches log-end offsets from every partition leader concurrently, and
//! optionally reaps consumer groups that no longer exist on the brokers. Everything it observes
//! is handed to a storage subsystem over a bounded channel.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod metrics_consts;
pub mod negotiate;
pub mod offsets;
pub mod reaper;
pub mod storage;
pub mod supervisor;
pub mod test_utils;
pub mod topology;
pub mod version;

pub use coordinator::KafkaCluster;
pub use supervisor::ClusterSupervisor;
pub use version::KafkaVersion;
