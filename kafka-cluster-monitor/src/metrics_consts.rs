// ==== Offset fan-out ====
/// Histogram for the duration of a full offset cycle, topology refresh included
pub const OFFSET_CYCLE_DURATION_MS: &str = "kafka_cluster_offset_cycle_duration_ms";

/// Counter for offset facts handed to storage
pub const OFFSET_FACTS_EMITTED: &str = "kafka_cluster_offset_facts_emitted_total";

/// Counter for per-broker offset requests, labelled by outcome
pub const BROKER_OFFSET_REQUESTS: &str = "kafka_cluster_broker_offset_requests_total";

/// Counter for partitions whose offset response carried an error code
pub const PARTITION_OFFSET_ERRORS: &str = "kafka_cluster_partition_offset_errors_total";

/// Counter for partitions skipped because their leader could not be resolved
pub const PARTITION_LEADER_ERRORS: &str = "kafka_cluster_partition_leader_errors_total";

/// Gauge for the latest log-end offset of a partition
pub const BROKER_PARTITION_OFFSET: &str = "kafka_cluster_broker_partition_offset";

// ==== Topology ====
/// Histogram for topology refresh duration
pub const TOPOLOGY_REFRESH_DURATION_MS: &str = "kafka_cluster_topology_refresh_duration_ms";

/// Counter for topology refreshes, labelled by outcome
pub const TOPOLOGY_REFRESHES: &str = "kafka_cluster_topology_refreshes_total";

/// Gauge for the partition count of each topic
pub const TOPIC_PARTITION_COUNT: &str = "kafka_cluster_topic_partition_count";

/// Gauge for the number of topics in the live snapshot
pub const TOPIC_COUNT: &str = "kafka_cluster_topic_count";

/// Counter for topics reported as deleted
pub const TOPICS_DELETED: &str = "kafka_cluster_topics_deleted_total";

// ==== Groups reaper ====
/// Counter for reaper passes, labelled by outcome
pub const REAPER_RUNS: &str = "kafka_cluster_groups_reaper_runs_total";

/// Counter for consumer groups removed from storage
pub const GROUPS_DELETED: &str = "kafka_cluster_groups_deleted_total";

// ==== Storage ====
/// Counter for storage requests dropped on timeout or closed channel
pub const STORAGE_REQUESTS_DROPPED: &str = "kafka_cluster_storage_requests_dropped_total";

// ==== Lifecycle ====
/// Counter for version negotiation attempts, labelled by outcome
pub const NEGOTIATION_ATTEMPTS: &str = "kafka_cluster_negotiation_attempts_total";

/// Gauge set to 1 while a coordinator's run loop is alive
pub const COORDINATOR_RUNNING: &str = "kafka_cluster_coordinator_running";
