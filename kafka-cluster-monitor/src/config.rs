use std::collections::HashSet;
use std::time::Duration;

use envconfig::Envconfig;

use crate::error::ConfigError;
use crate::version::KafkaVersion;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka clusters, e.g. "local=localhost:9092;prod=kafka-1:9092,kafka-2:9092". Any of
    // kafka_version, clusters_version and the refresh/concurrency settings below can be
    // overridden per cluster: "old=kafka-0:9092|clusters_version=0.10.2.1|offset_refresh_secs=30"
    #[envconfig(default = "local=localhost:9092")]
    pub kafka_clusters: String,

    // Client profile, used by every cluster that does not override it
    #[envconfig(default = "2.0.0")]
    pub kafka_version: String,

    // Operator pin: when set, this version is tried first and the newest-first walk only
    // happens if it cannot connect
    #[envconfig(from = "CLUSTERS_VERSION")]
    pub clusters_version: Option<String>,

    #[envconfig(default = "kafka-cluster-monitor")]
    pub kafka_client_id: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    pub kafka_sasl_mechanism: Option<String>, // PLAIN, SCRAM-SHA-256, SCRAM-SHA-512

    pub kafka_sasl_username: Option<String>,

    pub kafka_sasl_password: Option<String>,

    #[envconfig(default = "10000")]
    pub kafka_request_timeout_ms: u64,

    // Scheduling
    #[envconfig(default = "10")]
    pub offset_refresh_secs: u64,

    #[envconfig(default = "60")]
    pub topic_refresh_secs: u64,

    #[envconfig(default = "0")] // disabled
    pub groups_reaper_refresh_secs: u64,

    #[envconfig(default = "32")]
    pub max_concurrent_broker_requests: usize,

    // Storage hand-off
    #[envconfig(default = "1")]
    pub storage_send_timeout_secs: u64,

    #[envconfig(default = "20")]
    pub storage_reply_timeout_secs: u64,

    #[envconfig(default = "1024")]
    pub storage_channel_size: usize,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    // HTTP server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

/// Connection settings for one cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientProfile {
    pub client_id: String,
    pub version: KafkaVersion,
    /// True when an operator pinned the version
    pub version_pinned: bool,
    pub tls: bool,
    pub sasl: Option<SaslConfig>,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaslConfig {
    pub mechanism: String,
    pub username: String,
    pub password: String,
}

/// Everything one coordinator needs, validated.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub name: String,
    pub servers: Vec<String>,
    pub profile: ClientProfile,
    pub offset_refresh: Duration,
    pub topic_refresh: Duration,
    /// `None` disables the groups reaper
    pub groups_reaper_refresh: Option<Duration>,
    pub max_concurrent_broker_requests: usize,
    pub storage_send_timeout: Duration,
    pub storage_reply_timeout: Duration,
}

impl ClusterConfig {
    /// A cluster with the default intervals and client profile.
    pub fn new(name: &str, servers: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            servers,
            profile: ClientProfile {
                client_id: "kafka-cluster-monitor".to_string(),
                version: KafkaVersion::V2_0_0_0,
                version_pinned: false,
                tls: false,
                sasl: None,
                request_timeout: Duration::from_secs(10),
            },
            offset_refresh: Duration::from_secs(10),
            topic_refresh: Duration::from_secs(60),
            groups_reaper_refresh: None,
            max_concurrent_broker_requests: 32,
            storage_send_timeout: Duration::from_secs(1),
            storage_reply_timeout: Duration::from_secs(20),
        }
    }

    pub fn bootstrap_servers(&self) -> String {
        self.servers.join(",")
    }
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    fn client_profile(&self, overrides: &ClusterOverrides) -> Result<ClientProfile, ConfigError> {
        // An empty per-cluster pin unpins that cluster
        let pinned = overrides
            .clusters_version
            .as_deref()
            .or(self.clusters_version.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let version = match pinned {
            Some(v) => v.parse()?,
            None => overrides
                .kafka_version
                .as_deref()
                .unwrap_or(&self.kafka_version)
                .trim()
                .parse()?,
        };

        let sasl = match (
            &self.kafka_sasl_mechanism,
            &self.kafka_sasl_username,
            &self.kafka_sasl_password,
        ) {
            (Some(mechanism), Some(username), Some(password)) => Some(SaslConfig {
                mechanism: mechanism.clone(),
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Ok(ClientProfile {
            client_id: self.kafka_client_id.clone(),
            version,
            version_pinned: pinned.is_some(),
            tls: self.kafka_tls,
            sasl,
            request_timeout: Duration::from_millis(self.kafka_request_timeout_ms),
        })
    }

    /// Parse and validate every cluster definition, applying its overrides.
    pub fn cluster_configs(&self) -> Result<Vec<ClusterConfig>, ConfigError> {
        let mut seen = HashSet::new();
        let mut clusters = Vec::new();

        for definition in self
            .kafka_clusters
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let (name, servers, overrides) = parse_cluster_definition(definition)?;
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateCluster(name));
            }

            let offset_refresh_secs = overrides
                .offset_refresh_secs
                .unwrap_or(self.offset_refresh_secs);
            if offset_refresh_secs == 0 {
                return Err(ConfigError::ZeroInterval("offset_refresh_secs"));
            }
            let topic_refresh_secs = overrides
                .topic_refresh_secs
                .unwrap_or(self.topic_refresh_secs);
            if topic_refresh_secs == 0 {
                return Err(ConfigError::ZeroInterval("topic_refresh_secs"));
            }
            let max_concurrent_broker_requests = overrides
                .max_concurrent_broker_requests
                .unwrap_or(self.max_concurrent_broker_requests);
            if max_concurrent_broker_requests == 0 {
                return Err(ConfigError::ZeroInterval("max_concurrent_broker_requests"));
            }

            clusters.push(ClusterConfig {
                profile: self.client_profile(&overrides)?,
                name,
                servers,
                offset_refresh: Duration::from_secs(offset_refresh_secs),
                topic_refresh: Duration::from_secs(topic_refresh_secs),
                groups_reaper_refresh: match overrides
                    .groups_reaper_refresh_secs
                    .unwrap_or(self.groups_reaper_refresh_secs)
                {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
                max_concurrent_broker_requests,
                storage_send_timeout: Duration::from_secs(self.storage_send_timeout_secs),
                storage_reply_timeout: Duration::from_secs(self.storage_reply_timeout_secs),
            });
        }

        Ok(clusters)
    }
}

/// Settings a single cluster definition may override. Unset fields fall back to `Config`.
#[derive(Debug, Default, PartialEq, Eq)]
struct ClusterOverrides {
    kafka_version: Option<String>,
    clusters_version: Option<String>,
    offset_refresh_secs: Option<u64>,
    topic_refresh_secs: Option<u64>,
    groups_reaper_refresh_secs: Option<u64>,
    max_concurrent_broker_requests: Option<usize>,
}

impl ClusterOverrides {
    /// Parse `key=value` pairs separated by `|`.
    fn parse(cluster: &str, options: &str) -> Result<Self, ConfigError> {
        let mut overrides = Self::default();

        for option in options.split('|').map(str::trim).filter(|o| !o.is_empty()) {
            let invalid = || ConfigError::InvalidClusterOption {
                cluster: cluster.to_string(),
                option: option.to_string(),
            };
            let (key, value) = option.split_once('=').ok_or_else(invalid)?;
            let value = value.trim();

            match key.trim() {
                "kafka_version" => overrides.kafka_version = Some(value.to_string()),
                "clusters_version" => overrides.clusters_version = Some(value.to_string()),
                "offset_refresh_secs" => {
                    overrides.offset_refresh_secs = Some(value.parse().map_err(|_| invalid())?)
                }
                "topic_refresh_secs" => {
                    overrides.topic_refresh_secs = Some(value.parse().map_err(|_| invalid())?)
                }
                "groups_reaper_refresh_secs" => {
                    overrides.groups_reaper_refresh_secs =
                        Some(value.parse().map_err(|_| invalid())?)
                }
                "max_concurrent_broker_requests" => {
                    overrides.max_concurrent_broker_requests =
                        Some(value.parse().map_err(|_| invalid())?)
                }
                _ => return Err(invalid()),
            }
        }

        Ok(overrides)
    }
}

fn parse_cluster_definition(
    definition: &str,
) -> Result<(String, Vec<String>, ClusterOverrides), ConfigError> {
    let (cluster, options) = definition.split_once('|').unwrap_or((definition, ""));
    let (name, servers) = cluster
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidClusterDefinition(definition.to_string()))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::InvalidClusterDefinition(definition.to_string()));
    }

    let servers: Vec<String> = servers
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    validate_host_list(name, &servers)?;
    let overrides = ClusterOverrides::parse(name, options)?;

    Ok((name.to_string(), servers, overrides))
}

/// Every entry must be host:port, with a non-empty host and a non-zero port.
pub fn validate_host_list(cluster: &str, servers: &[String]) -> Result<(), ConfigError> {
    if servers.is_empty() {
        return Err(ConfigError::NoServers(cluster.to_string()));
    }

    for server in servers {
        let valid = match server.rsplit_once(':') {
            Some((host, port)) => {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                !host.is_empty()
                    && !host.contains(char::is_whitespace)
                    && matches!(port.parse::<u16>(), Ok(p) if p > 0)
            }
            None => false,
        };
        if !valid {
            return Err(ConfigError::InvalidServer {
                cluster: cluster.to_string(),
                server: server.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::init_with_defaults().expect("default config should parse")
    }

    #[test]
    fn default_config_parses() {
        let config = config();
        assert_eq!(config.offset_refresh_secs, 10);
        assert_eq!(config.topic_refresh_secs, 60);
        assert_eq!(config.groups_reaper_refresh_secs, 0);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");

        let clusters = config.cluster_configs().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "local");
        assert_eq!(clusters[0].servers, vec!["localhost:9092"]);
        assert_eq!(clusters[0].groups_reaper_refresh, None);
        assert_eq!(clusters[0].profile.version, KafkaVersion::V2_0_0_0);
    }

    #[test]
    fn parses_multiple_clusters() {
        let mut config = config();
        config.kafka_clusters = "a=kafka-a:9092 ; b = kafka-b1:9092, kafka-b2:9093".to_string();
        config.groups_reaper_refresh_secs = 300;

        let clusters = config.cluster_configs().unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].name, "a");
        assert_eq!(clusters[1].name, "b");
        assert_eq!(clusters[1].servers, vec!["kafka-b1:9092", "kafka-b2:9093"]);
        assert_eq!(clusters[1].bootstrap_servers(), "kafka-b1:9092,kafka-b2:9093");
        assert_eq!(
            clusters[1].groups_reaper_refresh,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn rejects_bad_cluster_definitions() {
        let mut config = config();

        config.kafka_clusters = "nobrokers".to_string();
        assert!(matches!(
            config.cluster_configs(),
            Err(ConfigError::InvalidClusterDefinition(_))
        ));

        config.kafka_clusters = "empty=".to_string();
        assert_eq!(
            config.cluster_configs().unwrap_err(),
            ConfigError::NoServers("empty".to_string())
        );

        config.kafka_clusters = "a=localhost:9092;a=localhost:9093".to_string();
        assert_eq!(
            config.cluster_configs().unwrap_err(),
            ConfigError::DuplicateCluster("a".to_string())
        );

        config.kafka_clusters = "a=localhost".to_string();
        assert!(matches!(
            config.cluster_configs(),
            Err(ConfigError::InvalidServer { .. })
        ));
    }

    #[test]
    fn rejects_zero_refresh_intervals() {
        let mut config = config();
        config.offset_refresh_secs = 0;
        assert_eq!(
            config.cluster_configs().unwrap_err(),
            ConfigError::ZeroInterval("offset_refresh_secs")
        );
    }

    #[test]
    fn host_list_validation() {
        let ok = |s: &[&str]| {
            validate_host_list(
                "c",
                &s.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )
            .is_ok()
        };
        assert!(ok(&["localhost:9092"]));
        assert!(ok(&["10.0.0.1:9092", "kafka.internal:19092"]));
        assert!(ok(&["[::1]:9092"]));
        assert!(!ok(&[]));
        assert!(!ok(&["localhost"]));
        assert!(!ok(&[":9092"]));
        assert!(!ok(&["localhost:0"]));
        assert!(!ok(&["localhost:notaport"]));
        assert!(!ok(&["local host:9092"]));
    }

    #[test]
    fn pinned_version_overrides_profile_version() {
        let mut config = config();
        let defaults = ClusterOverrides::default();

        config.clusters_version = Some("0.10.2.1".to_string());
        let profile = config.client_profile(&defaults).unwrap();
        assert!(profile.version_pinned);
        assert_eq!(profile.version, KafkaVersion::new(0, 10, 2, 1));

        config.clusters_version = Some("  ".to_string());
        let profile = config.client_profile(&defaults).unwrap();
        assert!(!profile.version_pinned);
        assert_eq!(profile.version, KafkaVersion::V2_0_0_0);

        config.kafka_version = "banana".to_string();
        assert!(matches!(
            config.client_profile(&defaults),
            Err(ConfigError::InvalidVersion(_))
        ));
    }

    #[test]
    fn cluster_overrides_apply_to_that_cluster_only() {
        let mut config = config();
        let old = "old=kafka-0:9092 | clusters_version=0.10.2.1 | offset_refresh_secs=30 \
            | groups_reaper_refresh_secs=300 | max_concurrent_broker_requests=4";
        let new = "new=kafka-1:9092,kafka-2:9092|kafka_version=3.6.0";
        config.kafka_clusters = format!("{old};{new}");

        let clusters = config.cluster_configs().unwrap();
        let (old, new) = (&clusters[0], &clusters[1]);

        assert_eq!(old.servers, vec!["kafka-0:9092"]);
        assert!(old.profile.version_pinned);
        assert_eq!(old.profile.version, KafkaVersion::new(0, 10, 2, 1));
        assert_eq!(old.offset_refresh, Duration::from_secs(30));
        assert_eq!(old.topic_refresh, Duration::from_secs(60));
        assert_eq!(old.groups_reaper_refresh, Some(Duration::from_secs(300)));
        assert_eq!(old.max_concurrent_broker_requests, 4);

        assert_eq!(new.servers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert!(!new.profile.version_pinned);
        assert_eq!(new.profile.version, KafkaVersion::new(3, 6, 0, 0));
        assert_eq!(new.offset_refresh, Duration::from_secs(10));
        assert_eq!(new.groups_reaper_refresh, None);
        assert_eq!(new.max_concurrent_broker_requests, 32);
    }

    #[test]
    fn cluster_override_can_unpin_or_disable() {
        let mut config = config();
        config.clusters_version = Some("1.0.0".to_string());
        config.groups_reaper_refresh_secs = 120;
        config.kafka_clusters =
            "a=kafka-a:9092|clusters_version=|groups_reaper_refresh_secs=0;b=kafka-b:9092"
                .to_string();

        let clusters = config.cluster_configs().unwrap();
        assert!(!clusters[0].profile.version_pinned);
        assert_eq!(clusters[0].profile.version, KafkaVersion::V2_0_0_0);
        assert_eq!(clusters[0].groups_reaper_refresh, None);

        assert!(clusters[1].profile.version_pinned);
        assert_eq!(clusters[1].profile.version, KafkaVersion::new(1, 0, 0, 0));
        assert_eq!(
            clusters[1].groups_reaper_refresh,
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn rejects_bad_cluster_overrides() {
        let mut config = config();

        config.kafka_clusters = "a=kafka-a:9092|offset_refresh_secs=soon".to_string();
        assert_eq!(
            config.cluster_configs().unwrap_err(),
            ConfigError::InvalidClusterOption {
                cluster: "a".to_string(),
                option: "offset_refresh_secs=soon".to_string(),
            }
        );

        config.kafka_clusters = "a=kafka-a:9092|colour=blue".to_string();
        assert!(matches!(
            config.cluster_configs(),
            Err(ConfigError::InvalidClusterOption { .. })
        ));

        config.kafka_clusters = "a=kafka-a:9092|topic_refresh_secs=0".to_string();
        assert_eq!(
            config.cluster_configs().unwrap_err(),
            ConfigError::ZeroInterval("topic_refresh_secs")
        );

        config.kafka_clusters = "a=kafka-a:9092|kafka_version=banana".to_string();
        assert!(matches!(
            config.cluster_configs(),
            Err(ConfigError::InvalidVersion(_))
        ));
    }

    #[test]
    fn sasl_requires_all_fields() {
        let mut config = config();
        config.kafka_sasl_mechanism = Some("PLAIN".to_string());
        config.kafka_sasl_username = Some("user".to_string());
        assert_eq!(config.cluster_configs().unwrap()[0].profile.sasl, None);

        config.kafka_sasl_password = Some("secret".to_string());
        let sasl = config.cluster_configs().unwrap()[0].profile.sasl.clone().unwrap();
        assert_eq!(sasl.mechanism, "PLAIN");
        assert_eq!(sasl.username, "user");
    }
}
