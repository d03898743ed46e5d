use rdkafka::ClientConfig;

use crate::config::ClientProfile;
use crate::version::KafkaVersion;

/// rdkafka configuration builder for the metadata/offset client of one cluster.
///
/// The client never joins a consumer group: it only fetches metadata, lists groups and
/// queries offsets, so no group coordination settings are applied.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new(bootstrap_servers: &str, client_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", client_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");

        Self { config }
    }

    /// Everything a client profile describes, at the given protocol version.
    pub fn from_profile(
        bootstrap_servers: &str,
        profile: &ClientProfile,
        version: KafkaVersion,
    ) -> Self {
        let timeout_ms = profile.request_timeout.as_millis().to_string();

        let mut builder = Self::new(bootstrap_servers, &profile.client_id)
            .with_version(version)
            .with_tls(profile.tls)
            .set("socket.timeout.ms", &timeout_ms)
            .set("metadata.request.timeout.ms", &timeout_ms);

        if let Some(sasl) = &profile.sasl {
            builder =
                builder.with_sasl(&sasl.mechanism, &sasl.username, &sasl.password, profile.tls);
        }

        builder
    }

    /// Pin the protocol version librdkafka assumes for brokers.
    ///
    /// Brokers older than 0.10.0 cannot answer ApiVersions, so the request is disabled and the
    /// fallback version is used as-is.
    pub fn with_version(mut self, version: KafkaVersion) -> Self {
        self.config
            .set("broker.version.fallback", version.to_string())
            .set(
                "api.version.request",
                version.supports_api_version_request().to_string(),
            );
        self
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    pub fn with_sasl(mut self, mechanism: &str, username: &str, password: &str, tls: bool) -> Self {
        let protocol = if tls { "sasl_ssl" } else { "sasl_plaintext" };
        self.config
            .set("security.protocol", protocol)
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);
        self
    }

    /// Add any custom configuration
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SaslConfig;

    fn profile() -> ClientProfile {
        ClientProfile {
            client_id: "monitor".to_string(),
            version: KafkaVersion::V2_0_0_0,
            version_pinned: false,
            tls: false,
            sasl: None,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn sets_version_fallback() {
        let config = ClientConfigBuilder::new("localhost:9092", "monitor")
            .with_version(KafkaVersion::V2_1_0_0)
            .build();
        assert_eq!(config.get("broker.version.fallback"), Some("2.1.0"));
        assert_eq!(config.get("api.version.request"), Some("true"));

        let legacy = ClientConfigBuilder::new("localhost:9092", "monitor")
            .with_version(KafkaVersion::V0_8_2_0)
            .build();
        assert_eq!(legacy.get("broker.version.fallback"), Some("0.8.2.0"));
        assert_eq!(legacy.get("api.version.request"), Some("false"));
    }

    #[test]
    fn builds_from_profile() {
        let config =
            ClientConfigBuilder::from_profile("a:9092,b:9092", &profile(), KafkaVersion::V0_11_0_0)
                .build();
        assert_eq!(config.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(config.get("client.id"), Some("monitor"));
        assert_eq!(config.get("socket.timeout.ms"), Some("5000"));
        assert_eq!(config.get("broker.version.fallback"), Some("0.11.0.0"));
        assert_eq!(config.get("security.protocol"), None);
    }

    #[test]
    fn sasl_over_tls() {
        let mut profile = profile();
        profile.tls = true;
        profile.sasl = Some(SaslConfig {
            mechanism: "SCRAM-SHA-512".to_string(),
            username: "monitor".to_string(),
            password: "secret".to_string(),
        });

        let config =
            ClientConfigBuilder::from_profile("a:9092", &profile, KafkaVersion::V2_0_0_0).build();
        assert_eq!(config.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(config.get("sasl.username"), Some("monitor"));
    }
}
