//! Kafka protocol versions known to the monitor.
//!
//! Versions are totally ordered so the negotiator can walk them from newest to
//! oldest, and so capability checks (group listing, offset request flavour)
//! read as plain comparisons against named thresholds.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("invalid kafka version '{0}': expected 3 or 4 dot separated numbers")]
    Format(String),
    #[error("invalid kafka version '{0}': versions before 1.0 need the 0.x.y.z form")]
    LegacyFormat(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KafkaVersion([u16; 4]);

impl KafkaVersion {
    pub const V0_8_2_0: KafkaVersion = KafkaVersion::new(0, 8, 2, 0);
    pub const V0_10_0_0: KafkaVersion = KafkaVersion::new(0, 10, 0, 0);
    pub const V0_10_1_0: KafkaVersion = KafkaVersion::new(0, 10, 1, 0);
    pub const V0_11_0_0: KafkaVersion = KafkaVersion::new(0, 11, 0, 0);
    pub const V2_0_0_0: KafkaVersion = KafkaVersion::new(2, 0, 0, 0);
    pub const V2_1_0_0: KafkaVersion = KafkaVersion::new(2, 1, 0, 0);
    pub const V3_6_0_0: KafkaVersion = KafkaVersion::new(3, 6, 0, 0);

    pub const fn new(major: u16, minor: u16, patch: u16, build: u16) -> Self {
        KafkaVersion([major, minor, patch, build])
    }

    pub fn is_at_least(&self, other: KafkaVersion) -> bool {
        *self >= other
    }

    /// ListOffsets request version to use against brokers when the client speaks this version.
    ///
    /// - 4 adds the current leader epoch, used for fencing
    /// - 3 is the same as version 2
    /// - 2 adds the isolation level, used for transactional reads
    /// - 1 drops MaxNumOffsets, only a single offset is returned from here on
    pub fn offset_request_version(&self) -> i16 {
        if self.is_at_least(Self::V2_1_0_0) {
            4
        } else if self.is_at_least(Self::V2_0_0_0) {
            3
        } else if self.is_at_least(Self::V0_11_0_0) {
            2
        } else if self.is_at_least(Self::V0_10_1_0) {
            1
        } else {
            0
        }
    }

    /// ListGroups is only answered by every broker from 0.11.0 onwards.
    pub fn supports_group_listing(&self) -> bool {
        self.is_at_least(Self::V0_11_0_0)
    }

    /// Whether librdkafka may ask brokers for their ApiVersions.
    pub fn supports_api_version_request(&self) -> bool {
        self.is_at_least(Self::V0_10_0_0)
    }
}

impl fmt::Display for KafkaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch, build] = self.0;
        if major == 0 {
            write!(f, "0.{minor}.{patch}.{build}")
        } else {
            write!(f, "{major}.{minor}.{patch}")
        }
    }
}

impl FromStr for KafkaVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError::Format(s.to_string()))?;

        match parts.as_slice() {
            [0, _, _] => Err(VersionParseError::LegacyFormat(s.to_string())),
            [major, minor, patch] => Ok(KafkaVersion::new(*major, *minor, *patch, 0)),
            [major, minor, patch, build] => Ok(KafkaVersion::new(*major, *minor, *patch, *build)),
            _ => Err(VersionParseError::Format(s.to_string())),
        }
    }
}

/// Every version the negotiator may try, oldest first.
pub const SUPPORTED_VERSIONS: &[KafkaVersion] = &[
    KafkaVersion::V0_8_2_0,
    KafkaVersion::new(0, 8, 2, 1),
    KafkaVersion::new(0, 8, 2, 2),
    KafkaVersion::new(0, 9, 0, 0),
    KafkaVersion::new(0, 9, 0, 1),
    KafkaVersion::V0_10_0_0,
    KafkaVersion::new(0, 10, 0, 1),
    KafkaVersion::V0_10_1_0,
    KafkaVersion::new(0, 10, 1, 1),
    KafkaVersion::new(0, 10, 2, 0),
    KafkaVersion::new(0, 10, 2, 1),
    KafkaVersion::new(0, 10, 2, 2),
    KafkaVersion::V0_11_0_0,
    KafkaVersion::new(0, 11, 0, 1),
    KafkaVersion::new(0, 11, 0, 2),
    KafkaVersion::new(1, 0, 0, 0),
    KafkaVersion::new(1, 0, 1, 0),
    KafkaVersion::new(1, 0, 2, 0),
    KafkaVersion::new(1, 1, 0, 0),
    KafkaVersion::new(1, 1, 1, 0),
    KafkaVersion::V2_0_0_0,
    KafkaVersion::new(2, 0, 1, 0),
    KafkaVersion::V2_1_0_0,
    KafkaVersion::new(2, 2, 0, 0),
    KafkaVersion::new(2, 3, 0, 0),
    KafkaVersion::new(2, 4, 0, 0),
    KafkaVersion::new(2, 5, 0, 0),
    KafkaVersion::new(2, 6, 0, 0),
    KafkaVersion::new(2, 7, 0, 0),
    KafkaVersion::new(2, 8, 0, 0),
    KafkaVersion::new(3, 0, 0, 0),
    KafkaVersion::new(3, 1, 0, 0),
    KafkaVersion::new(3, 2, 0, 0),
    KafkaVersion::new(3, 3, 0, 0),
    KafkaVersion::new(3, 4, 0, 0),
    KafkaVersion::new(3, 5, 0, 0),
    KafkaVersion::V3_6_0_0,
];

/// Supported versions from newest to oldest, the order the negotiator walks them.
pub fn newest_first() -> impl Iterator<Item = KafkaVersion> {
    SUPPORTED_VERSIONS.iter().rev().copied()
}
