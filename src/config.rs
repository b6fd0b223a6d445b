// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Static configuration: sensor table, completion policy and echo filter.
//!
//! Everything here is loaded before the pipeline starts. The processing
//! thread only ever reads it.
//!
//! A configuration file is JSON, every field optional:
//!
//! ```json
//! {
//!   "sensors": [
//!     { "ipaddr": 10, "name": "lidar_front", "topic": "points_front",
//!       "offset": [0.0, 0.0, 1.2] }
//!   ],
//!   "decoder": {
//!     "echo_filter": "flagged",
//!     "completion": { "packet_ceiling": 2000 }
//!   }
//! }
//! ```

use crate::lidar::{Error, SensorId};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::Path, str::FromStr};

/// Static parameters of one sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Position of the sensor in the configuration table
    pub index: u32,
    /// Low byte of the sensor's IPv4 address
    pub ipaddr: u8,
    /// Human-readable name, used in file names and logs
    pub name: String,
    /// Output topic name
    pub topic: String,
    /// Translation added to every point, in meters
    pub offset: [f32; 3],
}

impl SensorConfig {
    /// Configuration synthesized for a sensor absent from the table.
    pub fn synthesized(id: SensorId) -> Self {
        Self {
            ipaddr: id.0,
            name: format!("lidar_{}", id.0),
            ..Default::default()
        }
    }

    pub fn id(&self) -> SensorId {
        SensorId(self.ipaddr)
    }

    /// True when the offset is a no-op.
    pub fn has_offset(&self) -> bool {
        self.offset != [0.0; 3]
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            index: 0,
            ipaddr: 0,
            name: "default".to_string(),
            topic: "points".to_string(),
            offset: [0.0; 3],
        }
    }
}

impl fmt::Display for SensorConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} (index {}, ip .{}, topic {}, offset [{}, {}, {}])",
            self.name,
            self.index,
            self.ipaddr,
            self.topic,
            self.offset[0],
            self.offset[1],
            self.offset[2]
        )
    }
}

/// Lookup table of known sensors keyed by [`SensorId`].
#[derive(Clone, Debug, Default)]
pub struct SensorRegistry {
    sensors: HashMap<SensorId, SensorConfig>,
}

impl SensorRegistry {
    pub fn new(sensors: impl IntoIterator<Item = SensorConfig>) -> Self {
        Self {
            sensors: sensors.into_iter().map(|s| (s.id(), s)).collect(),
        }
    }

    /// The table shipped with the front-sensor installation.
    pub fn builtin() -> Self {
        Self::new([SensorConfig {
            index: 0,
            ipaddr: 10,
            name: "lidar_front".to_string(),
            topic: "points_front".to_string(),
            offset: [0.0; 3],
        }])
    }

    pub fn get(&self, id: SensorId) -> Option<&SensorConfig> {
        self.sensors.get(&id)
    }

    /// Configured entry for `id`, or a synthesized default.
    pub fn lookup(&self, id: SensorId) -> SensorConfig {
        self.get(id)
            .cloned()
            .unwrap_or_else(|| SensorConfig::synthesized(id))
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

/// Which echoes of a pixel are kept.
///
/// Rejected echoes have their cell zeroed, which makes them
/// indistinguishable from cells that never received data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoFilter {
    /// Keep every echo
    #[default]
    All,
    /// Keep echoes whose echo-choice label bit is set
    Flagged,
    /// Keep only echo `n` (1-based, 1..=3)
    Only(u8),
}

impl EchoFilter {
    /// Whether `echo` (0-based) passes the filter.
    #[inline]
    pub fn accepts(&self, echo: usize, chosen: bool) -> bool {
        match *self {
            EchoFilter::All => true,
            EchoFilter::Flagged => chosen,
            EchoFilter::Only(n) => echo + 1 == n as usize,
        }
    }
}

impl FromStr for EchoFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(EchoFilter::All),
            "flagged" => Ok(EchoFilter::Flagged),
            "1" | "2" | "3" => Ok(EchoFilter::Only(s.as_bytes()[0] - b'0')),
            _ => Err(format!(
                "invalid echo filter '{}', expected all, flagged, 1, 2 or 3",
                s
            )),
        }
    }
}

impl fmt::Display for EchoFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EchoFilter::All => write!(f, "all"),
            EchoFilter::Flagged => write!(f, "flagged"),
            EchoFilter::Only(n) => write!(f, "{}", n),
        }
    }
}

/// Thresholds deciding when a frame is complete.
///
/// These are empirically tuned for the 32 sub-frame × 52 column fragment
/// layout. None of them is protocol law.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionPolicy {
    /// Fragment slots in a complete frame (32 sub-frames × 52 columns)
    pub expected_fragments: usize,
    /// Coverage heuristic only applies above this many packets
    pub coverage_min_packets: u32,
    /// Coverage fraction that completes a frame
    pub coverage_ratio: f32,
    /// Packet count above which the frame completes regardless of coverage
    pub packet_ceiling: u32,
    /// Distinct fragments that count as near-total coverage (32 × 50)
    pub near_total_fragments: usize,
    /// Frames with at least this many packets are always emitted
    pub min_packets: u32,
    /// Frames above this many packets are emitted if the cloud is non-empty
    pub fallback_min_packets: u32,
    /// Forced flushes need at least this many packets
    pub flush_min_packets: u32,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            expected_fragments: 32 * 52,
            coverage_min_packets: 1000,
            coverage_ratio: 0.9,
            packet_ceiling: 1800,
            near_total_fragments: 32 * 50,
            min_packets: 800,
            fallback_min_packets: 100,
            flush_min_packets: 1,
        }
    }
}

impl CompletionPolicy {
    /// Check internal consistency.
    ///
    /// `1 <= fallback_min_packets < min_packets` holds, so the packet that
    /// opens a new frame can never complete it on its own.
    pub fn validate(&self) -> Result<(), Error> {
        if self.expected_fragments == 0 {
            return Err(Error::Config(
                "expected_fragments must be non-zero".to_string(),
            ));
        }
        if !(self.coverage_ratio > 0.0 && self.coverage_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "coverage_ratio {} outside (0, 1]",
                self.coverage_ratio
            )));
        }
        if self.fallback_min_packets == 0 {
            return Err(Error::Config(
                "fallback_min_packets must be at least 1".to_string(),
            ));
        }
        if self.fallback_min_packets >= self.min_packets {
            return Err(Error::Config(format!(
                "fallback_min_packets {} must be below min_packets {}",
                self.fallback_min_packets, self.min_packets
            )));
        }
        if self.flush_min_packets == 0 {
            return Err(Error::Config(
                "flush_min_packets must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-decoder settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub echo_filter: EchoFilter,
    pub completion: CompletionPolicy,
    /// Drop packets of the frame that just completed instead of opening a
    /// new frame for them.
    pub drop_stragglers: bool,
    /// Also drop late packets of a frame that was force-flushed, even while
    /// a newer frame is accumulating. Off by default: a late packet then
    /// flushes the newer frame and reopens the old one.
    pub drop_flushed_stragglers: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            echo_filter: EchoFilter::default(),
            completion: CompletionPolicy::default(),
            drop_stragglers: true,
            drop_flushed_stragglers: false,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if let EchoFilter::Only(n) = self.echo_filter {
            if !(1..=3).contains(&n) {
                return Err(Error::Config(format!("echo filter index {} not in 1..=3", n)));
            }
        }
        self.completion.validate()
    }
}

/// Contents of a JSON configuration file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub sensors: Vec<SensorConfig>,
    pub decoder: DecoderConfig,
}

impl FileConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        let config: FileConfig = serde_json::from_str(text)?;
        config.decoder.validate()?;
        Ok(config)
    }

    /// Registry from the file, falling back to the built-in table when the
    /// file lists no sensors.
    pub fn registry(&self) -> SensorRegistry {
        if self.sensors.is_empty() {
            SensorRegistry::builtin()
        } else {
            SensorRegistry::new(self.sensors.iter().cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_values() {
        let policy = CompletionPolicy::default();
        assert_eq!(policy.expected_fragments, 1664);
        assert_eq!(policy.near_total_fragments, 1600);
        assert_eq!(policy.packet_ceiling, 1800);
        assert_eq!(policy.min_packets, 800);
        assert_eq!(policy.fallback_min_packets, 100);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_validation() {
        let policy = CompletionPolicy {
            fallback_min_packets: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = CompletionPolicy {
            fallback_min_packets: 900,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = CompletionPolicy {
            coverage_ratio: 1.5,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SensorRegistry::builtin();
        let front = registry.lookup(SensorId(10));
        assert_eq!(front.name, "lidar_front");
        assert_eq!(front.topic, "points_front");

        let unknown = registry.lookup(SensorId(42));
        assert_eq!(unknown.name, "lidar_42");
        assert_eq!(unknown.ipaddr, 42);
        assert_eq!(unknown.offset, [0.0; 3]);
        assert!(!unknown.has_offset());
    }

    #[test]
    fn test_echo_filter_accepts() {
        assert!(EchoFilter::All.accepts(2, false));
        assert!(EchoFilter::Flagged.accepts(0, true));
        assert!(!EchoFilter::Flagged.accepts(0, false));
        assert!(EchoFilter::Only(2).accepts(1, false));
        assert!(!EchoFilter::Only(2).accepts(0, true));
    }

    #[test]
    fn test_echo_filter_parse() {
        assert_eq!("all".parse::<EchoFilter>(), Ok(EchoFilter::All));
        assert_eq!("flagged".parse::<EchoFilter>(), Ok(EchoFilter::Flagged));
        assert_eq!("3".parse::<EchoFilter>(), Ok(EchoFilter::Only(3)));
        assert!("4".parse::<EchoFilter>().is_err());
        assert_eq!(EchoFilter::Only(2).to_string(), "2");
    }

    #[test]
    fn test_file_config_json() {
        let config = FileConfig::from_json(
            r#"{
                "sensors": [
                    { "ipaddr": 11, "name": "lidar_rear", "offset": [0.5, 0.0, -1.0] }
                ],
                "decoder": {
                    "echo_filter": "flagged",
                    "completion": { "packet_ceiling": 2000 }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.decoder.echo_filter, EchoFilter::Flagged);
        assert_eq!(config.decoder.completion.packet_ceiling, 2000);
        assert_eq!(config.decoder.completion.min_packets, 800);
        assert!(config.decoder.drop_stragglers);
        assert!(!config.decoder.drop_flushed_stragglers);

        let registry = config.registry();
        let rear = registry.lookup(SensorId(11));
        assert_eq!(rear.name, "lidar_rear");
        assert_eq!(rear.topic, "points");
        assert_eq!(rear.offset, [0.5, 0.0, -1.0]);
        assert!(registry.get(SensorId(10)).is_none());
    }

    #[test]
    fn test_file_config_only_filter() {
        let config = FileConfig::from_json(r#"{ "decoder": { "echo_filter": { "only": 2 } } }"#)
            .unwrap();
        assert_eq!(config.decoder.echo_filter, EchoFilter::Only(2));

        let err = FileConfig::from_json(r#"{ "decoder": { "echo_filter": { "only": 7 } } }"#);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_file_config_uses_builtin() {
        let config = FileConfig::from_json("{}").unwrap();
        assert_eq!(config.registry().len(), 1);
        assert_eq!(config.decoder, DecoderConfig::default());
    }
}
