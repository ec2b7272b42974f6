//! Installation configuration, read from a JSON file.
//!
//! ```json
//! {
//!     "template": "single_zone_dhw",
//!     "features": { "diagnostic_monitoring": true },
//!     "zones": {
//!         "zone1": {
//!             "primary": { "min_outdoor": -8, "max_outdoor": 16, "min_flow": 30, "max_flow": 45 },
//!             "boost_duration": "90m",
//!             "apply_setpoint": true
//!         }
//!     },
//!     "poll": { "interval": "30s", "gap_tolerance": 2 },
//!     "write_protected": ["dhw_setpoint"]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::compensation::{HeatingCurve, ZoneAdjustment, ZoneCompensation, ZoneId};
use crate::features::{FeatureSet, Template};
use crate::planner::PlannerConfig;
use crate::registers::{Feature, RegisterIndex};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read the configuration file at {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("the configuration file at {1:?} is not valid")]
    Parse(#[source] serde_json::Error, PathBuf),
    #[error("{0} is configured, but the installation does not have a second zone")]
    ZoneNotInstalled(ZoneId),
    #[error("the poll interval must not be zero")]
    ZeroInterval,
    #[error("the planner gap tolerance must be at least 1")]
    ZeroGapTolerance,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub template: Template,
    /// Explicit feature toggles applied on top of the template defaults.
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    /// Zone settings. Zones that are installed but not listed use the defaults.
    #[serde(default)]
    pub zones: BTreeMap<ZoneId, ZoneConfig>,
    #[serde(default)]
    pub poll: PollConfig,
    /// Registers that must never be written, even if the device allows it.
    #[serde(default)]
    pub write_protected: BTreeSet<String>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZoneConfig {
    pub weather_compensation: bool,
    /// Flow temperature used when weather compensation is disabled.
    pub fixed_flow: f64,
    pub primary: HeatingCurve,
    pub boost: HeatingCurve,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub boost_duration: Duration,
    /// Write the computed target to the fixed flow register of the zone.
    pub apply_setpoint: bool,
    pub adjustment: ZoneAdjustment,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        let defaults = ZoneCompensation::default();
        Self {
            weather_compensation: defaults.weather_compensation,
            fixed_flow: defaults.fixed_flow,
            primary: HeatingCurve::DEFAULT_PRIMARY,
            boost: HeatingCurve::DEFAULT_BOOST,
            boost_duration: defaults.default_boost_duration,
            apply_setpoint: false,
            adjustment: ZoneAdjustment::NONE,
        }
    }
}

impl ZoneConfig {
    pub fn to_compensation(&self) -> ZoneCompensation {
        ZoneCompensation {
            weather_compensation: self.weather_compensation,
            fixed_flow: self.fixed_flow,
            primary: self.primary,
            boost: self.boost,
            default_boost_duration: self.boost_duration,
            adjustment: self.adjustment,
            boost_state: None,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
    /// Spans not read by this time after the start of a cycle are skipped for that cycle.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub deadline: Duration,
    #[serde(flatten)]
    pub planner: PlannerConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            deadline: Duration::from_secs(25),
            planner: PlannerConfig::default(),
        }
    }
}

impl Config {
    pub fn for_template(template: Template) -> Self {
        Self {
            template,
            features: BTreeMap::new(),
            zones: BTreeMap::new(),
            poll: PollConfig::default(),
            write_protected: BTreeSet::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read(path).map_err(|e| Error::Read(e, path.to_path_buf()))?;
        let config = serde_json::from_slice::<Self>(&contents)
            .map_err(|e| Error::Parse(e, path.to_path_buf()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.poll.interval.is_zero() {
            return Err(Error::ZeroInterval);
        }
        if self.poll.planner.gap_tolerance == 0 {
            return Err(Error::ZeroGapTolerance);
        }
        let features = self.feature_set();
        if self.zones.contains_key(&ZoneId::Zone2) && !features.contains(Feature::Zone2) {
            return Err(Error::ZoneNotInstalled(ZoneId::Zone2));
        }
        for id in &self.write_protected {
            if RegisterIndex::from_id(id).is_none() {
                warn!(message = "write protecting an unknown register", register.id = id.as_str());
            }
        }
        Ok(())
    }

    pub fn feature_set(&self) -> FeatureSet {
        FeatureSet::from_template(self.template, &self.features)
    }

    /// Compensation settings for every installed zone.
    pub fn zone_compensation(&self, features: &FeatureSet) -> Vec<(ZoneId, ZoneCompensation)> {
        let mut zones = vec![ZoneId::Zone1];
        if features.contains(Feature::Zone2) {
            zones.push(ZoneId::Zone2);
        }
        zones
            .into_iter()
            .map(|zone| {
                let config = self.zones.get(&zone).cloned().unwrap_or_default();
                (zone, config.to_compensation())
            })
            .collect()
    }

    /// Zones whose computed target should be written to the device.
    pub fn applied_zones(&self) -> BTreeSet<ZoneId> {
        self.zones.iter().filter(|(_, z)| z.apply_setpoint).map(|(id, _)| *id).collect()
    }
}

pub fn deserialize_duration<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    let text = <std::borrow::Cow<'de, str> as serde::Deserialize>::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*duration))
}

pub fn serialize_optional_duration<S: serde::Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        Some(d) => serialize_duration(d, serializer),
        None => serializer.serialize_none(),
    }
}
