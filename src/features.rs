//! Mapping from an installation description to the registers worth polling.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::registers::{Category, Feature, RegisterIndex};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("`{0}` is not a known installation template")]
    UnknownTemplate(String),
}

/// Typical installations along with the equipment they usually come with.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Template {
    /// One heating zone, no hot water cylinder.
    SingleZoneBasic,
    /// One heating zone with a hot water cylinder.
    SingleZoneDhw,
    /// Two independently compensated heating zones.
    DualZoneSystem,
    /// Boiler replacement keeping the existing radiators.
    ReplacementSystem,
}

impl Template {
    pub fn parse(id: &str) -> Result<Self, Error> {
        id.parse().map_err(|_| Error::UnknownTemplate(id.to_string()))
    }

    pub fn default_features(self) -> &'static [Feature] {
        match self {
            Template::SingleZoneBasic => &[],
            Template::SingleZoneDhw => &[Feature::DhwCylinder, Feature::BackupHeater],
            Template::DualZoneSystem => &[
                Feature::Zone2,
                Feature::DhwCylinder,
                Feature::BackupHeater,
                Feature::AdvancedFeatures,
            ],
            Template::ReplacementSystem => &[Feature::DhwCylinder],
        }
    }
}

/// Enabled feature tags of an installation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet(BTreeSet<Feature>);

impl FeatureSet {
    pub fn from_features(features: impl IntoIterator<Item = Feature>) -> Self {
        Self(features.into_iter().collect())
    }

    /// Start with the template defaults and apply the explicit overrides on top.
    ///
    /// Overrides that do not name a known feature are reported and otherwise ignored.
    pub fn from_template(template: Template, overrides: &BTreeMap<String, bool>) -> Self {
        let mut features = template.default_features().iter().copied().collect::<BTreeSet<_>>();
        for (name, &enabled) in overrides {
            let Ok(feature) = name.parse::<Feature>() else {
                warn!(message = "ignoring unknown feature override", feature = name.as_str());
                continue;
            };
            if enabled {
                features.insert(feature);
            } else {
                features.remove(&feature);
            }
        }
        Self(features)
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.iter().copied()
    }
}

/// Catalogue entries enabled for a particular [`FeatureSet`], in catalogue order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveRegisterSet(Vec<RegisterIndex>);

impl ActiveRegisterSet {
    pub fn contains(&self, register: RegisterIndex) -> bool {
        self.0.binary_search(&register).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = RegisterIndex> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn is_active(register: RegisterIndex, features: &FeatureSet) -> bool {
    if register.category() == Category::Basic {
        return true;
    }
    register.required_feature().is_none_or(|f| features.contains(f))
}

pub fn active_registers(features: &FeatureSet) -> ActiveRegisterSet {
    ActiveRegisterSet(RegisterIndex::all().filter(|r| is_active(*r, features)).collect())
}
