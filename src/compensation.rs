//! Weather compensation: flow temperature targets derived from the outdoor temperature.
//!
//! Each zone has a primary heating curve and a boost curve. The boost curve is used while a boost
//! is active, which ends either explicitly or once its duration elapses. Zones with compensation
//! disabled report their fixed flow temperature instead.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CurveError {
    #[error("curve parameters must be finite numbers")]
    NotFinite,
    #[error("minimum outdoor temperature ({0}°C) must be lower than the maximum ({1}°C)")]
    OutdoorRange(f64, f64),
    #[error("minimum flow temperature ({0}°C) must not exceed the maximum ({1}°C)")]
    FlowRange(f64, f64),
    #[error("compensation factor {0} must be greater than zero")]
    Factor(f64),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("{0} is not configured")]
    UnknownZone(ZoneId),
    #[error("{0} runs at a fixed flow temperature, it cannot be boosted")]
    FixedFlowBoost(ZoneId),
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ZoneId {
    Zone1,
    Zone2,
}

impl ZoneId {
    /// Holding register the flow temperature of a zone is configured with.
    pub fn fixed_flow_register(self) -> &'static str {
        match self {
            ZoneId::Zone1 => "zone1_fixed_flow",
            ZoneId::Zone2 => "zone2_fixed_flow",
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CurveSelection {
    Primary,
    Boost,
}

/// The unvalidated parameters of a [`HeatingCurve`].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CurveParameters {
    pub min_outdoor: f64,
    pub max_outdoor: f64,
    pub min_flow: f64,
    pub max_flow: f64,
}

/// A linear heating curve.
///
/// At or below `min_outdoor` the curve produces `max_flow`, at or above `max_outdoor` it produces
/// `min_flow`, and it interpolates linearly in between.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "CurveParameters", into = "CurveParameters")]
pub struct HeatingCurve(CurveParameters);

impl HeatingCurve {
    pub const DEFAULT_PRIMARY: Self = Self(CurveParameters {
        min_outdoor: -5.0,
        max_outdoor: 18.0,
        min_flow: 25.0,
        max_flow: 45.0,
    });
    pub const DEFAULT_BOOST: Self = Self(CurveParameters {
        min_outdoor: -10.0,
        max_outdoor: 15.0,
        min_flow: 35.0,
        max_flow: 55.0,
    });

    pub fn new(
        min_outdoor: f64,
        max_outdoor: f64,
        min_flow: f64,
        max_flow: f64,
    ) -> Result<Self, CurveError> {
        Self::try_from(CurveParameters { min_outdoor, max_outdoor, min_flow, max_flow })
    }

    pub fn parameters(&self) -> CurveParameters {
        self.0
    }

    /// Target flow temperature for the outdoor temperature, unrounded.
    pub fn target_flow(&self, outdoor: f64) -> f64 {
        let CurveParameters { min_outdoor, max_outdoor, min_flow, max_flow } = self.0;
        if outdoor <= min_outdoor {
            max_flow
        } else if outdoor >= max_outdoor {
            min_flow
        } else {
            let ratio = (outdoor - min_outdoor) / (max_outdoor - min_outdoor);
            (max_flow - ratio * (max_flow - min_flow)).clamp(min_flow, max_flow)
        }
    }

    /// `n` evenly spaced points across the outdoor range of the curve.
    pub fn points(&self, n: usize) -> Vec<(f64, FlowTemperature)> {
        let CurveParameters { min_outdoor, max_outdoor, .. } = self.0;
        let step = match n {
            0 => return Vec::new(),
            1 => 0.0,
            n => (max_outdoor - min_outdoor) / (n - 1) as f64,
        };
        (0..n)
            .map(|i| {
                let outdoor =
                    if n > 1 && i + 1 == n { max_outdoor } else { min_outdoor + step * i as f64 };
                (outdoor, FlowTemperature::rounded(self.target_flow(outdoor)))
            })
            .collect()
    }

    /// Parameters outside of what installers typically use.
    ///
    /// These are accepted, but are worth pointing out.
    pub fn advisories(&self) -> Vec<String> {
        let CurveParameters { min_outdoor, max_outdoor, min_flow, max_flow } = self.0;
        let checks = [
            ("minimum outdoor", min_outdoor, -30.0, 20.0),
            ("maximum outdoor", max_outdoor, 15.0, 30.0),
            ("minimum flow", min_flow, 20.0, 40.0),
            ("maximum flow", max_flow, 35.0, 70.0),
        ];
        checks
            .into_iter()
            .filter(|&(_, value, low, high)| !(low..=high).contains(&value))
            .map(|(what, value, low, high)| {
                format!("{what} temperature {value}°C is outside of the usual {low}..={high}°C")
            })
            .collect()
    }
}

impl TryFrom<CurveParameters> for HeatingCurve {
    type Error = CurveError;
    fn try_from(p: CurveParameters) -> Result<Self, Self::Error> {
        if ![p.min_outdoor, p.max_outdoor, p.min_flow, p.max_flow].iter().all(|v| v.is_finite()) {
            return Err(CurveError::NotFinite);
        }
        if p.min_outdoor >= p.max_outdoor {
            return Err(CurveError::OutdoorRange(p.min_outdoor, p.max_outdoor));
        }
        if p.min_flow > p.max_flow {
            return Err(CurveError::FlowRange(p.min_flow, p.max_flow));
        }
        Ok(Self(p))
    }
}

impl From<HeatingCurve> for CurveParameters {
    fn from(curve: HeatingCurve) -> Self {
        curve.0
    }
}

/// The unvalidated parameters of a [`ZoneAdjustment`].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdjustmentParameters {
    pub compensation_factor: f64,
    pub temperature_offset: f64,
    pub min_flow: Option<f64>,
    pub max_flow: Option<f64>,
}

impl Default for AdjustmentParameters {
    fn default() -> Self {
        ZoneAdjustment::NONE.0
    }
}

/// Scaling, offset and limits applied to the curve output of a single zone.
///
/// Lets a zone with a different emitter type (e.g. radiators next to underfloor heating) follow
/// the same curve at its own temperature level.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "AdjustmentParameters", into = "AdjustmentParameters")]
pub struct ZoneAdjustment(AdjustmentParameters);

impl ZoneAdjustment {
    pub const NONE: Self = Self(AdjustmentParameters {
        compensation_factor: 1.0,
        temperature_offset: 0.0,
        min_flow: None,
        max_flow: None,
    });

    pub fn parameters(&self) -> AdjustmentParameters {
        self.0
    }

    pub fn apply(&self, flow: f64) -> f64 {
        let AdjustmentParameters { compensation_factor, temperature_offset, min_flow, max_flow } =
            self.0;
        let adjusted = flow * compensation_factor + temperature_offset;
        let adjusted = min_flow.map_or(adjusted, |min| adjusted.max(min));
        max_flow.map_or(adjusted, |max| adjusted.min(max))
    }
}

impl Default for ZoneAdjustment {
    fn default() -> Self {
        Self::NONE
    }
}

impl TryFrom<AdjustmentParameters> for ZoneAdjustment {
    type Error = CurveError;
    fn try_from(p: AdjustmentParameters) -> Result<Self, Self::Error> {
        let limits = [p.min_flow, p.max_flow].into_iter().flatten();
        if ![p.compensation_factor, p.temperature_offset].into_iter().chain(limits).all(f64::is_finite)
        {
            return Err(CurveError::NotFinite);
        }
        if p.compensation_factor <= 0.0 {
            return Err(CurveError::Factor(p.compensation_factor));
        }
        if let (Some(min), Some(max)) = (p.min_flow, p.max_flow) {
            if min > max {
                return Err(CurveError::FlowRange(min, max));
            }
        }
        Ok(Self(p))
    }
}

impl From<ZoneAdjustment> for AdjustmentParameters {
    fn from(adjustment: ZoneAdjustment) -> Self {
        adjustment.0
    }
}

/// A flow temperature rounded to one decimal place.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, serde::Serialize)]
#[serde(transparent)]
pub struct FlowTemperature(f64);

impl FlowTemperature {
    pub fn rounded(celsius: f64) -> Self {
        Self((celsius * 10.0).round() / 10.0)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for FlowTemperature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:.1}", self.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoostState {
    pub activated_at: Instant,
    pub duration: Duration,
}

impl BoostState {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.activated_at) >= self.duration
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.duration.saturating_sub(now.saturating_duration_since(self.activated_at))
    }
}

/// Where the target flow temperature of a zone came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    Curve(CurveSelection),
    Fixed,
}

impl std::fmt::Display for TargetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSource::Curve(c) => f.write_fmt(format_args!("{c} curve")),
            TargetSource::Fixed => f.write_str("fixed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ZoneTarget {
    pub zone: ZoneId,
    pub source: TargetSource,
    /// `None` when the zone is compensated but no outdoor temperature is available.
    pub target_flow: Option<FlowTemperature>,
    #[serde(serialize_with = "crate::config::serialize_optional_duration")]
    pub boost_remaining: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct ZoneCompensation {
    pub weather_compensation: bool,
    pub fixed_flow: f64,
    pub primary: HeatingCurve,
    pub boost: HeatingCurve,
    pub default_boost_duration: Duration,
    /// Applied to the output of either curve, not to the fixed flow temperature.
    pub adjustment: ZoneAdjustment,
    pub boost_state: Option<BoostState>,
}

impl Default for ZoneCompensation {
    fn default() -> Self {
        Self {
            weather_compensation: true,
            fixed_flow: 45.0,
            primary: HeatingCurve::DEFAULT_PRIMARY,
            boost: HeatingCurve::DEFAULT_BOOST,
            default_boost_duration: Duration::from_secs(120 * 60),
            adjustment: ZoneAdjustment::NONE,
            boost_state: None,
        }
    }
}

impl ZoneCompensation {
    pub fn active_curve(&self) -> CurveSelection {
        if self.boost_state.is_some() { CurveSelection::Boost } else { CurveSelection::Primary }
    }

    pub fn curve(&self, which: CurveSelection) -> &HeatingCurve {
        match which {
            CurveSelection::Primary => &self.primary,
            CurveSelection::Boost => &self.boost,
        }
    }

    pub fn evaluate(&self, zone: ZoneId, outdoor: Option<f64>, now: Instant) -> ZoneTarget {
        if !self.weather_compensation {
            return ZoneTarget {
                zone,
                source: TargetSource::Fixed,
                target_flow: Some(FlowTemperature::rounded(self.fixed_flow)),
                boost_remaining: None,
            };
        }
        let which = self.active_curve();
        ZoneTarget {
            zone,
            source: TargetSource::Curve(which),
            target_flow: outdoor.map(|t| {
                FlowTemperature::rounded(self.adjustment.apply(self.curve(which).target_flow(t)))
            }),
            boost_remaining: self.boost_state.map(|b| b.remaining(now)),
        }
    }
}

/// Compensation state of every configured zone.
#[derive(Clone, Debug, Default)]
pub struct CompensationEngine {
    zones: BTreeMap<ZoneId, ZoneCompensation>,
}

impl CompensationEngine {
    pub fn new(zones: impl IntoIterator<Item = (ZoneId, ZoneCompensation)>) -> Self {
        let zones = zones.into_iter().collect::<BTreeMap<_, _>>();
        for (zone, compensation) in &zones {
            for which in [CurveSelection::Primary, CurveSelection::Boost] {
                for advisory in compensation.curve(which).advisories() {
                    warn!(message = "unusual heating curve", %zone, curve = %which, %advisory);
                }
            }
        }
        Self { zones }
    }

    pub fn zone(&self, zone: ZoneId) -> Option<&ZoneCompensation> {
        self.zones.get(&zone)
    }

    pub fn zones(&self) -> impl Iterator<Item = (ZoneId, &ZoneCompensation)> {
        self.zones.iter().map(|(z, c)| (*z, c))
    }

    fn zone_mut(&mut self, zone: ZoneId) -> Result<&mut ZoneCompensation, Error> {
        self.zones.get_mut(&zone).ok_or(Error::UnknownZone(zone))
    }

    pub fn set_curve(
        &mut self,
        zone: ZoneId,
        which: CurveSelection,
        curve: HeatingCurve,
    ) -> Result<(), Error> {
        let compensation = self.zone_mut(zone)?;
        for advisory in curve.advisories() {
            warn!(message = "unusual heating curve", %zone, curve = %which, %advisory);
        }
        match which {
            CurveSelection::Primary => compensation.primary = curve,
            CurveSelection::Boost => compensation.boost = curve,
        }
        info!(message = "heating curve updated", %zone, curve = %which, parameters = ?curve.0);
        Ok(())
    }

    /// Switch the zone to its boost curve for `duration`, or the configured default duration.
    ///
    /// Activating an already boosted zone restarts the boost.
    pub fn activate_boost(
        &mut self,
        zone: ZoneId,
        duration: Option<Duration>,
        now: Instant,
    ) -> Result<(), Error> {
        let compensation = self.zone_mut(zone)?;
        if !compensation.weather_compensation {
            return Err(Error::FixedFlowBoost(zone));
        }
        let duration = duration.unwrap_or(compensation.default_boost_duration);
        compensation.boost_state = Some(BoostState { activated_at: now, duration });
        info!(
            message = "boost activated",
            %zone,
            duration = %humantime::format_duration(duration)
        );
        Ok(())
    }

    /// Returns whether the zone was boosted.
    pub fn deactivate_boost(&mut self, zone: ZoneId) -> Result<bool, Error> {
        let was_active = self.zone_mut(zone)?.boost_state.take().is_some();
        if was_active {
            info!(message = "boost deactivated", %zone);
        }
        Ok(was_active)
    }

    /// End the boosts that have run for their full duration.
    pub fn expire_boosts(&mut self, now: Instant) -> Vec<ZoneId> {
        let mut expired = Vec::new();
        for (zone, compensation) in &mut self.zones {
            if compensation.boost_state.is_some_and(|b| b.is_expired(now)) {
                compensation.boost_state = None;
                info!(message = "boost expired", %zone);
                expired.push(*zone);
            }
        }
        expired
    }

    pub fn evaluate(&self, outdoor: Option<f64>, now: Instant) -> Vec<ZoneTarget> {
        self.zones.iter().map(|(zone, c)| c.evaluate(*zone, outdoor, now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn curve() -> HeatingCurve {
        HeatingCurve::new(-8.0, 16.0, 30.0, 45.0).unwrap()
    }

    #[test]
    fn reference_points() {
        let curve = curve();
        assert_eq!(FlowTemperature::rounded(curve.target_flow(10.0)).celsius(), 33.8);
        assert_eq!(FlowTemperature::rounded(curve.target_flow(-8.0)).celsius(), 45.0);
        assert_eq!(curve.target_flow(-20.0), 45.0);
        assert_eq!(curve.target_flow(16.0), 30.0);
        assert_eq!(curve.target_flow(25.0), 30.0);
    }

    #[test]
    fn rejects_invalid_curves() {
        assert_eq!(HeatingCurve::new(5.0, 5.0, 30.0, 45.0), Err(CurveError::OutdoorRange(5.0, 5.0)));
        assert_eq!(HeatingCurve::new(10.0, 5.0, 30.0, 45.0), Err(CurveError::OutdoorRange(10.0, 5.0)));
        assert_eq!(HeatingCurve::new(-5.0, 15.0, 50.0, 45.0), Err(CurveError::FlowRange(50.0, 45.0)));
        assert_eq!(HeatingCurve::new(f64::NAN, 15.0, 30.0, 45.0), Err(CurveError::NotFinite));
        assert!(HeatingCurve::new(-5.0, 15.0, 40.0, 40.0).is_ok());
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{"min_outdoor": 20, "max_outdoor": 10, "min_flow": 30, "max_flow": 40}"#;
        assert!(serde_json::from_str::<HeatingCurve>(json).is_err());
        let json = r#"{"min_outdoor": -8, "max_outdoor": 16, "min_flow": 30, "max_flow": 45}"#;
        assert_eq!(serde_json::from_str::<HeatingCurve>(json).unwrap(), curve());
    }

    #[test]
    fn advisories_for_unusual_curves() {
        assert!(HeatingCurve::DEFAULT_PRIMARY.advisories().is_empty());
        assert!(HeatingCurve::DEFAULT_BOOST.advisories().is_empty());
        let unusual = HeatingCurve::new(-40.0, 18.0, 25.0, 80.0).unwrap();
        assert_eq!(unusual.advisories().len(), 2);
    }

    #[test]
    fn points_span_the_outdoor_range() {
        let points = curve().points(5);
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], (-8.0, FlowTemperature::rounded(45.0)));
        assert_eq!(points[2], (4.0, FlowTemperature::rounded(37.5)));
        assert_eq!(points[4], (16.0, FlowTemperature::rounded(30.0)));
        assert!(curve().points(0).is_empty());
        assert_eq!(curve().points(1).len(), 1);
    }

    #[test]
    fn fixed_flow_zone_reports_fixed_target() {
        let zone = ZoneCompensation {
            weather_compensation: false,
            fixed_flow: 42.04,
            ..Default::default()
        };
        let target = zone.evaluate(ZoneId::Zone1, Some(-3.0), Instant::now());
        assert_eq!(target.source, TargetSource::Fixed);
        assert_eq!(target.target_flow, Some(FlowTemperature::rounded(42.0)));
        let mut engine = CompensationEngine::new([(ZoneId::Zone1, zone)]);
        assert_eq!(
            engine.activate_boost(ZoneId::Zone1, None, Instant::now()),
            Err(Error::FixedFlowBoost(ZoneId::Zone1))
        );
        assert_eq!(
            engine.deactivate_boost(ZoneId::Zone2),
            Err(Error::UnknownZone(ZoneId::Zone2))
        );
    }

    #[test]
    fn zone_adjustment_scales_offsets_and_limits() {
        let json = r#"{"compensation_factor": 0.8, "temperature_offset": 2, "max_flow": 35}"#;
        let adjustment = serde_json::from_str::<ZoneAdjustment>(json).unwrap();
        assert_eq!(FlowTemperature::rounded(adjustment.apply(30.0)).celsius(), 26.0);
        assert_eq!(adjustment.apply(45.0), 35.0);
        assert_eq!(ZoneAdjustment::NONE.apply(41.3), 41.3);
        assert_eq!(serde_json::from_str::<ZoneAdjustment>("{}").unwrap(), ZoneAdjustment::NONE);

        let zone = ZoneCompensation { primary: curve(), adjustment, ..Default::default() };
        let target = zone.evaluate(ZoneId::Zone2, Some(10.0), Instant::now());
        assert_eq!(target.target_flow, Some(FlowTemperature::rounded(29.0)));
        let fixed = ZoneCompensation { weather_compensation: false, adjustment, ..zone };
        let target = fixed.evaluate(ZoneId::Zone2, Some(10.0), Instant::now());
        assert_eq!(target.target_flow, Some(FlowTemperature::rounded(45.0)));
    }

    #[test]
    fn rejects_invalid_adjustments() {
        let invalid = |json| serde_json::from_str::<ZoneAdjustment>(json).is_err();
        assert!(invalid(r#"{"compensation_factor": 0}"#));
        assert!(invalid(r#"{"compensation_factor": -1.5}"#));
        assert!(invalid(r#"{"min_flow": 40, "max_flow": 30}"#));
        assert!(invalid(r#"{"unknown": 1}"#));
        assert!(!invalid(r#"{"min_flow": 30, "max_flow": 30}"#));
    }

    #[test]
    fn missing_outdoor_temperature_yields_no_target() {
        let zone = ZoneCompensation::default();
        let target = zone.evaluate(ZoneId::Zone1, None, Instant::now());
        assert_eq!(target.source, TargetSource::Curve(CurveSelection::Primary));
        assert_eq!(target.target_flow, None);
    }

    #[tokio::test(start_paused = true)]
    async fn boost_expires_after_its_duration() {
        let mut engine = CompensationEngine::new([(ZoneId::Zone1, ZoneCompensation::default())]);
        let start = Instant::now();
        engine.activate_boost(ZoneId::Zone1, Some(Duration::from_secs(600)), start).unwrap();
        let boosted = &engine.evaluate(Some(0.0), Instant::now())[0];
        assert_eq!(boosted.source, TargetSource::Curve(CurveSelection::Boost));
        assert_eq!(boosted.boost_remaining, Some(Duration::from_secs(600)));

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(engine.expire_boosts(Instant::now()).is_empty());
        let boosted = &engine.evaluate(Some(0.0), Instant::now())[0];
        assert_eq!(boosted.boost_remaining, Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(engine.expire_boosts(Instant::now()), [ZoneId::Zone1]);
        let target = &engine.evaluate(Some(0.0), Instant::now())[0];
        assert_eq!(target.source, TargetSource::Curve(CurveSelection::Primary));
        assert_eq!(target.boost_remaining, None);
    }

    #[test]
    fn explicit_deactivation() {
        let now = Instant::now();
        let mut engine = CompensationEngine::new([(ZoneId::Zone2, ZoneCompensation::default())]);
        engine.activate_boost(ZoneId::Zone2, None, now).unwrap();
        assert_eq!(engine.deactivate_boost(ZoneId::Zone2), Ok(true));
        assert_eq!(engine.deactivate_boost(ZoneId::Zone2), Ok(false));
        let target = &engine.evaluate(Some(0.0), now)[0];
        assert_eq!(target.source, TargetSource::Curve(CurveSelection::Primary));
    }

    fn arbitrary_curve() -> impl Strategy<Value = HeatingCurve> {
        (-30.0..20.0f64, 0.5..30.0f64, 20.0..40.0f64, 0.0..30.0f64).prop_map(
            |(min_outdoor, outdoor_span, min_flow, flow_span)| {
                HeatingCurve::new(
                    min_outdoor,
                    min_outdoor + outdoor_span,
                    min_flow,
                    min_flow + flow_span,
                )
                .unwrap()
            },
        )
    }

    proptest! {
        #[test]
        fn clamped_outside_of_the_outdoor_range(curve in arbitrary_curve(), delta in 0.0..50.0f64) {
            let p = curve.parameters();
            prop_assert_eq!(curve.target_flow(p.min_outdoor - delta), p.max_flow);
            prop_assert_eq!(curve.target_flow(p.max_outdoor + delta), p.min_flow);
        }

        #[test]
        fn monotonically_non_increasing(
            curve in arbitrary_curve(),
            a in -60.0..60.0f64,
            b in -60.0..60.0f64,
        ) {
            let (colder, warmer) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(curve.target_flow(colder) >= curve.target_flow(warmer));
            prop_assert!(
                FlowTemperature::rounded(curve.target_flow(colder))
                    >= FlowTemperature::rounded(curve.target_flow(warmer))
            );
        }

        #[test]
        fn idempotent(curve in arbitrary_curve(), outdoor in -60.0..60.0f64) {
            prop_assert_eq!(curve.target_flow(outdoor), curve.target_flow(outdoor));
        }

        #[test]
        fn stays_within_flow_range(curve in arbitrary_curve(), outdoor in -60.0..60.0f64) {
            let p = curve.parameters();
            let flow = curve.target_flow(outdoor);
            prop_assert!(p.min_flow <= flow && flow <= p.max_flow);
        }
    }
}
