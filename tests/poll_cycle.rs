use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use aerona3_tools::compensation::{CurveSelection, HeatingCurve, TargetSource, ZoneId};
use aerona3_tools::config::{Config, ZoneConfig};
use aerona3_tools::coordinator::{self, Error, PollCoordinator, PollReport};
use aerona3_tools::decode::{DenyReason, WriteError};
use aerona3_tools::features::{FeatureSet, Template};
use aerona3_tools::planner::ReadSpan;
use aerona3_tools::registers::{Feature, RegisterIndex, RegisterKind, Value};
use aerona3_tools::transport::{Transport, TransportError};
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Call {
    Read { kind: RegisterKind, start: u16, count: u16 },
    Write { kind: RegisterKind, address: u16, value: u16 },
}

#[derive(Clone, Copy, Debug)]
enum Failure {
    Busy,
    IllegalAddress,
}

/// A heat pump that answers from a register map and records every request.
#[derive(Default)]
struct MockDevice {
    words: BTreeMap<(RegisterKind, u16), u16>,
    failing_reads: BTreeMap<(RegisterKind, u16), Failure>,
    read_delay: Duration,
    calls: Vec<Call>,
}

impl MockDevice {
    fn set(&mut self, id: &str, word: u16) {
        let register = RegisterIndex::from_id(id).unwrap();
        self.words.insert((register.kind(), register.address()), word);
    }

    fn fail_reads(&mut self, kind: RegisterKind, start: u16, failure: Failure) {
        self.failing_reads.insert((kind, start), failure);
    }

    fn writes(&self) -> Vec<Call> {
        self.calls.iter().copied().filter(|c| matches!(c, Call::Write { .. })).collect()
    }
}

impl Transport for MockDevice {
    async fn read(
        &mut self,
        kind: RegisterKind,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.calls.push(Call::Read { kind, start, count });
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        match self.failing_reads.get(&(kind, start)) {
            Some(Failure::Busy) => return Err(TransportError::Busy),
            Some(Failure::IllegalAddress) => return Err(TransportError::IllegalAddress),
            None => {}
        }
        Ok((start..start + count)
            .map(|address| self.words.get(&(kind, address)).copied().unwrap_or(0))
            .collect())
    }

    async fn write(
        &mut self,
        kind: RegisterKind,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        self.calls.push(Call::Write { kind, address, value });
        self.words.insert((kind, address), value);
        Ok(())
    }
}

/// A device with plausible readings: 5 °C outside, 35 °C flow, fixed flow at 45 °C.
fn device() -> MockDevice {
    let mut device = MockDevice::default();
    device.set("outdoor_temp", 5);
    device.set("flow_temp", 35);
    device.set("return_temp", 30);
    device.set("operating_mode", 1);
    device.set("zone1_fixed_flow", 450);
    device.set("zone1_max_flow", 500);
    device.set("zone1_min_flow", 250);
    device.set("control_mode", 1);
    device
}

fn coordinator(config: &Config) -> PollCoordinator<MockDevice> {
    PollCoordinator::new(device(), config).unwrap()
}

fn basic() -> Config {
    Config::for_template(Template::SingleZoneBasic)
}

fn number(report: &PollReport, id: &str) -> Option<f64> {
    report.register(id).and_then(|r| r.value).and_then(|v| v.as_number())
}

fn zone1_flow(report: &PollReport) -> Option<f64> {
    report.zone(ZoneId::Zone1).and_then(|z| z.target_flow).map(|f| f.celsius())
}

#[tokio::test(start_paused = true)]
async fn basic_installation_plan() {
    let mut coordinator = coordinator(&basic());
    let report = coordinator.poll_cycle().await;
    let span = |kind, start, count| ReadSpan { kind, start, count };
    assert_eq!(
        coordinator.plan(),
        [
            span(RegisterKind::Input, 0, 12),
            span(RegisterKind::Input, 18, 2),
            span(RegisterKind::Holding, 2, 3),
            span(RegisterKind::Coil, 2, 1),
            span(RegisterKind::Coil, 7, 4),
        ]
    );
    assert_eq!(report.diagnostics.spans_attempted, 5);
    assert_eq!(report.diagnostics.spans_failed, 0);
    assert_eq!(number(&report, "outdoor_temp"), Some(5.0));
    assert_eq!(number(&report, "zone1_fixed_flow"), Some(45.0));
    assert_eq!(report.register("operating_mode").unwrap().value, Some(Value::Label("Heating")));
    assert_eq!(report.register("control_mode").unwrap().value, Some(Value::Flag(true)));
    assert!(report.register("zone2_fixed_flow").is_none());
    assert!(report.register("dhw_temp").is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_span_keeps_stale_values() {
    let mut coordinator = coordinator(&basic());
    let first = coordinator.poll_cycle().await;
    assert_eq!(zone1_flow(&first), Some(36.3));

    coordinator.transport_mut().fail_reads(RegisterKind::Input, 0, Failure::Busy);
    coordinator.transport_mut().set("zone1_fixed_flow", 460);
    tokio::time::advance(Duration::from_secs(30)).await;
    let second = coordinator.poll_cycle().await;

    for (id, value) in [("outdoor_temp", 5.0), ("flow_temp", 35.0)] {
        let reading = second.register(id).unwrap();
        assert!(reading.stale, "{id} should be stale");
        assert!(reading.age >= Duration::from_secs(30));
        assert_eq!(reading.value, Some(Value::Number(value)));
    }
    let fixed = second.register("zone1_fixed_flow").unwrap();
    assert!(!fixed.stale);
    assert_eq!(fixed.value, Some(Value::Number(46.0)));
    assert_eq!(second.diagnostics.spans_failed, 1);
    assert_eq!(second.diagnostics.spans_attempted, 5);
    let failed_span = ReadSpan { kind: RegisterKind::Input, start: 0, count: 12 };
    assert_eq!(coordinator.span_errors().get(&failed_span), Some(&1));
    // A stale outdoor reading is not used for compensation.
    assert!(second.outdoor.is_none());
    assert_eq!(zone1_flow(&second), None);
}

#[tokio::test(start_paused = true)]
async fn illegal_address_forgets_values() {
    let mut coordinator = coordinator(&basic());
    let first = coordinator.poll_cycle().await;
    assert!(first.register("control_mode").is_some());

    coordinator.transport_mut().fail_reads(RegisterKind::Coil, 7, Failure::IllegalAddress);
    let second = coordinator.poll_cycle().await;
    for id in ["control_mode", "frost_protect_room", "frost_protect_outdoor", "frost_protect_water"]
    {
        assert!(second.register(id).is_none(), "{id} should be gone");
    }
    assert!(second.register("zone1_weather_comp").is_some());
    assert_eq!(second.diagnostics.spans_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_writes_never_reach_the_device() {
    let mut config = basic();
    config.write_protected.insert("control_mode".to_string());
    let mut coordinator = coordinator(&config);

    let result = coordinator.write_register("outdoor_temp", 5.0).await;
    assert!(matches!(
        result,
        Err(Error::Write(WriteError::Denied { reason: DenyReason::NotWritable, .. }))
    ));
    let result = coordinator.write_register("no_such_register", 1.0).await;
    assert!(matches!(
        result,
        Err(Error::Write(WriteError::Denied { reason: DenyReason::Unknown, .. }))
    ));
    let result = coordinator.write_register("control_mode", 0.0).await;
    assert!(matches!(
        result,
        Err(Error::Write(WriteError::Denied { reason: DenyReason::WriteProtected, .. }))
    ));
    let result = coordinator.write_register("zone2_fixed_flow", 40.0).await;
    assert!(matches!(result, Err(Error::Write(WriteError::FeatureDisabled(_, Feature::Zone2)))));
    let result = coordinator.write_register("zone1_fixed_flow", 70.0).await;
    assert!(matches!(result, Err(Error::Write(WriteError::OutOfRange { .. }))));

    assert!(coordinator.transport().calls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn write_refreshes_the_register() {
    let mut coordinator = coordinator(&basic());
    coordinator.poll_cycle().await;
    coordinator.transport_mut().calls.clear();

    coordinator.write_register("zone1_fixed_flow", 40.0).await.unwrap();
    assert_eq!(
        coordinator.transport().calls,
        [
            Call::Write { kind: RegisterKind::Holding, address: 2, value: 400 },
            Call::Read { kind: RegisterKind::Holding, start: 2, count: 3 },
        ]
    );
    let entry = coordinator.snapshot().get_id("zone1_fixed_flow").unwrap();
    assert_eq!(entry.decoded.value, Some(Value::Number(40.0)));

    coordinator.write_register("frost_protect_room", 1.0).await.unwrap();
    assert_eq!(
        coordinator.transport().writes().last(),
        Some(&Call::Write { kind: RegisterKind::Coil, address: 8, value: 1 })
    );
    assert_eq!(
        coordinator.snapshot().valid_value("frost_protect_room", true),
        Some(Value::Flag(true))
    );
}

#[tokio::test(start_paused = true)]
async fn external_outdoor_sensor_is_preferred() {
    let mut config = basic();
    config.features.insert("external_outdoor_sensor".to_string(), true);
    let mut coordinator = coordinator(&config);
    coordinator.transport_mut().set("external_outdoor_temp", 100);

    let report = coordinator.poll_cycle().await;
    let outdoor = report.outdoor.as_ref().unwrap();
    assert_eq!(outdoor.source.id(), "external_outdoor_temp");
    assert_eq!(outdoor.celsius, 10.0);
    assert_eq!(zone1_flow(&report), Some(32.0));

    coordinator.transport_mut().fail_reads(RegisterKind::Input, 17, Failure::Busy);
    let report = coordinator.poll_cycle().await;
    let outdoor = report.outdoor.as_ref().unwrap();
    assert_eq!(outdoor.source.id(), "outdoor_temp");
    assert_eq!(outdoor.celsius, 5.0);
    assert_eq!(zone1_flow(&report), Some(36.3));
}

#[tokio::test(start_paused = true)]
async fn boost_expires_between_cycles() {
    let mut coordinator = coordinator(&basic());
    coordinator.activate_boost(ZoneId::Zone1, Some(Duration::from_secs(60))).unwrap();

    let report = coordinator.poll_cycle().await;
    let zone = report.zone(ZoneId::Zone1).unwrap();
    assert_eq!(zone.source, TargetSource::Curve(CurveSelection::Boost));
    assert!(zone.boost_remaining.is_some());
    assert_eq!(zone1_flow(&report), Some(43.0));

    tokio::time::advance(Duration::from_secs(61)).await;
    let report = coordinator.poll_cycle().await;
    let zone = report.zone(ZoneId::Zone1).unwrap();
    assert_eq!(zone.source, TargetSource::Curve(CurveSelection::Primary));
    assert_eq!(zone.boost_remaining, None);
    assert_eq!(zone1_flow(&report), Some(36.3));
    assert!(!coordinator.deactivate_boost(ZoneId::Zone1).unwrap());
}

#[tokio::test(start_paused = true)]
async fn boosting_a_missing_zone_fails() {
    let mut coordinator = coordinator(&basic());
    assert!(matches!(
        coordinator.activate_boost(ZoneId::Zone2, None),
        Err(Error::Compensation(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn setpoint_is_written_only_when_it_changes() {
    let mut config = basic();
    config.zones.insert(ZoneId::Zone1, ZoneConfig { apply_setpoint: true, ..Default::default() });
    let mut coordinator = coordinator(&config);

    coordinator.poll_cycle().await;
    let holding_write = |value| Call::Write { kind: RegisterKind::Holding, address: 2, value };
    assert_eq!(coordinator.transport().writes(), [holding_write(363)]);

    coordinator.poll_cycle().await;
    assert_eq!(coordinator.transport().writes().len(), 1);

    coordinator.transport_mut().set("outdoor_temp", 6);
    let report = coordinator.poll_cycle().await;
    assert_eq!(zone1_flow(&report), Some(35.4));
    assert_eq!(coordinator.transport().writes(), [holding_write(363), holding_write(354)]);
    assert_eq!(number(&report, "zone1_fixed_flow"), Some(35.4));
}

#[tokio::test(start_paused = true)]
async fn curve_changes_apply_from_the_next_cycle() {
    let mut coordinator = coordinator(&basic());
    let curve = HeatingCurve::new(-8.0, 16.0, 30.0, 45.0).unwrap();
    coordinator.set_curve(ZoneId::Zone1, CurveSelection::Primary, curve).unwrap();
    coordinator.transport_mut().set("outdoor_temp", 10);
    let report = coordinator.poll_cycle().await;
    assert_eq!(zone1_flow(&report), Some(33.8));
}

#[tokio::test(start_paused = true)]
async fn slow_cycles_skip_the_remaining_spans() {
    let mut config = basic();
    config.poll.deadline = Duration::from_secs(15);
    let mut coordinator = coordinator(&config);
    coordinator.transport_mut().read_delay = Duration::from_secs(10);

    let report = coordinator.poll_cycle().await;
    assert_eq!(report.diagnostics.spans_attempted, 2);
    assert_eq!(report.diagnostics.spans_skipped, 3);
    assert_eq!(report.diagnostics.spans_failed, 0);
    assert_eq!(coordinator.transport().calls.len(), 2);
    assert!(report.diagnostics.duration >= Duration::from_secs(20));
    assert!(report.register("zone1_fixed_flow").is_none());
}

#[tokio::test(start_paused = true)]
async fn feature_changes_replan_and_forget_values() {
    let mut coordinator = coordinator(&basic());
    coordinator.poll_cycle().await;
    let error_code = RegisterIndex::from_id("error_code_1").unwrap();
    assert!(!coordinator.plan().iter().any(|s| s.covers(error_code)));

    coordinator.set_features(FeatureSet::from_features([Feature::DiagnosticMonitoring]));
    let report = coordinator.poll_cycle().await;
    assert!(report.register("error_code_1").is_some());
    assert!(coordinator.plan().iter().any(|s| s.covers(error_code)));

    coordinator.set_features(FeatureSet::default());
    let report = coordinator.poll_cycle().await;
    assert!(report.register("error_code_1").is_none());
}

#[tokio::test(start_paused = true)]
async fn replanning_forgets_errors_of_retired_spans() {
    let mut coordinator = coordinator(&basic());
    coordinator.transport_mut().fail_reads(RegisterKind::Input, 18, Failure::Busy);
    coordinator.poll_cycle().await;
    let old_span = ReadSpan { kind: RegisterKind::Input, start: 18, count: 2 };
    assert_eq!(coordinator.span_errors().get(&old_span), Some(&1));

    coordinator.set_features(FeatureSet::from_features([Feature::DiagnosticMonitoring]));
    coordinator.poll_cycle().await;
    let new_span = ReadSpan { kind: RegisterKind::Input, start: 18, count: 8 };
    assert!(coordinator.plan().contains(&new_span));
    assert_eq!(coordinator.span_errors().get(&old_span), None);
    assert_eq!(coordinator.span_errors().get(&new_span), Some(&1));
    assert!(coordinator.span_errors().keys().all(|span| coordinator.plan().contains(span)));
}

#[tokio::test(start_paused = true)]
async fn history_tracks_cycle_durations() {
    let mut coordinator = coordinator(&basic());
    coordinator.transport_mut().read_delay = Duration::from_secs(1);
    for _ in 0..3 {
        coordinator.poll_cycle().await;
    }
    assert_eq!(coordinator.history().len(), 3);
    assert_eq!(coordinator.history().latest().map(|d| d.cycle), Some(3));
    assert_eq!(coordinator.average_cycle_duration(), Some(Duration::from_secs(5)));
    assert_eq!(coordinator.max_cycle_duration(), Some(Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn run_loop_serves_commands_between_cycles() {
    let coordinator = coordinator(&basic());
    let (handle, commands) = coordinator::channel(4);
    let (reports_sender, mut reports) = watch::channel(None::<Arc<PollReport>>);

    let client = async move {
        handle.activate_boost(ZoneId::Zone1, Some(Duration::from_secs(3600))).await.unwrap();
        loop {
            reports.changed().await.unwrap();
            let report = reports.borrow_and_update().clone().unwrap();
            let zone = report.zone(ZoneId::Zone1).unwrap();
            if zone.source == TargetSource::Curve(CurveSelection::Boost) {
                break;
            }
        }
        let denied = handle.write_register("outdoor_temp", 1.0).await;
        assert!(matches!(denied, Err(Error::Write(_))));
        assert!(handle.deactivate_boost(ZoneId::Zone1).await.unwrap());
    };
    tokio::select! {
        () = coordinator.run(commands, reports_sender) => panic!("the poll loop stopped early"),
        () = client => {}
    }
}
