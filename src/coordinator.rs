//! The poll loop: read every active register once per cycle, derive the zone targets, and serve
//! commands in between cycles.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::compensation::{
    self, CompensationEngine, CurveSelection, FlowTemperature, HeatingCurve, TargetSource,
    ZoneId, ZoneTarget,
};
use crate::config::{self, Config};
use crate::decode::{self, InvalidReason, PreparedWrite, WriteError};
use crate::features::{self, ActiveRegisterSet, FeatureSet};
use crate::planner::{self, PlannerConfig, ReadSpan};
use crate::registers::{RegisterIndex, Value};
use crate::snapshot::SnapshotMap;
use crate::transport::{Transport, TransportError};

/// Number of cycles whose diagnostics are retained.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("the write was rejected")]
    Write(#[source] WriteError),
    #[error("could not write `{1}` to the device")]
    Transport(#[source] TransportError, RegisterIndex),
    #[error("the compensation command was rejected")]
    Compensation(#[source] compensation::Error),
    #[error("the poll loop is no longer running")]
    Stopped,
}

/// A fixed capacity buffer that forgets its oldest item when full.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CycleDiagnostics {
    pub cycle: u64,
    pub started_at: jiff::Timestamp,
    #[serde(serialize_with = "config::serialize_duration")]
    pub duration: Duration,
    pub spans_attempted: usize,
    pub spans_failed: usize,
    /// Spans not attempted because the cycle ran past its deadline.
    pub spans_skipped: usize,
    pub valid: usize,
    pub invalid: usize,
    pub stale: usize,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct OutdoorReading {
    pub source: RegisterIndex,
    pub celsius: f64,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct RegisterReading {
    pub register: RegisterIndex,
    pub value: Option<Value>,
    pub raw: Option<i64>,
    pub valid: bool,
    pub reason: Option<InvalidReason>,
    pub stale: bool,
    /// Time since the value was read from the device.
    #[serde(serialize_with = "config::serialize_duration")]
    pub age: Duration,
}

/// The published result of a poll cycle.
#[derive(Clone, Debug, serde::Serialize)]
pub struct PollReport {
    pub registers: Vec<RegisterReading>,
    pub outdoor: Option<OutdoorReading>,
    pub zones: Vec<ZoneTarget>,
    pub diagnostics: CycleDiagnostics,
}

impl PollReport {
    pub fn register(&self, id: &str) -> Option<&RegisterReading> {
        self.registers.iter().find(|r| r.register.id() == id)
    }

    pub fn zone(&self, zone: ZoneId) -> Option<&ZoneTarget> {
        self.zones.iter().find(|z| z.zone == zone)
    }
}

pub enum Command {
    WriteRegister {
        id: String,
        value: f64,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    ActivateBoost {
        zone: ZoneId,
        duration: Option<Duration>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    DeactivateBoost {
        zone: ZoneId,
        reply: oneshot::Sender<Result<bool, Error>>,
    },
    SetCurve {
        zone: ZoneId,
        which: CurveSelection,
        curve: HeatingCurve,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    SetFeatures {
        features: FeatureSet,
        reply: oneshot::Sender<()>,
    },
}

/// Sends commands to a running [`PollCoordinator::run`] loop.
#[derive(Clone)]
pub struct Handle {
    commands: mpsc::Sender<Command>,
}

impl Handle {
    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, Error> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| Error::Stopped)?;
        response.await.map_err(|_| Error::Stopped)
    }

    pub async fn write_register(&self, id: &str, value: f64) -> Result<(), Error> {
        let id = id.to_string();
        self.request(|reply| Command::WriteRegister { id, value, reply }).await?
    }

    pub async fn activate_boost(&self, zone: ZoneId, duration: Option<Duration>) -> Result<(), Error> {
        self.request(|reply| Command::ActivateBoost { zone, duration, reply }).await?
    }

    pub async fn deactivate_boost(&self, zone: ZoneId) -> Result<bool, Error> {
        self.request(|reply| Command::DeactivateBoost { zone, reply }).await?
    }

    pub async fn set_curve(
        &self,
        zone: ZoneId,
        which: CurveSelection,
        curve: HeatingCurve,
    ) -> Result<(), Error> {
        self.request(|reply| Command::SetCurve { zone, which, curve, reply }).await?
    }

    pub async fn set_features(&self, features: FeatureSet) -> Result<(), Error> {
        self.request(|reply| Command::SetFeatures { features, reply }).await
    }
}

pub fn channel(buffer: usize) -> (Handle, mpsc::Receiver<Command>) {
    let (commands, receiver) = mpsc::channel(buffer);
    (Handle { commands }, receiver)
}

pub struct PollCoordinator<T> {
    transport: T,
    interval: Duration,
    deadline: Duration,
    planner: PlannerConfig,
    write_protected: BTreeSet<String>,
    applied_zones: BTreeSet<ZoneId>,
    features: FeatureSet,
    /// The feature set `active` and `plan` were computed for.
    planned_for: Option<FeatureSet>,
    active: ActiveRegisterSet,
    plan: Vec<ReadSpan>,
    snapshot: SnapshotMap,
    engine: CompensationEngine,
    last_applied: BTreeMap<ZoneId, FlowTemperature>,
    /// Targets the write guard refused; not retried until the target changes.
    rejected_setpoints: BTreeMap<ZoneId, FlowTemperature>,
    span_errors: BTreeMap<ReadSpan, u64>,
    history: RingBuffer<CycleDiagnostics>,
    cycle: u64,
}

impl<T: Transport> PollCoordinator<T> {
    pub fn new(transport: T, config: &Config) -> Result<Self, config::Error> {
        config.validate()?;
        let features = config.feature_set();
        let engine = CompensationEngine::new(config.zone_compensation(&features));
        let active = features::active_registers(&features);
        info!(
            message = "configured installation",
            template = %config.template,
            features = ?features.iter().collect::<Vec<_>>(),
            active_registers = active.len()
        );
        Ok(Self {
            transport,
            interval: config.poll.interval,
            deadline: config.poll.deadline,
            planner: config.poll.planner,
            write_protected: config.write_protected.clone(),
            applied_zones: config.applied_zones(),
            features,
            planned_for: None,
            active,
            plan: Vec::new(),
            snapshot: SnapshotMap::new(),
            engine,
            last_applied: BTreeMap::new(),
            rejected_setpoints: BTreeMap::new(),
            span_errors: BTreeMap::new(),
            history: RingBuffer::new(HISTORY_CAPACITY),
            cycle: 0,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn snapshot(&self) -> &SnapshotMap {
        &self.snapshot
    }

    pub fn engine(&self) -> &CompensationEngine {
        &self.engine
    }

    pub fn active_registers(&self) -> &ActiveRegisterSet {
        &self.active
    }

    pub fn plan(&self) -> &[ReadSpan] {
        &self.plan
    }

    pub fn history(&self) -> &RingBuffer<CycleDiagnostics> {
        &self.history
    }

    /// Failed reads per span since start-up.
    pub fn span_errors(&self) -> &BTreeMap<ReadSpan, u64> {
        &self.span_errors
    }

    pub fn average_cycle_duration(&self) -> Option<Duration> {
        let count = u32::try_from(self.history.len()).ok().filter(|c| *c > 0)?;
        Some(self.history.iter().map(|d| d.duration).sum::<Duration>() / count)
    }

    pub fn max_cycle_duration(&self) -> Option<Duration> {
        self.history.iter().map(|d| d.duration).max()
    }

    /// Takes effect at the start of the next cycle.
    pub fn set_features(&mut self, features: FeatureSet) {
        self.features = features;
        self.rejected_setpoints.clear();
    }

    fn refresh_active_set(&mut self) {
        if self.planned_for.as_ref() == Some(&self.features) {
            return;
        }
        self.active = features::active_registers(&self.features);
        self.plan = planner::plan(&self.active, &self.planner).into_values().flatten().collect();
        self.snapshot.retain_active(&self.active);
        let plan = &self.plan;
        self.span_errors.retain(|span, _| plan.contains(span));
        self.planned_for = Some(self.features.clone());
        info!(
            message = "planned register reads",
            active_registers = self.active.len(),
            spans = self.plan.len()
        );
    }

    /// Read the span and merge the results into the snapshot.
    async fn read_span(&mut self, span: ReadSpan) -> Result<(), TransportError> {
        match self.transport.read(span.kind, span.start, span.count).await {
            Ok(words) => {
                if words.len() < usize::from(span.count) {
                    warn!(
                        message = "short response",
                        %span,
                        expected = span.count,
                        received = words.len()
                    );
                }
                let decoded = decode::decode(&span, &words, &self.active);
                let changed = self.snapshot.merge(decoded, Instant::now());
                debug!(message = "read registers", %span, changed);
                Ok(())
            }
            Err(error) => {
                *self.span_errors.entry(span).or_default() += 1;
                if error.is_transient() {
                    let stale = self.snapshot.mark_stale(&span, Instant::now());
                    warn!(
                        message = "could not read registers, keeping last values",
                        %span,
                        stale,
                        error = (&error as &dyn std::error::Error)
                    );
                } else {
                    let dropped = self.snapshot.drop_span(&span);
                    warn!(
                        message = "device does not serve these registers",
                        %span,
                        dropped,
                        error = (&error as &dyn std::error::Error)
                    );
                }
                Err(error)
            }
        }
    }

    /// Run a single poll cycle.
    pub async fn poll_cycle(&mut self) -> PollReport {
        let started = Instant::now();
        let started_at = jiff::Timestamp::now();
        self.cycle += 1;
        self.refresh_active_set();
        self.engine.expire_boosts(started);

        let deadline = started + self.deadline;
        let (mut attempted, mut failed, mut skipped) = (0, 0, 0);
        for span in self.plan.clone() {
            if Instant::now() >= deadline {
                skipped += 1;
                self.snapshot.mark_stale(&span, Instant::now());
                continue;
            }
            attempted += 1;
            if self.read_span(span).await.is_err() {
                failed += 1;
            }
        }
        if skipped > 0 {
            warn!(message = "cycle ran past its deadline", skipped, cycle = self.cycle);
        }

        let outdoor = self.outdoor_temperature();
        let now = Instant::now();
        let zones = self.engine.evaluate(outdoor.as_ref().map(|o| o.celsius), now);
        if outdoor.is_none() && zones.iter().any(|z| z.target_flow.is_none()) {
            warn!(message = "no outdoor temperature available, cannot compensate");
        }
        self.apply_setpoints(&zones).await;

        let now = Instant::now();
        let registers = self.readings(now);
        let diagnostics = CycleDiagnostics {
            cycle: self.cycle,
            started_at,
            duration: now.saturating_duration_since(started),
            spans_attempted: attempted,
            spans_failed: failed,
            spans_skipped: skipped,
            valid: registers.iter().filter(|r| r.valid && !r.stale).count(),
            invalid: registers.iter().filter(|r| !r.valid).count(),
            stale: registers.iter().filter(|r| r.stale).count(),
        };
        debug!(
            message = "cycle complete",
            cycle = diagnostics.cycle,
            duration = ?diagnostics.duration,
            attempted,
            failed,
            skipped,
            valid = diagnostics.valid,
            invalid = diagnostics.invalid,
            stale = diagnostics.stale
        );
        self.history.push(diagnostics.clone());
        PollReport { registers, outdoor, zones, diagnostics }
    }

    fn readings(&self, now: Instant) -> Vec<RegisterReading> {
        self.snapshot
            .iter()
            .map(|(register, entry)| {
                let decoded = &entry.decoded;
                RegisterReading {
                    register,
                    value: decoded.value,
                    raw: decoded.raw,
                    valid: decoded.is_valid(),
                    reason: decoded.invalid,
                    stale: entry.is_stale(),
                    age: entry.age(now),
                }
            })
            .collect()
    }

    /// A fresh external sensor reading is preferred over the unit's own sensor.
    fn outdoor_temperature(&self) -> Option<OutdoorReading> {
        ["external_outdoor_temp", "outdoor_temp"].into_iter().find_map(|id| {
            let Some(Value::Number(celsius)) = self.snapshot.valid_value(id, true) else {
                return None;
            };
            Some(OutdoorReading { source: RegisterIndex::from_id(id)?, celsius })
        })
    }

    async fn apply_setpoints(&mut self, zones: &[ZoneTarget]) {
        for target in zones {
            if !self.applied_zones.contains(&target.zone) {
                continue;
            }
            let (TargetSource::Curve(_), Some(flow)) = (target.source, target.target_flow) else {
                continue;
            };
            if self.last_applied.get(&target.zone) == Some(&flow)
                || self.rejected_setpoints.get(&target.zone) == Some(&flow)
            {
                continue;
            }
            let id = target.zone.fixed_flow_register();
            let result = match decode::prepare_write(
                id,
                flow.celsius(),
                &self.features,
                &self.write_protected,
            ) {
                Ok(write) => self.write_prepared(write).await,
                Err(e) => Err(Error::Write(e)),
            };
            match result {
                Ok(()) => {
                    info!(message = "applied flow temperature", zone = %target.zone, %flow);
                    self.rejected_setpoints.remove(&target.zone);
                    self.last_applied.insert(target.zone, flow);
                }
                Err(e) => {
                    if let Error::Write(_) = e {
                        self.rejected_setpoints.insert(target.zone, flow);
                    }
                    warn!(
                        message = "could not apply flow temperature",
                        zone = %target.zone,
                        %flow,
                        error = (&e as &dyn std::error::Error)
                    );
                }
            }
        }
    }

    async fn write_prepared(&mut self, write: PreparedWrite) -> Result<(), Error> {
        let register = write.register;
        self.transport
            .write(register.kind(), register.address(), write.word)
            .await
            .map_err(|e| Error::Transport(e, register))?;
        info!(message = "register written", register.id = register.id(), value = write.value);
        // Keep the snapshot in line with what the device now holds.
        let span = self.refresh_span(register);
        let _ = self.read_span(span).await;
        Ok(())
    }

    fn refresh_span(&self, register: RegisterIndex) -> ReadSpan {
        self.plan.iter().find(|s| s.covers(register)).copied().unwrap_or(ReadSpan {
            kind: register.kind(),
            start: register.address(),
            count: register.data_type().words(),
        })
    }

    /// Validate, write and read back a register.
    pub async fn write_register(&mut self, id: &str, value: f64) -> Result<(), Error> {
        let write = decode::prepare_write(id, value, &self.features, &self.write_protected)
            .map_err(Error::Write)?;
        self.write_prepared(write).await
    }

    pub fn activate_boost(&mut self, zone: ZoneId, duration: Option<Duration>) -> Result<(), Error> {
        self.engine.activate_boost(zone, duration, Instant::now()).map_err(Error::Compensation)
    }

    pub fn deactivate_boost(&mut self, zone: ZoneId) -> Result<bool, Error> {
        self.engine.deactivate_boost(zone).map_err(Error::Compensation)
    }

    pub fn set_curve(
        &mut self,
        zone: ZoneId,
        which: CurveSelection,
        curve: HeatingCurve,
    ) -> Result<(), Error> {
        self.engine.set_curve(zone, which, curve).map_err(Error::Compensation)
    }

    async fn handle(&mut self, command: Command) {
        // A dropped reply receiver only means the caller is no longer interested.
        match command {
            Command::WriteRegister { id, value, reply } => {
                let _ = reply.send(self.write_register(&id, value).await);
            }
            Command::ActivateBoost { zone, duration, reply } => {
                let _ = reply.send(self.activate_boost(zone, duration));
            }
            Command::DeactivateBoost { zone, reply } => {
                let _ = reply.send(self.deactivate_boost(zone));
            }
            Command::SetCurve { zone, which, curve, reply } => {
                let _ = reply.send(self.set_curve(zone, which, curve));
            }
            Command::SetFeatures { features, reply } => {
                self.set_features(features);
                let _ = reply.send(());
            }
        }
    }

    /// Poll at the configured interval, serving commands in between the cycles.
    ///
    /// Returns once every [`Handle`] has been dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        reports: watch::Sender<Option<Arc<PollReport>>>,
    ) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!(message = "command channel closed, stopping");
                        return;
                    };
                    self.handle(command).await;
                }
                _ = interval.tick() => {
                    let report = self.poll_cycle().await;
                    reports.send_replace(Some(Arc::new(report)));
                }
            }
        }
    }
}
