use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::decode::DecodedValue;
use crate::features::ActiveRegisterSet;
use crate::planner::ReadSpan;
use crate::registers::{RegisterIndex, Value};

#[derive(Clone, Debug)]
pub struct SnapshotEntry {
    pub decoded: DecodedValue,
    /// When the value was last read from the device.
    pub updated_at: Instant,
    /// Set when a read of this register failed after `updated_at`.
    pub stale_since: Option<Instant>,
}

impl SnapshotEntry {
    pub fn is_stale(&self) -> bool {
        self.stale_since.is_some()
    }

    /// Time since the value was last read.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.updated_at)
    }
}

/// The latest known value of every register we have read at least once.
#[derive(Clone, Debug, Default)]
pub struct SnapshotMap {
    entries: BTreeMap<RegisterIndex, SnapshotEntry>,
}

impl SnapshotMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, register: RegisterIndex) -> Option<&SnapshotEntry> {
        self.entries.get(&register)
    }

    pub fn get_id(&self, id: &str) -> Option<&SnapshotEntry> {
        self.get(RegisterIndex::from_id(id)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterIndex, &SnapshotEntry)> {
        self.entries.iter().map(|(r, e)| (*r, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Valid value of the register, optionally only if it is also fresh.
    pub fn valid_value(&self, id: &str, require_fresh: bool) -> Option<Value> {
        let entry = self.get_id(id)?;
        if require_fresh && entry.is_stale() {
            return None;
        }
        entry.decoded.valid_value()
    }

    /// Record newly decoded values.
    ///
    /// Returns the number of registers whose value has changed.
    pub fn merge(&mut self, values: impl IntoIterator<Item = DecodedValue>, now: Instant) -> usize {
        let mut changed = 0;
        for decoded in values {
            let register = decoded.register;
            let unchanged = self
                .entries
                .get(&register)
                .is_some_and(|previous| previous.decoded.raw_words == decoded.raw_words);
            if !unchanged {
                changed += 1;
            }
            let entry = SnapshotEntry { decoded, updated_at: now, stale_since: None };
            self.entries.insert(register, entry);
        }
        changed
    }

    /// Keep the values of the span, but mark them as no longer current.
    pub fn mark_stale(&mut self, span: &ReadSpan, now: Instant) -> usize {
        let mut marked = 0;
        for (register, entry) in self.entries.iter_mut() {
            if span.covers(*register) {
                entry.stale_since.get_or_insert(now);
                marked += 1;
            }
        }
        marked
    }

    /// Forget the values of the span entirely.
    pub fn drop_span(&mut self, span: &ReadSpan) -> usize {
        let before = self.entries.len();
        self.entries.retain(|register, _| !span.covers(*register));
        before - self.entries.len()
    }

    /// Forget the values of the registers that are no longer active.
    pub fn retain_active(&mut self, active: &ActiveRegisterSet) {
        self.entries.retain(|register, _| active.contains(*register));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_register;
    use crate::registers::RegisterKind;

    fn decoded(id: &str, word: u16) -> DecodedValue {
        decode_register(RegisterIndex::from_id(id).unwrap(), &[word])
    }

    #[test]
    fn merge_reports_changes() {
        let now = Instant::now();
        let mut snapshot = SnapshotMap::new();
        assert_eq!(snapshot.merge([decoded("flow_temp", 35), decoded("return_temp", 30)], now), 2);
        assert_eq!(snapshot.merge([decoded("flow_temp", 35), decoded("return_temp", 31)], now), 1);
        assert_eq!(snapshot.valid_value("return_temp", true), Some(Value::Number(31.0)));
    }

    #[test]
    fn stale_values_are_kept_until_refreshed() {
        let then = Instant::now();
        let later = then + Duration::from_secs(30);
        let mut snapshot = SnapshotMap::new();
        snapshot.merge([decoded("outdoor_temp", 5), decoded("flow_temp", 35)], then);
        let span = ReadSpan { kind: RegisterKind::Input, start: 6, count: 1 };
        assert_eq!(snapshot.mark_stale(&span, later), 1);
        let entry = snapshot.get_id("outdoor_temp").unwrap();
        assert!(entry.is_stale());
        assert_eq!(entry.age(later), Duration::from_secs(30));
        assert_eq!(snapshot.valid_value("outdoor_temp", true), None);
        assert_eq!(snapshot.valid_value("outdoor_temp", false), Some(Value::Number(5.0)));
        assert!(!snapshot.get_id("flow_temp").unwrap().is_stale());

        snapshot.merge([decoded("outdoor_temp", 6)], later);
        assert!(!snapshot.get_id("outdoor_temp").unwrap().is_stale());
    }

    #[test]
    fn dropping_a_span_forgets_its_registers() {
        let mut snapshot = SnapshotMap::new();
        snapshot.merge([decoded("outdoor_temp", 5), decoded("flow_temp", 35)], Instant::now());
        let span = ReadSpan { kind: RegisterKind::Input, start: 0, count: 8 };
        assert_eq!(snapshot.drop_span(&span), 1);
        assert!(snapshot.get_id("outdoor_temp").is_none());
        assert_eq!(snapshot.len(), 1);
    }
}
