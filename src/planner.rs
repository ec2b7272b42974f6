//! Grouping of the active registers into as few Modbus reads as reasonable.

use std::collections::BTreeMap;

use tracing::debug;

use crate::features::ActiveRegisterSet;
use crate::registers::{RegisterIndex, RegisterKind};

/// Largest register count a single read is guaranteed to be served for.
pub const MAX_SAFE_READ_COUNT: u16 = 123;

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// A span is extended to the next address if the distance from the current end is at most
    /// this much. A tolerance of 1 merges strictly contiguous registers only. Configuration
    /// rejects 0; callers planning directly get 0 treated as 1.
    pub gap_tolerance: u16,
    pub max_span_words: u16,
    /// Largest acceptable share of the words read that belong to no active register.
    pub max_waste_ratio: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            gap_tolerance: 4,
            max_span_words: MAX_SAFE_READ_COUNT,
            max_waste_ratio: 0.25,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ReadSpan {
    pub kind: RegisterKind,
    pub start: u16,
    pub count: u16,
}

impl ReadSpan {
    pub fn end(&self) -> u16 {
        self.start + (self.count - 1)
    }

    pub fn contains(&self, address: u16) -> bool {
        self.start <= address && address <= self.end()
    }

    /// Whether the register lies entirely within this span.
    pub fn covers(&self, register: RegisterIndex) -> bool {
        register.kind() == self.kind
            && self.contains(register.address())
            && self.contains(register.end_address())
    }
}

impl std::fmt::Display for ReadSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}[{}..={}]", self.kind, self.start, self.end()))
    }
}

/// Plan the reads for every register kind that has active registers.
pub fn plan(
    active: &ActiveRegisterSet,
    config: &PlannerConfig,
) -> BTreeMap<RegisterKind, Vec<ReadSpan>> {
    let mut by_kind = BTreeMap::<RegisterKind, Vec<(u16, u16)>>::new();
    for register in active.iter() {
        by_kind
            .entry(register.kind())
            .or_default()
            .push((register.address(), register.data_type().words()));
    }
    by_kind
        .into_iter()
        .map(|(kind, registers)| (kind, plan_addresses(kind, registers, config)))
        .collect()
}

/// Plan reads for `(address, width)` pairs of a single register kind.
///
/// If the resulting plan reads too many words that belong to no register, the plan is redone with
/// a smaller gap tolerance until the waste ratio is acceptable.
pub fn plan_addresses(
    kind: RegisterKind,
    registers: impl IntoIterator<Item = (u16, u16)>,
    config: &PlannerConfig,
) -> Vec<ReadSpan> {
    let mut registers = registers.into_iter().collect::<Vec<_>>();
    // Stable, so that the first of duplicate addresses is the one kept.
    registers.sort_by_key(|(address, _)| *address);
    registers.dedup_by_key(|(address, _)| *address);
    let useful_words = registers.iter().map(|(_, words)| u32::from(*words)).sum::<u32>();
    let mut tolerance = config.gap_tolerance.max(1);
    loop {
        let spans = plan_with_tolerance(kind, &registers, tolerance, config.max_span_words);
        let read_words = spans.iter().map(|s| u32::from(s.count)).sum::<u32>();
        let waste = f64::from(read_words.saturating_sub(useful_words)) / f64::from(read_words.max(1));
        if waste <= config.max_waste_ratio || tolerance == 1 {
            debug!(
                message = "planned reads",
                %kind,
                spans = spans.len(),
                tolerance,
                waste
            );
            return spans;
        }
        debug!(message = "read plan too wasteful, retrying", %kind, tolerance, waste);
        tolerance -= 1;
    }
}

fn plan_with_tolerance(
    kind: RegisterKind,
    sorted_registers: &[(u16, u16)],
    tolerance: u16,
    max_span_words: u16,
) -> Vec<ReadSpan> {
    let max_span_words = max_span_words.max(1);
    let mut spans = Vec::new();
    let mut current: Option<(u16, u16)> = None;
    for &(address, words) in sorted_registers {
        let last = address.saturating_add(words.max(1) - 1);
        current = Some(match current {
            Some((start, end))
                if address > end
                    && address - end <= tolerance
                    && last - start < max_span_words =>
            {
                (start, last)
            }
            // The previous register was wider than one word and covers this one already.
            Some((start, end)) if address <= end && last - start < max_span_words => {
                (start, end.max(last))
            }
            Some((start, end)) => {
                spans.push(ReadSpan { kind, start, count: end - start + 1 });
                (address, last)
            }
            None => (address, last),
        });
    }
    if let Some((start, end)) = current {
        spans.push(ReadSpan { kind, start, count: end - start + 1 });
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureSet, active_registers};
    use crate::registers::Feature;

    fn ranges(spans: &[ReadSpan]) -> Vec<(u16, u16)> {
        spans.iter().map(|s| (s.start, s.end())).collect()
    }

    fn config(gap_tolerance: u16) -> PlannerConfig {
        PlannerConfig {
            gap_tolerance,
            max_span_words: MAX_SAFE_READ_COUNT,
            max_waste_ratio: 1.0,
        }
    }

    #[test]
    fn groups_with_gap_tolerance() {
        let addresses = [1, 2, 3, 40, 41, 100].map(|a| (a, 1));
        let spans = plan_addresses(RegisterKind::Input, addresses, &config(2));
        assert_eq!(ranges(&spans), [(1, 3), (40, 41), (100, 100)]);
    }

    #[test]
    fn overlapping_registers_respect_max_span() {
        let narrow = PlannerConfig { max_span_words: 2, ..config(4) };
        let spans = plan_addresses(RegisterKind::Input, [(10, 2), (11, 2)], &narrow);
        assert_eq!(ranges(&spans), [(10, 11), (11, 12)]);
        assert!(spans.iter().all(|s| s.count <= 2));
        let spans = plan_addresses(RegisterKind::Input, [(10, 2), (11, 2)], &config(4));
        assert_eq!(ranges(&spans), [(10, 12)]);
    }

    #[test]
    fn zero_tolerance_merges_contiguous_only() {
        let addresses = [1, 2, 4].map(|a| (a, 1));
        let spans = plan_addresses(RegisterKind::Input, addresses, &config(0));
        assert_eq!(ranges(&spans), [(1, 2), (4, 4)]);
    }

    #[test]
    fn tolerance_bridges_small_gaps() {
        let addresses = [1, 3, 6, 20].map(|a| (a, 1));
        let spans = plan_addresses(RegisterKind::Holding, addresses, &config(3));
        assert_eq!(ranges(&spans), [(1, 6), (20, 20)]);
        let spans = plan_addresses(RegisterKind::Holding, addresses, &config(1));
        assert_eq!(ranges(&spans), [(1, 1), (3, 3), (6, 6), (20, 20)]);
    }

    #[test]
    fn respects_maximum_span_width() {
        let addresses = (0..10).map(|a| (a, 1));
        let cfg = PlannerConfig {
            max_span_words: 4,
            ..config(1)
        };
        let spans = plan_addresses(RegisterKind::Input, addresses, &cfg);
        assert_eq!(ranges(&spans), [(0, 3), (4, 7), (8, 9)]);
    }

    #[test]
    fn two_word_registers_occupy_two_addresses() {
        let spans = plan_addresses(RegisterKind::Input, [(10, 2), (12, 1), (14, 2)], &config(1));
        assert_eq!(ranges(&spans), [(10, 12), (14, 15)]);
        let spans = plan_addresses(RegisterKind::Input, [(10, 2), (11, 1)], &config(1));
        assert_eq!(ranges(&spans), [(10, 11)]);
    }

    #[test]
    fn duplicate_addresses_are_read_once() {
        let spans = plan_addresses(RegisterKind::Coil, [(5, 1), (5, 1), (6, 1)], &config(1));
        assert_eq!(ranges(&spans), [(5, 6)]);
    }

    #[test]
    fn wasteful_plans_are_redone_with_smaller_tolerance() {
        let addresses = [0, 10, 20].map(|a| (a, 1));
        let cfg = PlannerConfig {
            gap_tolerance: 10,
            max_span_words: MAX_SAFE_READ_COUNT,
            max_waste_ratio: 0.5,
        };
        let spans = plan_addresses(RegisterKind::Input, addresses, &cfg);
        assert_eq!(ranges(&spans), [(0, 0), (10, 10), (20, 20)]);
    }

    #[test]
    fn catalogue_plan_covers_active_registers_once() {
        let features = FeatureSet::from_features([Feature::DhwCylinder, Feature::Zone2]);
        let active = active_registers(&features);
        let plan = plan(&active, &PlannerConfig::default());
        for register in active.iter() {
            let covering = plan[&register.kind()].iter().filter(|s| s.covers(register)).count();
            assert_eq!(covering, 1, "{register} covered {covering} times");
        }
        for spans in plan.values() {
            for pair in spans.windows(2) {
                assert!(pair[0].end() < pair[1].start);
            }
        }
    }
}
