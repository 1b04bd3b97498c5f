//! Proportional split of the ring into per-slot speed labels.
//!
//! The ring starts out fully `Unsplit` and is carved by a fixed cascade of
//! credit splits, fastest tiers first, so that rare fast bins get the most
//! even spacing and idle/2.5G take whatever spacing falls out last.

use rustc_hash::FxHashMap;

use crate::error::{SchedResult, SchedulerError};
use crate::log_debug;
use crate::models::{SpeedBin, MIN_QPC_SPACING};

/// Slot count per real bin for one ring.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotBudget {
    pub length: usize,
    pub slots: FxHashMap<SpeedBin, usize>,
}

impl SlotBudget {
    /// Budget for `ports_per_bin` ports of each bin in a ring of `length`.
    pub fn new(length: usize, ports_per_bin: &FxHashMap<SpeedBin, usize>) -> Self {
        let slots = ports_per_bin
            .iter()
            .filter(|(bin, &n)| !bin.is_virtual() && **bin != SpeedBin::Idle && n > 0)
            .map(|(&bin, &n)| (bin, n * bin.slot_units()))
            .collect();
        Self { length, slots }
    }

    pub fn slots_for(&self, bin: SpeedBin) -> usize {
        self.slots.get(&bin).copied().unwrap_or(0)
    }

    pub fn used(&self) -> usize {
        self.slots.values().sum()
    }

    /// Idle slots left over; negative when oversubscribed.
    pub fn idle(&self) -> isize {
        self.length as isize - self.used() as isize
    }

    pub fn fastest(&self) -> Option<SpeedBin> {
        self.slots.keys().copied().max()
    }
}

/// Relabel slots currently tagged `target`.
///
/// Walking the template in order, each `target` slot adds `count_b` credit;
/// once the credit reaches `count_a + count_b` the slot becomes `label_b` and
/// the total is subtracted, otherwise it becomes `label_a`. Exactly `count_b`
/// slots receive `label_b` when the template holds `count_a + count_b` slots
/// tagged `target`.
pub fn split(
    template: &[SpeedBin],
    target: SpeedBin,
    count_a: usize,
    label_a: SpeedBin,
    count_b: usize,
    label_b: SpeedBin,
) -> Vec<SpeedBin> {
    let total = count_a + count_b;
    debug_assert_eq!(
        template.iter().filter(|&&b| b == target).count(),
        total,
        "split of {} expects {} slots",
        target,
        total
    );

    let mut credit = 0usize;
    template
        .iter()
        .map(|&bin| {
            if bin != target {
                return bin;
            }
            credit += count_b;
            if credit >= total {
                credit -= total;
                label_b
            } else {
                label_a
            }
        })
        .collect()
}

/// Build the per-slot speed template for `budget`.
pub fn build_speed_list(budget: &SlotBudget, verbosity: u8) -> SchedResult<Vec<SpeedBin>> {
    let n = budget.length;
    let idle = budget.idle();
    if idle <= 0 {
        return Err(SchedulerError::Oversubscribed(format!(
            "{} slots requested in a ring of {}",
            budget.used(),
            n
        )));
    }
    if let Some(fastest) = budget.fastest() {
        let needed = MIN_QPC_SPACING * fastest.slot_units();
        if n < needed {
            return Err(SchedulerError::Oversubscribed(format!(
                "ring of {} slots cannot space {} at {} cycles (needs {})",
                n, fastest, MIN_QPC_SPACING, needed
            )));
        }
    }
    let idle = idle as usize;

    let s100 = budget.slots_for(SpeedBin::Speed100G);
    let s60 = budget.slots_for(SpeedBin::Speed60G);
    let s40 = budget.slots_for(SpeedBin::Speed40G);
    let s25 = budget.slots_for(SpeedBin::Speed25G);
    let s10 = budget.slots_for(SpeedBin::Speed10G);
    let s2500 = budget.slots_for(SpeedBin::Speed2500M);

    let ten_multiple = s100 + s60 + s40 + s10;
    let rest = n - ten_multiple;

    let t = vec![SpeedBin::Unsplit; n];
    let t = split(
        &t,
        SpeedBin::Unsplit,
        rest,
        SpeedBin::NotTenGigMultiple,
        ten_multiple,
        SpeedBin::TenGigMultiple,
    );
    let t = split(
        &t,
        SpeedBin::TenGigMultiple,
        ten_multiple - s100,
        SpeedBin::BelowHundredGig,
        s100,
        SpeedBin::Speed100G,
    );
    let t = split(
        &t,
        SpeedBin::BelowHundredGig,
        s40 + s10,
        SpeedBin::FortyOrTenGig,
        s60,
        SpeedBin::Speed60G,
    );
    let t = split(
        &t,
        SpeedBin::FortyOrTenGig,
        s10,
        SpeedBin::Speed10G,
        s40,
        SpeedBin::Speed40G,
    );
    let t = split(
        &t,
        SpeedBin::NotTenGigMultiple,
        rest - s25,
        SpeedBin::IdleOrQuarter,
        s25,
        SpeedBin::Speed25G,
    );
    let t = split(
        &t,
        SpeedBin::IdleOrQuarter,
        s2500,
        SpeedBin::Speed2500M,
        idle,
        SpeedBin::Idle,
    );

    log_debug!(
        verbosity,
        "  Speed list: {} slots, {} idle, 100G={} 60G={} 40G={} 25G={} 10G={} 2.5G={}",
        n,
        idle,
        s100,
        s60,
        s40,
        s25,
        s10,
        s2500
    );

    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(length: usize, ports: &[(SpeedBin, usize)]) -> SlotBudget {
        let map: FxHashMap<SpeedBin, usize> = ports.iter().copied().collect();
        SlotBudget::new(length, &map)
    }

    fn label_counts(template: &[SpeedBin]) -> FxHashMap<SpeedBin, usize> {
        let mut counts = FxHashMap::default();
        for &bin in template {
            *counts.entry(bin).or_insert(0) += 1;
        }
        counts
    }

    fn positions(template: &[SpeedBin], bin: SpeedBin) -> Vec<usize> {
        template
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == bin)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_split_assigns_exact_count_evenly() {
        let t = vec![SpeedBin::Unsplit; 12];
        let t = split(&t, SpeedBin::Unsplit, 9, SpeedBin::Idle, 3, SpeedBin::Speed10G);
        assert_eq!(positions(&t, SpeedBin::Speed10G), vec![3, 7, 11]);
        assert_eq!(positions(&t, SpeedBin::Idle).len(), 9);
    }

    #[test]
    fn test_split_leaves_other_labels() {
        let t = vec![
            SpeedBin::Speed25G,
            SpeedBin::Unsplit,
            SpeedBin::Speed25G,
            SpeedBin::Unsplit,
        ];
        let t = split(&t, SpeedBin::Unsplit, 1, SpeedBin::Idle, 1, SpeedBin::Speed10G);
        assert_eq!(
            t,
            vec![
                SpeedBin::Speed25G,
                SpeedBin::Idle,
                SpeedBin::Speed25G,
                SpeedBin::Speed10G
            ]
        );
    }

    #[test]
    fn test_counts_match_budget() {
        let b = budget(
            400,
            &[
                (SpeedBin::Speed100G, 1),
                (SpeedBin::Speed40G, 2),
                (SpeedBin::Speed25G, 3),
                (SpeedBin::Speed10G, 5),
                (SpeedBin::Speed2500M, 7),
            ],
        );
        let t = build_speed_list(&b, 0).unwrap();
        let counts = label_counts(&t);

        assert_eq!(counts[&SpeedBin::Speed100G], 40);
        assert_eq!(counts[&SpeedBin::Speed40G], 32);
        assert_eq!(counts[&SpeedBin::Speed25G], 30);
        assert_eq!(counts[&SpeedBin::Speed10G], 20);
        assert_eq!(counts[&SpeedBin::Speed2500M], 7);
        assert_eq!(counts[&SpeedBin::Idle], 400 - 129);
        assert!(t.iter().all(|b| !b.is_virtual()));
    }

    #[test]
    fn test_single_tier_is_evenly_spaced() {
        let b = budget(400, &[(SpeedBin::Speed10G, 2)]);
        let t = build_speed_list(&b, 0).unwrap();
        assert_eq!(
            positions(&t, SpeedBin::Speed10G),
            vec![49, 99, 149, 199, 249, 299, 349, 399]
        );
    }

    #[test]
    fn test_full_ring_is_oversubscribed() {
        let b = budget(40, &[(SpeedBin::Speed10G, 10)]);
        assert!(matches!(
            build_speed_list(&b, 0),
            Err(SchedulerError::Oversubscribed(_))
        ));
    }

    #[test]
    fn test_ring_too_short_for_fastest_tier() {
        let b = budget(15, &[(SpeedBin::Speed2500M, 2)]);
        assert!(build_speed_list(&b, 0).is_ok());

        let b = budget(159, &[(SpeedBin::Speed100G, 1)]);
        assert!(matches!(
            build_speed_list(&b, 0),
            Err(SchedulerError::Oversubscribed(_))
        ));

        let b = budget(160, &[(SpeedBin::Speed100G, 1)]);
        assert!(build_speed_list(&b, 0).is_ok());
    }

    #[test]
    fn test_empty_budget_is_all_idle() {
        let b = budget(8, &[]);
        let t = build_speed_list(&b, 0).unwrap();
        assert_eq!(t, vec![SpeedBin::Idle; 8]);
    }
}
