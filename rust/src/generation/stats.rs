//! Slot distribution statistics and schedule validation.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::error::{SchedResult, SchedulerError};
use crate::models::{PortId, QpcIndex, Slot, SlotIndex, SpeedBin, MIN_QPC_SPACING};

/// Occurrence statistics of one key (speed, QPC or port) around the ring.
///
/// Gaps are cyclic: the gap from the last occurrence back to the first wraps
/// through the end of the ring. A key seen once has a single gap of `N`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub count: usize,
    pub first_slot: SlotIndex,
    pub last_slot: SlotIndex,
    pub min_gap: usize,
    pub max_gap: usize,
    /// Slot that ends the smallest gap.
    pub min_gap_at: SlotIndex,
    /// Slot that ends the largest gap.
    pub max_gap_at: SlotIndex,
}

impl SlotStats {
    fn observe(&mut self, slot: SlotIndex) {
        if self.count == 0 {
            self.first_slot = slot;
        } else {
            self.record_gap(slot - self.last_slot, slot);
        }
        self.last_slot = slot;
        self.count += 1;
    }

    fn record_gap(&mut self, gap: usize, at: SlotIndex) {
        // min_gap is 0 only until the first gap is seen.
        if self.min_gap == 0 || gap < self.min_gap {
            self.min_gap = gap;
            self.min_gap_at = at;
        }
        if gap > self.max_gap {
            self.max_gap = gap;
            self.max_gap_at = at;
        }
    }

    /// Close the cycle from the last occurrence back to the first.
    fn wrap(&mut self, length: usize) {
        if self.count > 0 {
            self.record_gap(self.first_slot + length - self.last_slot, self.first_slot);
        }
    }

    /// Spread between the largest and smallest gap.
    pub fn jitter(&self) -> usize {
        self.max_gap - self.min_gap
    }
}

/// Spread between the largest and smallest cyclic gap of `slots`.
pub fn gap_jitter(slots: &[SlotIndex], length: usize) -> usize {
    let mut sorted = slots.to_vec();
    sorted.sort_unstable();
    let mut stats = SlotStats::default();
    for s in sorted {
        stats.observe(s);
    }
    stats.wrap(length);
    stats.jitter()
}

/// Per speed, QPC and port statistics of a ring.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    pub length: usize,
    pub idle_slots: usize,
    pub by_speed: BTreeMap<SpeedBin, SlotStats>,
    pub by_qpc: BTreeMap<QpcIndex, SlotStats>,
    pub by_port: BTreeMap<PortId, SlotStats>,
}

/// Collect statistics for `slots` labelled by `template`.
pub fn compute_stats(template: &[SpeedBin], slots: &[Slot]) -> ScheduleStats {
    let length = template.len();
    let mut stats = ScheduleStats {
        length,
        ..ScheduleStats::default()
    };

    for (i, &bin) in template.iter().enumerate() {
        if bin == SpeedBin::Idle {
            stats.idle_slots += 1;
        } else {
            stats.by_speed.entry(bin).or_default().observe(i);
        }
    }

    for (i, slot) in slots.iter().enumerate() {
        if slot.idle {
            continue;
        }
        if let Some(qpc) = slot.qpc() {
            stats.by_qpc.entry(qpc).or_default().observe(i);
        }
        if let Some(owner) = slot.owner {
            stats.by_port.entry(owner).or_default().observe(i);
        }
    }

    let all = stats
        .by_speed
        .values_mut()
        .chain(stats.by_qpc.values_mut())
        .chain(stats.by_port.values_mut());
    for entry in all {
        entry.wrap(length);
    }
    stats
}

/// Check a generated ring and return its statistics.
///
/// `port_speed` maps each port to the speed it runs at; ports at 10G must
/// see evenly spaced slots.
pub fn validate(
    template: &[SpeedBin],
    slots: &[Slot],
    port_speed: &FxHashMap<PortId, u32>,
) -> SchedResult<ScheduleStats> {
    if template.len() != slots.len() {
        return Err(SchedulerError::Internal(format!(
            "template has {} slots but ring has {}",
            template.len(),
            slots.len()
        )));
    }

    if let Some((i, bin)) = template.iter().enumerate().find(|(_, b)| b.is_virtual()) {
        return Err(SchedulerError::SchedViolation(format!(
            "slot {} still labelled {}",
            i, bin
        )));
    }

    if let Some(i) = slots
        .iter()
        .zip(template)
        .position(|(s, &b)| !s.idle && b == SpeedBin::Idle)
    {
        return Err(SchedulerError::SchedViolation(format!(
            "slot {} is owned but labelled idle",
            i
        )));
    }

    let stats = compute_stats(template, slots);

    if stats.idle_slots == 0 {
        return Err(SchedulerError::SchedViolation(
            "ring has no idle slot".to_string(),
        ));
    }
    if template.first() != Some(&SpeedBin::Idle) || slots.first().is_some_and(|s| !s.idle) {
        return Err(SchedulerError::SchedViolation(
            "slot 0 is not idle".to_string(),
        ));
    }

    for (qpc, s) in &stats.by_qpc {
        if s.count > 1 && s.min_gap < MIN_QPC_SPACING {
            return Err(SchedulerError::SchedViolation(format!(
                "QPC {} slots {} cycles apart at slot {} (min {})",
                qpc, s.min_gap, s.min_gap_at, MIN_QPC_SPACING
            )));
        }
    }

    for (port, s) in &stats.by_port {
        if port_speed.get(port) == Some(&10_000) && s.jitter() > 1 {
            return Err(SchedulerError::SchedViolation(format!(
                "10G port {} gaps range from {} to {}",
                port, s.min_gap, s.max_gap
            )));
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize, owned: &[(SlotIndex, PortId, usize)]) -> (Vec<SpeedBin>, Vec<Slot>) {
        let mut template = vec![SpeedBin::Idle; n];
        let mut slots = vec![Slot::IDLE; n];
        for &(i, owner, fabric) in owned {
            template[i] = SpeedBin::Speed10G;
            slots[i] = Slot::owned(owner, fabric, false);
        }
        (template, slots)
    }

    #[test]
    fn test_gaps_include_wraparound() {
        let (t, s) = ring(20, &[(2, 1, 0), (7, 1, 0), (15, 1, 0)]);
        let stats = compute_stats(&t, &s);
        let port = stats.by_port[&1];

        assert_eq!(port.count, 3);
        assert_eq!((port.first_slot, port.last_slot), (2, 15));
        assert_eq!(port.min_gap, 5);
        assert_eq!(port.min_gap_at, 7);
        assert_eq!(port.max_gap, 8);
        assert_eq!(port.max_gap_at, 15);
        assert_eq!(stats.idle_slots, 17);
        assert_eq!(stats.by_speed[&SpeedBin::Speed10G].count, 3);
    }

    #[test]
    fn test_single_occurrence_gap_is_ring_length() {
        let (t, s) = ring(12, &[(5, 3, 4)]);
        let stats = compute_stats(&t, &s);
        assert_eq!(stats.by_port[&3].min_gap, 12);
        assert_eq!(stats.by_port[&3].max_gap, 12);
        assert_eq!(stats.by_qpc[&1].count, 1);
    }

    #[test]
    fn test_gap_jitter_is_order_independent() {
        assert_eq!(gap_jitter(&[300, 0, 100, 200], 400), 0);
        assert_eq!(gap_jitter(&[19, 99, 219, 299], 400), 40);
        assert_eq!(gap_jitter(&[0, 100, 200, 300], 401), 1);
        assert_eq!(gap_jitter(&[7], 400), 0);
        assert_eq!(gap_jitter(&[], 400), 0);
    }

    #[test]
    fn test_validate_accepts_even_ring() {
        let (t, s) = ring(16, &[(2, 1, 0), (6, 2, 1), (10, 1, 0), (14, 2, 1)]);
        let speeds: FxHashMap<PortId, u32> = [(1, 10_000), (2, 10_000)].into_iter().collect();
        let stats = validate(&t, &s, &speeds).unwrap();
        assert_eq!(stats.by_qpc[&0].min_gap, 4);
        assert_eq!(stats.by_port[&1].jitter(), 0);
    }

    #[test]
    fn test_validate_rejects_close_qpc_slots() {
        let (t, s) = ring(16, &[(2, 1, 0), (5, 2, 1)]);
        let err = validate(&t, &s, &FxHashMap::default()).unwrap_err();
        assert!(matches!(err, SchedulerError::SchedViolation(_)));
    }

    #[test]
    fn test_validate_rejects_10g_jitter() {
        let (t, s) = ring(20, &[(2, 1, 0), (7, 1, 0), (15, 1, 0)]);
        let speeds: FxHashMap<PortId, u32> = [(1, 10_000)].into_iter().collect();
        assert!(validate(&t, &s, &speeds).is_err());
        // The same ring is fine for a port that is not 10G.
        let speeds: FxHashMap<PortId, u32> = [(1, 25_000)].into_iter().collect();
        assert!(validate(&t, &s, &speeds).is_ok());
    }

    #[test]
    fn test_validate_rejects_busy_slot_zero_and_virtual_labels() {
        let (t, s) = ring(8, &[(0, 1, 0)]);
        assert!(validate(&t, &s, &FxHashMap::default()).is_err());

        let (mut t, s) = ring(8, &[]);
        t[3] = SpeedBin::IdleOrQuarter;
        assert!(validate(&t, &s, &FxHashMap::default()).is_err());

        let t = vec![SpeedBin::Speed10G; 4];
        let s = vec![Slot::owned(1, 0, false); 4];
        assert!(validate(&t, &s, &FxHashMap::default()).is_err());
    }
}
