//! Placement difficulty ranking.
//!
//! Ports whose QPC mixes speeds are the hardest to space and are placed
//! first. Ties are striped across QPCs so the placer does not exhaust one
//! QPC's neighbourhood before visiting the others.

use std::collections::BTreeMap;

use crate::log_debug;
use crate::models::{qpc_of, FabricPos, PortId, QpcIndex, LANES_PER_QPC};

/// Difficulty of placing one fabric position, ascending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Difficulty {
    /// Inactive port; never placed.
    Invalid,
    OtherActive,
    /// 2.5G port whose QPC holds only other 2.5G ports.
    QuarterShared,
    /// 2.5G port next to 25G or 10G ports.
    QuarterWithFaster,
    /// 25G or 10G port next to 2.5G ports.
    FasterWithQuarter,
    TenShared,
    TwentyFiveShared,
    TenWithTwentyFive,
    TwentyFiveWithTen,
}

/// One ranked fabric position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DifficultyEntry {
    pub fabric: FabricPos,
    pub port: Option<PortId>,
    pub score: Difficulty,
}

#[derive(Default)]
struct QpcMix {
    quarter: usize,
    ten: usize,
    twenty_five: usize,
}

fn qpc_mix(fabric_speed: &[u32], qpc: QpcIndex) -> QpcMix {
    let base = qpc * LANES_PER_QPC;
    let mut mix = QpcMix::default();
    for &speed in fabric_speed.iter().skip(base).take(LANES_PER_QPC) {
        match speed {
            2_500 => mix.quarter += 1,
            10_000 => mix.ten += 1,
            25_000 => mix.twenty_five += 1,
            _ => {}
        }
    }
    mix
}

/// Score one fabric position from its QPC composition.
pub fn score(fabric_speed: &[u32], fabric: FabricPos) -> Difficulty {
    let speed = fabric_speed.get(fabric).copied().unwrap_or(0);
    if speed == 0 {
        return Difficulty::Invalid;
    }
    let mix = qpc_mix(fabric_speed, qpc_of(fabric));

    match speed {
        25_000 if mix.ten > 0 => Difficulty::TwentyFiveWithTen,
        10_000 if mix.twenty_five > 0 => Difficulty::TenWithTwentyFive,
        25_000 if mix.twenty_five > 1 => Difficulty::TwentyFiveShared,
        10_000 if mix.ten > 1 => Difficulty::TenShared,
        25_000 | 10_000 if mix.quarter > 0 => Difficulty::FasterWithQuarter,
        2_500 if mix.twenty_five > 0 || mix.ten > 0 => Difficulty::QuarterWithFaster,
        2_500 if mix.quarter > 1 => Difficulty::QuarterShared,
        _ => Difficulty::OtherActive,
    }
}

/// Rank every fabric position hardest-first.
///
/// Within one score band, entries are taken round-robin by ascending QPC
/// index, one per QPC per round.
pub fn rank_ports(
    fabric_speed: &[u32],
    fabric_to_phys: &[Option<PortId>],
    verbosity: u8,
) -> Vec<DifficultyEntry> {
    let mut entries: Vec<DifficultyEntry> = (0..fabric_speed.len())
        .map(|fabric| DifficultyEntry {
            fabric,
            port: fabric_to_phys.get(fabric).copied().flatten(),
            score: score(fabric_speed, fabric),
        })
        .collect();

    entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.fabric.cmp(&b.fabric)));

    let mut ranked = Vec::with_capacity(entries.len());
    let mut band_start = 0;
    while band_start < entries.len() {
        let band_score = entries[band_start].score;
        let band_end = entries[band_start..]
            .iter()
            .position(|e| e.score != band_score)
            .map_or(entries.len(), |offset| band_start + offset);

        ranked.extend(stripe_by_qpc(&entries[band_start..band_end]));
        band_start = band_end;
    }

    for entry in ranked.iter().filter(|e| e.score != Difficulty::Invalid) {
        log_debug!(
            verbosity,
            "  Rank: fabric {} (QPC {}) {:?}",
            entry.fabric,
            qpc_of(entry.fabric),
            entry.score
        );
    }

    ranked
}

/// Interleave a band so consecutive entries come from different QPCs.
fn stripe_by_qpc(band: &[DifficultyEntry]) -> Vec<DifficultyEntry> {
    let mut per_qpc: BTreeMap<QpcIndex, Vec<DifficultyEntry>> = BTreeMap::new();
    for entry in band {
        per_qpc.entry(qpc_of(entry.fabric)).or_default().push(*entry);
    }

    let mut striped = Vec::with_capacity(band.len());
    let mut round = 0;
    while striped.len() < band.len() {
        for queue in per_qpc.values() {
            if let Some(entry) = queue.get(round) {
                striped.push(*entry);
            }
        }
        round += 1;
    }
    striped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NUM_FABRIC_PORTS;

    fn speeds(assign: &[(FabricPos, u32)]) -> Vec<u32> {
        let mut v = vec![0; NUM_FABRIC_PORTS];
        for &(f, s) in assign {
            v[f] = s;
        }
        v
    }

    fn ids() -> Vec<Option<PortId>> {
        (0..NUM_FABRIC_PORTS).map(|f| Some(100 + f as PortId)).collect()
    }

    #[test]
    fn test_scores_follow_qpc_mix() {
        let s = speeds(&[
            (0, 25_000),
            (1, 10_000),
            (4, 2_500),
            (5, 2_500),
            (8, 25_000),
            (9, 25_000),
            (12, 10_000),
            (13, 10_000),
            (16, 25_000),
            (17, 2_500),
            (20, 40_000),
        ]);
        assert_eq!(score(&s, 0), Difficulty::TwentyFiveWithTen);
        assert_eq!(score(&s, 1), Difficulty::TenWithTwentyFive);
        assert_eq!(score(&s, 4), Difficulty::QuarterShared);
        assert_eq!(score(&s, 8), Difficulty::TwentyFiveShared);
        assert_eq!(score(&s, 12), Difficulty::TenShared);
        assert_eq!(score(&s, 16), Difficulty::FasterWithQuarter);
        assert_eq!(score(&s, 17), Difficulty::QuarterWithFaster);
        assert_eq!(score(&s, 20), Difficulty::OtherActive);
        assert_eq!(score(&s, 2), Difficulty::Invalid);
    }

    #[test]
    fn test_rank_orders_hardest_first_and_inactive_last() {
        let s = speeds(&[(0, 25_000), (1, 10_000), (4, 2_500), (5, 2_500), (20, 40_000)]);
        let ranked = rank_ports(&s, &ids(), 0);
        let order: Vec<FabricPos> = ranked.iter().take(5).map(|e| e.fabric).collect();
        assert_eq!(order, vec![0, 1, 4, 5, 20]);
        assert!(ranked[5..].iter().all(|e| e.score == Difficulty::Invalid));
        assert_eq!(ranked.len(), NUM_FABRIC_PORTS);
        assert_eq!(ranked[0].port, Some(100));
    }

    #[test]
    fn test_ties_are_striped_across_qpcs() {
        let s = speeds(&[(8, 25_000), (9, 25_000), (16, 25_000), (17, 25_000), (18, 25_000)]);
        let ranked = rank_ports(&s, &ids(), 0);
        let order: Vec<FabricPos> = ranked.iter().take(5).map(|e| e.fabric).collect();
        assert_eq!(order, vec![8, 16, 9, 17, 18]);
    }
}
