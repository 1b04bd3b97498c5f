//! Per-QPC slot ownership.
//!
//! Every non-idle slot of a generated ring becomes an entry in its QPC's
//! state. Entries start free and are claimed by ports as their links come up,
//! so a port can change speed later without regenerating the ring.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{SchedResult, SchedulerError};
use crate::generation::stats::gap_jitter;
use crate::models::{
    cyclic_distance, is_multi_lane, lane_of, qpc_of, slots_for_speed, FabricPos, PortId,
    QpcIndex, Slot, SlotIndex, SpeedBin, LANES_PER_QPC, MIN_QPC_SPACING, NUM_QPC,
};
use crate::{log_changes, log_checks, log_warn};

/// One slot of a QPC. `fabric_pos` and `owner` are `None` while free.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QpcEntry {
    pub fabric_pos: Option<FabricPos>,
    /// Lane the slot was generated for.
    pub lane: usize,
    pub quad: bool,
    pub owner: Option<PortId>,
}

impl QpcEntry {
    pub fn free(lane: usize) -> Self {
        Self {
            fabric_pos: None,
            lane,
            quad: false,
            owner: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    fn release(&mut self) {
        *self = QpcEntry::free(self.lane);
    }
}

/// Ownership map of one QPC, keyed by ring slot.
pub type QpcState = BTreeMap<SlotIndex, QpcEntry>;

/// A port asking for a new speed and mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRequest {
    pub owner: PortId,
    pub fabric: FabricPos,
    pub speed_mbps: u32,
    pub quad: bool,
}

impl PortRequest {
    pub fn new(owner: PortId, fabric: FabricPos, speed_mbps: u32, quad: bool) -> Self {
        Self {
            owner,
            fabric,
            speed_mbps,
            quad,
        }
    }

    pub fn is_multi_lane(&self) -> bool {
        is_multi_lane(self.speed_mbps, self.quad)
    }
}

/// Build free QPC states from a placed ring.
///
/// Slots of a spread claim are dealt round-robin over the QPC's lanes; all
/// other slots belong to the placed port's own lane.
pub fn seed(slots: &[Slot], spread: &[bool]) -> Vec<QpcState> {
    let mut states = vec![QpcState::new(); NUM_QPC];
    let mut dealt: BTreeMap<FabricPos, usize> = BTreeMap::new();

    for (i, slot) in slots.iter().enumerate() {
        let Some(fabric) = slot.fabric.filter(|_| !slot.idle) else {
            continue;
        };
        let lane = if spread.get(fabric).copied().unwrap_or(false) {
            let j = dealt.entry(fabric).or_insert(0);
            let lane = *j % LANES_PER_QPC;
            *j += 1;
            lane
        } else {
            lane_of(fabric)
        };
        if let Some(state) = states.get_mut(qpc_of(fabric)) {
            state.insert(i, QpcEntry::free(lane));
        }
    }
    states
}

/// `count` items of `items` spread evenly across it.
pub fn spread_pick<T: Copy>(items: &[T], count: usize) -> Vec<T> {
    if count == 0 || items.is_empty() {
        return Vec::new();
    }
    let count = count.min(items.len());
    (0..count).map(|i| items[i * items.len() / count]).collect()
}

/// Rotation of an even `count`-subset of `items` that leaves the smallest
/// gap jitter once combined with `held`.
pub fn even_pick(
    items: &[SlotIndex],
    count: usize,
    held: &[SlotIndex],
    length: usize,
) -> Vec<SlotIndex> {
    let len = items.len();
    let count = count.min(len);
    if count == 0 {
        return Vec::new();
    }
    (0..len)
        .map(|r| {
            (0..count)
                .map(|i| items[(r + i * len / count) % len])
                .collect::<Vec<_>>()
        })
        .min_by_key(|pick| {
            let all: Vec<SlotIndex> = held.iter().chain(pick).copied().collect();
            gap_jitter(&all, length)
        })
        .unwrap_or_default()
}

pub fn owned_by(state: &QpcState, owner: PortId) -> Vec<SlotIndex> {
    state
        .iter()
        .filter(|(_, e)| e.owner == Some(owner))
        .map(|(&i, _)| i)
        .collect()
}

pub fn free_slots(state: &QpcState) -> BTreeSet<SlotIndex> {
    state
        .iter()
        .filter(|(_, e)| e.is_free())
        .map(|(&i, _)| i)
        .collect()
}

pub fn is_fully_free(state: &QpcState) -> bool {
    state.values().all(QpcEntry::is_free)
}

/// First pair of differently owned entries closer than the QPC spacing.
pub fn spacing_conflict(state: &QpcState, length: usize) -> Option<(SlotIndex, SlotIndex)> {
    let owned: Vec<(SlotIndex, PortId)> = state
        .iter()
        .filter_map(|(&i, e)| e.owner.map(|o| (i, o)))
        .collect();
    for (a, &(i, owner_i)) in owned.iter().enumerate() {
        for &(j, owner_j) in &owned[a + 1..] {
            if owner_i != owner_j && cyclic_distance(i, j, length) < MIN_QPC_SPACING {
                return Some((i, j));
            }
        }
    }
    None
}

/// Move `req.owner` to its requested speed and mode within `state`.
///
/// 10G ports must end up with gaps that differ by at most one. With
/// `allow_violation` set, a shortage of free slots, uneven 10G gaps or a
/// spacing conflict is logged and the port keeps whatever it could claim.
pub fn update_port(
    state: &mut QpcState,
    req: PortRequest,
    length: usize,
    allow_violation: bool,
    verbosity: u8,
) -> SchedResult<()> {
    let lane = lane_of(req.fabric);
    let multi = req.is_multi_lane();
    let required = slots_for_speed(req.speed_mbps);
    let even = req.speed_mbps == SpeedBin::Speed10G.speed_mbps();

    // Entries on other lanes are only held by multi-lane ports.
    for entry in state.values_mut() {
        if entry.owner == Some(req.owner) && (required == 0 || (!multi && entry.lane != lane)) {
            entry.release();
        }
    }

    let owned = owned_by(state, req.owner);
    if owned.len() > required {
        let keep: BTreeSet<SlotIndex> = if even {
            even_pick(&owned, required, &[], length)
        } else {
            spread_pick(&owned, required)
        }
        .into_iter()
        .collect();
        for slot in owned.iter().filter(|s| !keep.contains(s)) {
            if let Some(entry) = state.get_mut(slot) {
                entry.release();
            }
        }
    } else if owned.len() < required {
        let need = required - owned.len();
        let same_lane: Vec<SlotIndex> = state
            .iter()
            .filter(|(_, e)| e.is_free() && e.lane == lane)
            .map(|(&i, _)| i)
            .collect();
        let other_lanes: Vec<SlotIndex> = if multi {
            state
                .iter()
                .filter(|(_, e)| e.is_free() && e.lane != lane)
                .map(|(&i, _)| i)
                .collect()
        } else {
            Vec::new()
        };

        let available = same_lane.len() + other_lanes.len();
        if available < need {
            let msg = format!(
                "port {} needs {} more slots in QPC {} but {} are free",
                req.owner,
                need,
                qpc_of(req.fabric),
                available
            );
            if !allow_violation {
                return Err(SchedulerError::SchedViolation(msg));
            }
            log_warn!("{}", msg);
        }

        let mut claim = if even {
            even_pick(&same_lane, need, &owned, length)
        } else {
            spread_pick(&same_lane, need)
        };
        if claim.len() < need {
            claim.extend(spread_pick(&other_lanes, need - claim.len()));
        }
        for slot in &claim {
            if let Some(entry) = state.get_mut(slot) {
                entry.owner = Some(req.owner);
                entry.fabric_pos = Some(req.fabric);
            }
        }
        log_checks!(
            verbosity,
            "    Port {} claimed {} slots in QPC {}",
            req.owner,
            claim.len(),
            qpc_of(req.fabric)
        );
    }

    for entry in state.values_mut().filter(|e| e.owner == Some(req.owner)) {
        entry.quad = req.quad;
    }

    if even {
        let owned = owned_by(state, req.owner);
        let jitter = gap_jitter(&owned, length);
        if jitter > 1 {
            let msg = format!(
                "10G port {} slots {:?} have gap jitter {}",
                req.owner, owned, jitter
            );
            if !allow_violation {
                return Err(SchedulerError::SchedViolation(msg));
            }
            log_warn!("{}", msg);
        }
    }

    if let Some((i, j)) = spacing_conflict(state, length) {
        let msg = format!(
            "QPC {} slots {} and {} are closer than {} cycles",
            qpc_of(req.fabric),
            i,
            j,
            MIN_QPC_SPACING
        );
        if !allow_violation {
            return Err(SchedulerError::SchedViolation(msg));
        }
        log_warn!("{}", msg);
    }

    log_changes!(
        verbosity,
        "  Port {} now owns {} slots at {} Mbps{}",
        req.owner,
        owned_by(state, req.owner).len(),
        req.speed_mbps,
        if req.quad { " (quad)" } else { "" }
    );
    Ok(())
}

/// Rewrite the ring slots covered by one QPC from its state.
pub fn apply_to_slots(state: &QpcState, qpc: QpcIndex, slots: &mut [Slot]) {
    for (&i, entry) in state {
        let Some(slot) = slots.get_mut(i) else {
            continue;
        };
        *slot = match (entry.owner, entry.fabric_pos) {
            (Some(owner), Some(fabric)) if qpc_of(fabric) == qpc => {
                Slot::owned(owner, fabric, entry.quad)
            }
            _ => Slot::IDLE,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 40 spread slots ten apart, dealt over the four lanes of QPC 0.
    fn spread_qpc() -> QpcState {
        let mut slots = vec![Slot::IDLE; 400];
        for k in 0..40 {
            slots[9 + 10 * k] = Slot::owned(1, 0, false);
        }
        let mut spread = vec![false; 48];
        spread[0] = true;
        seed(&slots, &spread).swap_remove(0)
    }

    #[test]
    fn test_seed_deals_spread_slots_over_lanes() {
        let state = spread_qpc();
        assert_eq!(state.len(), 40);
        assert!(is_fully_free(&state));
        assert_eq!(state[&9].lane, 0);
        assert_eq!(state[&19].lane, 1);
        assert_eq!(state[&49].lane, 0);
        assert_eq!(state.values().filter(|e| e.lane == 3).count(), 10);
    }

    #[test]
    fn test_seed_keeps_own_lane_without_spread() {
        let mut slots = vec![Slot::IDLE; 20];
        slots[3] = Slot::owned(7, 6, false);
        slots[13] = Slot::owned(7, 6, false);
        let states = seed(&slots, &[false; 48]);
        assert_eq!(states[1].len(), 2);
        assert!(states[1].values().all(|e| e.lane == 2));
        assert!(states[0].is_empty());
    }

    #[test]
    fn test_spread_pick_is_even() {
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(spread_pick(&items, 5), vec![0, 2, 4, 6, 8]);
        assert_eq!(spread_pick(&items, 3), vec![0, 3, 6]);
        assert_eq!(spread_pick(&items, 20).len(), 10);
        assert!(spread_pick(&items, 0).is_empty());
    }

    #[test]
    fn test_single_lane_claims_its_lane() {
        let mut state = spread_qpc();
        update_port(&mut state, PortRequest::new(11, 1, 25_000, false), 400, false, 0).unwrap();
        let owned = owned_by(&state, 11);
        assert_eq!(owned.len(), 10);
        assert!(owned.iter().all(|s| state[s].lane == 1));
        assert!(owned.iter().all(|s| state[s].fabric_pos == Some(1)));
    }

    #[test]
    fn test_multi_lane_borrows_other_lanes() {
        let mut state = spread_qpc();
        update_port(&mut state, PortRequest::new(11, 1, 40_000, false), 400, false, 0).unwrap();
        let owned = owned_by(&state, 11);
        assert_eq!(owned.len(), 16);
        assert_eq!(owned.iter().filter(|s| state[s].lane == 1).count(), 10);
    }

    #[test]
    fn test_shortage_fails_or_claims_partially() {
        let mut state = spread_qpc();
        update_port(&mut state, PortRequest::new(10, 0, 100_000, true), 400, false, 0).unwrap();

        // The quad port holds every slot, so lane 1 cannot grow.
        let mut strict = state.clone();
        let err = update_port(&mut strict, PortRequest::new(11, 1, 10_000, false), 400, false, 0)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::SchedViolation(_)));

        let mut lenient = state.clone();
        update_port(&mut lenient, PortRequest::new(11, 1, 10_000, false), 400, true, 0).unwrap();
        assert!(owned_by(&lenient, 11).is_empty());
        assert_eq!(owned_by(&lenient, 10).len(), 40);
    }

    #[test]
    fn test_quad_claims_other_lanes_then_shrinks_back() {
        let mut state = spread_qpc();
        update_port(&mut state, PortRequest::new(10, 0, 100_000, true), 400, false, 0).unwrap();
        assert_eq!(owned_by(&state, 10).len(), 40);
        assert!(state.values().all(|e| e.quad));

        update_port(&mut state, PortRequest::new(10, 0, 25_000, false), 400, false, 0).unwrap();
        let owned = owned_by(&state, 10);
        assert_eq!(owned.len(), 10);
        assert!(owned.iter().all(|s| state[s].lane == 0 && !state[s].quad));
    }

    #[test]
    fn test_10g_on_a_25g_lane_is_uneven() {
        // Lane 0 entries sit 40 apart, so no four of them are 100 apart.
        let mut state = spread_qpc();
        update_port(&mut state, PortRequest::new(10, 0, 25_000, false), 400, false, 0).unwrap();

        let mut strict = state.clone();
        let err = update_port(&mut strict, PortRequest::new(10, 0, 10_000, false), 400, false, 0)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::SchedViolation(_)));

        let mut lenient = state.clone();
        update_port(&mut lenient, PortRequest::new(10, 0, 10_000, false), 400, true, 0).unwrap();
        assert_eq!(owned_by(&lenient, 10).len(), 4);

        let mut fresh = spread_qpc();
        let req = PortRequest::new(11, 1, 10_000, false);
        assert!(update_port(&mut fresh, req, 400, false, 0).is_err());
    }

    #[test]
    fn test_10g_claims_the_even_rotation() {
        let mut state = QpcState::new();
        for slot in [5, 105, 150, 205, 305] {
            state.insert(slot, QpcEntry::free(2));
        }
        update_port(&mut state, PortRequest::new(7, 2, 10_000, false), 400, false, 0).unwrap();
        assert_eq!(owned_by(&state, 7), vec![5, 105, 205, 305]);
    }

    #[test]
    fn test_even_pick_prefers_lowest_jitter() {
        let items = [5, 105, 150, 205, 305];
        let mut pick = even_pick(&items, 4, &[], 400);
        pick.sort_unstable();
        assert_eq!(pick, vec![5, 105, 205, 305]);
        assert!(even_pick(&items, 0, &[], 400).is_empty());
        assert_eq!(even_pick(&items, 9, &[], 400).len(), 5);
    }

    #[test]
    fn test_update_then_release_restores_free_set() {
        let mut state = spread_qpc();
        update_port(&mut state, PortRequest::new(12, 2, 25_000, false), 400, false, 0).unwrap();
        let before = free_slots(&state);

        update_port(&mut state, PortRequest::new(13, 3, 60_000, false), 400, false, 0).unwrap();
        assert_ne!(free_slots(&state), before);
        update_port(&mut state, PortRequest::new(13, 3, 0, false), 400, false, 0).unwrap();
        assert_eq!(free_slots(&state), before);
    }

    #[test]
    fn test_spacing_conflict_detects_close_owners() {
        let mut state = QpcState::new();
        state.insert(1, QpcEntry { fabric_pos: Some(0), lane: 0, quad: false, owner: Some(1) });
        state.insert(3, QpcEntry { fabric_pos: Some(1), lane: 1, quad: false, owner: Some(2) });
        assert_eq!(spacing_conflict(&state, 40), Some((1, 3)));

        state.get_mut(&3).unwrap().owner = Some(1);
        assert_eq!(spacing_conflict(&state, 40), None);

        // Wraparound distance counts too.
        state.insert(39, QpcEntry { fabric_pos: Some(2), lane: 2, quad: false, owner: Some(3) });
        assert_eq!(spacing_conflict(&state, 40), Some((1, 39)));
    }

    #[test]
    fn test_apply_to_slots_renders_owned_and_free() {
        let mut state = spread_qpc();
        update_port(&mut state, PortRequest::new(11, 1, 25_000, false), 400, false, 0).unwrap();
        let mut slots = vec![Slot::owned(99, 0, false); 400];
        apply_to_slots(&state, 0, &mut slots);

        assert_eq!(slots.iter().filter(|s| s.owner == Some(11)).count(), 10);
        assert!(slots[9].idle);
        // Slots outside the QPC's entries are left alone.
        assert_eq!(slots[0].owner, Some(99));
    }
}
