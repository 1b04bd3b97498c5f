//! Port placement into the speed template.
//!
//! Each bin's slots are shared by the ports of that bin. A port takes one
//! stride-`k` selection of the bin's free slots, where `k` is the number of
//! ports still waiting for that bin, so every port's slots stay evenly spread
//! around the ring. When no stride group clears the QPC spacing, the port
//! takes an evenly spaced set of idle slots instead and the bin gives up as
//! many of its own slots to idle.

use rustc_hash::FxHashMap;

use crate::error::{SchedResult, SchedulerError};
use crate::generation::classify::Classification;
use crate::generation::difficulty::{Difficulty, DifficultyEntry};
use crate::generation::stats::gap_jitter;
use crate::mask::PortMask;
use crate::models::{
    cyclic_distance, qpc_of, FabricPos, PortId, Slot, SlotIndex, SpeedBin, MIN_QPC_SPACING,
};
use crate::{log_changes, log_checks};

/// Result of placing every ranked port.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    /// Template after any 2.5G/idle swaps made during placement.
    pub template: Vec<SpeedBin>,
    pub slots: Vec<Slot>,
}

/// Mutable placement state for one ring.
pub struct Placer<'a> {
    template: Vec<SpeedBin>,
    slots: Vec<Slot>,
    used: Vec<bool>,
    /// Tick of the last assignment or relabel of each slot; 0 if never.
    touched: Vec<u64>,
    tick: u64,
    /// Fabric positions per bin not yet given slots.
    unplaced: FxHashMap<SpeedBin, PortMask>,
    quad: &'a [bool],
    verbosity: u8,
}

impl<'a> Placer<'a> {
    pub fn new(template: Vec<SpeedBin>, classification: &'a Classification, verbosity: u8) -> Self {
        let n = template.len();
        Self {
            template,
            slots: vec![Slot::IDLE; n],
            used: vec![false; n],
            touched: vec![0; n],
            tick: 0,
            unplaced: classification.by_bin.clone(),
            quad: &classification.quad,
            verbosity,
        }
    }

    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    pub fn template(&self) -> &[SpeedBin] {
        &self.template
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn into_placement(self) -> Placement {
        Placement {
            template: self.template,
            slots: self.slots,
        }
    }

    /// True if `owner` at `fabric` may occupy `slot` without landing within
    /// spacing distance of a different port of the same QPC.
    pub fn spacing_ok(&self, slot: SlotIndex, fabric: FabricPos, owner: PortId) -> bool {
        let n = self.len();
        let qpc = qpc_of(fabric);
        (1..MIN_QPC_SPACING).all(|d| {
            [(slot + d) % n, (slot + n - d % n) % n].iter().all(|&j| {
                let other = &self.slots[j];
                other.idle || other.qpc() != Some(qpc) || other.owner == Some(owner)
            })
        })
    }

    /// Free slots of `bin`, excluding slot 0, in ring order.
    fn free_positions(&self, bin: SpeedBin) -> Vec<SlotIndex> {
        (1..self.len())
            .filter(|&i| self.template[i] == bin && !self.used[i])
            .collect()
    }

    fn touch(&mut self, slot: SlotIndex) {
        self.tick += 1;
        self.touched[slot] = self.tick;
    }

    fn assign(&mut self, slot: SlotIndex, fabric: FabricPos, owner: PortId) {
        let quad = self.quad.get(fabric).copied().unwrap_or(false);
        self.slots[slot] = Slot::owned(owner, fabric, quad);
        self.used[slot] = true;
        self.touch(slot);
    }

    /// Slot 0 stays idle; other unused slots labelled `bin` or idle may host
    /// a port of `bin`.
    fn open_for(&self, slot: SlotIndex, bin: SpeedBin) -> bool {
        slot != 0
            && !self.used[slot]
            && (self.template[slot] == bin || self.template[slot] == SpeedBin::Idle)
    }

    /// An evenly spaced set of `bin.slot_units()` open slots that keeps the QPC
    /// spacing. Gaps between picks differ by at most one.
    fn shifted_group(
        &self,
        fabric: FabricPos,
        owner: PortId,
        bin: SpeedBin,
    ) -> Option<Vec<SlotIndex>> {
        let n = self.len();
        let units = bin.slot_units();
        if units == 0 || n / units < MIN_QPC_SPACING {
            return None;
        }
        (1..n)
            .map(|start| {
                (0..units)
                    .map(|i| (start + i * n / units) % n)
                    .collect::<Vec<_>>()
            })
            .find(|picks| {
                picks
                    .iter()
                    .all(|&s| self.open_for(s, bin) && self.spacing_ok(s, fabric, owner))
            })
    }

    /// Relabel the idle slots among `picks` as `bin`, demoting the nearest
    /// free `bin` slot outside `picks` to idle for each one.
    fn promote_into(&mut self, bin: SpeedBin, picks: &[SlotIndex]) {
        let n = self.len();
        let idle: Vec<SlotIndex> = picks
            .iter()
            .copied()
            .filter(|&s| self.template[s] == SpeedBin::Idle)
            .collect();
        for slot in idle {
            let demoted = (1..n)
                .filter(|&i| self.template[i] == bin && !self.used[i] && !picks.contains(&i))
                .min_by_key(|&i| cyclic_distance(i, slot, n));
            self.template[slot] = bin;
            self.touch(slot);
            if let Some(d) = demoted {
                self.template[d] = SpeedBin::Idle;
                self.touch(d);
            }
        }
    }

    fn claim_group(&mut self, picks: &[SlotIndex], fabric: FabricPos, owner: PortId, bin: SpeedBin) {
        for &s in picks {
            self.assign(s, fabric, owner);
        }
        self.mark_placed(bin, fabric);
        log_changes!(
            self.verbosity,
            "  Placed port {} (fabric {}) at {}: {} slots from {}",
            owner,
            fabric,
            bin,
            picks.len(),
            picks.first().copied().unwrap_or(0)
        );
    }

    fn mark_placed(&mut self, bin: SpeedBin, fabric: FabricPos) {
        if let Some(mask) = self.unplaced.get_mut(&bin) {
            mask.set(fabric, false);
        }
    }

    /// Give `owner` one stride group of `bin`'s free slots, or an evenly
    /// spaced set of idle slots when no group keeps the QPC spacing.
    ///
    /// 10G ports only accept groups whose gaps differ by at most one.
    pub fn place(&mut self, fabric: FabricPos, owner: PortId, bin: SpeedBin) -> SchedResult<()> {
        let units = bin.slot_units();
        let k = self
            .unplaced
            .get(&bin)
            .map_or(0, PortMask::count_non_zero)
            .max(1);
        let positions = self.free_positions(bin);
        if units == 0 || positions.len() < k * units {
            return Err(SchedulerError::SchedViolation(format!(
                "{} bin has {} free slots for {} ports of {} slots",
                bin,
                positions.len(),
                k,
                units
            )));
        }

        for group in 0..k {
            let picks: Vec<SlotIndex> = (0..units).map(|i| positions[group + i * k]).collect();
            if let Some(&bad) = picks.iter().find(|&&s| !self.spacing_ok(s, fabric, owner)) {
                log_checks!(
                    self.verbosity,
                    "    Port {} {}: group {} rejected at slot {}",
                    owner,
                    bin,
                    group,
                    bad
                );
                continue;
            }
            if bin == SpeedBin::Speed10G && gap_jitter(&picks, self.len()) > 1 {
                log_checks!(
                    self.verbosity,
                    "    Port {} {}: group {} is unevenly spaced",
                    owner,
                    bin,
                    group
                );
                continue;
            }

            self.claim_group(&picks, fabric, owner, bin);
            return Ok(());
        }

        // 2.5G ports fall back to `place_2500` instead.
        if units > 1 {
            if let Some(picks) = self.shifted_group(fabric, owner, bin) {
                log_checks!(
                    self.verbosity,
                    "    Port {} {}: moved onto idle slots from {}",
                    owner,
                    bin,
                    picks[0]
                );
                self.promote_into(bin, &picks);
                self.claim_group(&picks, fabric, owner, bin);
                return Ok(());
            }
        }

        Err(SchedulerError::SchedViolation(format!(
            "no {} group for port {} keeps QPC {} spacing",
            bin,
            owner,
            qpc_of(fabric)
        )))
    }

    /// Place a 2.5G port on an idle slot.
    ///
    /// The chosen idle slot becomes 2.5G and the least recently touched free
    /// 2.5G slot becomes idle, keeping the bin counts unchanged.
    pub fn place_2500(&mut self, fabric: FabricPos, owner: PortId) -> SchedResult<()> {
        let promoted = (1..self.len())
            .find(|&i| self.template[i] == SpeedBin::Idle && self.spacing_ok(i, fabric, owner))
            .ok_or_else(|| {
                SchedulerError::SchedViolation(format!(
                    "no idle slot keeps QPC {} spacing for 2.5G port {}",
                    qpc_of(fabric),
                    owner
                ))
            })?;

        self.template[promoted] = SpeedBin::Speed2500M;
        self.assign(promoted, fabric, owner);

        let demoted = (1..self.len())
            .filter(|&i| self.template[i] == SpeedBin::Speed2500M && !self.used[i])
            .min_by_key(|&i| self.touched[i]);
        if let Some(demoted) = demoted {
            self.template[demoted] = SpeedBin::Idle;
            self.touch(demoted);
            log_checks!(
                self.verbosity,
                "    Port {}: idle slot {} swapped with 2.5G slot {}",
                owner,
                promoted,
                demoted
            );
        }
        self.mark_placed(SpeedBin::Speed2500M, fabric);
        log_changes!(
            self.verbosity,
            "  Placed port {} (fabric {}) at 2.5G: slot {}",
            owner,
            fabric,
            promoted
        );
        Ok(())
    }

    /// Distance from `slot` forward to the next occupied slot.
    fn distance_to_next_occupied(&self, slot: SlotIndex) -> usize {
        let n = self.len();
        (1..n)
            .find(|&d| !self.slots[(slot + d) % n].idle)
            .unwrap_or(n)
    }

    /// Assign single-slot 2.5G ports to the free 2.5G slots with the most room
    /// ahead of them.
    pub fn place_quarter_shared(&mut self, pending: &[(FabricPos, PortId)]) -> SchedResult<()> {
        let mut free = self.free_positions(SpeedBin::Speed2500M);
        // Stable sort keeps ring order among equal distances.
        free.sort_by_key(|&s| std::cmp::Reverse(self.distance_to_next_occupied(s)));

        for &(fabric, owner) in pending {
            let pick = free
                .iter()
                .position(|&s| {
                    // A fallback swap may have turned a listed slot idle.
                    self.template[s] == SpeedBin::Speed2500M
                        && !self.used[s]
                        && self.spacing_ok(s, fabric, owner)
                });
            match pick {
                Some(i) => {
                    let slot = free.remove(i);
                    self.assign(slot, fabric, owner);
                    self.mark_placed(SpeedBin::Speed2500M, fabric);
                    log_changes!(
                        self.verbosity,
                        "  Placed port {} (fabric {}) at 2.5G: slot {}",
                        owner,
                        fabric,
                        slot
                    );
                }
                None => self.place_2500(fabric, owner)?,
            }
        }
        Ok(())
    }
}

/// Place every ranked port into `template`.
///
/// Ports are placed in rank order. Ports that share their QPC only with other
/// 2.5G ports are deferred to a final pass.
pub fn place_ports(
    template: Vec<SpeedBin>,
    classification: &Classification,
    ranked: &[DifficultyEntry],
    verbosity: u8,
) -> SchedResult<Placement> {
    let mut placer = Placer::new(template, classification, verbosity);
    let mut deferred = Vec::new();

    for entry in ranked {
        if entry.score == Difficulty::Invalid {
            continue;
        }
        let (Some(owner), Some(bin)) = (entry.port, classification.bin_of(entry.fabric)) else {
            continue;
        };
        if entry.score == Difficulty::QuarterShared {
            deferred.push((entry.fabric, owner));
            continue;
        }

        match placer.place(entry.fabric, owner, bin) {
            Err(SchedulerError::SchedViolation(_)) if bin == SpeedBin::Speed2500M => {
                placer.place_2500(entry.fabric, owner)?
            }
            result => result?,
        }
    }

    placer.place_quarter_shared(&deferred)?;
    Ok(placer.into_placement())
}
