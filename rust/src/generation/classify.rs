//! Speed rounding and per-QPC bandwidth classification.
//!
//! Buckets every active fabric position into a speed bin and collapses
//! redundant multi-lane claims inside a QPC into one claim on its master lane.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::SchedulerConfig;
use crate::error::{SchedResult, SchedulerError};
use crate::log_debug;
use crate::mask::PortMask;
use crate::models::{
    is_multi_lane, qpc_of, FabricPos, PcieBifurcation, Port, PortId, PortKind, QpcIndex, SpeedBin,
    LANES_PER_QPC, NUM_FABRIC_PORTS, NUM_QPC, QPC_MAX_BANDWIDTH_MBPS,
};

/// Supported link rates, ascending.
pub const SUPPORTED_SPEEDS: [u32; 6] = [2_500, 10_000, 25_000, 40_000, 60_000, 100_000];

/// Highest rate a PCIe endpoint is scheduled for.
pub const PCIE_MAX_SPEED: u32 = 40_000;

/// Round a requested speed up to the nearest supported bin.
///
/// PCIe endpoints are scheduled at no more than 40G; a 50G (x8 Gen3) request
/// maps to 40G.
pub fn round_speed(speed_mbps: u32, kind: &PortKind) -> SchedResult<u32> {
    if speed_mbps == 0 {
        return Ok(0);
    }
    if kind.is_pcie() && speed_mbps == 50_000 {
        return Ok(PCIE_MAX_SPEED);
    }
    let rounded = SUPPORTED_SPEEDS
        .iter()
        .copied()
        .find(|&s| s >= speed_mbps)
        .ok_or(SchedulerError::InvalidSpeed(speed_mbps))?;
    if kind.is_pcie() {
        Ok(rounded.min(PCIE_MAX_SPEED))
    } else {
        Ok(rounded)
    }
}

/// Result of classifying a port list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    /// Rounded speed each fabric position asked for, before collapsing.
    pub requested: Vec<u32>,
    /// Speed each fabric position is placed with, after collapsing.
    pub fabric_speed: Vec<u32>,
    /// Placement claim covers the lanes of the whole QPC.
    pub spread: Vec<bool>,
    pub quad: Vec<bool>,
    pub fabric_to_phys: Vec<Option<PortId>>,
    pub phys_speed: FxHashMap<PortId, u32>,
    /// Fabric positions per real speed bin.
    pub by_bin: FxHashMap<SpeedBin, PortMask>,
}

impl Classification {
    pub fn bin_of(&self, fabric: FabricPos) -> Option<SpeedBin> {
        self.fabric_speed
            .get(fabric)
            .and_then(|&s| SpeedBin::from_speed(s))
    }

    pub fn ports_in_bin(&self, bin: SpeedBin) -> usize {
        self.by_bin.get(&bin).map_or(0, PortMask::count_non_zero)
    }

    /// Speed a port claims once its QPC's slots are seeded.
    ///
    /// Lanes folded into a collapsed claim still claim their own requested
    /// speed, except lanes taken over by a quad port.
    pub fn claim_speed(&self, fabric: FabricPos) -> u32 {
        let requested = self.requested.get(fabric).copied().unwrap_or(0);
        if self.fabric_speed.get(fabric).copied().unwrap_or(0) > 0 {
            return requested;
        }
        let base = qpc_of(fabric) * LANES_PER_QPC;
        let under_quad = (base..base + LANES_PER_QPC).any(|f| {
            f != fabric && self.spread.get(f) == Some(&true) && self.quad.get(f) == Some(&true)
        });
        if under_quad {
            0
        } else {
            requested
        }
    }
}

/// Reject port lists that do not describe a consistent fabric.
pub fn validate_ports(ports: &[Port]) -> SchedResult<()> {
    let mut fabrics = FxHashSet::default();
    let mut ids = FxHashSet::default();
    for port in ports {
        if port.fabric_pos >= NUM_FABRIC_PORTS {
            return Err(SchedulerError::InvalidArgument(format!(
                "port {} has fabric position {} (max {})",
                port.physical_id,
                port.fabric_pos,
                NUM_FABRIC_PORTS - 1
            )));
        }
        if !fabrics.insert(port.fabric_pos) {
            return Err(SchedulerError::InvalidArgument(format!(
                "fabric position {} assigned twice",
                port.fabric_pos
            )));
        }
        if !ids.insert(port.physical_id) {
            return Err(SchedulerError::InvalidArgument(format!(
                "physical port {} listed twice",
                port.physical_id
            )));
        }
    }
    Ok(())
}

fn disabled_by_bifurcation(kind: &PortKind, config: &SchedulerConfig) -> bool {
    match kind {
        PortKind::Pcie { pep } => {
            pep % 2 == 1 && config.bifurcation_for(*pep) == PcieBifurcation::OneByEight
        }
        _ => false,
    }
}

/// Classify `ports` into speed bins.
pub fn classify(ports: &[Port], config: &SchedulerConfig) -> SchedResult<Classification> {
    validate_ports(ports)?;

    let mut requested = vec![0u32; NUM_FABRIC_PORTS];
    let mut quad = vec![false; NUM_FABRIC_PORTS];
    let mut fabric_to_phys = vec![None; NUM_FABRIC_PORTS];

    for port in ports {
        let mut speed = round_speed(port.speed_mbps, &port.kind)?;
        if disabled_by_bifurcation(&port.kind, config) {
            log_debug!(
                config.verbosity,
                "  Port {} disabled by PCIe bifurcation",
                port.physical_id
            );
            speed = 0;
        }
        requested[port.fabric_pos] = speed;
        quad[port.fabric_pos] = port.quad && speed > 0;
        fabric_to_phys[port.fabric_pos] = Some(port.physical_id);
    }

    let mut fabric_speed = requested.clone();
    let mut spread = vec![false; NUM_FABRIC_PORTS];
    for qpc in 0..NUM_QPC {
        collapse_qpc(qpc, &mut fabric_speed, &mut spread, &quad, config.verbosity)?;
    }

    let mut by_bin: FxHashMap<SpeedBin, PortMask> = FxHashMap::default();
    for (fabric, &speed) in fabric_speed.iter().enumerate() {
        if let Some(bin) = SpeedBin::from_speed(speed) {
            by_bin
                .entry(bin)
                .or_insert_with(|| PortMask::new(NUM_FABRIC_PORTS))
                .set(fabric, true);
        }
    }

    let phys_speed = ports
        .iter()
        .map(|p| (p.physical_id, fabric_speed[p.fabric_pos]))
        .collect();

    Ok(Classification {
        requested,
        fabric_speed,
        spread,
        quad,
        fabric_to_phys,
        phys_speed,
        by_bin,
    })
}

/// Apply the collapsing rules to one QPC.
fn collapse_qpc(
    qpc: QpcIndex,
    fabric_speed: &mut [u32],
    spread: &mut [bool],
    quad: &[bool],
    verbosity: u8,
) -> SchedResult<()> {
    let base = qpc * LANES_PER_QPC;
    let lanes = base..base + LANES_PER_QPC;

    let masters: Vec<FabricPos> = lanes
        .clone()
        .filter(|&f| fabric_speed[f] > 0 && is_multi_lane(fabric_speed[f], quad[f]))
        .collect();
    if masters.len() > 1 {
        return Err(SchedulerError::SchedInitConflict(qpc));
    }

    let all_at = |speed: u32| lanes.clone().all(|f| fabric_speed[f] == speed);
    let collapse_to = |master: FabricPos, speed: u32, fabric_speed: &mut [u32], spread: &mut [bool]| {
        for f in lanes.clone() {
            fabric_speed[f] = 0;
        }
        fabric_speed[master] = speed;
        spread[master] = true;
    };

    if all_at(25_000) {
        log_debug!(verbosity, "  QPC {}: 4x25G collapsed to 100G", qpc);
        collapse_to(base, 100_000, fabric_speed, spread);
    } else if all_at(10_000) {
        log_debug!(verbosity, "  QPC {}: 4x10G collapsed to 40G", qpc);
        collapse_to(base, 40_000, fabric_speed, spread);
    } else if let Some(&master) = masters.first() {
        if quad[master] {
            let speed = fabric_speed[master];
            collapse_to(master, speed, fabric_speed, spread);
        } else if lanes
            .clone()
            .any(|f| f != master && fabric_speed[f] > 10_000)
        {
            log_debug!(
                verbosity,
                "  QPC {}: multi-lane port with >10G lane collapsed to 100G",
                qpc
            );
            collapse_to(master, 100_000, fabric_speed, spread);
        }
    }

    let total: u32 = lanes.clone().map(|f| fabric_speed[f]).sum();
    if total > QPC_MAX_BANDWIDTH_MBPS {
        return Err(SchedulerError::Oversubscribed(format!(
            "QPC {} needs {} Mbps (max {})",
            qpc, total, QPC_MAX_BANDWIDTH_MBPS
        )));
    }
    Ok(())
}
