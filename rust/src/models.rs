//! Core data types for the slot scheduler.

use std::fmt;

/// Physical port number as handed out by the port allocator.
pub type PortId = u32;

/// Index into the switch's internal crossbar port space (`qpc * 4 + lane`).
pub type FabricPos = usize;

/// Position in the TDM ring.
pub type SlotIndex = usize;

/// Quad port channel index.
pub type QpcIndex = usize;

pub const LANES_PER_QPC: usize = 4;
pub const NUM_QPC: usize = 12;
pub const NUM_FABRIC_PORTS: usize = NUM_QPC * LANES_PER_QPC;

/// Minimum cyclic distance between two different ports of the same QPC.
pub const MIN_QPC_SPACING: usize = 4;

/// Aggregate bandwidth one QPC can carry.
pub const QPC_MAX_BANDWIDTH_MBPS: u32 = 100_000;

/// Bandwidth represented by a single slot.
pub const SLOT_SPEED_MBPS: u32 = 2_500;

/// Ports above this speed consume more than one lane of their QPC.
pub const MULTI_LANE_THRESHOLD_MBPS: u32 = 25_000;

#[inline]
pub fn qpc_of(fabric: FabricPos) -> QpcIndex {
    fabric / LANES_PER_QPC
}

#[inline]
pub fn lane_of(fabric: FabricPos) -> usize {
    fabric % LANES_PER_QPC
}

#[inline]
pub fn is_multi_lane(speed_mbps: u32, quad: bool) -> bool {
    quad || speed_mbps > MULTI_LANE_THRESHOLD_MBPS
}

/// Cyclic distance between two ring positions.
#[inline]
pub fn cyclic_distance(a: SlotIndex, b: SlotIndex, length: usize) -> usize {
    let d = a.abs_diff(b);
    d.min(length - d)
}

/// Per-slot speed label.
///
/// The first seven variants are real speed bins that survive into a committed
/// schedule. The remaining variants are intermediate labels used only while
/// the speed list is being split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpeedBin {
    Idle,
    Speed2500M,
    Speed10G,
    Speed25G,
    Speed40G,
    Speed60G,
    Speed100G,
    /// Every slot before the first split.
    Unsplit,
    /// Slots reserved for 10G, 40G, 60G and 100G (all multiples of 4 units).
    TenGigMultiple,
    /// Slots left for 25G, 2.5G and idle.
    NotTenGigMultiple,
    /// 10G-multiple slots that are not 100G.
    BelowHundredGig,
    /// 10G-multiple slots that are neither 100G nor 60G.
    FortyOrTenGig,
    /// Slots left after 25G was carved out.
    IdleOrQuarter,
}

impl SpeedBin {
    /// Real bins in ascending speed order.
    pub const REAL: [SpeedBin; 7] = [
        SpeedBin::Idle,
        SpeedBin::Speed2500M,
        SpeedBin::Speed10G,
        SpeedBin::Speed25G,
        SpeedBin::Speed40G,
        SpeedBin::Speed60G,
        SpeedBin::Speed100G,
    ];

    pub fn is_virtual(self) -> bool {
        matches!(
            self,
            SpeedBin::Unsplit
                | SpeedBin::TenGigMultiple
                | SpeedBin::NotTenGigMultiple
                | SpeedBin::BelowHundredGig
                | SpeedBin::FortyOrTenGig
                | SpeedBin::IdleOrQuarter
        )
    }

    /// Slots one port of this bin consumes, in 2.5G units.
    pub fn slot_units(self) -> usize {
        match self {
            SpeedBin::Speed2500M => 1,
            SpeedBin::Speed10G => 4,
            SpeedBin::Speed25G => 10,
            SpeedBin::Speed40G => 16,
            SpeedBin::Speed60G => 24,
            SpeedBin::Speed100G => 40,
            _ => 0,
        }
    }

    pub fn speed_mbps(self) -> u32 {
        match self {
            SpeedBin::Speed2500M => 2_500,
            SpeedBin::Speed10G => 10_000,
            SpeedBin::Speed25G => 25_000,
            SpeedBin::Speed40G => 40_000,
            SpeedBin::Speed60G => 60_000,
            SpeedBin::Speed100G => 100_000,
            _ => 0,
        }
    }

    /// Bin for an already rounded speed. Returns `None` for 0 or an
    /// unsupported value.
    pub fn from_speed(speed_mbps: u32) -> Option<SpeedBin> {
        match speed_mbps {
            2_500 => Some(SpeedBin::Speed2500M),
            10_000 => Some(SpeedBin::Speed10G),
            25_000 => Some(SpeedBin::Speed25G),
            40_000 => Some(SpeedBin::Speed40G),
            60_000 => Some(SpeedBin::Speed60G),
            100_000 => Some(SpeedBin::Speed100G),
            _ => None,
        }
    }
}

impl fmt::Display for SpeedBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpeedBin::Idle => "idle",
            SpeedBin::Speed2500M => "2.5G",
            SpeedBin::Speed10G => "10G",
            SpeedBin::Speed25G => "25G",
            SpeedBin::Speed40G => "40G",
            SpeedBin::Speed60G => "60G",
            SpeedBin::Speed100G => "100G",
            SpeedBin::Unsplit => "unsplit",
            SpeedBin::TenGigMultiple => "10G-multiple",
            SpeedBin::NotTenGigMultiple => "not-10G-multiple",
            SpeedBin::BelowHundredGig => "below-100G",
            SpeedBin::FortyOrTenGig => "40G-or-10G",
            SpeedBin::IdleOrQuarter => "idle-or-2.5G",
        };
        f.write_str(name)
    }
}

/// Slots needed to carry `speed_mbps` (0 for an inactive port).
pub fn slots_for_speed(speed_mbps: u32) -> usize {
    speed_mbps.div_ceil(SLOT_SPEED_MBPS) as usize
}

/// How a PCIe host interface pair is bifurcated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PcieBifurcation {
    /// Both endpoints of the pair run x4.
    #[default]
    TwoByFour,
    /// The even endpoint runs x8; the odd endpoint is disabled.
    OneByEight,
}

/// Hardware block behind a fabric position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortKind {
    Ethernet { epl: u8, lane: u8 },
    Pcie { pep: u8 },
    TunnelEngine,
    Loopback,
    Fibm,
}

impl PortKind {
    pub fn is_ethernet(&self) -> bool {
        matches!(self, PortKind::Ethernet { .. })
    }

    pub fn is_pcie(&self) -> bool {
        matches!(self, PortKind::Pcie { .. })
    }
}

/// A physical port as configured by the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    pub physical_id: PortId,
    pub fabric_pos: FabricPos,
    pub speed_mbps: u32,
    pub quad: bool,
    pub kind: PortKind,
}

impl Port {
    pub fn new(
        physical_id: PortId,
        fabric_pos: FabricPos,
        speed_mbps: u32,
        quad: bool,
        kind: PortKind,
    ) -> Self {
        Self {
            physical_id,
            fabric_pos,
            speed_mbps,
            quad,
            kind,
        }
    }

    /// Ethernet port whose EPL lane mirrors its fabric position.
    pub fn ethernet(physical_id: PortId, fabric_pos: FabricPos, speed_mbps: u32) -> Self {
        Self::new(
            physical_id,
            fabric_pos,
            speed_mbps,
            false,
            PortKind::Ethernet {
                epl: qpc_of(fabric_pos) as u8,
                lane: lane_of(fabric_pos) as u8,
            },
        )
    }

    pub fn qpc(&self) -> QpcIndex {
        qpc_of(self.fabric_pos)
    }

    pub fn lane(&self) -> usize {
        lane_of(self.fabric_pos)
    }
}

/// One position in the TDM ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    pub owner: Option<PortId>,
    pub fabric: Option<FabricPos>,
    pub quad: bool,
    pub idle: bool,
}

impl Slot {
    pub const IDLE: Slot = Slot {
        owner: None,
        fabric: None,
        quad: false,
        idle: true,
    };

    pub fn owned(owner: PortId, fabric: FabricPos, quad: bool) -> Self {
        Self {
            owner: Some(owner),
            fabric: Some(fabric),
            quad,
            idle: false,
        }
    }

    pub fn qpc(&self) -> Option<QpcIndex> {
        self.fabric.map(qpc_of)
    }
}

impl Default for Slot {
    fn default() -> Self {
        Slot::IDLE
    }
}

/// Per-port speed view returned to the port state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortSpeedInfo {
    /// Bandwidth of all slots currently owned by the port.
    pub assigned_speed: u32,
    /// Bandwidth of owned slots on the port's own lane.
    pub single_lane_speed: u32,
    /// Bandwidth of owned slots borrowed from other lanes.
    pub multi_lane_speed: u32,
    pub reserved_speed: u32,
    pub pre_reserved_speed: u32,
    pub is_quad: bool,
}
