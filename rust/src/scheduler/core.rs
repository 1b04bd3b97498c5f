//! Scheduler front end: generation, incremental updates and queries.
//!
//! Lock order: the port attribute table is always taken before the state
//! lock. Generation and [`Scheduler::update_sched_port`] hold both.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::{SchedulerConfig, SchedulerMode};
use crate::error::{SchedResult, SchedulerError};
use crate::generation::{
    classify::Classification, compute_stats, generate_ring, round_speed,
    schedule_length_from_clock, validate, ScheduleStats,
};
use crate::hw::{commit_ring, ClockSource, RegisterIo};
use crate::models::{
    is_multi_lane, lane_of, qpc_of, FabricPos, Port, PortId, PortKind, PortSpeedInfo, QpcIndex,
    Slot, NUM_QPC, SLOT_SPEED_MBPS,
};
use crate::{log_changes, log_debug};

use super::qpc_state::{apply_to_slots, is_fully_free, seed, update_port, PortRequest};
use super::reservation::{Reservation, ReservationTable, ReserveKind};
use super::state::{CommitKind, CommitRecord, ScheduleSnapshot, SchedulerState};

/// Logical port (GLORT) allocation provided by the platform.
pub trait PortResolver: Send + Sync {
    fn logical_to_physical(&self, logical: u32) -> Option<PortId>;
    fn physical_to_logical(&self, port: PortId) -> Option<u32>;
}

/// Resolver for logical ports numbered contiguously from `base`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetResolver {
    pub base: u32,
}

impl PortResolver for OffsetResolver {
    fn logical_to_physical(&self, logical: u32) -> Option<PortId> {
        logical.checked_sub(self.base)
    }

    fn physical_to_logical(&self, port: PortId) -> Option<u32> {
        self.base.checked_add(port)
    }
}

/// Link attributes the port state machine last applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortAttributes {
    pub speed_mbps: u32,
    pub quad: bool,
}

fn not_initialized() -> SchedulerError {
    SchedulerError::InvalidArgument("scheduler has not been initialized".to_string())
}

fn unknown_port(port: PortId) -> SchedulerError {
    SchedulerError::InvalidArgument(format!("unknown port {}", port))
}

fn attributes_of(ports: &[Port]) -> FxHashMap<PortId, PortAttributes> {
    ports
        .iter()
        .map(|p| {
            (
                p.physical_id,
                PortAttributes {
                    speed_mbps: p.speed_mbps,
                    quad: p.quad,
                },
            )
        })
        .collect()
}

/// TDM ring scheduler for one switch.
pub struct Scheduler {
    port_attributes: Mutex<FxHashMap<PortId, PortAttributes>>,
    state: Mutex<SchedulerState>,
    clock: Box<dyn ClockSource>,
    resolver: Option<Box<dyn PortResolver>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        io: Box<dyn RegisterIo>,
        clock: Box<dyn ClockSource>,
    ) -> Self {
        Self {
            port_attributes: Mutex::new(FxHashMap::default()),
            state: Mutex::new(SchedulerState::new(config, io)),
            clock,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn PortResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Resolve the ring length and generate the first schedule for `ports`.
    ///
    /// A configured length wins over the clock. Nothing is stored unless
    /// the schedule commits.
    pub fn init_scheduler(&self, ports: Vec<Port>) -> SchedResult<()> {
        self.generate(ports, |state| state.config.schedule_length)
    }

    /// Generate a fresh schedule for `ports` and commit it.
    ///
    /// Reuses the length of the last successful generation, querying the
    /// clock when there is none.
    pub fn generate_schedule(&self, ports: Vec<Port>) -> SchedResult<()> {
        self.generate(ports, |state| state.length)
    }

    fn generate(
        &self,
        ports: Vec<Port>,
        known_length: impl Fn(&SchedulerState) -> Option<usize>,
    ) -> SchedResult<()> {
        let mut attributes = self.port_attributes.lock();
        let mut state = self.state.lock();
        let length = match known_length(&*state) {
            Some(n) => n,
            None => schedule_length_from_clock(
                self.clock.as_ref(),
                state.config.oversubscription_margin_bps,
            )?,
        };
        log_changes!(state.config.verbosity, "Schedule length: {} slots", length);

        let table = attributes_of(&ports);
        Self::generate_locked(&mut state, ports, length, CommitKind::Generate)?;
        *attributes = table;
        Ok(())
    }

    /// Generate again from the reserved speeds of the known ports.
    ///
    /// The reservation table is left as it is, so back-to-back calls commit
    /// identical snapshots.
    pub fn regenerate_schedule(&self) -> SchedResult<()> {
        let mut state = self.state.lock();
        if state.active.is_none() {
            return Err(not_initialized());
        }
        let length = state.length.ok_or_else(not_initialized)?;

        let ports: Vec<Port> = state
            .ports
            .values()
            .map(|p| {
                let r = state.reservations.get(p.physical_id).unwrap_or_default();
                Port {
                    speed_mbps: r.reserved_speed,
                    quad: r.reserved_quad,
                    ..p.clone()
                }
            })
            .collect();

        let (snapshot, _) = build_snapshot(&state.config, &ports, length, false)?;
        Self::commit(&mut state, snapshot, CommitKind::Regenerate)?;
        Ok(())
    }

    fn generate_locked(
        state: &mut SchedulerState,
        ports: Vec<Port>,
        length: usize,
        kind: CommitKind,
    ) -> SchedResult<()> {
        // Ethernet links are claimed on negotiation, except after the first
        // generation or in static mode.
        let defer_ethernet = state.active.is_none() && state.config.mode == SchedulerMode::Dynamic;

        let (snapshot, classification) =
            build_snapshot(&state.config, &ports, length, defer_ethernet)?;
        let reservations = ReservationTable::seeded(&ports, |p| {
            classification
                .requested
                .get(p.fabric_pos)
                .copied()
                .unwrap_or(0)
        });

        Self::commit(state, snapshot, kind)?;
        state.length = Some(length);
        state.reservations = reservations;
        state.ports = ports.into_iter().map(|p| (p.physical_id, p)).collect();
        Ok(())
    }

    /// Write `snapshot` to hardware and make it active.
    fn commit(
        state: &mut SchedulerState,
        snapshot: ScheduleSnapshot,
        kind: CommitKind,
    ) -> SchedResult<u64> {
        let page = commit_ring(state.io.as_mut(), &snapshot.slots, state.active_page)?;
        state.active_page = page;
        state.active = Some(snapshot);
        let generation = state.record_commit(kind);
        log_changes!(
            state.config.verbosity,
            "Committed schedule generation {} ({:?}) on page {}",
            generation,
            kind,
            page
        );
        Ok(generation)
    }

    /// Move one port to a new speed and mode without regenerating the ring.
    ///
    /// The new speed must pass admission against the reserved column first.
    /// Only the port's QPC is recomputed.
    pub fn update_sched_port(&self, port: PortId, speed_mbps: u32, quad: bool) -> SchedResult<()> {
        let mut attributes = self.port_attributes.lock();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let active = state.active.as_ref().ok_or_else(not_initialized)?;
        let kind = state.port(port).map(|p| p.kind).ok_or_else(|| unknown_port(port))?;
        let fabric = *active
            .phys_to_fabric
            .get(&port)
            .ok_or_else(|| unknown_port(port))?;
        let length = active.len();

        let speed = round_speed(speed_mbps, &kind)?;
        let quad = quad && speed > 0;
        let mut reservations = state.reservations.clone();
        reservations.reserve(port, speed, quad, ReserveKind::ReservedOnly, length)?;

        let qpc = qpc_of(fabric);
        let mut candidate = active.clone();
        let qpc_state = candidate
            .qpc_states
            .get_mut(qpc)
            .ok_or_else(|| SchedulerError::Internal(format!("no state for QPC {}", qpc)))?;
        update_port(
            qpc_state,
            PortRequest::new(port, fabric, speed, quad),
            length,
            state.config.allow_update_violation,
            state.config.verbosity,
        )?;
        apply_to_slots(&candidate.qpc_states[qpc], qpc, &mut candidate.slots);

        Self::commit(state, candidate, CommitKind::Update)?;
        state.reservations = reservations;
        attributes.insert(
            port,
            PortAttributes {
                speed_mbps: speed,
                quad,
            },
        );
        Ok(())
    }

    /// Exchange the slot sets of two QPCs that have no owned slots.
    pub fn swap_qpc_bandwidth(&self, a: QpcIndex, b: QpcIndex) -> SchedResult<()> {
        if a >= NUM_QPC || b >= NUM_QPC || a == b {
            return Err(SchedulerError::InvalidArgument(format!(
                "cannot swap QPC {} with QPC {}",
                a, b
            )));
        }

        let mut state = self.state.lock();
        let active = state.active.as_ref().ok_or_else(not_initialized)?;
        for qpc in [a, b] {
            if !is_fully_free(&active.qpc_states[qpc]) {
                return Err(SchedulerError::PortInUse(format!(
                    "QPC {} still owns slots",
                    qpc
                )));
            }
        }

        let mut candidate = active.clone();
        candidate.qpc_states.swap(a, b);
        for qpc in [a, b] {
            apply_to_slots(&candidate.qpc_states[qpc], qpc, &mut candidate.slots);
        }
        Self::commit(&mut state, candidate, CommitKind::Swap)?;
        Ok(())
    }

    /// Reserve bandwidth for an ordinary port (both columns).
    pub fn reserve_bw(&self, port: PortId, speed_mbps: u32, quad: bool) -> SchedResult<()> {
        self.reserve(port, speed_mbps, quad, ReserveKind::Both)
    }

    /// Record a negotiated speed before the link is confirmed.
    pub fn pre_reserve_bw(&self, port: PortId, speed_mbps: u32, quad: bool) -> SchedResult<()> {
        self.reserve(port, speed_mbps, quad, ReserveKind::PreOnly)
    }

    /// Confirm a negotiated port's speed.
    pub fn reserve_bw_for_negotiated_port(
        &self,
        port: PortId,
        speed_mbps: u32,
        quad: bool,
    ) -> SchedResult<()> {
        self.reserve(port, speed_mbps, quad, ReserveKind::ReservedOnly)
    }

    fn reserve(&self, port: PortId, speed_mbps: u32, quad: bool, kind: ReserveKind) -> SchedResult<()> {
        let mut state = self.state.lock();
        let length = state
            .active
            .as_ref()
            .map(ScheduleSnapshot::len)
            .or(state.length)
            .ok_or_else(not_initialized)?;
        state
            .reservations
            .reserve(port, speed_mbps, quad, kind, length)?;
        log_changes!(
            state.config.verbosity,
            "Reserved {} Mbps{} for port {} ({:?})",
            speed_mbps,
            if quad { " quad" } else { "" },
            port,
            kind
        );
        Ok(())
    }

    pub fn get_port_speed_info(&self, port: PortId) -> SchedResult<PortSpeedInfo> {
        let state = self.state.lock();
        let active = state.active.as_ref().ok_or_else(not_initialized)?;
        let fabric = *active
            .phys_to_fabric
            .get(&port)
            .ok_or_else(|| unknown_port(port))?;
        let lane = lane_of(fabric);

        let mut total = 0u32;
        let mut own_lane = 0u32;
        let mut quad = false;
        for entry in active.qpc_states[qpc_of(fabric)]
            .values()
            .filter(|e| e.owner == Some(port))
        {
            total += 1;
            if entry.lane == lane {
                own_lane += 1;
            }
            quad |= entry.quad;
        }

        let reservation = state.reservations.get(port).unwrap_or_default();
        Ok(PortSpeedInfo {
            assigned_speed: total * SLOT_SPEED_MBPS,
            single_lane_speed: own_lane * SLOT_SPEED_MBPS,
            multi_lane_speed: (total - own_lane) * SLOT_SPEED_MBPS,
            reserved_speed: reservation.reserved_speed,
            pre_reserved_speed: reservation.pre_reserved_speed,
            is_quad: quad || reservation.reserved_quad,
        })
    }

    pub fn map_physical_to_fabric(&self, port: PortId) -> SchedResult<FabricPos> {
        let state = self.state.lock();
        state
            .port(port)
            .map(|p| p.fabric_pos)
            .ok_or_else(|| unknown_port(port))
    }

    pub fn map_fabric_to_physical(&self, fabric: FabricPos) -> SchedResult<PortId> {
        let state = self.state.lock();
        state.port_at(fabric).map(|p| p.physical_id).ok_or_else(|| {
            SchedulerError::InvalidArgument(format!("no port at fabric position {}", fabric))
        })
    }

    /// Ethernet port logic block and lane of `port`.
    pub fn map_physical_to_epl_lane(&self, port: PortId) -> SchedResult<(u8, u8)> {
        let state = self.state.lock();
        match state.port(port).map(|p| p.kind) {
            Some(PortKind::Ethernet { epl, lane }) => Ok((epl, lane)),
            Some(other) => Err(SchedulerError::InvalidArgument(format!(
                "port {} is not an Ethernet port ({:?})",
                port, other
            ))),
            None => Err(unknown_port(port)),
        }
    }

    pub fn map_logical_to_fabric(&self, logical: u32) -> SchedResult<FabricPos> {
        let port = self
            .resolver()?
            .logical_to_physical(logical)
            .ok_or_else(|| {
                SchedulerError::InvalidArgument(format!("unknown logical port {}", logical))
            })?;
        self.map_physical_to_fabric(port)
    }

    pub fn map_fabric_to_logical(&self, fabric: FabricPos) -> SchedResult<u32> {
        let port = self.map_fabric_to_physical(fabric)?;
        self.resolver()?.physical_to_logical(port).ok_or_else(|| {
            SchedulerError::InvalidArgument(format!("port {} has no logical port", port))
        })
    }

    fn resolver(&self) -> SchedResult<&dyn PortResolver> {
        self.resolver.as_deref().ok_or_else(|| {
            SchedulerError::InvalidArgument("no logical port resolver configured".to_string())
        })
    }

    pub fn active_snapshot(&self) -> Option<ScheduleSnapshot> {
        self.state.lock().active.clone()
    }

    /// Distribution statistics of the active ring.
    pub fn stats(&self) -> Option<ScheduleStats> {
        let state = self.state.lock();
        state
            .active
            .as_ref()
            .map(|s| compute_stats(&s.template, &s.slots))
    }

    pub fn schedule_length(&self) -> Option<usize> {
        self.state.lock().length
    }

    pub fn reservation(&self, port: PortId) -> Option<Reservation> {
        self.state.lock().reservations.get(port)
    }

    pub fn reservations(&self) -> ReservationTable {
        self.state.lock().reservations.clone()
    }

    pub fn commit_history(&self) -> Vec<CommitRecord> {
        self.state.lock().history.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn port_attributes(&self, port: PortId) -> Option<PortAttributes> {
        self.port_attributes.lock().get(&port).copied()
    }
}

/// Generate, seed and validate a complete snapshot for `ports`.
///
/// Ownership is established by letting every port claim its requested speed,
/// single-lane ports first so multi-lane ports only borrow what is left.
fn build_snapshot(
    config: &SchedulerConfig,
    ports: &[Port],
    length: usize,
    defer_ethernet: bool,
) -> SchedResult<(ScheduleSnapshot, Classification)> {
    let ring = generate_ring(ports, config, length)?;
    let c = ring.classification;
    let mut qpc_states = seed(&ring.placement.slots, &c.spread);

    let quad_at = |fabric: FabricPos| c.quad.get(fabric).copied().unwrap_or(false);
    let mut claimants: Vec<&Port> = ports
        .iter()
        .filter(|p| c.claim_speed(p.fabric_pos) > 0)
        .collect();
    claimants.sort_by_key(|p| {
        (
            is_multi_lane(c.claim_speed(p.fabric_pos), quad_at(p.fabric_pos)),
            p.fabric_pos,
        )
    });

    for port in claimants {
        if defer_ethernet && port.kind.is_ethernet() {
            log_debug!(
                config.verbosity,
                "  Port {} left free until link negotiation",
                port.physical_id
            );
            continue;
        }
        let request = PortRequest::new(
            port.physical_id,
            port.fabric_pos,
            c.claim_speed(port.fabric_pos),
            quad_at(port.fabric_pos),
        );
        let state = qpc_states.get_mut(port.qpc()).ok_or_else(|| {
            SchedulerError::Internal(format!("no state for QPC {}", port.qpc()))
        })?;
        update_port(state, request, length, false, config.verbosity)?;
    }

    let mut slots = vec![Slot::IDLE; length];
    for (qpc, state) in qpc_states.iter().enumerate() {
        apply_to_slots(state, qpc, &mut slots);
    }

    let port_speed: FxHashMap<PortId, u32> = ports
        .iter()
        .map(|p| (p.physical_id, c.claim_speed(p.fabric_pos)))
        .collect();
    validate(&ring.placement.template, &slots, &port_speed)?;

    let phys_to_fabric: BTreeMap<PortId, FabricPos> =
        ports.iter().map(|p| (p.physical_id, p.fabric_pos)).collect();
    let snapshot = ScheduleSnapshot {
        slots,
        template: ring.placement.template,
        qpc_states,
        phys_to_fabric,
        fabric_to_phys: c.fabric_to_phys.clone(),
    };
    Ok((snapshot, c))
}
