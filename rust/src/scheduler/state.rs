//! Scheduler state: the committed ring and everything needed to change it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::hw::RegisterIo;
use crate::models::{FabricPos, Port, PortId, Slot, SpeedBin};

use super::qpc_state::QpcState;
use super::reservation::ReservationTable;

/// A complete ring with its ownership bookkeeping.
///
/// Cloned to build a candidate, which replaces the active snapshot only after
/// it has been validated and written to hardware.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleSnapshot {
    pub slots: Vec<Slot>,
    pub template: Vec<SpeedBin>,
    /// Indexed by QPC.
    pub qpc_states: Vec<QpcState>,
    pub phys_to_fabric: BTreeMap<PortId, FabricPos>,
    /// Indexed by fabric position.
    pub fabric_to_phys: Vec<Option<PortId>>,
}

impl ScheduleSnapshot {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Operation that produced a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitKind {
    Generate,
    Regenerate,
    Update,
    Swap,
}

/// One hardware commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    pub generation: u64,
    pub kind: CommitKind,
    pub committed_at: DateTime<Utc>,
}

/// Mutable scheduler state, guarded by the scheduler lock.
pub struct SchedulerState {
    pub config: SchedulerConfig,
    /// Ring length, resolved at initialization.
    pub length: Option<usize>,
    /// Ports of the last generation, keyed by physical id.
    pub ports: BTreeMap<PortId, Port>,
    pub active: Option<ScheduleSnapshot>,
    pub reservations: ReservationTable,
    pub io: Box<dyn RegisterIo>,
    /// Hardware ring page the fabric currently walks.
    pub active_page: u8,
    pub generation: u64,
    pub history: Vec<CommitRecord>,
}

impl SchedulerState {
    pub fn new(config: SchedulerConfig, io: Box<dyn RegisterIo>) -> Self {
        Self {
            length: config.schedule_length,
            config,
            ports: BTreeMap::new(),
            active: None,
            reservations: ReservationTable::default(),
            io,
            active_page: 0,
            generation: 0,
            history: Vec::new(),
        }
    }

    pub fn port(&self, port: PortId) -> Option<&Port> {
        self.ports.get(&port)
    }

    pub fn port_at(&self, fabric: FabricPos) -> Option<&Port> {
        self.ports.values().find(|p| p.fabric_pos == fabric)
    }

    /// Record a successful commit and return its generation number.
    pub fn record_commit(&mut self, kind: CommitKind) -> u64 {
        self.generation += 1;
        self.history.push(CommitRecord {
            generation: self.generation,
            kind,
            committed_at: Utc::now(),
        });
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::MemRegisters;

    #[test]
    fn test_record_commit_bumps_generation() {
        let mut state = SchedulerState::new(SchedulerConfig::default(), Box::new(MemRegisters::new()));
        assert_eq!(state.record_commit(CommitKind::Generate), 1);
        assert_eq!(state.record_commit(CommitKind::Update), 2);

        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[1].kind, CommitKind::Update);
        assert!(state.history[0].committed_at <= state.history[1].committed_at);
    }

    #[test]
    fn test_port_lookup() {
        let mut state = SchedulerState::new(SchedulerConfig::default(), Box::new(MemRegisters::new()));
        state.ports.insert(7, Port::ethernet(7, 13, 10_000));
        assert_eq!(state.port(7).map(|p| p.fabric_pos), Some(13));
        assert_eq!(state.port_at(13).map(|p| p.physical_id), Some(7));
        assert!(state.port_at(12).is_none());
    }
}
