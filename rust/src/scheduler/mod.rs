//! Scheduler runtime: the committed ring, per-QPC ownership, admission
//! control and the public [`Scheduler`] entry point.

mod core;
mod qpc_state;
mod reservation;
mod state;

pub use self::core::{OffsetResolver, PortAttributes, PortResolver, Scheduler};
pub use qpc_state::{
    apply_to_slots, free_slots, is_fully_free, owned_by, seed, spacing_conflict, spread_pick,
    update_port, PortRequest, QpcEntry, QpcState,
};
pub use reservation::{Reservation, ReservationTable, ReserveKind};
pub use state::{CommitKind, CommitRecord, ScheduleSnapshot, SchedulerState};
