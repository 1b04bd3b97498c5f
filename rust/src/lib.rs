//! TDM arbitration-ring slot scheduler for a packet-switch fabric.
//!
//! The ring is a fixed-length cycle of slots, each idle or owned by one port.
//! [`Scheduler`] generates rings from a port list, moves single ports between
//! speeds without regenerating, enforces bandwidth admission and writes each
//! accepted ring to hardware through a double-buffered page flip.

// Allow clippy warning triggered by PyO3 macro expansion
#![cfg_attr(feature = "python", allow(clippy::useless_conversion))]

pub mod config;
pub mod error;
pub mod generation;
pub mod hw;
pub mod logging;
pub mod mask;
pub mod models;
pub mod scheduler;

#[cfg(feature = "python")]
mod python;

pub use config::{MapProperties, PropertySource, SchedulerConfig, SchedulerMode};
pub use error::{SchedResult, SchedulerError};
pub use generation::{ScheduleStats, SlotStats};
pub use hw::{ClockSource, FixedClock, HwError, MemRegisters, RegisterIo, SharedRegisters};
pub use models::{
    FabricPos, PcieBifurcation, Port, PortId, PortKind, PortSpeedInfo, QpcIndex, Slot, SpeedBin,
};
pub use scheduler::{
    CommitKind, CommitRecord, OffsetResolver, PortAttributes, PortResolver, Reservation,
    ReserveKind, ScheduleSnapshot, Scheduler,
};
