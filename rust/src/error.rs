//! Error taxonomy shared by every scheduler component.

use thiserror::Error;

use crate::hw::HwError;
use crate::models::QpcIndex;

/// Errors that can occur while generating or updating a schedule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported port speed: {0} Mbps")]
    InvalidSpeed(u32),
    #[error("Clock frequency unavailable: {0}")]
    ClockUnavailable(String),
    #[error("Oversubscribed: {0}")]
    Oversubscribed(String),
    #[error("Schedule violation: {0}")]
    SchedViolation(String),
    #[error("Port in use: {0}")]
    PortInUse(String),
    #[error("Conflicting multi-lane ports in QPC {0}")]
    SchedInitConflict(QpcIndex),
    #[error(transparent)]
    Hw(#[from] HwError),
    /// An invariant that earlier stages guarantee did not hold.
    #[error("Internal scheduler error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::ClockUnavailable(_))
    }
}

pub type SchedResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hw_error_converts() {
        let err: SchedulerError = HwError::WriteFailed { addr: 0x40 }.into();
        assert!(matches!(err, SchedulerError::Hw(_)));
        assert_eq!(err.to_string(), "Register write to 0x40 failed");
    }

    #[test]
    fn test_only_clock_errors_are_transient() {
        assert!(SchedulerError::ClockUnavailable("no pll".into()).is_transient());
        assert!(!SchedulerError::Oversubscribed("full".into()).is_transient());
        assert!(!SchedulerError::SchedInitConflict(3).is_transient());
    }
}
