//! Logging macros for the scheduler with verbosity level control.
//!
//! Provides zero-cost logging when disabled (verbosity=0).
//! Verbosity levels:
//! - 0: SILENT (only warnings and errors)
//! - 1: CHANGES (commits, port assignments, reservations)
//! - 2: CHECKS (placement attempts and rejections)
//! - 3: DEBUG (speed templates, ranking internals)

/// Verbosity level constants.
pub const VERBOSITY_SILENT: u8 = 0;
pub const VERBOSITY_CHANGES: u8 = 1;
pub const VERBOSITY_CHECKS: u8 = 2;
pub const VERBOSITY_DEBUG: u8 = 3;

/// Log a warning regardless of verbosity.
///
/// Used for: overridden schedule violations.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        eprintln!("WARNING: {}", format_args!($($arg)*));
    };
}

/// Log at CHANGES level (verbosity >= 1).
///
/// Used for: commits, port slot assignments, reservation updates.
#[macro_export]
macro_rules! log_changes {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHANGES {
            eprintln!($($arg)*);
        }
    };
}

/// Log at CHECKS level (verbosity >= 2).
///
/// Used for: placement group attempts, spacing rejections.
#[macro_export]
macro_rules! log_checks {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_CHECKS {
            eprintln!($($arg)*);
        }
    };
}

/// Log at DEBUG level (verbosity >= 3).
///
/// Used for: speed template contents, difficulty ranking.
#[macro_export]
macro_rules! log_debug {
    ($verbosity:expr, $($arg:tt)*) => {
        if $verbosity >= $crate::logging::VERBOSITY_DEBUG {
            eprintln!($($arg)*);
        }
    };
}
