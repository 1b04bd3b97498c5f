//! Ring length derivation from the fabric clock.

use crate::error::{SchedResult, SchedulerError};
use crate::hw::ClockSource;

/// Bits on the wire for a minimum-size frame: 64 bytes plus 20 bytes of
/// preamble and inter-frame gap.
pub const MIN_FRAME_WIRE_BITS: f64 = ((64 + 20) * 8) as f64;

/// Nominal rate the ring is dimensioned around.
pub const BASE_RATE_BPS: f64 = 10_000_000_000.0;

/// 2.5G slots per 10G of bandwidth.
pub const SLOTS_PER_10G: usize = 4;

/// Number of 2.5G-wide slots the ring holds at `clock_hz`.
///
/// One 10G unit is one minimum-frame time at `10G + margin_bps`; the ring gets
/// four slots for every whole unit the clock can service.
pub fn compute_schedule_length(clock_hz: f64, margin_bps: f64) -> SchedResult<usize> {
    if !clock_hz.is_finite() || clock_hz <= 0.0 {
        return Err(SchedulerError::ClockUnavailable(format!(
            "invalid clock frequency {} Hz",
            clock_hz
        )));
    }
    if !margin_bps.is_finite() || margin_bps < 0.0 {
        return Err(SchedulerError::InvalidArgument(format!(
            "invalid oversubscription margin {}",
            margin_bps
        )));
    }

    let segment_rate = (BASE_RATE_BPS + margin_bps) / MIN_FRAME_WIRE_BITS;
    let units = (clock_hz / segment_rate).floor() as usize;
    Ok(units * SLOTS_PER_10G)
}

/// Query the clock and derive the ring length. Clock failures are surfaced as
/// `ClockUnavailable` without retrying.
pub fn schedule_length_from_clock(clock: &dyn ClockSource, margin_bps: f64) -> SchedResult<usize> {
    let mhz = clock
        .clock_freq_mhz()
        .map_err(|e| SchedulerError::ClockUnavailable(e.to_string()))?;
    compute_schedule_length(mhz * 1e6, margin_bps)
}
