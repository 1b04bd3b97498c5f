//! Rotation that puts an idle slot at index 0.
//!
//! Slot 0 is never transmitted by the fabric, so it must be idle.

use crate::error::{SchedResult, SchedulerError};
use crate::models::SpeedBin;

/// Rotate `template` left so its first idle slot lands at index 0.
///
/// Returns the rotation amount, to be applied to any array aligned with the
/// template via [`rotate_aligned`].
pub fn rotate_to_idle(template: &mut [SpeedBin]) -> SchedResult<usize> {
    let first_idle = template
        .iter()
        .position(|&b| b == SpeedBin::Idle)
        .ok_or_else(|| {
            SchedulerError::Internal("speed template has no idle slot to rotate to".to_string())
        })?;
    template.rotate_left(first_idle);
    Ok(first_idle)
}

/// Apply a rotation computed by [`rotate_to_idle`] to an aligned array.
pub fn rotate_aligned<T>(values: &mut [T], amount: usize) {
    if !values.is_empty() {
        values.rotate_left(amount % values.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Slot;

    #[test]
    fn test_rotates_first_idle_to_front() {
        let mut t = vec![
            SpeedBin::Speed10G,
            SpeedBin::Speed25G,
            SpeedBin::Idle,
            SpeedBin::Speed10G,
            SpeedBin::Idle,
        ];
        let amount = rotate_to_idle(&mut t).unwrap();
        assert_eq!(amount, 2);
        assert_eq!(
            t,
            vec![
                SpeedBin::Idle,
                SpeedBin::Speed10G,
                SpeedBin::Idle,
                SpeedBin::Speed10G,
                SpeedBin::Speed25G
            ]
        );

        let mut slots = vec![
            Slot::owned(1, 0, false),
            Slot::owned(2, 1, false),
            Slot::IDLE,
            Slot::owned(1, 0, false),
            Slot::IDLE,
        ];
        rotate_aligned(&mut slots, amount);
        assert!(slots[0].idle);
        assert_eq!(slots[4].owner, Some(2));
    }

    #[test]
    fn test_already_aligned_is_noop() {
        let mut t = vec![SpeedBin::Idle, SpeedBin::Speed10G];
        assert_eq!(rotate_to_idle(&mut t).unwrap(), 0);
        assert_eq!(t, vec![SpeedBin::Idle, SpeedBin::Speed10G]);
    }

    #[test]
    fn test_no_idle_slot_is_internal_error() {
        let mut t = vec![SpeedBin::Speed10G; 4];
        assert!(matches!(
            rotate_to_idle(&mut t),
            Err(SchedulerError::Internal(_))
        ));
    }
}
