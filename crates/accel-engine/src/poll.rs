//! Bounded busy-polling.

use crate::hal::AccelHal;

/// Poll `done` every `step_us` until it holds or `timeout_us` has been spent
/// sleeping. Returns whether `done` was satisfied.
///
/// The sleep total on failure is `timeout_us` rounded up to a whole step.
pub(crate) fn poll_until<H, F>(hal: &mut H, timeout_us: u32, step_us: u32, mut done: F) -> bool
where
    H: AccelHal,
    F: FnMut(&H) -> bool,
{
    let step_us = step_us.max(1);
    let steps = timeout_us.div_ceil(step_us);
    for _ in 0..steps {
        if done(hal) {
            return true;
        }
        hal.delay_us(step_us);
    }
    false
}
