//! A process-wide, debug-only hook that lets tests schedule a synthetic
//! failure after N internal steps of an import. Compiled out entirely
//! unless the `fault-injection` feature is enabled, matching "production
//! builds compile this out" from the error-handling design.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::StoreError;

static ARMED: AtomicBool = AtomicBool::new(false);
static REMAINING: AtomicU32 = AtomicU32::new(0);

/// Arms the injector to fail on the `steps`th call to [`step`] from now.
/// `steps = 1` fails on the very next step.
#[cfg(feature = "fault-injection")]
pub fn arm(steps: u32) {
    REMAINING.store(steps, Ordering::SeqCst);
    ARMED.store(true, Ordering::SeqCst);
}

/// Disarms the injector; subsequent [`step`] calls are no-ops.
#[cfg(feature = "fault-injection")]
pub fn disarm() {
    ARMED.store(false, Ordering::SeqCst);
}

/// Consults the injector at one enumerated checkpoint inside import. A
/// no-op returning `Ok(())` when the `fault-injection` feature is off or the
/// injector isn't armed.
pub fn step() -> Result<(), StoreError> {
    #[cfg(feature = "fault-injection")]
    {
        if !ARMED.load(Ordering::SeqCst) {
            return Ok(());
        }
        // `prev == 1` means this call decremented the counter to zero: it's
        // the Nth step since `arm(N)`, so this is where we fail.
        let prev = REMAINING.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            ARMED.store(false, Ordering::SeqCst);
            return Err(StoreError::Internal("synthetic fault injected during import".into()));
        }
    }
    Ok(())
}

#[cfg(all(test, feature = "fault-injection"))]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_once_after_the_armed_step_count() {
        arm(3);
        assert!(step().is_ok());
        assert!(step().is_ok());
        assert!(step().is_err());
        // Disarmed after firing.
        assert!(step().is_ok());
    }
}
