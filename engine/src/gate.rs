//! Wait gate a worker thread parks on between units of work.
//!
//! The gate holds a single `can_sleep` flag behind its own mutex and
//! condition variable. [`WaitGate::wake`] clears the flag; the worker
//! consumes it and re-arms the gate, so each wake buys exactly one more pass
//! through the run loop. Wakes that arrive before the worker parks are not
//! lost, and several wakes in a row collapse into one.

use crate::Result;
use std::sync::{Condvar, Mutex};

#[derive(Debug)]
struct GateState {
    can_sleep: bool,
    parks: u64,
}

/// One-shot parking gate.
#[derive(Debug)]
pub struct WaitGate {
    state: Mutex<GateState>,
    wake: Condvar,
}

impl WaitGate {
    /// Create an armed gate (the next park blocks).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                can_sleep: true,
                parks: 0,
            }),
            wake: Condvar::new(),
        }
    }

    /// Let a parked (or about to park) worker through once.
    pub fn wake(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.can_sleep = false;
        self.wake.notify_all();
        Ok(())
    }

    /// Consume a pending wake without blocking.
    ///
    /// Returns `true` and re-arms the gate if a wake was pending.
    pub fn take_pending(&self) -> Result<bool> {
        let mut state = self.state.lock()?;
        if state.can_sleep {
            return Ok(false);
        }
        state.can_sleep = true;
        Ok(true)
    }

    /// Block until woken, then re-arm the gate.
    pub fn park(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.parks += 1;
        let mut state = self.wake.wait_while(state, |s| s.can_sleep)?;
        state.can_sleep = true;
        Ok(())
    }

    /// Whether a wake is pending
    pub fn is_woken(&self) -> Result<bool> {
        Ok(!self.state.lock()?.can_sleep)
    }

    /// Number of times a worker has parked on this gate.
    pub fn park_count(&self) -> Result<u64> {
        Ok(self.state.lock()?.parks)
    }
}

impl Default for WaitGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_wake_before_park_is_not_lost() {
        let gate = WaitGate::new();
        gate.wake().unwrap();
        // Would block forever if the wake were lost
        gate.park().unwrap();
        assert!(!gate.is_woken().unwrap());
    }

    #[test]
    fn test_take_pending_rearms() {
        let gate = WaitGate::new();
        assert!(!gate.take_pending().unwrap());

        gate.wake().unwrap();
        gate.wake().unwrap();
        assert!(gate.take_pending().unwrap());
        assert!(!gate.take_pending().unwrap());
    }

    #[test]
    fn test_wake_releases_parked_thread() {
        let gate = Arc::new(WaitGate::new());
        let parked = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.park())
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while gate.park_count().unwrap() == 0 {
            assert!(Instant::now() < deadline, "worker never parked");
            thread::sleep(Duration::from_millis(1));
        }

        gate.wake().unwrap();
        parked.join().unwrap().unwrap();
        assert_eq!(gate.park_count().unwrap(), 1);
    }
}
