//! Execution-state monitor.
//!
//! Guards an element's [`ExecutionState`] behind its own mutex and condition
//! variable. Every [`ExecutionMonitor::set`] broadcasts, whether the request
//! was a change, a no-op or an illegal edge, so waiters always re-check.

use crate::Result;
use common::{ElementError, ExecutionState};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Mutex + condition variable pair owning one execution state.
#[derive(Debug, Default)]
pub struct ExecutionMonitor {
    state: Mutex<ExecutionState>,
    changed: Condvar,
}

impl ExecutionMonitor {
    /// Create a monitor in [`ExecutionState::WaitingForExecute`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn get(&self) -> Result<ExecutionState> {
        Ok(*self.state.lock()?)
    }

    /// Move to `next` if the transition table allows it.
    ///
    /// Returns `Ok(true)` when the state changed and `Ok(false)` when `next`
    /// already was the current state. An illegal edge leaves the state as it
    /// was and fails with [`ElementError::InvalidStateTransition`] once the
    /// lock is released.
    pub fn set(&self, next: ExecutionState) -> Result<bool> {
        let mut state = self.state.lock()?;
        let current = *state;

        let outcome = if current == next {
            Ok(false)
        } else if current.can_transition_to(next) {
            *state = next;
            log::trace!("execution state {} -> {}", current, next);
            Ok(true)
        } else {
            Err(ElementError::InvalidStateTransition {
                from: current,
                to: next,
            })
        };

        self.changed.notify_all();
        drop(state);

        outcome
    }

    /// Block until the state equals `target`.
    pub fn wait_for(&self, target: ExecutionState) -> Result<()> {
        let state = self.state.lock()?;
        let _state = self.changed.wait_while(state, |s| *s != target)?;
        Ok(())
    }

    /// Block until the state equals `target` or `timeout` elapses.
    ///
    /// Returns whether `target` was reached.
    pub fn wait_for_timeout(&self, target: ExecutionState, timeout: Duration) -> Result<bool> {
        let state = self.state.lock()?;
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| *s != target)?;
        Ok(*state == target)
    }

    /// Block until `accept` returns true for the current state, and return
    /// that state.
    pub fn wait_until<F>(&self, mut accept: F) -> Result<ExecutionState>
    where
        F: FnMut(ExecutionState) -> bool,
    {
        let state = self.state.lock()?;
        let state = self.changed.wait_while(state, |s| !accept(*s))?;
        Ok(*state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_waiting_for_execute() {
        let monitor = ExecutionMonitor::new();
        assert_eq!(monitor.get().unwrap(), ExecutionState::WaitingForExecute);
    }

    #[test]
    fn test_full_cycle() {
        use ExecutionState::*;
        let monitor = ExecutionMonitor::new();
        for next in [Initializing, Idle, Executing, Idle, Executing, Terminating, WaitingForExecute] {
            assert!(monitor.set(next).unwrap());
            assert_eq!(monitor.get().unwrap(), next);
        }
    }

    #[test]
    fn test_same_state_is_noop() {
        let monitor = ExecutionMonitor::new();
        assert!(!monitor.set(ExecutionState::WaitingForExecute).unwrap());
        assert_eq!(monitor.get().unwrap(), ExecutionState::WaitingForExecute);
    }

    #[test]
    fn test_invalid_edge_leaves_state() {
        let monitor = ExecutionMonitor::new();
        monitor.set(ExecutionState::Initializing).unwrap();

        let err = monitor.set(ExecutionState::Executing).unwrap_err();
        assert_eq!(
            err,
            ElementError::InvalidStateTransition {
                from: ExecutionState::Initializing,
                to: ExecutionState::Executing,
            }
        );
        assert_eq!(monitor.get().unwrap(), ExecutionState::Initializing);
    }

    #[test]
    fn test_only_table_edges_change_state() {
        // Walk every (from, to) pair from a freshly driven monitor
        use ExecutionState::*;
        let path_to = |target: ExecutionState| -> Vec<ExecutionState> {
            match target {
                WaitingForExecute => vec![],
                Initializing => vec![Initializing],
                Idle => vec![Initializing, Idle],
                Executing => vec![Initializing, Idle, Executing],
                Terminating => vec![Initializing, Idle, Terminating],
            }
        };

        for from in ExecutionState::ALL {
            for to in ExecutionState::ALL {
                let monitor = ExecutionMonitor::new();
                for step in path_to(from) {
                    monitor.set(step).unwrap();
                }

                let result = monitor.set(to);
                let observed = monitor.get().unwrap();
                if from == to {
                    assert_eq!(result, Ok(false));
                    assert_eq!(observed, from);
                } else if from.can_transition_to(to) {
                    assert_eq!(result, Ok(true));
                    assert_eq!(observed, to);
                } else {
                    assert!(result.is_err(), "{from} -> {to} should fail");
                    assert_eq!(observed, from);
                }
            }
        }
    }

    #[test]
    fn test_wait_for_wakes_on_change() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let waiter = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.wait_for(ExecutionState::Idle))
        };

        monitor.set(ExecutionState::Initializing).unwrap();
        monitor.set(ExecutionState::Idle).unwrap();

        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_multiple_waiters() {
        let monitor = Arc::new(ExecutionMonitor::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || monitor.wait_for(ExecutionState::Initializing))
            })
            .collect();

        monitor.set(ExecutionState::Initializing).unwrap();

        for waiter in waiters {
            waiter.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_wait_for_timeout_expires() {
        let monitor = ExecutionMonitor::new();
        let reached = monitor
            .wait_for_timeout(ExecutionState::Idle, Duration::from_millis(20))
            .unwrap();
        assert!(!reached);
    }

    #[test]
    fn test_wait_until_returns_matching_state() {
        let monitor = ExecutionMonitor::new();
        let state = monitor
            .wait_until(|s| s != ExecutionState::Initializing)
            .unwrap();
        assert_eq!(state, ExecutionState::WaitingForExecute);
    }
}
