//! Hooks a concrete pipeline stage plugs into an [`Element`](crate::Element).

use crate::element::Core;
use crate::pins::{InputPins, OutputPins};
use crate::Result;
use common::{ElementError, ExecutionState, MediaState};
use std::sync::MutexGuard;

/// Stage-specific behaviour run on the element's worker thread.
///
/// The worker calls `initialize` once after entering Initializing,
/// `do_work` once per run-loop pass while the element is Playing, and
/// `terminating` once after leaving the run loop.
pub trait Stage: Send + 'static {
    /// One-time setup. An error aborts startup.
    fn initialize(&mut self, ctx: &StageContext<'_>) -> Result<()>;

    /// One bounded unit of work (decode a frame, render a frame, ...).
    ///
    /// Must not block indefinitely: the element cannot be paused or
    /// terminated while this runs. Call [`StageContext::wake`] to ask for
    /// another pass; otherwise the worker parks until a pin or the
    /// orchestrator wakes it.
    fn do_work(&mut self, ctx: &StageContext<'_>) -> Result<()>;

    /// One-time teardown before the worker exits.
    fn terminating(&mut self, ctx: &StageContext<'_>) -> Result<()>;

    /// Drop data held outside the pins. Runs after the element's pins were
    /// flushed, with no `do_work` in flight.
    fn flush(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// What a stage hook can see of its element.
pub struct StageContext<'a> {
    core: &'a Core,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    pub fn log_enabled(&self) -> bool {
        self.core.log_enabled()
    }

    /// The element's playback state
    pub fn state(&self) -> Result<MediaState> {
        self.core.state()
    }

    /// The worker's current execution state (Executing inside `do_work`).
    pub fn execution_state(&self) -> Result<ExecutionState> {
        self.core.execution_state()
    }

    /// Change the element's playback state (wakes the worker).
    pub fn set_state(&self, state: MediaState) -> Result<()> {
        self.core.set_state(state)
    }

    /// Request one more run-loop pass after the current one.
    pub fn wake(&self) -> Result<()> {
        self.core.wake()
    }

    pub fn inputs(&self) -> Result<MutexGuard<'a, InputPins>> {
        self.core.inputs()
    }

    pub fn outputs(&self) -> Result<MutexGuard<'a, OutputPins>> {
        self.core.outputs()
    }

    /// Build a stage error attributed to this element.
    pub fn error(&self, message: impl std::fmt::Display) -> ElementError {
        ElementError::stage(self.core.name(), message)
    }
}

/// A stage that does nothing. Useful for leaf elements and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStage;

impl Stage for NullStage {
    fn initialize(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }

    fn do_work(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        element_log!(ctx, "do_work exited");
        Ok(())
    }

    fn terminating(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }
}
