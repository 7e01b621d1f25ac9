//! The element: one pipeline stage running on its own worker thread.
//!
//! # Worker run loop
//!
//! 1. Enter Initializing, run [`Stage::initialize`], enter Idle.
//! 2. While running: if Playing, enter Executing and run one
//!    [`Stage::do_work`] pass; then consume a pending wake or, if there is
//!    none, enter Idle and park on the wait gate.
//! 3. Enter Terminating, run [`Stage::terminating`], return to
//!    WaitingForExecute and exit.
//!
//! # Teardown
//!
//! [`Element::terminate`] is the only path that joins the worker: pause,
//! wait for Idle, flush, clear the running flag, wake, wait for
//! WaitingForExecute, join. Each step depends on the previous one having
//! completed.

use crate::execution::ExecutionMonitor;
use crate::gate::WaitGate;
use crate::pins::{InPin, InputPins, OutPin, OutputPins};
use crate::stage::{Stage, StageContext};
use crate::Result;
use common::{ElementError, ElementStatus, ExecutionState, MediaState};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// State shared between an element's handle and its worker thread.
pub(crate) struct Core {
    name: Mutex<String>,
    log_enabled: AtomicBool,
    execution: ExecutionMonitor,
    gate: Arc<WaitGate>,
    media: Mutex<MediaState>,
    running: AtomicBool,
    // Set by the worker before it unwinds a failed initialize
    aborted: AtomicBool,
    inputs: Mutex<InputPins>,
    outputs: Mutex<OutputPins>,
    failure: Mutex<Option<ElementError>>,
}

impl Core {
    fn new(name: String) -> Self {
        Self {
            name: Mutex::new(name),
            log_enabled: AtomicBool::new(false),
            execution: ExecutionMonitor::new(),
            gate: Arc::new(WaitGate::new()),
            media: Mutex::new(MediaState::default()),
            running: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            inputs: Mutex::new(InputPins::new()),
            outputs: Mutex::new(OutputPins::new()),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> String {
        // Diagnostics must not fail, so a poisoned name is still readable
        match self.name.lock() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn log_enabled(&self) -> bool {
        self.log_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn state(&self) -> Result<MediaState> {
        Ok(*self.media.lock()?)
    }

    pub(crate) fn set_state(&self, next: MediaState) -> Result<()> {
        let previous = {
            let mut media = self.media.lock()?;
            let previous = *media;
            if previous == next {
                return Ok(());
            }
            *media = next;
            previous
        };

        self.wake()?;
        element_log!(self, "change state {} -> {}", previous, next);
        Ok(())
    }

    pub(crate) fn wake(&self) -> Result<()> {
        self.gate.wake()?;
        element_log!(self, "wake");
        Ok(())
    }

    pub(crate) fn inputs(&self) -> Result<MutexGuard<'_, InputPins>> {
        Ok(self.inputs.lock()?)
    }

    pub(crate) fn outputs(&self) -> Result<MutexGuard<'_, OutputPins>> {
        Ok(self.outputs.lock()?)
    }

    pub(crate) fn execution_state(&self) -> Result<ExecutionState> {
        self.execution.get()
    }

    fn set_execution_state(&self, next: ExecutionState) -> Result<()> {
        if self.execution.set(next)? {
            element_log!(self, "set execution state {}", next);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn failure(&self) -> Result<Option<ElementError>> {
        Ok(self.failure.lock()?.clone())
    }

    fn record_failure(&self, error: ElementError) {
        log::error!("Element {} failed: {}", self.name(), error);
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    /// Enter Executing if the element is playing.
    ///
    /// The media lock is held across the check and the transition, so a
    /// concurrent pause either lands first (no work this pass) or finds the
    /// worker already Executing and waits for it to go Idle.
    fn begin_pass(&self) -> Result<bool> {
        let media = self.media.lock()?;
        if *media != MediaState::Playing {
            return Ok(false);
        }

        if self.execution_state()? != ExecutionState::Executing {
            self.set_execution_state(ExecutionState::Executing)?;
            element_log!(self, "worker woke");
        }
        drop(media);

        Ok(true)
    }

    /// Consume a pending wake, or go Idle and park until the next one.
    ///
    /// The execution state is changed with the gate unlocked; a wake that
    /// lands in between is kept by the gate and `park` returns at once.
    fn sleep(&self) -> Result<()> {
        if self.gate.take_pending()? {
            return Ok(());
        }

        if self.execution_state()? != ExecutionState::Idle {
            element_log!(self, "worker sleeping");
            self.set_execution_state(ExecutionState::Idle)?;
        }

        self.gate.park()
    }
}

fn lock_stage<S>(stage: &Mutex<S>) -> Result<MutexGuard<'_, S>> {
    Ok(stage.lock()?)
}

/// Run one stage hook with the stage locked. A panicking hook becomes a
/// stage error so the worker still walks its states back to
/// WaitingForExecute.
fn run_hook<S: Stage>(
    core: &Core,
    stage: &Mutex<S>,
    hook: &str,
    f: impl FnOnce(&mut S) -> Result<()>,
) -> Result<()> {
    let mut stage = lock_stage(stage)?;
    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *stage))) {
        Ok(result) => result,
        Err(payload) => Err(ElementError::stage(
            core.name(),
            format!("{} panicked: {}", hook, panic_message(&*payload)),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn join_worker(core: &Core, handle: JoinHandle<()>) -> Result<()> {
    handle
        .join()
        .map_err(|_| ElementError::Thread(format!("worker of {} panicked", core.name())))
}

fn run_worker<S: Stage>(core: Arc<Core>, stage: Arc<Mutex<S>>, started: mpsc::SyncSender<()>) {
    element_log!(core, "worker entered");

    if let Err(e) = core.set_execution_state(ExecutionState::Initializing) {
        // Dropping `started` reports the failed start to `execute`
        core.record_failure(e);
        return;
    }
    // The receiver only goes away if `execute` itself failed
    started.send(()).ok();
    drop(started);

    let ctx = StageContext::new(&core);

    if let Err(e) = run_hook(&core, &*stage, "initialize", |s| s.initialize(&ctx)) {
        log::warn!("Element {} aborted startup", core.name());
        core.record_failure(e);
        core.running.store(false, Ordering::Release);
        core.aborted.store(true, Ordering::Release);
        for next in [
            ExecutionState::Idle,
            ExecutionState::Terminating,
            ExecutionState::WaitingForExecute,
        ] {
            log_and_continue!(core.set_execution_state(next), "unwind aborted startup");
        }
        return;
    }

    let ran = core
        .set_execution_state(ExecutionState::Idle)
        .and_then(|()| run_loop(&core, &*stage, &ctx));
    if let Err(e) = ran {
        core.record_failure(e);
    }

    element_log!(core, "worker terminating");
    log_and_continue!(
        core.set_execution_state(ExecutionState::Terminating),
        "enter terminating state"
    );
    if let Err(e) = run_hook(&core, &*stage, "terminating", |s| s.terminating(&ctx)) {
        core.record_failure(e);
    }
    log_and_continue!(
        core.set_execution_state(ExecutionState::WaitingForExecute),
        "return to waiting-for-execute"
    );

    element_log!(core, "worker exited");
}

fn run_loop<S: Stage>(core: &Core, stage: &Mutex<S>, ctx: &StageContext<'_>) -> Result<()> {
    while core.is_running() {
        if core.begin_pass()? {
            let worked = run_hook(core, stage, "do_work", |s| s.do_work(ctx));
            if let Err(e) = worked {
                core.record_failure(e);
                core.set_state(MediaState::Paused)?;
            }
        }

        if !core.is_running() {
            break;
        }

        core.sleep()?;
    }

    Ok(())
}

/// One pipeline stage: a [`Stage`] plus the worker thread, state machine,
/// wait gate and pins that drive it.
///
/// All methods take `&self`; an element is normally shared as
/// `Arc<Element<S>>` between the orchestrator and whoever inspects it.
pub struct Element<S: Stage> {
    core: Arc<Core>,
    stage: Arc<Mutex<S>>,
    // Only `execute` installs a handle and only `terminate` joins it
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Stage> Element<S> {
    /// Create an element in WaitingForExecute, paused, with no pins.
    pub fn new(name: impl Into<String>, stage: S) -> Self {
        Self {
            core: Arc::new(Core::new(name.into())),
            stage: Arc::new(Mutex::new(stage)),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker thread.
    ///
    /// Returns once the worker has entered Initializing; it does not wait
    /// for [`Stage::initialize`] to finish. Fails with
    /// [`ElementError::InvalidOperation`] unless the element is
    /// WaitingForExecute.
    pub fn execute(&self) -> Result<()> {
        let mut worker = self.worker.lock()?;

        let execution_state = self.core.execution_state()?;
        if execution_state != ExecutionState::WaitingForExecute {
            return Err(self.invalid_operation("execute", execution_state));
        }

        if let Some(stale) = worker.take() {
            // A previous start aborted in initialize and has already exited
            join_worker(&self.core, stale)?;
        }

        *self.core.failure.lock()? = None;
        self.core.aborted.store(false, Ordering::Release);
        self.core.running.store(true, Ordering::Release);

        let (started_tx, started_rx) = mpsc::sync_channel(1);
        let core = Arc::clone(&self.core);
        let stage = Arc::clone(&self.stage);
        let spawned = thread::Builder::new()
            .name(self.core.name().replace('\0', ""))
            .spawn(move || run_worker(core, stage, started_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.core.running.store(false, Ordering::Release);
                return Err(ElementError::Thread(format!(
                    "failed to spawn worker for {}: {}",
                    self.core.name(),
                    e
                )));
            }
        };

        if started_rx.recv().is_err() {
            self.core.running.store(false, Ordering::Release);
            join_worker(&self.core, handle)?;
            return Err(self.core.failure()?.unwrap_or_else(|| {
                ElementError::Thread("worker exited before initializing".to_string())
            }));
        }

        *worker = Some(handle);
        element_log!(self.core, "execute");
        Ok(())
    }

    /// Stop the worker thread and join it.
    ///
    /// Fails with [`ElementError::InvalidOperation`] unless the element is
    /// Idle or Executing. An element still Initializing is first allowed to
    /// settle. If startup was aborted by [`Stage::initialize`], the finished
    /// worker is reaped and the startup error returned.
    pub fn terminate(&self) -> Result<()> {
        let mut worker = self.worker.lock()?;

        // An aborted start passes through Idle on its way out; wait it out
        let execution_state = self.core.execution.wait_until(|s| match s {
            ExecutionState::Initializing => false,
            ExecutionState::WaitingForExecute => true,
            _ => !self.core.aborted.load(Ordering::Acquire),
        })?;

        match execution_state {
            ExecutionState::Idle | ExecutionState::Executing => {}
            ExecutionState::WaitingForExecute if worker.is_some() => {
                if let Some(handle) = worker.take() {
                    join_worker(&self.core, handle)?;
                }
                element_log!(self.core, "reaped aborted worker");
                return match self.core.failure()? {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
            }
            other => return Err(self.invalid_operation("terminate", other)),
        }

        self.core.set_state(MediaState::Paused)?;
        self.core.execution.wait_for(ExecutionState::Idle)?;

        // The worker is stopped and joined even when the flush fails
        let flushed = self.flush();

        self.core.running.store(false, Ordering::Release);
        self.core.wake()?;

        self.core
            .execution
            .wait_for(ExecutionState::WaitingForExecute)?;

        element_log!(self.core, "joining worker");
        if let Some(handle) = worker.take() {
            join_worker(&self.core, handle)?;
        }

        element_log!(self.core, "terminate");
        flushed
    }

    /// Discard everything buffered on this element's pins.
    ///
    /// Requires the element to be Paused and waits until no `do_work` is in
    /// flight before touching the pins. The stage's [`Stage::flush`] hook
    /// then drops whatever it holds outside the pins.
    pub fn flush(&self) -> Result<()> {
        let media_state = self.core.state()?;
        if media_state != MediaState::Paused {
            return Err(ElementError::InvalidOperation {
                operation: "flush".to_string(),
                execution_state: self.core.execution_state()?,
                media_state,
            });
        }

        self.core.execution.wait_until(|s| {
            matches!(
                s,
                ExecutionState::Idle | ExecutionState::WaitingForExecute
            )
        })?;

        let discarded = self.core.inputs()?.flush()? + self.core.outputs()?.flush()?;
        let ctx = StageContext::new(&self.core);
        run_hook(&self.core, &*self.stage, "flush", |s| s.flush(&ctx))?;
        element_log!(self.core, "flush discarded {} buffers", discarded);
        Ok(())
    }

    pub fn state(&self) -> Result<MediaState> {
        self.core.state()
    }

    /// Change the playback state; a change wakes the worker.
    pub fn set_state(&self, state: MediaState) -> Result<()> {
        self.core.set_state(state)
    }

    pub fn execution_state(&self) -> Result<ExecutionState> {
        self.core.execution_state()
    }

    /// Whether the element is Playing and its worker is inside a work pass.
    pub fn is_executing(&self) -> Result<bool> {
        Ok(self.core.state()? == MediaState::Playing
            && self.core.execution_state()? == ExecutionState::Executing)
    }

    /// Let the worker through the wait gate once.
    pub fn wake(&self) -> Result<()> {
        self.core.wake()
    }

    /// Block until the worker reaches `target`.
    pub fn wait_for_execution_state(&self, target: ExecutionState) -> Result<()> {
        self.core.execution.wait_for(target)
    }

    /// Block until the worker reaches `target` or `timeout` elapses.
    /// Returns whether `target` was reached.
    pub fn wait_for_execution_state_timeout(
        &self,
        target: ExecutionState,
        timeout: Duration,
    ) -> Result<bool> {
        self.core.execution.wait_for_timeout(target, timeout)
    }

    /// Add an input pin; pushes on its link will wake this element.
    pub fn add_input_pin(&self, pin: InPin) -> Result<()> {
        pin.attach(&self.core.gate)?;
        self.core.inputs()?.add(pin);
        Ok(())
    }

    /// Add an output pin; pulls on its link will wake this element.
    pub fn add_output_pin(&self, pin: OutPin) -> Result<()> {
        pin.attach(&self.core.gate)?;
        self.core.outputs()?.add(pin);
        Ok(())
    }

    pub fn clear_input_pins(&self) -> Result<()> {
        self.core.inputs()?.clear();
        Ok(())
    }

    pub fn clear_output_pins(&self) -> Result<()> {
        self.core.outputs()?.clear();
        Ok(())
    }

    pub fn inputs(&self) -> Result<MutexGuard<'_, InputPins>> {
        self.core.inputs()
    }

    pub fn outputs(&self) -> Result<MutexGuard<'_, OutputPins>> {
        self.core.outputs()
    }

    pub fn name(&self) -> String {
        self.core.name()
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        *self.core.name.lock()? = name.into();
        Ok(())
    }

    pub fn log_enabled(&self) -> bool {
        self.core.log_enabled()
    }

    pub fn set_log_enabled(&self, enabled: bool) {
        self.core.log_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Last error reported by a stage hook since the last `execute`.
    pub fn failure(&self) -> Result<Option<ElementError>> {
        self.core.failure()
    }

    /// How many times the worker has parked on its wait gate.
    pub fn park_count(&self) -> Result<u64> {
        self.core.gate.park_count()
    }

    /// Run `f` with exclusive access to the stage. Blocks while a hook runs.
    pub fn with_stage<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        let mut stage = lock_stage(&*self.stage)?;
        Ok(f(&mut stage))
    }

    pub fn status(&self) -> Result<ElementStatus> {
        let execution_state = self.core.execution_state()?;
        let media_state = self.core.state()?;
        let (input_pins, buffered_inputs) = {
            let inputs = self.core.inputs()?;
            (inputs.len(), inputs.buffered()?)
        };
        let (output_pins, buffered_outputs) = {
            let outputs = self.core.outputs()?;
            (outputs.len(), outputs.buffered()?)
        };

        Ok(ElementStatus {
            name: self.core.name(),
            execution_state,
            media_state,
            is_executing: media_state == MediaState::Playing
                && execution_state == ExecutionState::Executing,
            input_pins,
            output_pins,
            buffered_inputs,
            buffered_outputs,
            failure: self.core.failure()?,
        })
    }

    fn invalid_operation(&self, operation: &str, execution_state: ExecutionState) -> ElementError {
        ElementError::InvalidOperation {
            operation: operation.to_string(),
            execution_state,
            media_state: self.core.state().unwrap_or_default(),
        }
    }
}

impl<S: Stage> Drop for Element<S> {
    fn drop(&mut self) {
        let has_worker = match self.worker.get_mut() {
            Ok(worker) => worker.is_some(),
            Err(_) => false,
        };

        if has_worker {
            log_and_continue!(
                self.terminate(),
                format!("terminate element {} on drop", self.core.name())
            );
        }

        element_log!(self.core, "destructed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::NullStage;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_new_element_defaults() {
        let element = Element::new("null", NullStage);
        assert_eq!(element.name(), "null");
        assert_eq!(
            element.execution_state().unwrap(),
            ExecutionState::WaitingForExecute
        );
        assert_eq!(element.state().unwrap(), MediaState::Paused);
        assert!(!element.is_executing().unwrap());
        assert!(!element.log_enabled());
    }

    #[test]
    fn test_terminate_before_execute_is_invalid() {
        let element = Element::new("null", NullStage);
        let err = element.terminate().unwrap_err();
        assert!(matches!(
            err,
            ElementError::InvalidOperation {
                execution_state: ExecutionState::WaitingForExecute,
                ..
            }
        ));
    }

    #[test]
    fn test_flush_before_execute_does_not_block() {
        let element = Element::new("null", NullStage);
        element.flush().unwrap();
    }

    #[test]
    fn test_execute_reaches_idle_and_terminates() {
        let element = Element::new("null", NullStage);
        element.set_log_enabled(true);
        element.execute().unwrap();
        assert!(
            element
                .wait_for_execution_state_timeout(ExecutionState::Idle, TIMEOUT)
                .unwrap()
        );

        element.terminate().unwrap();
        assert_eq!(
            element.execution_state().unwrap(),
            ExecutionState::WaitingForExecute
        );
    }

    #[test]
    fn test_set_name_and_state_change() {
        let element = Element::new("a", NullStage);
        element.set_name("b").unwrap();
        assert_eq!(element.name(), "b");

        element.set_state(MediaState::Playing).unwrap();
        assert_eq!(element.state().unwrap(), MediaState::Playing);
        // Not executing without a worker
        assert!(!element.is_executing().unwrap());
    }
}
