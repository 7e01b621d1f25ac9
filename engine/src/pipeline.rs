//! A minimal orchestrator driving many elements through the same lifecycle.

use crate::element::Element;
use crate::stage::Stage;
use crate::Result;
use common::{ElementStatus, ExecutionState, MediaState, PipelineStatus};
use std::sync::Arc;

/// The lifecycle contract of an element, independent of its stage type.
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> String;
    fn execute(&self) -> Result<()>;
    fn terminate(&self) -> Result<()>;
    fn flush(&self) -> Result<()>;
    fn set_state(&self, state: MediaState) -> Result<()>;
    fn state(&self) -> Result<MediaState>;
    fn execution_state(&self) -> Result<ExecutionState>;
    fn is_executing(&self) -> Result<bool>;
    fn status(&self) -> Result<ElementStatus>;
}

impl<S: Stage> Lifecycle for Element<S> {
    fn name(&self) -> String {
        Element::name(self)
    }

    fn execute(&self) -> Result<()> {
        Element::execute(self)
    }

    fn terminate(&self) -> Result<()> {
        Element::terminate(self)
    }

    fn flush(&self) -> Result<()> {
        Element::flush(self)
    }

    fn set_state(&self, state: MediaState) -> Result<()> {
        Element::set_state(self, state)
    }

    fn state(&self) -> Result<MediaState> {
        Element::state(self)
    }

    fn execution_state(&self) -> Result<ExecutionState> {
        Element::execution_state(self)
    }

    fn is_executing(&self) -> Result<bool> {
        Element::is_executing(self)
    }

    fn status(&self) -> Result<ElementStatus> {
        Element::status(self)
    }
}

/// Ordered set of elements, upstream first.
#[derive(Default)]
pub struct Pipeline {
    elements: Vec<Arc<dyn Lifecycle>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element downstream of the ones already added.
    pub fn add(&mut self, element: Arc<dyn Lifecycle>) -> &mut Self {
        self.elements.push(element);
        self
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Arc<dyn Lifecycle>] {
        &self.elements
    }

    /// Start every element, upstream first.
    ///
    /// If one fails, the elements already started are terminated again and
    /// the failing element's error is returned.
    pub fn execute(&self) -> Result<()> {
        for (index, element) in self.elements.iter().enumerate() {
            if let Err(e) = element.execute() {
                log::error!("Failed to execute {}: {}", element.name(), e);
                for started in self.elements[..index].iter().rev() {
                    log_and_continue!(
                        started.terminate(),
                        format!("roll back {}", started.name())
                    );
                }
                return Err(e);
            }
        }

        log::info!("Pipeline executing {} elements", self.elements.len());
        Ok(())
    }

    pub fn set_state(&self, state: MediaState) -> Result<()> {
        for element in &self.elements {
            element.set_state(state)?;
        }
        log::debug!("Pipeline state set to {}", state);
        Ok(())
    }

    /// Pause every element, then flush every element.
    ///
    /// All elements are paused before any is flushed so no upstream element
    /// refills a link after it was flushed.
    pub fn pause_and_flush(&self) -> Result<()> {
        self.set_state(MediaState::Paused)?;
        for element in &self.elements {
            element.flush()?;
        }
        Ok(())
    }

    /// Pause everything, then terminate every element, downstream first.
    ///
    /// Keeps going past failures so every worker gets a chance to stop, and
    /// returns the first error.
    pub fn terminate(&self) -> Result<()> {
        let mut first_error = None;

        for element in &self.elements {
            log_and_continue!(
                element.set_state(MediaState::Paused),
                format!("pause {}", element.name())
            );
        }

        for element in self.elements.iter().rev() {
            if let Err(e) = element.terminate() {
                log::error!("Failed to terminate {}: {}", element.name(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                log::info!("Pipeline terminated");
                Ok(())
            }
        }
    }

    pub fn status(&self) -> Result<PipelineStatus> {
        let elements = self
            .elements
            .iter()
            .map(|e| e.status())
            .collect::<Result<Vec<_>>>()?;
        Ok(PipelineStatus { elements })
    }
}
