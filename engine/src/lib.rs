//! Element engine for pipeplay.
//!
//! A pipeline is a graph of [`Element`]s. Each element owns one worker
//! thread that walks the [`ExecutionState`] lifecycle in lock-step with the
//! element's playback [`MediaState`]:
//!
//! - [`execution`]: the execution-state monitor (state + transition table +
//!   broadcast)
//! - [`gate`]: the one-shot wait gate a worker parks on between passes
//! - [`pins`]: bounded links between neighbouring elements and the pin
//!   collections an element owns
//! - [`stage`]: the hooks a concrete stage implements
//! - [`element`]: the lifecycle contract an orchestrator drives
//! - [`pipeline`]: a small orchestrator over many elements
//! - [`stages`]: synthetic stages used by the demo player and tests
//!
//! The execution-state monitor and the wait gate are separate monitors, each
//! with its own mutex and condition variable, and neither is ever locked
//! while the other is held.
//!
//! # Examples
//!
//! ```no_run
//! use engine::{Element, MediaState, NullStage};
//!
//! let element = Element::new("null", NullStage);
//! element.execute()?;
//! element.set_state(MediaState::Playing)?;
//! element.terminate()?;
//! # Ok::<(), engine::ElementError>(())
//! ```

#[macro_use]
mod macros;

pub mod buffer;
pub mod element;
pub mod execution;
pub mod gate;
pub mod pins;
pub mod pipeline;
pub mod stage;
pub mod stages;

pub use buffer::Buffer;
pub use common::{ElementError, ElementStatus, ExecutionState, MediaState, PipelineStatus};
pub use element::Element;
pub use execution::ExecutionMonitor;
pub use gate::WaitGate;
pub use pins::{InPin, InputPins, OutPin, OutputPins, Pin, PinCollection, Push, link};
pub use pipeline::{Lifecycle, Pipeline};
pub use stage::{NullStage, Stage, StageContext};

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, ElementError>;
