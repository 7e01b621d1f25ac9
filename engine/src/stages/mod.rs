//! Synthetic stages for the demo player and tests.
//!
//! None of these touch real media. They move numbered [`Buffer`]s through
//! links so the dataflow wake-up path can be exercised end to end.
//!
//! [`Buffer`]: crate::Buffer

mod counting_sink;
mod passthrough;
mod test_source;

pub use counting_sink::{CountingSink, SinkCounters};
pub use passthrough::Passthrough;
pub use test_source::TestSource;
