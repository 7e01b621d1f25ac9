use crate::stage::{Stage, StageContext};
use crate::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters a [`CountingSink`] updates, readable from any thread.
#[derive(Debug, Default)]
pub struct SinkCounters {
    buffers: AtomicU64,
    bytes: AtomicU64,
    last_sequence: AtomicU64,
    end_of_stream: AtomicBool,
}

impl SinkCounters {
    /// Data buffers received (end-of-stream markers excluded).
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    /// Clear the end-of-stream latch before playing the stream again.
    pub fn reset_end_of_stream(&self) {
        self.end_of_stream.store(false, Ordering::Release);
    }
}

/// A sink that drains every input pin and counts what it received.
#[derive(Debug, Default)]
pub struct CountingSink {
    counters: Arc<SinkCounters>,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the counters; stays valid after the sink is moved
    /// into an element.
    pub fn counters(&self) -> Arc<SinkCounters> {
        Arc::clone(&self.counters)
    }
}

impl Stage for CountingSink {
    fn initialize(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }

    fn do_work(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        let inputs = ctx.inputs()?;

        for pin in inputs.iter() {
            while let Some(buffer) = pin.try_pull()? {
                if buffer.is_end_of_stream() {
                    self.counters.end_of_stream.store(true, Ordering::Release);
                    element_log!(ctx, "end of stream at {}", buffer.sequence());
                    continue;
                }

                self.counters
                    .bytes
                    .fetch_add(buffer.len() as u64, Ordering::AcqRel);
                self.counters
                    .last_sequence
                    .store(buffer.sequence(), Ordering::Release);
                self.counters.buffers.fetch_add(1, Ordering::AcqRel);
            }
        }

        Ok(())
    }

    fn terminating(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        element_log!(ctx, "received {} buffers", self.counters.buffers());
        Ok(())
    }
}
