use crate::buffer::Buffer;
use crate::pins::Push;
use crate::stage::{Stage, StageContext};
use crate::Result;

/// Forwards buffers unchanged from its first input pin to its first output
/// pin, one buffer per pass.
#[derive(Debug, Default)]
pub struct Passthrough {
    pending: Option<Buffer>,
    forwarded: u64,
}

impl Passthrough {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Whether a buffer is waiting for room downstream
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Stage for Passthrough {
    fn initialize(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        if ctx.inputs()?.is_empty() || ctx.outputs()?.is_empty() {
            return Err(ctx.error("passthrough needs an input and an output pin"));
        }
        Ok(())
    }

    fn do_work(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        if self.pending.is_none() {
            let inputs = ctx.inputs()?;
            if let Some(pin) = inputs.first() {
                self.pending = pin.try_pull()?;
            }
        }

        let Some(buffer) = self.pending.take() else {
            return Ok(());
        };

        let pushed = match ctx.outputs()?.first() {
            Some(pin) => pin.try_push(buffer)?,
            None => Push::Full(buffer),
        };

        match pushed {
            Push::Queued => {
                self.forwarded += 1;
                // Several upstream pushes may have collapsed into one wake
                ctx.wake()?;
            }
            Push::Full(buffer) => self.pending = Some(buffer),
        }

        Ok(())
    }

    fn terminating(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        element_log!(ctx, "forwarded {} buffers", self.forwarded);
        self.pending = None;
        Ok(())
    }

    fn flush(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        if self.pending.take().is_some() {
            element_log!(ctx, "dropped pending buffer");
        }
        Ok(())
    }
}
