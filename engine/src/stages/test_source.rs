use crate::buffer::Buffer;
use crate::pins::Push;
use crate::stage::{Stage, StageContext};
use crate::Result;
use std::time::Duration;

/// A source emitting `frame_count` numbered frames followed by one
/// end-of-stream buffer on its first output pin.
///
/// Each pass pushes at most one buffer. While there is more to send the
/// source wakes itself; when the link is full it keeps the buffer and waits
/// for the consumer's pull to wake it.
#[derive(Debug)]
pub struct TestSource {
    frame_count: u64,
    frame_size: usize,
    frame_interval: Duration,
    next: u64,
    pending: Option<Buffer>,
    eos_sent: bool,
}

impl TestSource {
    pub fn new(frame_count: u64, frame_size: usize) -> Self {
        Self {
            frame_count,
            frame_size,
            frame_interval: Duration::from_millis(40),
            next: 0,
            pending: None,
            eos_sent: false,
        }
    }

    /// Set the presentation time step between frames.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Frames pushed since the last rewind.
    pub fn produced(&self) -> u64 {
        self.next
    }

    pub fn is_finished(&self) -> bool {
        self.eos_sent
    }

    /// Start over from frame 0. Anything not yet pushed is dropped.
    pub fn rewind(&mut self) {
        self.next = 0;
        self.pending = None;
        self.eos_sent = false;
    }

    fn next_buffer(&mut self) -> Buffer {
        if let Some(buffer) = self.pending.take() {
            return buffer;
        }

        if self.next < self.frame_count {
            let fill = (self.next % 256) as u8;
            let pts = self.frame_interval.saturating_mul(self.next.min(u32::MAX as u64) as u32);
            Buffer::new(vec![fill; self.frame_size], self.next).with_pts(pts)
        } else {
            Buffer::end_of_stream(self.next)
        }
    }
}

impl Stage for TestSource {
    fn initialize(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        if ctx.outputs()?.is_empty() {
            return Err(ctx.error("test source needs an output pin"));
        }
        element_log!(ctx, "will emit {} frames of {} bytes", self.frame_count, self.frame_size);
        Ok(())
    }

    fn do_work(&mut self, ctx: &StageContext<'_>) -> Result<()> {
        if self.eos_sent {
            return Ok(());
        }

        let buffer = self.next_buffer();
        let is_eos = buffer.is_end_of_stream();

        let pushed = {
            let outputs = ctx.outputs()?;
            let Some(pin) = outputs.first() else {
                self.pending = Some(buffer);
                return Err(ctx.error("output pin removed"));
            };
            pin.try_push(buffer)?
        };

        match pushed {
            Push::Queued if is_eos => {
                self.eos_sent = true;
                element_log!(ctx, "end of stream after {} frames", self.next);
            }
            Push::Queued => {
                self.next += 1;
                ctx.wake()?;
            }
            Push::Full(buffer) => {
                self.pending = Some(buffer);
            }
        }

        Ok(())
    }

    fn terminating(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        self.pending = None;
        Ok(())
    }

    // The pending frame is regenerated from `next`, so dropping it loses nothing
    fn flush(&mut self, _ctx: &StageContext<'_>) -> Result<()> {
        self.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_then_end_of_stream() {
        let mut source = TestSource::new(2, 4).with_frame_interval(Duration::from_millis(10));

        let first = source.next_buffer();
        assert_eq!(first.sequence(), 0);
        assert_eq!(first.len(), 4);
        assert_eq!(first.pts(), Some(Duration::ZERO));

        source.next = 2;
        assert!(source.next_buffer().is_end_of_stream());
    }

    #[test]
    fn test_pending_buffer_is_resent() {
        let mut source = TestSource::new(5, 1);
        source.pending = Some(Buffer::new(vec![9], 3));
        assert_eq!(source.next_buffer().sequence(), 3);

        source.rewind();
        assert_eq!(source.produced(), 0);
        assert!(!source.is_finished());
        assert_eq!(source.next_buffer().sequence(), 0);
    }
}
