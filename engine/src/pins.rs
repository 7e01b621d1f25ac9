//! Pins: the connection points through which elements exchange buffers.
//!
//! [`link`] creates a bounded queue between two neighbouring elements and
//! returns its two halves. The upstream element owns the [`OutPin`], the
//! downstream element owns the [`InPin`]. Neither half is `Clone`, so a pin
//! lives in exactly one [`PinCollection`].
//!
//! Links also carry the dataflow wake-ups: once a half is added to an
//! element, pushing wakes the consumer's gate and pulling wakes the
//! producer's gate. Gates are held weakly so a link never keeps an element
//! alive.
//!
//! No pin operation blocks indefinitely. `try_*` never waits and the
//! `*_timeout` variants wait at most the given duration.

use crate::buffer::Buffer;
use crate::gate::WaitGate;
use crate::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

/// Outcome of a push.
#[derive(Debug, PartialEq, Eq)]
pub enum Push {
    /// The buffer was queued on the link.
    Queued,
    /// The link was full; the buffer is handed back.
    Full(Buffer),
}

/// Counters for one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStats {
    pub capacity: usize,
    pub buffered: usize,
    pub pushed: u64,
    pub pulled: u64,
    pub flushed: u64,
}

struct LinkState {
    buffers: VecDeque<Buffer>,
    capacity: usize,
    pushed: u64,
    pulled: u64,
    flushed: u64,
    producer: Weak<WaitGate>,
    consumer: Weak<WaitGate>,
}

struct Link {
    state: Mutex<LinkState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Link {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(LinkState {
                buffers: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                pushed: 0,
                pulled: 0,
                flushed: 0,
                producer: Weak::new(),
                consumer: Weak::new(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn push(&self, buffer: Buffer, timeout: Option<Duration>) -> Result<Push> {
        let mut state = self.state.lock()?;

        if state.buffers.len() >= state.capacity {
            let Some(timeout) = timeout else {
                return Ok(Push::Full(buffer));
            };
            let (s, _) = self
                .not_full
                .wait_timeout_while(state, timeout, |s| s.buffers.len() >= s.capacity)?;
            state = s;
            if state.buffers.len() >= state.capacity {
                return Ok(Push::Full(buffer));
            }
        }

        state.buffers.push_back(buffer);
        state.pushed += 1;
        let consumer = state.consumer.upgrade();
        self.not_empty.notify_one();
        drop(state);

        // The gate is locked only after the link lock is released
        if let Some(gate) = consumer {
            gate.wake()?;
        }
        Ok(Push::Queued)
    }

    fn pull(&self, timeout: Option<Duration>) -> Result<Option<Buffer>> {
        let mut state = self.state.lock()?;

        if state.buffers.is_empty() {
            let Some(timeout) = timeout else {
                return Ok(None);
            };
            let (s, _) = self
                .not_empty
                .wait_timeout_while(state, timeout, |s| s.buffers.is_empty())?;
            state = s;
        }

        let Some(buffer) = state.buffers.pop_front() else {
            return Ok(None);
        };
        state.pulled += 1;
        let producer = state.producer.upgrade();
        self.not_full.notify_one();
        drop(state);

        if let Some(gate) = producer {
            gate.wake()?;
        }
        Ok(Some(buffer))
    }

    fn flush(&self) -> Result<usize> {
        let mut state = self.state.lock()?;
        let discarded = state.buffers.len();
        state.buffers.clear();
        state.flushed += discarded as u64;
        self.not_full.notify_all();
        Ok(discarded)
    }

    fn buffered(&self) -> Result<usize> {
        Ok(self.state.lock()?.buffers.len())
    }

    fn stats(&self) -> Result<LinkStats> {
        let state = self.state.lock()?;
        Ok(LinkStats {
            capacity: state.capacity,
            buffered: state.buffers.len(),
            pushed: state.pushed,
            pulled: state.pulled,
            flushed: state.flushed,
        })
    }
}

/// Create a link holding at most `capacity` buffers (at least one).
///
/// Returns the upstream half (named `src`) and the downstream half (named
/// `sink`).
pub fn link(capacity: usize) -> (OutPin, InPin) {
    let link = Arc::new(Link::new(capacity));
    (
        OutPin {
            name: "src".to_string(),
            link: Arc::clone(&link),
        },
        InPin {
            name: "sink".to_string(),
            link,
        },
    )
}

/// Behaviour common to both pin halves.
pub trait Pin: Send {
    fn name(&self) -> &str;

    /// Discard everything queued on the link, returning how many buffers
    /// were dropped. Idempotent, and safe after the peer half is gone.
    fn flush(&self) -> Result<usize>;

    /// Buffers currently queued on the link.
    fn buffered(&self) -> Result<usize>;
}

/// Upstream half of a link.
pub struct OutPin {
    name: String,
    link: Arc<Link>,
}

impl OutPin {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue `buffer` if there is room; otherwise hand it back.
    pub fn try_push(&self, buffer: Buffer) -> Result<Push> {
        self.link.push(buffer, None)
    }

    /// Queue `buffer`, waiting up to `timeout` for room.
    pub fn push_timeout(&self, buffer: Buffer, timeout: Duration) -> Result<Push> {
        self.link.push(buffer, Some(timeout))
    }

    /// Whether the downstream half still exists.
    pub fn is_connected(&self) -> bool {
        Arc::strong_count(&self.link) > 1
    }

    pub fn stats(&self) -> Result<LinkStats> {
        self.link.stats()
    }

    pub(crate) fn attach(&self, gate: &Arc<WaitGate>) -> Result<()> {
        self.link.state.lock()?.producer = Arc::downgrade(gate);
        Ok(())
    }
}

impl Pin for OutPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn flush(&self) -> Result<usize> {
        self.link.flush()
    }

    fn buffered(&self) -> Result<usize> {
        self.link.buffered()
    }
}

impl Drop for OutPin {
    fn drop(&mut self) {
        if let Ok(mut state) = self.link.state.lock() {
            state.producer = Weak::new();
        }
    }
}

impl std::fmt::Debug for OutPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutPin").field("name", &self.name).finish()
    }
}

/// Downstream half of a link.
pub struct InPin {
    name: String,
    link: Arc<Link>,
}

impl InPin {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Take the oldest queued buffer, if any.
    pub fn try_pull(&self) -> Result<Option<Buffer>> {
        self.link.pull(None)
    }

    /// Take the oldest queued buffer, waiting up to `timeout` for one.
    pub fn pull_timeout(&self, timeout: Duration) -> Result<Option<Buffer>> {
        self.link.pull(Some(timeout))
    }

    /// Whether the upstream half still exists.
    pub fn is_connected(&self) -> bool {
        Arc::strong_count(&self.link) > 1
    }

    pub fn stats(&self) -> Result<LinkStats> {
        self.link.stats()
    }

    pub(crate) fn attach(&self, gate: &Arc<WaitGate>) -> Result<()> {
        self.link.state.lock()?.consumer = Arc::downgrade(gate);
        Ok(())
    }
}

impl Pin for InPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn flush(&self) -> Result<usize> {
        self.link.flush()
    }

    fn buffered(&self) -> Result<usize> {
        self.link.buffered()
    }
}

impl Drop for InPin {
    fn drop(&mut self) {
        if let Ok(mut state) = self.link.state.lock() {
            state.consumer = Weak::new();
        }
    }
}

impl std::fmt::Debug for InPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InPin").field("name", &self.name).finish()
    }
}

/// Ordered set of pins owned by one element.
#[derive(Debug)]
pub struct PinCollection<P: Pin> {
    pins: Vec<P>,
}

/// An element's input pins
pub type InputPins = PinCollection<InPin>;

/// An element's output pins
pub type OutputPins = PinCollection<OutPin>;

impl<P: Pin> PinCollection<P> {
    pub fn new() -> Self {
        Self { pins: Vec::new() }
    }

    /// Append a pin. Uniqueness of names is up to the caller.
    pub fn add(&mut self, pin: P) {
        self.pins.push(pin);
    }

    /// Drop every pin without flushing its link.
    pub fn clear(&mut self) {
        self.pins.clear();
    }

    /// Flush every pin, returning the total number of buffers discarded.
    pub fn flush(&self) -> Result<usize> {
        let mut discarded = 0;
        for pin in &self.pins {
            discarded += pin.flush()?;
        }
        Ok(discarded)
    }

    /// Total buffers queued across all pins
    pub fn buffered(&self) -> Result<usize> {
        let mut total = 0;
        for pin in &self.pins {
            total += pin.buffered()?;
        }
        Ok(total)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&P> {
        self.pins.get(index)
    }

    pub fn first(&self) -> Option<&P> {
        self.pins.first()
    }

    pub fn by_name(&self, name: &str) -> Option<&P> {
        self.pins.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &P> {
        self.pins.iter()
    }
}

impl<P: Pin> Default for PinCollection<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> Buffer {
        Buffer::new(vec![0u8; 16], sequence)
    }

    #[test]
    fn test_push_pull_in_order() {
        let (out, input) = link(4);
        for seq in 0..3 {
            assert_eq!(out.try_push(frame(seq)).unwrap(), Push::Queued);
        }

        assert_eq!(input.buffered().unwrap(), 3);
        for seq in 0..3 {
            assert_eq!(input.try_pull().unwrap().unwrap().sequence(), seq);
        }
        assert!(input.try_pull().unwrap().is_none());
    }

    #[test]
    fn test_full_link_hands_buffer_back() {
        let (out, input) = link(1);
        assert_eq!(out.try_push(frame(0)).unwrap(), Push::Queued);
        assert_eq!(out.try_push(frame(1)).unwrap(), Push::Full(frame(1)));
        assert_eq!(
            out.push_timeout(frame(2), Duration::from_millis(10)).unwrap(),
            Push::Full(frame(2))
        );

        input.try_pull().unwrap();
        assert_eq!(out.try_push(frame(3)).unwrap(), Push::Queued);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let (out, _input) = link(0);
        assert_eq!(out.stats().unwrap().capacity, 1);
        assert_eq!(out.try_push(frame(0)).unwrap(), Push::Queued);
    }

    #[test]
    fn test_pull_timeout_on_empty_link() {
        let (_out, input) = link(2);
        assert!(input.pull_timeout(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_flush_is_idempotent() {
        let (out, input) = link(8);
        for seq in 0..5 {
            out.try_push(frame(seq)).unwrap();
        }

        assert_eq!(input.flush().unwrap(), 5);
        assert_eq!(input.flush().unwrap(), 0);
        assert_eq!(out.flush().unwrap(), 0);
        assert_eq!(out.stats().unwrap().flushed, 5);
    }

    #[test]
    fn test_flush_without_neighbour() {
        let (out, input) = link(4);
        out.try_push(frame(0)).unwrap();
        drop(input);

        assert!(!out.is_connected());
        assert_eq!(out.flush().unwrap(), 1);
    }

    #[test]
    fn test_push_wakes_consumer_and_pull_wakes_producer() {
        let (out, input) = link(4);
        let producer = Arc::new(WaitGate::new());
        let consumer = Arc::new(WaitGate::new());
        out.attach(&producer).unwrap();
        input.attach(&consumer).unwrap();

        out.try_push(frame(0)).unwrap();
        assert!(consumer.take_pending().unwrap());
        assert!(!producer.take_pending().unwrap());

        input.try_pull().unwrap();
        assert!(producer.take_pending().unwrap());
        assert!(!consumer.take_pending().unwrap());
    }

    #[test]
    fn test_dropped_pin_detaches_gate() {
        let (out, input) = link(4);
        let consumer = Arc::new(WaitGate::new());
        input.attach(&consumer).unwrap();
        drop(input);

        out.try_push(frame(0)).unwrap();
        assert!(!consumer.take_pending().unwrap());
    }

    #[test]
    fn test_collection_flush_and_clear() {
        let mut outputs = OutputPins::new();
        let (a, a_in) = link(4);
        let (b, b_in) = link(4);
        outputs.add(a.with_name("video"));
        outputs.add(b.with_name("audio"));

        outputs.by_name("video").unwrap().try_push(frame(0)).unwrap();
        outputs.by_name("audio").unwrap().try_push(frame(0)).unwrap();
        outputs.by_name("audio").unwrap().try_push(frame(1)).unwrap();
        assert_eq!(outputs.buffered().unwrap(), 3);

        assert_eq!(outputs.flush().unwrap(), 3);
        assert_eq!(outputs.flush().unwrap(), 0);
        assert_eq!(a_in.buffered().unwrap(), 0);
        assert_eq!(b_in.stats().unwrap().flushed, 2);

        outputs.first().unwrap().try_push(frame(2)).unwrap();
        outputs.clear();
        assert!(outputs.is_empty());
        // Clearing does not flush
        assert_eq!(a_in.buffered().unwrap(), 1);
    }
}
