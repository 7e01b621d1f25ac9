//! Data unit exchanged between elements over pins.

use std::time::Duration;

/// An owned chunk of media data with its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Buffer {
    data: Vec<u8>,
    sequence: u64,
    pts: Option<Duration>,
    end_of_stream: bool,
}

impl Buffer {
    /// Create a buffer carrying `data` at position `sequence`.
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            pts: None,
            end_of_stream: false,
        }
    }

    /// Create an empty end-of-stream marker.
    pub fn end_of_stream(sequence: u64) -> Self {
        Self {
            data: Vec::new(),
            sequence,
            pts: None,
            end_of_stream: true,
        }
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn pts(&self) -> Option<Duration> {
        self.pts
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_stream_marker() {
        let eos = Buffer::end_of_stream(42);
        assert!(eos.is_end_of_stream());
        assert!(eos.is_empty());
        assert_eq!(eos.sequence(), 42);

        let frame = Buffer::new(vec![1, 2, 3], 7).with_pts(Duration::from_millis(40));
        assert!(!frame.is_end_of_stream());
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.pts(), Some(Duration::from_millis(40)));
    }
}
