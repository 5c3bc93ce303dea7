//! Per-call frame ring
//!
//! Keeps the most recent frames of a call so a sink that joins late (or a
//! caller asking for a thumbnail) has something to show immediately. The ring
//! is bounded by frame count; pushing into a full ring evicts the oldest frame.

use std::collections::VecDeque;

use super::frame::VideoFrame;

/// Default ring capacity in frames
pub const DEFAULT_CAPACITY: usize = 10;

/// Bounded FIFO of recent frames
#[derive(Debug)]
pub struct FrameRing {
    capacity: usize,
    frames: VecDeque<VideoFrame>,
    /// Bytes currently held
    size: usize,
    /// Frames evicted since creation
    evicted: u64,
}

impl FrameRing {
    /// Create a ring with [`DEFAULT_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a ring holding at most `capacity` frames (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
            size: 0,
            evicted: 0,
        }
    }

    /// Append a frame, evicting the oldest one when full
    pub fn push(&mut self, frame: VideoFrame) {
        if self.frames.len() == self.capacity {
            if let Some(old) = self.frames.pop_front() {
                self.size -= old.size();
                self.evicted += 1;
            }
        }

        self.size += frame.size();
        self.frames.push_back(frame);
    }

    /// Up to the last `count` frames, oldest first
    pub fn recent(&self, count: usize) -> Vec<VideoFrame> {
        let skip = self.frames.len().saturating_sub(count);
        self.frames.iter().skip(skip).cloned().collect()
    }

    /// Most recent frame
    pub fn latest(&self) -> Option<&VideoFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of payload currently buffered
    pub fn size(&self) -> usize {
        self.size
    }

    /// Frames dropped to make room
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.size = 0;
    }

    /// Timestamp range (first, last) of buffered frames
    pub fn timestamp_range(&self) -> Option<(u64, u64)> {
        match (self.frames.front(), self.frames.back()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(timestamp: u64, size: usize) -> VideoFrame {
        VideoFrame::new("call", "cam", Bytes::from(vec![0u8; size])).at(timestamp)
    }

    #[test]
    fn test_lossless_up_to_capacity() {
        let mut ring = FrameRing::with_capacity(4);
        for ts in 0..4 {
            ring.push(frame(ts, 10));
        }

        assert_eq!(ring.len(), 4);
        assert_eq!(ring.size(), 40);
        assert_eq!(ring.evicted(), 0);

        let timestamps: Vec<u64> = ring.recent(4).iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_evicts_oldest() {
        let mut ring = FrameRing::with_capacity(3);
        for ts in 0..7 {
            ring.push(frame(ts, 5));
        }

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.size(), 15);
        assert_eq!(ring.evicted(), 4);
        assert_eq!(ring.timestamp_range(), Some((4, 6)));
        assert_eq!(ring.latest().unwrap().timestamp, 6);
    }

    #[test]
    fn test_recent_count() {
        let mut ring = FrameRing::new();
        for ts in 0..5 {
            ring.push(frame(ts, 1));
        }

        let last_two: Vec<u64> = ring.recent(2).iter().map(|f| f.timestamp).collect();
        assert_eq!(last_two, vec![3, 4]);

        // Asking for more than buffered returns everything
        assert_eq!(ring.recent(100).len(), 5);
        assert!(ring.recent(0).is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut ring = FrameRing::with_capacity(0);
        ring.push(frame(1, 1));
        ring.push(frame(2, 1));

        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.latest().unwrap().timestamp, 2);
    }

    #[test]
    fn test_clear() {
        let mut ring = FrameRing::new();
        ring.push(frame(1, 8));
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.size(), 0);
        assert_eq!(ring.timestamp_range(), None);
    }
}
