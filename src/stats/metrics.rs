//! Statistics for the streaming pipeline

use std::time::Duration;

/// Per-call stream statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CallStreamStats {
    /// Call id
    pub call_id: String,
    /// Stream id of the most recent frame
    pub stream_id: String,
    /// Frames received since the stream started
    pub frame_count: u64,
    /// Frames currently in the call's ring
    pub buffered_frames: usize,
    /// Payload bytes currently in the call's ring
    pub buffered_bytes: usize,
    /// Frames evicted from the ring
    pub evicted_frames: u64,
    /// Time since the first frame
    pub duration: Duration,
    /// Time since the last frame
    pub idle: Duration,
    /// Announced track count
    pub track_count: usize,
}

impl CallStreamStats {
    /// Average frames per second since the stream started
    pub fn framerate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frame_count as f64 / secs
        } else {
            0.0
        }
    }
}

/// Service-wide streaming statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingStats {
    /// Calls with a live stream
    pub active_streams: usize,
    /// Frames held across all rings
    pub stored_frames: usize,
    /// Payload bytes held across all rings
    pub stored_bytes: usize,
    /// Registered subscribers
    pub subscriber_count: usize,
    /// Frames ingested since startup
    pub frames_ingested: u64,
    /// Frame deliveries dropped on full subscriber queues
    pub frames_dropped: u64,
    /// Per-call breakdown, sorted by call id
    pub calls: Vec<CallStreamStats>,
}

impl StreamingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame count of one call
    pub fn frame_count(&self, call_id: &str) -> Option<u64> {
        self.calls
            .iter()
            .find(|c| c.call_id == call_id)
            .map(|c| c.frame_count)
    }

    /// Fraction of deliveries that were dropped
    pub fn drop_ratio(&self) -> f64 {
        let attempted = self.frames_ingested.saturating_mul(self.subscriber_count as u64);
        if attempted > 0 {
            self.frames_dropped as f64 / attempted as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(call_id: &str, frame_count: u64, secs: u64) -> CallStreamStats {
        CallStreamStats {
            call_id: call_id.to_string(),
            stream_id: "cam".to_string(),
            frame_count,
            buffered_frames: 0,
            buffered_bytes: 0,
            evicted_frames: 0,
            duration: Duration::from_secs(secs),
            idle: Duration::ZERO,
            track_count: 0,
        }
    }

    #[test]
    fn test_streaming_stats_new() {
        let stats = StreamingStats::new();
        assert_eq!(stats.active_streams, 0);
        assert_eq!(stats.stored_frames, 0);
        assert_eq!(stats.frames_ingested, 0);
        assert!(stats.calls.is_empty());
        assert_eq!(stats.drop_ratio(), 0.0);
    }

    #[test]
    fn test_call_framerate() {
        // 300 frames over 10 seconds
        assert_eq!(call("a", 300, 10).framerate(), 30.0);
        assert_eq!(call("b", 300, 0).framerate(), 0.0);
    }

    #[test]
    fn test_frame_count_lookup() {
        let stats = StreamingStats {
            calls: vec![call("a", 5, 1), call("b", 7, 1)],
            ..Default::default()
        };

        assert_eq!(stats.frame_count("b"), Some(7));
        assert_eq!(stats.frame_count("c"), None);
    }

    #[test]
    fn test_drop_ratio() {
        let stats = StreamingStats {
            subscriber_count: 2,
            frames_ingested: 50,
            frames_dropped: 25,
            ..Default::default()
        };

        assert_eq!(stats.drop_ratio(), 0.25);
    }
}
