//! Video frame and stream description types

use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One decoded video frame pushed by a plugin
///
/// Frames are immutable; cloning only bumps the payload's refcount, so the
/// same frame can sit in a ring buffer and in every subscriber queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Call the frame belongs to
    pub call_id: String,
    /// Stream within the call
    pub stream_id: String,
    /// Presentation timestamp in milliseconds
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    /// Pixel format tag (e.g. "I420", "RGBA")
    pub format: String,
    /// Raw pixel data, opaque to the core
    pub data: Bytes,
    /// Clockwise rotation in degrees
    pub rotation: i32,
}

impl VideoFrame {
    /// Create a frame with the given identity and payload
    pub fn new(call_id: impl Into<String>, stream_id: impl Into<String>, data: Bytes) -> Self {
        Self {
            call_id: call_id.into(),
            stream_id: stream_id.into(),
            timestamp: 0,
            width: 0,
            height: 0,
            format: String::new(),
            data,
            rotation: 0,
        }
    }

    /// Set the timestamp
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the dimensions
    pub fn sized(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the pixel format tag
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Wire header describing this frame
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            call_id: self.call_id.clone(),
            stream_id: self.stream_id.clone(),
            timestamp: self.timestamp,
            width: self.width,
            height: self.height,
            format: self.format.clone(),
            rotation: self.rotation,
            tracks: None,
        }
    }

    /// Reassemble a frame from its wire header and payload
    pub fn from_parts(header: FrameHeader, data: Bytes) -> Self {
        Self {
            call_id: header.call_id,
            stream_id: header.stream_id,
            timestamp: header.timestamp,
            width: header.width,
            height: header.height,
            format: header.format,
            data,
            rotation: header.rotation,
        }
    }
}

/// JSON header preceding every payload on the ingest wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub call_id: String,
    pub stream_id: String,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub rotation: i32,
    /// Track announcement; a record carrying tracks and no payload is not a frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<TrackInfo>>,
}

/// Media track announced for a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track_id: String,
    /// "video" or "audio"
    pub kind: String,
    #[serde(default)]
    pub codec: String,
}

/// Per-call stream bookkeeping
#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    pub call_id: String,
    /// Stream id of the most recent frame
    pub stream_id: String,
    pub tracks: Vec<TrackInfo>,
    pub started_at: Instant,
    pub last_frame_at: Instant,
    pub frame_count: u64,
}

impl VideoStreamInfo {
    /// Bookkeeping for a call whose first frame is `frame`
    pub fn first(frame: &VideoFrame) -> Self {
        let now = Instant::now();
        Self {
            call_id: frame.call_id.clone(),
            stream_id: frame.stream_id.clone(),
            tracks: Vec::new(),
            started_at: now,
            last_frame_at: now,
            frame_count: 1,
        }
    }

    /// Account for one more frame
    pub fn record(&mut self, frame: &VideoFrame) {
        self.frame_count += 1;
        self.last_frame_at = Instant::now();
        if self.stream_id != frame.stream_id {
            self.stream_id = frame.stream_id.clone();
        }
    }

    /// Time since the last frame
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_frame_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = VideoFrame::new("call-1", "cam", Bytes::from_static(&[1, 2, 3]))
            .at(40)
            .sized(640, 480)
            .format("I420");

        assert_eq!(frame.timestamp, 40);
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(frame.size(), 3);
        assert_eq!(frame.rotation, 0);
    }

    #[test]
    fn test_header_defaults() {
        let header: FrameHeader =
            serde_json::from_str(r#"{"call_id":"c","stream_id":"s"}"#).unwrap();

        assert_eq!(header.timestamp, 0);
        assert!(header.format.is_empty());

        let frame = VideoFrame::from_parts(header, Bytes::new());
        assert_eq!(frame.call_id, "c");
    }

    #[test]
    fn test_stream_info_record() {
        let first = VideoFrame::new("call-1", "cam", Bytes::new());
        let mut info = VideoStreamInfo::first(&first);
        assert_eq!(info.frame_count, 1);

        info.record(&VideoFrame::new("call-1", "screen", Bytes::new()));
        assert_eq!(info.frame_count, 2);
        assert_eq!(info.stream_id, "screen");
        assert!(info.last_frame_at >= info.started_at);
    }
}
