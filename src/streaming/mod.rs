//! Video streaming
//!
//! Plugins push decoded frames over the ingest listener; the service keeps a
//! short ring per call and fans every frame out to its subscribers.
//!
//! ```text
//! plugin ──► FrameIngestServer ──► VideoStreamingService ──┬──► subscriber queue
//!                                    │                     ├──► subscriber queue
//!                                    └─ FrameRing per call └──► ...
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod service;

pub use buffer::FrameRing;
pub use codec::{encode_frame, encode_record, FrameCodec};
pub use config::StreamingConfig;
pub use frame::{FrameHeader, TrackInfo, VideoFrame, VideoStreamInfo};
pub use ingest::FrameIngestServer;
pub use service::{FrameSubscription, SubscriptionId, VideoStreamingService};
