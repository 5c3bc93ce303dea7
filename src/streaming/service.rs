//! Video streaming service
//!
//! Every call's frames flow through here: per-call bookkeeping, a short ring
//! of recent frames, and a fan-out to any number of subscribers.
//!
//! Each subscriber owns a bounded queue. Delivery never waits: when a queue is
//! full the frame is dropped for that subscriber only, so one slow consumer
//! cannot stall ingestion or its siblings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::stats::{CallStreamStats, StreamingStats};

use super::buffer::FrameRing;
use super::codec::FrameCodec;
use super::config::StreamingConfig;
use super::frame::{TrackInfo, VideoFrame, VideoStreamInfo};

/// Identifies one subscription
pub type SubscriptionId = u64;

/// Receiving end of a subscription
#[derive(Debug)]
pub struct FrameSubscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<VideoFrame>,
}

impl FrameSubscription {
    /// Subscription id, used to unsubscribe
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next frame; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<VideoFrame> {
        self.rx.recv().await
    }

    /// Next frame if one is queued
    pub fn try_recv(&mut self) -> Option<VideoFrame> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<VideoFrame>,
    dropped: u64,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, VideoStreamInfo>,
    buffers: HashMap<String, FrameRing>,
    subscribers: Vec<Subscriber>,
}

/// Frame ingestion, buffering and fan-out
pub struct VideoStreamingService {
    config: StreamingConfig,
    state: Mutex<State>,
    next_subscription_id: AtomicU64,
    frames_ingested: AtomicU64,
    frames_dropped: AtomicU64,
}

impl VideoStreamingService {
    /// Create a service with default configuration
    pub fn new() -> Self {
        Self::with_config(StreamingConfig::default())
    }

    /// Create a service with custom configuration
    pub fn with_config(config: StreamingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            next_subscription_id: AtomicU64::new(1),
            frames_ingested: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Get the service configuration
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Ingest one frame
    ///
    /// Bookkeeping, buffering and fan-out happen under one lock, so every
    /// subscriber sees frames in ingestion order. Returns how many subscribers
    /// the frame was queued for.
    pub async fn ingest_frame(&self, frame: VideoFrame) -> usize {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let frame_count = match state.streams.get_mut(&frame.call_id) {
            Some(info) => {
                info.record(&frame);
                info.frame_count
            }
            None => {
                tracing::info!(
                    call_id = %frame.call_id,
                    stream_id = %frame.stream_id,
                    width = frame.width,
                    height = frame.height,
                    format = %frame.format,
                    "Video stream started"
                );
                state
                    .streams
                    .insert(frame.call_id.clone(), VideoStreamInfo::first(&frame));
                1
            }
        };

        let every = self.config.progress_log_every;
        if every > 0 && frame_count % every == 0 {
            tracing::info!(
                call_id = %frame.call_id,
                frames = frame_count,
                size = frame.size(),
                "Video stream progress"
            );
        }

        state
            .buffers
            .entry(frame.call_id.clone())
            .or_insert_with(|| FrameRing::with_capacity(self.config.max_frames_per_call))
            .push(frame.clone());

        self.frames_ingested.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        state.subscribers.retain_mut(|sub| match sub.tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                sub.dropped += 1;
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);

                let err = Error::ResourceExhausted(format!("subscriber {} queue full", sub.id));
                tracing::debug!(
                    call_id = %frame.call_id,
                    subscriber = sub.id,
                    dropped = sub.dropped,
                    error = %err,
                    "Dropping frame for slow subscriber"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = sub.id, "Pruning closed subscriber");
                false
            }
        });

        delivered
    }

    /// Record the tracks announced for a call
    pub async fn update_tracks(&self, call_id: &str, tracks: Vec<TrackInfo>) -> bool {
        let mut state = self.state.lock().await;

        match state.streams.get_mut(call_id) {
            Some(info) => {
                tracing::debug!(call_id = %call_id, tracks = tracks.len(), "Stream tracks updated");
                info.tracks = tracks;
                true
            }
            None => {
                tracing::debug!(call_id = %call_id, "Track update for unknown stream");
                false
            }
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> FrameSubscription {
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_capacity.max(1));
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock().await;
        state.subscribers.push(Subscriber { id, tx, dropped: 0 });

        tracing::debug!(subscriber = id, total = state.subscribers.len(), "Subscriber added");
        FrameSubscription { id, rx }
    }

    /// Remove a subscriber; its queue closes after the buffered frames
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.subscribers.len();
        state.subscribers.retain(|sub| sub.id != id);

        let removed = state.subscribers.len() < before;
        if removed {
            tracing::debug!(subscriber = id, "Subscriber removed");
        }
        removed
    }

    /// Number of registered subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Up to the last `count` frames of a call, oldest first
    pub async fn get_recent_frames(&self, call_id: &str, count: usize) -> Vec<VideoFrame> {
        let state = self.state.lock().await;
        state
            .buffers
            .get(call_id)
            .map(|ring| ring.recent(count))
            .unwrap_or_default()
    }

    /// Bookkeeping of one call
    pub async fn get_stream_info(&self, call_id: &str) -> Option<VideoStreamInfo> {
        self.state.lock().await.streams.get(call_id).cloned()
    }

    /// Every live stream, sorted by call id
    pub async fn get_active_streams(&self) -> Vec<VideoStreamInfo> {
        let state = self.state.lock().await;
        let mut streams: Vec<VideoStreamInfo> = state.streams.values().cloned().collect();
        streams.sort_by(|a, b| a.call_id.cmp(&b.call_id));
        streams
    }

    /// Drop a call's stream and buffer (call ended)
    pub async fn remove_stream(&self, call_id: &str) -> bool {
        let mut state = self.state.lock().await;
        state.buffers.remove(call_id);
        let removed = state.streams.remove(call_id).is_some();

        if removed {
            tracing::info!(call_id = %call_id, "Video stream removed");
        }
        removed
    }

    /// Service-wide statistics
    pub async fn get_stream_stats(&self) -> StreamingStats {
        let state = self.state.lock().await;

        let mut calls: Vec<CallStreamStats> = state
            .streams
            .values()
            .map(|info| {
                let ring = state.buffers.get(&info.call_id);
                CallStreamStats {
                    call_id: info.call_id.clone(),
                    stream_id: info.stream_id.clone(),
                    frame_count: info.frame_count,
                    buffered_frames: ring.map_or(0, FrameRing::len),
                    buffered_bytes: ring.map_or(0, FrameRing::size),
                    evicted_frames: ring.map_or(0, FrameRing::evicted),
                    duration: info.started_at.elapsed(),
                    idle: info.idle_for(),
                    track_count: info.tracks.len(),
                }
            })
            .collect();
        calls.sort_by(|a, b| a.call_id.cmp(&b.call_id));

        StreamingStats {
            active_streams: state.streams.len(),
            stored_frames: state.buffers.values().map(FrameRing::len).sum(),
            stored_bytes: state.buffers.values().map(FrameRing::size).sum(),
            subscriber_count: state.subscribers.len(),
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            calls,
        }
    }

    /// Remove calls idle longer than the stream timeout
    ///
    /// Returns the removed call ids.
    pub async fn sweep_inactive(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let timeout = self.config.stream_timeout;

        let stale: Vec<String> = state
            .streams
            .values()
            .filter(|info| info.idle_for() > timeout)
            .map(|info| info.call_id.clone())
            .collect();

        for call_id in &stale {
            state.streams.remove(call_id);
            state.buffers.remove(call_id);
            tracing::info!(call_id = %call_id, timeout_secs = timeout.as_secs(), "Inactive stream removed");
        }

        stale
    }

    /// Spawn the background inactivity sweep
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_sweep_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        let interval = service.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = service.sweep_inactive().await;
                if !removed.is_empty() {
                    tracing::debug!(count = removed.len(), "Inactivity sweep complete");
                }
            }
        })
    }

    /// Consume a plugin's frame stream until it closes
    ///
    /// Returns the number of frames ingested. A malformed record ends the
    /// stream with an error; frames already ingested stay.
    pub async fn ingest_stream<R>(&self, mut reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let codec = FrameCodec::new(self.config.max_header_size, self.config.max_payload_size);
        let mut frames = 0u64;

        while let Some((mut header, payload)) = codec.read_record(&mut reader).await? {
            let tracks = header.tracks.take();
            let announcement_only = tracks.is_some() && payload.is_empty();

            if !announcement_only {
                let call_id = header.call_id.clone();
                self.ingest_frame(VideoFrame::from_parts(header, payload)).await;
                frames += 1;

                if let Some(tracks) = tracks {
                    self.update_tracks(&call_id, tracks).await;
                }
            } else if let Some(tracks) = tracks {
                self.announce_tracks(&header.call_id, &header.stream_id, tracks)
                    .await;
            }
        }

        Ok(frames)
    }

    async fn announce_tracks(&self, call_id: &str, stream_id: &str, tracks: Vec<TrackInfo>) {
        if !self.update_tracks(call_id, tracks.clone()).await {
            // Announcement before the first frame: create the stream without a frame
            let mut state = self.state.lock().await;
            let placeholder = VideoFrame::new(call_id, stream_id, bytes::Bytes::new());
            let mut info = VideoStreamInfo::first(&placeholder);
            info.frame_count = 0;
            info.tracks = tracks;
            state.streams.entry(call_id.to_string()).or_insert(info);
        }
    }
}

impl Default for VideoStreamingService {
    fn default() -> Self {
        Self::new()
    }
}
