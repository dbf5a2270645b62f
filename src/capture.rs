//! Microphone tap: per-frame loudness and realtime audio submission.

use crate::audio::FrameCallback;
use crate::codec;
use crate::events::SessionObserver;
use crate::session::{Outbound, SessionGuard};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Boosted RMS of one frame. Display clamping is left to the consumer.
pub fn loudness(frame: &[f32], boost: f32) -> f32 {
    codec::rms(frame) * boost
}

/// Runs on the capture thread once per frame
pub struct CaptureTap {
    boost: f32,
    observer: Arc<dyn SessionObserver>,
    outbound: mpsc::UnboundedSender<Outbound>,
    guard: SessionGuard,
}

impl CaptureTap {
    pub fn new(
        boost: f32,
        observer: Arc<dyn SessionObserver>,
        outbound: mpsc::UnboundedSender<Outbound>,
        guard: SessionGuard,
    ) -> Self {
        Self {
            boost,
            observer,
            outbound,
            guard,
        }
    }

    /// Report the frame's loudness and queue it for sending. Returns `None`
    /// without side effects once the owning session is gone.
    pub fn process_frame(&self, frame: &[f32]) -> Option<f32> {
        if !self.guard.is_current() {
            return None;
        }
        let level = loudness(frame, self.boost);
        self.observer.on_volume_change(level);

        let pcm = codec::f32_to_pcm16(frame);
        trace!("Captured frame: {} samples, level {:.3}", frame.len(), level);
        // Never blocks; the send task drains in order
        if self.outbound.send(Outbound::Audio(pcm)).is_err() {
            trace!("Outbound channel closed, dropping frame");
        }
        Some(level)
    }

    pub fn into_callback(self) -> FrameCallback {
        Box::new(move |frame: &[f32]| {
            self.process_frame(frame);
        })
    }
}
