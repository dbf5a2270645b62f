//! Gapless playback of streamed audio fragments.
//!
//! Every fragment is scheduled to start where the previous one ends, or at
//! the current output time if the timeline has fallen behind. Scheduled
//! buffers stay in the active set until the device reports they ended or
//! the whole set is flushed by an interruption.

use crate::audio::{AudioOutput, BufferId};
use crate::codec;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// End of the last scheduled buffer on the output clock
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct OutputTimeline {
    cursor: f64,
}

impl OutputTimeline {
    /// Reserve `duration` seconds starting no earlier than `now` and return
    /// the start time.
    pub fn schedule_after(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.cursor.max(now);
        self.cursor = start + duration;
        start
    }

    pub fn reset(&mut self) {
        self.cursor = 0.0;
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }
}

/// A buffer handed to the output device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
    /// RMS of the samples
    pub level: f32,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Owns the output timeline and the set of buffers still playing
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    sample_rate: u32,
    timeline: OutputTimeline,
    active: HashMap<BufferId, ScheduledBuffer>,
    next_id: BufferId,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            timeline: OutputTimeline::default(),
            active: HashMap::new(),
            next_id: 0,
        }
    }

    /// Decode a base64 PCM16 fragment and schedule it. Empty fragments are
    /// skipped and return `None`.
    pub fn enqueue_encoded(&mut self, data: &str) -> Result<Option<ScheduledBuffer>> {
        let samples = codec::decode_fragment(data)?;
        Ok(self.schedule(samples))
    }

    /// Schedule decoded samples directly after the previous buffer.
    pub fn schedule(&mut self, samples: Vec<f32>) -> Option<ScheduledBuffer> {
        if samples.is_empty() {
            return None;
        }
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let start = self
            .timeline
            .schedule_after(self.output.current_time(), duration);

        self.next_id += 1;
        let buffer = ScheduledBuffer {
            id: self.next_id,
            start,
            duration,
            level: codec::rms(&samples),
        };
        trace!(
            "Scheduling buffer {} at {:.3}s for {:.3}s",
            buffer.id,
            buffer.start,
            buffer.duration
        );
        self.output.start_buffer(buffer.id, samples, start);
        self.active.insert(buffer.id, buffer);
        Some(buffer)
    }

    /// Forget a buffer that finished playing. Returns false for ids that
    /// were already flushed.
    pub fn on_ended(&mut self, id: BufferId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Stop every active buffer, clear the set and reset the timeline.
    /// Returns how many buffers were stopped.
    pub fn flush_all(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.keys() {
            self.output.stop_buffer(*id);
        }
        self.active.clear();
        self.timeline.reset();
        debug!("Flushed {} playback buffers", stopped);
        stopped
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn cursor(&self) -> f64 {
        self.timeline.cursor()
    }
}
