//! Barge-in handling.

use crate::events::{LogEntry, SessionObserver};
use crate::playback::PlaybackScheduler;
use std::sync::Arc;
use tracing::info;

pub const INTERRUPTED_MESSAGE: &str = "Output interrupted";

/// Silences the model when the user starts talking over it
pub struct InterruptionController {
    observer: Arc<dyn SessionObserver>,
}

impl InterruptionController {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self { observer }
    }

    /// Flush all pending playback and note the interruption in the log.
    /// The session itself is left untouched.
    pub fn interrupt(&self, scheduler: &mut PlaybackScheduler) -> usize {
        let stopped = scheduler.flush_all();
        info!("Model output interrupted, {} buffers stopped", stopped);
        self.observer.on_log(LogEntry::system(INTERRUPTED_MESSAGE));
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Role;
    use crate::testing::{MockOutput, RecordingObserver};

    #[test]
    fn test_interrupt_two_pending_buffers() {
        let output = Arc::new(MockOutput::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut scheduler = PlaybackScheduler::new(output.clone(), 24_000);
        let a = scheduler.schedule(vec![0.1; 4800]).unwrap();
        let b = scheduler.schedule(vec![0.1; 4800]).unwrap();

        let controller = InterruptionController::new(observer.clone());
        assert_eq!(controller.interrupt(&mut scheduler), 2);

        let mut stopped = output.stopped();
        stopped.sort_unstable();
        assert_eq!(stopped, vec![a.id, b.id]);
        assert_eq!(scheduler.active_len(), 0);
        assert_eq!(scheduler.cursor(), 0.0);

        let logs = observer.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].role, Role::System);
        assert_eq!(logs[0].text, INTERRUPTED_MESSAGE);
    }

    #[test]
    fn test_interrupt_with_nothing_playing_still_logs() {
        let output = Arc::new(MockOutput::default());
        let observer = Arc::new(RecordingObserver::default());
        let mut scheduler = PlaybackScheduler::new(output, 24_000);

        InterruptionController::new(observer.clone()).interrupt(&mut scheduler);
        assert_eq!(observer.logs().len(), 1);
        assert_eq!(scheduler.cursor(), 0.0);
    }
}
