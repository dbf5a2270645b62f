//! Terminal front-end for the session callbacks.

use crate::events::{ConnectionState, LogEntry, Role, SessionObserver};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

/// Entries kept by [`RecentLog`]
pub const RECENT_LOG_CAPACITY: usize = 50;

/// The most recent log entries, oldest first
#[derive(Debug)]
pub struct RecentLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for RecentLog {
    fn default() -> Self {
        Self::with_capacity(RECENT_LOG_CAPACITY)
    }
}

impl RecentLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

/// Prints session activity and publishes the connection state
pub struct ConsoleObserver {
    log: Mutex<RecentLog>,
    state: watch::Sender<ConnectionState>,
}

impl ConsoleObserver {
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (state, rx) = watch::channel(ConnectionState::Disconnected);
        let observer = Self {
            log: Mutex::new(RecentLog::default()),
            state,
        };
        (observer, rx)
    }

    pub fn recent(&self) -> MutexGuard<'_, RecentLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn format_entry(entry: &LogEntry) -> String {
    let speaker = match entry.role {
        Role::User => "you",
        Role::Model => "assistant",
        Role::System => "system",
    };
    format!(
        "[{}] {:>9}: {}",
        entry.timestamp.format("%H:%M:%S"),
        speaker,
        entry.text
    )
}

impl SessionObserver for ConsoleObserver {
    fn on_state_change(&self, state: ConnectionState) {
        println!("-- {:?}", state);
        self.state.send_replace(state);
    }

    fn on_log(&self, entry: LogEntry) {
        println!("{}", format_entry(&entry));
        self.recent().push(entry);
    }

    fn on_volume_change(&self, level: f32) {
        debug!("Mic level {:.2}", level.min(1.0));
    }

    fn on_open_app(&self, app_name: &str, content: Option<&str>) {
        match content {
            Some(content) => println!(">> open {}:\n{}", app_name, content),
            None => println!(">> open {}", app_name),
        }
    }

    fn on_output_level(&self, level: f32) {
        debug!("Output level {:.2}", level);
    }
}
