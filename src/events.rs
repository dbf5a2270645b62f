//! Observation types passed from the session core to the UI layer.

use chrono::{DateTime, Local};
use uuid::Uuid;

/// Health of the live session as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Who produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::System => "system",
        }
    }
}

/// One entry of the conversation log
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Local::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }
}

/// Callback boundary consumed by the UI layer.
///
/// Every method is a fire-and-forget notification and may be invoked from
/// the capture thread or a tokio task, so implementations must return
/// quickly and never block on the session.
pub trait SessionObserver: Send + Sync {
    fn on_state_change(&self, state: ConnectionState);

    fn on_log(&self, entry: LogEntry);

    /// Boosted microphone loudness, roughly 0..1 for normal speech.
    fn on_volume_change(&self, level: f32);

    fn on_open_app(&self, app_name: &str, content: Option<&str>);

    /// RMS of each synthesized fragment as it is scheduled.
    fn on_output_level(&self, _level: f32) {}
}
