//! VoxLive - voice assistant client for the Gemini Live API
//!
//! Streams microphone audio to a live session, plays the synthesized
//! replies back without gaps, handles barge-in and answers the model's
//! tool calls locally.

#![forbid(unsafe_code)]

/// Device traits and PulseAudio device listing
pub mod audio;
/// Microphone tap
pub mod capture;
pub mod codec;
pub mod config;
/// Terminal observer
pub mod console;
pub mod error;
/// Observer callbacks and log entries
pub mod events;
/// Gemini Live wire format
pub mod gemini;
/// Gemini Live transport over WebSocket
pub mod gemini_client;
pub mod interrupt;
pub mod language;
pub mod playback;
/// PulseAudio devices
pub mod pulse;
pub mod session;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::AssistantConfig;
pub use error::{LiveError, Result};
pub use events::{ConnectionState, LogEntry, Role, SessionObserver};
pub use language::LanguageMode;
pub use session::SessionConnector;
