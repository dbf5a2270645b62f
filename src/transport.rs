//! Duplex session abstraction the core sits on.
//!
//! A [`LiveTransport`] opens a session and hands back a shared
//! [`TransportSession`] for outbound sends plus a receiver that yields
//! [`TransportEvent`]s in exactly the order the remote delivered them.

use crate::error::Result;
use crate::tools::{ToolCall, ToolDeclaration, ToolResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Configuration negotiated when the session opens. Responses are always
/// synthesized speech.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub voice: String,
    pub system_instruction: String,
    pub tools: Vec<ToolDeclaration>,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

/// Decoded inbound message content
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Transcript of the user's speech
    InputTranscript(String),
    /// Transcript of the model's synthesized speech
    OutputTranscript(String),
    /// Text part of a model turn
    Text(String),
    /// Base64 PCM16 audio at the output sample rate
    Audio(String),
    /// The user started speaking over the current response
    Interrupted,
    TurnComplete,
    ToolCalls(Vec<ToolCall>),
    ToolCallCancellation(Vec<String>),
    GoAway,
}

/// Session lifecycle and message notifications
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(ServerEvent),
    Close(Option<String>),
    Error(String),
}

/// Outbound half of an open session
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Send one frame of 16-bit PCM microphone audio.
    async fn send_realtime_input(&self, pcm: &[u8]) -> Result<()>;

    async fn send_tool_response(&self, result: &ToolResult) -> Result<()>;

    /// Release the session. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Factory for duplex sessions
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::UnboundedReceiver<TransportEvent>)>;
}
