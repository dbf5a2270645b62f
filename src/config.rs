//! Runtime configuration for the assistant.
//!
//! Everything has a sensible default except the API key, which `from_env`
//! requires.

use crate::error::{LiveError, Result};
use std::time::Duration;

const LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Configuration for the live assistant session
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Full WebSocket URL, including the API key query parameter
    pub url: String,
    pub model: String,
    /// Prebuilt voice used for synthesized speech
    pub voice: String,
    /// Microphone sample rate in Hz
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz
    pub output_sample_rate: u32,
    /// Samples per captured frame (power of two)
    pub frame_size: usize,
    /// Multiplier applied to frame RMS before it is reported as volume
    pub volume_boost: f32,
    /// How long `connect` waits for the transport to confirm open
    pub open_timeout: Duration,
    /// PulseAudio source name; `None` uses the default microphone
    pub input_device: Option<String>,
    /// PulseAudio sink name; `None` uses the default output
    pub output_device: Option<String>,
    pub output_transcription: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: "models/gemini-2.0-flash-live-001".to_string(),
            voice: "Kore".to_string(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_size: 4096,
            volume_boost: 5.0,
            open_timeout: Duration::from_secs(10),
            input_device: None,
            output_device: None,
            output_transcription: true,
        }
    }
}

impl AssistantConfig {
    /// Build a configuration for the given API key, leaving everything else
    /// at its default.
    pub fn from_api_key(api_key: &str) -> Self {
        Self {
            url: format!("{}?key={}", LIVE_ENDPOINT, api_key),
            ..Default::default()
        }
    }

    /// Read configuration from the environment.
    ///
    /// `GEMINI_API_KEY` is required; `VOXLIVE_MODEL`, `VOXLIVE_VOICE`,
    /// `VOXLIVE_INPUT_DEVICE` and `VOXLIVE_OUTPUT_DEVICE` override defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| LiveError::Config("GEMINI_API_KEY is not set".to_string()))?;
        Ok(Self::from_lookup(&api_key, |name| std::env::var(name).ok()))
    }

    fn from_lookup(api_key: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::from_api_key(api_key);
        if let Some(model) = lookup("VOXLIVE_MODEL") {
            config.model = model;
        }
        if let Some(voice) = lookup("VOXLIVE_VOICE") {
            config.voice = voice;
        }
        config.input_device = lookup("VOXLIVE_INPUT_DEVICE").filter(|d| !d.is_empty());
        config.output_device = lookup("VOXLIVE_OUTPUT_DEVICE").filter(|d| !d.is_empty());
        config
    }
}
