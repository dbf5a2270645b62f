//! Gemini Live API wire format
//!
//! Client messages are serialized as `{"setup": ...}`, `{"realtimeInput": ...}`
//! or `{"toolResponse": ...}`. Server frames are parsed into
//! [`TransportEvent`]s in the order their contents should be applied.

use crate::codec;
use crate::error::Result;
use crate::tools::{ToolCall, ToolResult};
use crate::transport::{ServerEvent, SessionConfig, TransportEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// The only response modality the session asks for
const RESPONSE_MODALITY: &str = "AUDIO";

/// Message sent from client to server.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Session setup message.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Value>,
}

impl BidiGenerateContentSetup {
    pub fn new(model: &str, config: &SessionConfig) -> Self {
        let declarations: Vec<Value> = config.tools.iter().map(|t| t.to_json()).collect();
        let tools = if declarations.is_empty() {
            Vec::new()
        } else {
            vec![serde_json::json!({ "functionDeclarations": declarations })]
        };

        Self {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![RESPONSE_MODALITY.to_string()],
                speech_config: Some(serde_json::json!({
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice }
                    }
                })),
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: config.system_instruction.clone(),
                }],
            },
            tools,
            input_audio_transcription: config.input_transcription.then(|| serde_json::json!({})),
            output_audio_transcription: config.output_transcription.then(|| serde_json::json!({})),
        }
    }
}

/// Generation configuration for setup.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<Value>,
}

#[derive(Debug, Serialize, Clone)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Clone)]
pub struct Part {
    pub text: String,
}

/// A chunk of realtime microphone audio
#[derive(Debug, Serialize, Clone)]
pub struct RealtimeInput {
    pub audio: Blob,
}

impl RealtimeInput {
    pub fn pcm(pcm: &[u8]) -> Self {
        Self {
            audio: Blob {
                data: codec::encode_base64(pcm),
                mime_type: INPUT_MIME_TYPE.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Serialize, Clone)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl From<&ToolResult> for ToolResponse {
    fn from(result: &ToolResult) -> Self {
        Self {
            function_responses: vec![FunctionResponse {
                id: result.id.clone(),
                name: result.name.clone(),
                response: result.response.clone(),
            }],
        }
    }
}

/// Server -> client frame. Exactly one field is normally present.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallMessage>,
    pub tool_call_cancellation: Option<ToolCallCancellationMessage>,
    pub go_away: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    pub mime_type: Option<String>,
}

impl InlineData {
    /// Blobs without a MIME type are taken to be PCM, the only format an
    /// audio session sends.
    fn is_pcm_audio(&self) -> bool {
        self.mime_type
            .as_deref()
            .map_or(true, |m| m.starts_with("audio/pcm"))
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ToolCallCancellationMessage {
    #[serde(default)]
    pub ids: Vec<String>,
}

impl ServerMessage {
    /// Flatten the frame into ordered events.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(TransportEvent::Open);
        }

        if let Some(content) = self.server_content {
            let mut push = |ev: ServerEvent| events.push(TransportEvent::Message(ev));

            // Stale output must be flushed before anything else in the frame
            if content.interrupted {
                push(ServerEvent::Interrupted);
            }
            if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
                push(ServerEvent::InputTranscript(t.text));
            }
            if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
                push(ServerEvent::OutputTranscript(t.text));
            }
            for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
                if let Some(inline) = part.inline_data {
                    if inline.is_pcm_audio() {
                        push(ServerEvent::Audio(inline.data));
                    } else {
                        debug!(
                            "Skipping non-audio inline data ({})",
                            inline.mime_type.as_deref().unwrap_or_default()
                        );
                    }
                } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    push(ServerEvent::Text(text));
                }
            }
            if content.turn_complete {
                push(ServerEvent::TurnComplete);
            }
        }

        if let Some(tool_call) = self.tool_call {
            let calls = tool_call
                .function_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.name,
                    args: c.args,
                })
                .collect();
            events.push(TransportEvent::Message(ServerEvent::ToolCalls(calls)));
        }

        if let Some(cancel) = self.tool_call_cancellation {
            events.push(TransportEvent::Message(ServerEvent::ToolCallCancellation(cancel.ids)));
        }

        if self.go_away.is_some() {
            events.push(TransportEvent::Message(ServerEvent::GoAway));
        }

        events
    }
}

/// Parse one text frame from the server.
pub fn parse_server_frame(text: &str) -> Result<Vec<TransportEvent>> {
    let message: ServerMessage = serde_json::from_str(text)?;
    Ok(message.into_events())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools;
    use serde_json::json;

    fn session_config() -> SessionConfig {
        SessionConfig {
            voice: "Kore".to_string(),
            system_instruction: "Be brief.".to_string(),
            tools: tools::declarations(),
            input_transcription: true,
            output_transcription: false,
        }
    }

    #[test]
    fn test_setup_serialization() {
        let setup = BidiGenerateContentSetup::new("models/test", &session_config());
        let parsed = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();

        let setup = &parsed["setup"];
        assert_eq!(setup["model"], "models/test");
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(setup["tools"][0]["functionDeclarations"].as_array().unwrap().len(), 5);
        assert_eq!(setup["inputAudioTranscription"], json!({}));
        assert!(setup.get("outputAudioTranscription").is_none());
    }

    #[test]
    fn test_realtime_input_serialization() {
        let msg = ClientMessage::RealtimeInput(RealtimeInput::pcm(&[1, 0, 2, 0]));
        let parsed = serde_json::to_value(msg).unwrap();
        assert_eq!(parsed["realtimeInput"]["audio"]["mimeType"], INPUT_MIME_TYPE);
        assert_eq!(parsed["realtimeInput"]["audio"]["data"], codec::encode_base64(&[1, 0, 2, 0]));
    }

    #[test]
    fn test_tool_response_serialization() {
        let result = ToolResult {
            id: "call-7".to_string(),
            name: "openApp".to_string(),
            response: json!({ "status": "opened", "app": "notepad" }),
        };
        let parsed = serde_json::to_value(ClientMessage::ToolResponse((&result).into())).unwrap();
        let response = &parsed["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "call-7");
        assert_eq!(response["name"], "openApp");
        assert_eq!(response["response"]["app"], "notepad");
    }

    #[test]
    fn test_setup_complete_opens() {
        let events = parse_server_frame(r#"{"setupComplete": {}}"#).unwrap();
        assert_eq!(events, vec![TransportEvent::Open]);
    }

    #[test]
    fn test_server_content_ordering() {
        let frame = json!({
            "serverContent": {
                "interrupted": true,
                "inputTranscription": { "text": "what's the weather" },
                "outputTranscription": { "text": "" },
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                    { "text": "It is sunny." }
                ]},
                "turnComplete": true
            }
        });
        let events = parse_server_frame(&frame.to_string()).unwrap();
        assert_eq!(
            events,
            vec![
                TransportEvent::Message(ServerEvent::Interrupted),
                TransportEvent::Message(ServerEvent::InputTranscript("what's the weather".to_string())),
                TransportEvent::Message(ServerEvent::Audio("AAAA".to_string())),
                TransportEvent::Message(ServerEvent::Text("It is sunny.".to_string())),
                TransportEvent::Message(ServerEvent::TurnComplete),
            ]
        );
    }

    #[test]
    fn test_only_pcm_inline_data_is_audio() {
        let frame = json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": "iVBORw0K" } },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                    { "inlineData": { "data": "AQAB" } }
                ]}
            }
        });
        let events = parse_server_frame(&frame.to_string()).unwrap();
        assert_eq!(
            events,
            vec![
                TransportEvent::Message(ServerEvent::Audio("AAAA".to_string())),
                TransportEvent::Message(ServerEvent::Audio("AQAB".to_string())),
            ]
        );
    }

    #[test]
    fn test_tool_call_parsing() {
        let frame = json!({
            "toolCall": { "functionCalls": [
                { "id": "a", "name": "openApp", "args": { "appName": "notepad", "content": "hello" } },
                { "id": "b", "name": "getSystemStatus" }
            ]}
        });
        let events = parse_server_frame(&frame.to_string()).unwrap();
        let TransportEvent::Message(ServerEvent::ToolCalls(calls)) = &events[0] else {
            panic!("expected tool calls, got {:?}", events);
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].args["content"], "hello");
        assert!(calls[1].args.is_empty());
    }

    #[test]
    fn test_cancellation_and_go_away() {
        let events = parse_server_frame(r#"{"toolCallCancellation": {"ids": ["a", "b"]}}"#).unwrap();
        assert_eq!(
            events,
            vec![TransportEvent::Message(ServerEvent::ToolCallCancellation(vec![
                "a".to_string(),
                "b".to_string()
            ]))]
        );
        let events = parse_server_frame(r#"{"goAway": {"timeLeft": "5s"}}"#).unwrap();
        assert_eq!(events, vec![TransportEvent::Message(ServerEvent::GoAway)]);
    }

    #[test]
    fn test_unknown_frames() {
        assert!(parse_server_frame(r#"{"usageMetadata": {}}"#).unwrap().is_empty());
        assert!(parse_server_frame("not json").is_err());
    }
}
