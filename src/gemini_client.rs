//! Gemini Live transport over a split WebSocket
//!
//! The socket is split into a sink, shared behind a mutex for sends, and a
//! stream owned by a reader task that turns every frame into ordered
//! [`TransportEvent`]s. `Open` is only emitted once the server acknowledges
//! the setup message.

use crate::config::AssistantConfig;
use crate::error::{LiveError, Result};
use crate::gemini::{self, BidiGenerateContentSetup, ClientMessage, RealtimeInput};
use crate::tools::ToolResult;
use crate::transport::{LiveTransport, SessionConfig, TransportEvent, TransportSession};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

type WsConnection =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Write half of the WebSocket, shared between senders
type WsSink = Arc<Mutex<futures_util::stream::SplitSink<WsConnection, Message>>>;

/// Read half of the WebSocket
type WsStream = futures_util::stream::SplitStream<WsConnection>;

/// Opens Gemini Live sessions
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    url: String,
    model: String,
}

impl GeminiTransport {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(&config.url, &config.model)
    }
}

#[async_trait]
impl LiveTransport for GeminiTransport {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::UnboundedReceiver<TransportEvent>)> {
        if self.url.is_empty() {
            return Err(LiveError::Config("endpoint URL is empty".to_string()));
        }

        info!("Connecting to Gemini Live with model {}", self.model);
        let (ws_stream, resp) = connect_async(self.url.as_str()).await?;
        debug!("WebSocket connection response status: {}", resp.status());

        let (sink, stream) = ws_stream.split();
        let session = GeminiSession {
            sink: Arc::new(Mutex::new(sink)),
            reader: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        };

        let setup = BidiGenerateContentSetup::new(&self.model, &config);
        info!(
            "Sending setup (voice {}, {} tools)",
            config.voice,
            config.tools.len()
        );
        // On failure both halves drop here and the socket goes with them
        session.send(&ClientMessage::Setup(setup)).await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_frames(stream, event_tx));
        *session.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);

        Ok((Arc::new(session), event_rx))
    }
}

/// One open Gemini Live session
pub struct GeminiSession {
    sink: WsSink,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl GeminiSession {
    async fn send(&self, msg: &ClientMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LiveError::ConnectionClosed);
        }
        let json = serde_json::to_string(msg)?;
        trace!("Sending message ({} bytes)", json.len());

        let mut writer = self.sink.lock().await;
        writer.send(Message::Text(json.into())).await.map_err(|e| {
            error!("Failed to send message: {:?}", e);
            LiveError::WebSocket(e)
        })
    }
}

#[async_trait]
impl TransportSession for GeminiSession {
    async fn send_realtime_input(&self, pcm: &[u8]) -> Result<()> {
        self.send(&ClientMessage::RealtimeInput(RealtimeInput::pcm(pcm)))
            .await
    }

    async fn send_tool_response(&self, result: &ToolResult) -> Result<()> {
        debug!("Sending tool response for {} (id {})", result.name, result.id);
        self.send(&ClientMessage::ToolResponse(result.into())).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing Gemini Live session");

        let result = self.sink.lock().await.close().await;
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        if let Err(e) = result {
            debug!("WebSocket close returned {:?}", e);
        }
        Ok(())
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
    }
}

/// Reader task: forward every frame as ordered events until the socket ends.
async fn read_frames(mut stream: WsStream, tx: mpsc::UnboundedSender<TransportEvent>) {
    info!("Inbound message task started");

    while let Some(message_result) = stream.next().await {
        let text = match message_result {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            // The server sends JSON in binary frames too
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("WebSocket closed: {:?}", frame);
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty());
                let _ = tx.send(TransportEvent::Close(reason));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("WebSocket error: {:?}", e);
                let _ = tx.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };

        match gemini::parse_server_frame(&text) {
            Ok(events) => {
                for event in events {
                    if tx.send(event).is_err() {
                        debug!("Event receiver dropped, stopping reader");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Failed to parse server message: {}", e);
                debug!("Raw message: {}", text);
            }
        }
    }

    info!("Inbound message task terminated");
    let _ = tx.send(TransportEvent::Close(None));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn session_config() -> SessionConfig {
        SessionConfig {
            voice: "Kore".to_string(),
            system_instruction: "Be brief.".to_string(),
            tools: Vec::new(),
            input_transcription: true,
            output_transcription: false,
        }
    }

    #[tokio::test]
    async fn test_empty_url_is_a_config_error() {
        let transport = GeminiTransport::new("", "models/test");
        let result = transport.connect(session_config()).await;
        assert!(matches!(result, Err(LiveError::Config(_))));
    }

    #[tokio::test]
    async fn test_dropping_session_releases_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let setup = match ws.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                other => panic!("expected setup frame, got {:?}", other),
            };
            // Resolves once the client side of the socket is gone
            while let Some(Ok(_)) = ws.next().await {}
            setup
        });

        let transport = GeminiTransport::new(url, "models/test");
        let (session, mut events) = transport.connect(session_config()).await.unwrap();
        drop(session);

        let ended = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("reader task still running after drop");
        assert_eq!(ended, None);

        let setup = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("socket still open after drop")
            .unwrap();
        assert!(setup.contains("\"setup\""));
        assert!(setup.contains("models/test"));
    }
}
