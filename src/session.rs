//! Session connector: owns one live session and its audio devices.
//!
//! `connect` opens the speakers, the microphone and the transport, waits
//! for the transport to confirm open and only then attaches the capture
//! tap. Three activities run while connected:
//!
//! - the capture thread pushes encoded frames onto the outbound channel
//! - a send task drains that channel onto the session, in order
//! - an inbound task applies transport events strictly in arrival order,
//!   driving playback, tool dispatch and interruption
//!
//! Every session carries a generation number. `disconnect` bumps it first,
//! so callbacks still in flight from the old session see they are stale and
//! drop their work instead of touching the next session's state.

use crate::audio::{AudioDevices, AudioInput, AudioOutput, BufferId};
use crate::capture::CaptureTap;
use crate::config::AssistantConfig;
use crate::error::{LiveError, Result};
use crate::events::{ConnectionState, LogEntry, Role, SessionObserver};
use crate::interrupt::InterruptionController;
use crate::language::LanguageMode;
use crate::playback::PlaybackScheduler;
use crate::tools::{self, ToolCall, ToolDispatcher, ToolResult};
use crate::transport::{LiveTransport, ServerEvent, SessionConfig, TransportEvent, TransportSession};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Work queued for the send task
#[derive(Debug)]
pub enum Outbound {
    /// One 16-bit PCM microphone frame
    Audio(Vec<u8>),
    ToolResponse(ToolResult),
}

/// Identity of one session, checked by every callback before it acts
#[derive(Debug, Clone)]
pub struct SessionGuard {
    generation: Arc<AtomicU64>,
    issued: u64,
}

impl SessionGuard {
    fn begin(generation: &Arc<AtomicU64>) -> Self {
        let issued = generation.fetch_add(1, Ordering::SeqCst) + 1;
        Self {
            generation: generation.clone(),
            issued,
        }
    }

    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.issued
    }

    fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(LiveError::Cancelled)
        }
    }

    /// End this generation. Returns the new generation, or `None` if the
    /// session was already superseded.
    fn retire(&self) -> Option<u64> {
        self.generation
            .compare_exchange(
                self.issued,
                self.issued + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| self.issued + 1)
    }

    #[cfg(test)]
    pub(crate) fn fresh() -> Self {
        Self::begin(&Arc::new(AtomicU64::new(0)))
    }

    #[cfg(test)]
    pub(crate) fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Who asked for teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Inbound,
}

/// How the remote side ended a session
enum Ending {
    Closed(Option<String>),
    Failed(String),
}

/// Everything a session holds open. Released in a fixed order.
#[derive(Default)]
struct Resources {
    input: Option<Box<dyn AudioInput>>,
    output: Option<Arc<dyn AudioOutput>>,
    scheduler: Option<Arc<Mutex<PlaybackScheduler>>>,
    send_task: Option<JoinHandle<()>>,
    session: Option<Arc<dyn TransportSession>>,
}

impl Resources {
    /// Stop capture, flush playback, close the input device, close the
    /// output device, then release the session.
    async fn release(mut self) {
        if let Some(input) = self.input.as_mut() {
            input.detach();
        }
        if let Some(scheduler) = self.scheduler.take() {
            let stopped = lock(&scheduler).flush_all();
            debug!("Stopped {} pending playback buffers", stopped);
        }
        if let Some(mut input) = self.input.take() {
            input.close().await;
        }
        if let Some(output) = self.output.take() {
            output.close().await;
        }
        if let Some(task) = self.send_task.take() {
            task.abort();
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close session: {}", e);
            }
        }
    }
}

struct ActiveSession {
    language: LanguageMode,
    resources: Resources,
    inbound_task: JoinHandle<()>,
}

struct Shared {
    config: AssistantConfig,
    transport: Arc<dyn LiveTransport>,
    devices: Arc<dyn AudioDevices>,
    observer: Arc<dyn SessionObserver>,
    state: Mutex<ConnectionState>,
    generation: Arc<AtomicU64>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
}

impl Shared {
    /// Move to `state` if `generation` is still the current one.
    fn transition(&self, generation: u64, state: ConnectionState, log: Option<String>) -> bool {
        let mut current = lock(&self.state);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *current = state;
        self.observer.on_state_change(state);
        if let Some(text) = log {
            self.observer.on_log(LogEntry::system(text));
        }
        true
    }
}

/// Owns the single live session and every device it uses
#[derive(Clone)]
pub struct SessionConnector {
    shared: Arc<Shared>,
}

impl SessionConnector {
    pub fn new(
        config: AssistantConfig,
        transport: Arc<dyn LiveTransport>,
        devices: Arc<dyn AudioDevices>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                devices,
                observer,
                state: Mutex::new(ConnectionState::Disconnected),
                generation: Arc::new(AtomicU64::new(0)),
                active: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Open a session answering in `language`.
    ///
    /// Resolves once the transport confirms open and capture is running.
    /// Any setup failure moves the state to `Error`; no retry is attempted.
    /// Calling this while connecting or connected does nothing.
    pub async fn connect(&self, language: LanguageMode) -> Result<()> {
        let Some(guard) = self.begin_connect() else {
            warn!("connect() called while a session is active, ignoring");
            return Ok(());
        };
        info!("Connecting in {} mode", language);

        let mut resources = Resources::default();
        match self.open(language, &guard, &mut resources).await {
            Ok(()) => Ok(()),
            Err(e) => {
                resources.release().await;
                if matches!(e, LiveError::Cancelled) {
                    info!("Connect cancelled by disconnect");
                } else {
                    error!("Failed to connect: {}", e);
                    self.shared.transition(
                        guard.issued,
                        ConnectionState::Error,
                        Some(format!("Connection failed: {}", e)),
                    );
                }
                Err(e)
            }
        }
    }

    fn begin_connect(&self) -> Option<SessionGuard> {
        let mut state = lock(&self.shared.state);
        if matches!(
            *state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return None;
        }
        let guard = SessionGuard::begin(&self.shared.generation);
        *state = ConnectionState::Connecting;
        self.shared.observer.on_state_change(ConnectionState::Connecting);
        Some(guard)
    }

    async fn open(
        &self,
        language: LanguageMode,
        guard: &SessionGuard,
        resources: &mut Resources,
    ) -> Result<()> {
        let shared = &self.shared;
        let config = &shared.config;

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let output = shared
            .devices
            .open_output(config.output_sample_rate, ended_tx)?;
        resources.output = Some(output.clone());
        resources.input = Some(
            shared
                .devices
                .open_input(config.input_sample_rate, config.frame_size)?,
        );
        guard.check()?;

        let session_config = SessionConfig {
            voice: config.voice.clone(),
            system_instruction: language.persona(),
            tools: tools::declarations(),
            input_transcription: true,
            output_transcription: config.output_transcription,
        };
        let (session, mut events) = shared.transport.connect(session_config).await?;
        resources.session = Some(session.clone());
        guard.check()?;

        wait_for_open(&mut events, config.open_timeout).await?;
        guard.check()?;
        debug!("Transport confirmed open");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        resources.send_task = Some(tokio::spawn(run_outbound(
            session.clone(),
            out_rx,
            guard.clone(),
        )));

        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(
            output,
            config.output_sample_rate,
        )));
        resources.scheduler = Some(scheduler.clone());

        let tap = CaptureTap::new(
            config.volume_boost,
            shared.observer.clone(),
            out_tx.clone(),
            guard.clone(),
        );
        if let Some(input) = resources.input.as_mut() {
            input.start(tap.into_callback())?;
        }

        let mut active = shared.active.lock().await;
        // Refused when a disconnect superseded this session while we waited
        if !shared.transition(
            guard.issued,
            ConnectionState::Connected,
            Some(format!("Connected ({})", language)),
        ) {
            return Err(guard.check().err().unwrap_or(LiveError::ConnectionClosed));
        }

        let inbound = Inbound {
            connector: self.clone(),
            guard: guard.clone(),
            scheduler,
            outbound: out_tx,
            dispatcher: ToolDispatcher::new(),
            interrupter: InterruptionController::new(shared.observer.clone()),
        };
        let inbound_task = tokio::spawn(inbound.run(events, ended_rx));

        *active = Some(ActiveSession {
            language,
            resources: std::mem::take(resources),
            inbound_task,
        });
        info!("Session connected");
        Ok(())
    }

    /// Tear down the session, if any, and end in `Disconnected`. Safe to
    /// call at any time and any number of times.
    pub async fn disconnect(&self) {
        // Invalidate first so nothing in flight acts on the old session
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.teardown(Origin::Caller).await;

        let mut state = lock(&self.shared.state);
        if *state != ConnectionState::Disconnected {
            *state = ConnectionState::Disconnected;
            self.shared
                .observer
                .on_state_change(ConnectionState::Disconnected);
            self.shared.observer.on_log(LogEntry::system("Disconnected"));
            info!("Disconnected");
        }
    }

    async fn teardown(&self, origin: Origin) {
        // Held for the whole release so concurrent teardowns serialize
        let mut active = self.shared.active.lock().await;
        let Some(session) = active.take() else {
            return;
        };
        info!("Tearing down {} session", session.language);
        if origin == Origin::Caller {
            session.inbound_task.abort();
        }
        session.resources.release().await;
    }

    /// Called by the inbound task when the remote side ends the session.
    async fn end_session(&self, guard: &SessionGuard, ending: Ending) {
        let Some(generation) = guard.retire() else {
            return;
        };
        self.teardown(Origin::Inbound).await;

        let (state, text) = match ending {
            Ending::Closed(Some(reason)) => (
                ConnectionState::Disconnected,
                format!("Session closed: {}", reason),
            ),
            Ending::Closed(None) => (
                ConnectionState::Disconnected,
                "Session closed".to_string(),
            ),
            Ending::Failed(e) => (ConnectionState::Error, format!("Connection error: {}", e)),
        };
        self.shared.transition(generation, state, Some(text));
    }
}

async fn wait_for_open(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    limit: Duration,
) -> Result<()> {
    let opened = async {
        loop {
            match events.recv().await {
                Some(TransportEvent::Open) => return Ok(()),
                Some(TransportEvent::Message(event)) => {
                    debug!("Ignoring {:?} received before open", event)
                }
                Some(TransportEvent::Close(reason)) => {
                    return Err(LiveError::Rejected(
                        reason.unwrap_or_else(|| "closed before open".to_string()),
                    ))
                }
                Some(TransportEvent::Error(e)) => return Err(LiveError::Rejected(e)),
                None => return Err(LiveError::ConnectionClosed),
            }
        }
    };
    tokio::time::timeout(limit, opened)
        .await
        .map_err(|_| LiveError::Timeout)?
}

/// Send task: drains the outbound queue onto the session in order.
async fn run_outbound(
    session: Arc<dyn TransportSession>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    guard: SessionGuard,
) {
    while let Some(item) = rx.recv().await {
        if !guard.is_current() {
            break;
        }
        match item {
            Outbound::Audio(pcm) => {
                if let Err(e) = session.send_realtime_input(&pcm).await {
                    debug!("Failed to send audio frame: {}", e);
                }
            }
            Outbound::ToolResponse(result) => {
                if let Err(e) = session.send_tool_response(&result).await {
                    warn!("Failed to send tool response {}: {}", result.id, e);
                }
            }
        }
    }
    debug!("Outbound task stopped");
}

/// State of the inbound task for one session
struct Inbound {
    connector: SessionConnector,
    guard: SessionGuard,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    dispatcher: ToolDispatcher,
    interrupter: InterruptionController,
}

impl Inbound {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut ended: mpsc::UnboundedReceiver<BufferId>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let ending = match event {
                        Some(TransportEvent::Message(event)) => {
                            if !self.guard.is_current() {
                                return;
                            }
                            self.handle(event);
                            continue;
                        }
                        Some(TransportEvent::Open) => {
                            debug!("Ignoring repeated open");
                            continue;
                        }
                        Some(TransportEvent::Close(reason)) => Ending::Closed(reason),
                        Some(TransportEvent::Error(e)) => Ending::Failed(e),
                        None => Ending::Closed(None),
                    };
                    self.connector.end_session(&self.guard, ending).await;
                    return;
                }
                Some(id) = ended.recv() => {
                    if self.guard.is_current() {
                        lock(&self.scheduler).on_ended(id);
                    }
                }
            }
        }
    }

    fn observer(&self) -> &dyn SessionObserver {
        self.connector.shared.observer.as_ref()
    }

    fn handle(&self, event: ServerEvent) {
        match event {
            ServerEvent::InputTranscript(text) => self.log(Role::User, text),
            ServerEvent::OutputTranscript(text) | ServerEvent::Text(text) => {
                self.log(Role::Model, text)
            }
            ServerEvent::Audio(data) => self.play(&data),
            ServerEvent::Interrupted => {
                self.interrupter.interrupt(&mut lock(&self.scheduler));
            }
            ServerEvent::TurnComplete => debug!("Turn complete"),
            ServerEvent::ToolCalls(calls) => {
                for call in calls {
                    self.call_tool(call);
                }
            }
            ServerEvent::ToolCallCancellation(ids) => {
                info!("Server cancelled tool calls {:?}", ids);
                self.observer().on_log(LogEntry::system(format!(
                    "Tool calls cancelled: {}",
                    ids.join(", ")
                )));
            }
            ServerEvent::GoAway => {
                warn!("Server announced it will close the session");
                self.observer()
                    .on_log(LogEntry::system("Server is ending the session soon"));
            }
        }
    }

    fn log(&self, role: Role, text: String) {
        if !text.trim().is_empty() {
            self.observer().on_log(LogEntry::new(role, text));
        }
    }

    fn play(&self, data: &str) {
        let scheduled = lock(&self.scheduler).enqueue_encoded(data);
        match scheduled {
            Ok(Some(buffer)) => self.observer().on_output_level(buffer.level),
            Ok(None) => trace!("Skipping empty audio fragment"),
            Err(e) => {
                warn!("Dropping audio fragment: {}", e);
                self.observer()
                    .on_log(LogEntry::system(format!("Dropped audio fragment: {}", e)));
            }
        }
    }

    fn call_tool(&self, call: ToolCall) {
        info!("Tool call {} (id {})", call.name, call.id);
        let dispatched = self.dispatcher.dispatch(&call);
        if let Some(app) = &dispatched.open_app {
            self.observer()
                .on_open_app(&app.app_name, app.content.as_deref());
        }
        self.observer()
            .on_log(LogEntry::system(format!("Tool: {}", call.name)));
        if self
            .outbound
            .send(Outbound::ToolResponse(dispatched.result))
            .is_err()
        {
            debug!("Outbound channel closed, dropping result for {}", call.id);
        }
    }
}
