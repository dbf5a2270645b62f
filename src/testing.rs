//! In-memory transport, audio devices and observer for unit tests.

use crate::audio::{AudioDevices, AudioInput, AudioOutput, BufferId, FrameCallback};
use crate::error::{LiveError, Result};
use crate::events::{ConnectionState, LogEntry, SessionObserver};
use crate::tools::ToolResult;
use crate::transport::{LiveTransport, SessionConfig, TransportEvent, TransportSession};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Poll `cond` until it holds, yielding to spawned tasks in between.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

/// Ordered record of device and session operations shared by the mocks
#[derive(Debug, Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<ConnectionState>>,
    logs: Mutex<Vec<LogEntry>>,
    volumes: Mutex<Vec<f32>>,
    output_levels: Mutex<Vec<f32>>,
    open_apps: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<ConnectionState> {
        lock(&self.states).clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.logs).clone()
    }

    pub fn has_log(&self, text: &str) -> bool {
        lock(&self.logs).iter().any(|e| e.text.contains(text))
    }

    pub fn volumes(&self) -> Vec<f32> {
        lock(&self.volumes).clone()
    }

    pub fn output_levels(&self) -> Vec<f32> {
        lock(&self.output_levels).clone()
    }

    pub fn open_apps(&self) -> Vec<(String, Option<String>)> {
        lock(&self.open_apps).clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state_change(&self, state: ConnectionState) {
        lock(&self.states).push(state);
    }

    fn on_log(&self, entry: LogEntry) {
        lock(&self.logs).push(entry);
    }

    fn on_volume_change(&self, level: f32) {
        lock(&self.volumes).push(level);
    }

    fn on_open_app(&self, app_name: &str, content: Option<&str>) {
        lock(&self.open_apps)
            .push((app_name.to_string(), content.map(str::to_string)));
    }

    fn on_output_level(&self, level: f32) {
        lock(&self.output_levels).push(level);
    }
}

/// Records what was sent on one session
#[derive(Default)]
pub struct MockSession {
    journal: Journal,
    audio: Mutex<Vec<Vec<u8>>>,
    tool_responses: Mutex<Vec<ToolResult>>,
    closed: AtomicBool,
}

impl MockSession {
    pub fn audio(&self) -> Vec<Vec<u8>> {
        lock(&self.audio).clone()
    }

    pub fn tool_responses(&self) -> Vec<ToolResult> {
        lock(&self.tool_responses).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn send_realtime_input(&self, pcm: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(LiveError::ConnectionClosed);
        }
        lock(&self.audio).push(pcm.to_vec());
        Ok(())
    }

    async fn send_tool_response(&self, result: &ToolResult) -> Result<()> {
        if self.is_closed() {
            return Err(LiveError::ConnectionClosed);
        }
        lock(&self.tool_responses).push(result.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.journal.record("session.close");
        }
        Ok(())
    }
}

/// Transport that opens in-memory sessions and lets tests inject events
pub struct MockTransport {
    journal: Journal,
    initial: Vec<TransportEvent>,
    reject: Option<String>,
    configs: Mutex<Vec<SessionConfig>>,
    session: Mutex<Option<Arc<MockSession>>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockTransport {
    /// Confirms open immediately on connect.
    pub fn new(journal: Journal) -> Self {
        Self::with_initial(journal, vec![TransportEvent::Open])
    }

    /// Delivers `initial` right after connect, in order.
    pub fn with_initial(journal: Journal, initial: Vec<TransportEvent>) -> Self {
        Self {
            journal,
            initial,
            reject: None,
            configs: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    /// Fails every connect with `reason`.
    pub fn rejecting(reason: &str) -> Self {
        Self {
            reject: Some(reason.to_string()),
            ..Self::new(Journal::default())
        }
    }

    pub fn push(&self, event: TransportEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn session(&self) -> Arc<MockSession> {
        lock(&self.session)
            .clone()
            .unwrap_or_else(|| panic!("no session was opened"))
    }

    pub fn configs(&self) -> Vec<SessionConfig> {
        lock(&self.configs).clone()
    }
}

#[async_trait]
impl LiveTransport for MockTransport {
    async fn connect(
        &self,
        config: SessionConfig,
    ) -> Result<(Arc<dyn TransportSession>, mpsc::UnboundedReceiver<TransportEvent>)> {
        lock(&self.configs).push(config);
        if let Some(reason) = &self.reject {
            return Err(LiveError::Rejected(reason.clone()));
        }
        self.journal.record("transport.connect");

        let session = Arc::new(MockSession {
            journal: self.journal.clone(),
            ..Default::default()
        });
        let (tx, rx) = mpsc::unbounded_channel();
        for event in &self.initial {
            let _ = tx.send(event.clone());
        }
        *lock(&self.session) = Some(session.clone());
        *lock(&self.events) = Some(tx);
        Ok((session, rx))
    }
}

/// Shared slot holding the attached capture callback
type FrameSlot = Arc<Mutex<Option<FrameCallback>>>;

pub struct MockInput {
    journal: Journal,
    slot: FrameSlot,
}

#[async_trait]
impl AudioInput for MockInput {
    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        self.journal.record("input.start");
        *lock(&self.slot) = Some(on_frame);
        Ok(())
    }

    fn detach(&mut self) {
        self.journal.record("input.detach");
        lock(&self.slot).take();
    }

    async fn close(&mut self) {
        self.journal.record("input.close");
    }
}

#[derive(Default)]
pub struct MockOutput {
    journal: Journal,
    time: Mutex<f64>,
    started: Mutex<Vec<(BufferId, usize, f64)>>,
    stopped: Mutex<Vec<BufferId>>,
    ended: Mutex<Option<mpsc::UnboundedSender<BufferId>>>,
}

impl MockOutput {
    pub fn set_time(&self, seconds: f64) {
        *lock(&self.time) = seconds;
    }

    /// (id, sample count, start time) of every started buffer
    pub fn started(&self) -> Vec<(BufferId, usize, f64)> {
        lock(&self.started).clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        lock(&self.stopped).clone()
    }

    /// Report a buffer as played to completion.
    pub fn finish(&self, id: BufferId) {
        if let Some(tx) = lock(&self.ended).as_ref() {
            let _ = tx.send(id);
        }
    }
}

#[async_trait]
impl AudioOutput for MockOutput {
    fn current_time(&self) -> f64 {
        *lock(&self.time)
    }

    fn start_buffer(&self, id: BufferId, samples: Vec<f32>, at: f64) {
        lock(&self.started).push((id, samples.len(), at));
    }

    fn stop_buffer(&self, id: BufferId) {
        self.journal.record("output.stop_buffer");
        lock(&self.stopped).push(id);
    }

    async fn close(&self) {
        self.journal.record("output.close");
        lock(&self.ended).take();
    }
}

/// Devices backed by [`MockInput`] and [`MockOutput`]
#[derive(Default)]
pub struct MockDevices {
    journal: Journal,
    deny_input: bool,
    slot: FrameSlot,
    output: Mutex<Option<Arc<MockOutput>>>,
}

impl MockDevices {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Microphone access is refused.
    pub fn denying_input(journal: Journal) -> Self {
        Self {
            deny_input: true,
            ..Self::new(journal)
        }
    }

    /// Deliver one frame to the attached callback, if any.
    pub fn feed(&self, frame: &[f32]) -> bool {
        match lock(&self.slot).as_mut() {
            Some(on_frame) => {
                on_frame(frame);
                true
            }
            None => false,
        }
    }

    pub fn output(&self) -> Arc<MockOutput> {
        lock(&self.output)
            .clone()
            .unwrap_or_else(|| panic!("no output was opened"))
    }
}

impl AudioDevices for MockDevices {
    fn open_input(&self, _sample_rate: u32, _frame_size: usize) -> Result<Box<dyn AudioInput>> {
        if self.deny_input {
            return Err(LiveError::Audio("microphone permission denied".to_string()));
        }
        self.journal.record("input.open");
        Ok(Box::new(MockInput {
            journal: self.journal.clone(),
            slot: self.slot.clone(),
        }))
    }

    fn open_output(
        &self,
        _sample_rate: u32,
        ended: mpsc::UnboundedSender<BufferId>,
    ) -> Result<Arc<dyn AudioOutput>> {
        self.journal.record("output.open");
        let output = Arc::new(MockOutput {
            journal: self.journal.clone(),
            ended: Mutex::new(Some(ended)),
            ..Default::default()
        });
        *lock(&self.output) = Some(output.clone());
        Ok(output)
    }
}
