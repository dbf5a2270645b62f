//! PulseAudio implementation of the audio devices
//!
//! Both directions run on dedicated OS threads using the blocking simple
//! API. The record thread reads fixed-size frames and hands them to the
//! attached callback. The playback thread owns the output clock: it mixes
//! every scheduled buffer into 20ms blocks and writes them, so a buffer
//! starts on exactly the frame it was scheduled for.
//!
//! The server-side playback buffer is kept to a few blocks. A buffer is
//! reported ended only once the server latency says its last frame has
//! been played, and stopping a buffer that already reached the server
//! flushes the stream so barge-in silences the speakers immediately.

use crate::audio::{AudioDevices, AudioInput, AudioOutput, BufferId, FrameCallback};
use crate::config::AssistantConfig;
use crate::error::{LiveError, Result};
use async_trait::async_trait;
use libpulse_binding::def::BufferAttr;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Length of one playback block
const BLOCK_MILLIS: u32 = 20;

/// Blocks the server may hold ahead of the speakers
const TARGET_BLOCKS: u32 = 4;

/// Opens PulseAudio record and playback streams
#[derive(Debug, Clone)]
pub struct PulseDevices {
    app_name: String,
    input_device: Option<String>,
    output_device: Option<String>,
}

impl PulseDevices {
    pub fn from_config(app_name: impl Into<String>, config: &AssistantConfig) -> Self {
        Self {
            app_name: app_name.into(),
            input_device: config.input_device.clone(),
            output_device: config.output_device.clone(),
        }
    }
}

impl AudioDevices for PulseDevices {
    fn open_input(&self, sample_rate: u32, frame_size: usize) -> Result<Box<dyn AudioInput>> {
        let input = PulseInput::open(
            &self.app_name,
            self.input_device.clone(),
            sample_rate,
            frame_size,
        )?;
        Ok(Box::new(input))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<BufferId>,
    ) -> Result<Arc<dyn AudioOutput>> {
        let output = PulseOutput::open(
            &self.app_name,
            self.output_device.clone(),
            sample_rate,
            ended,
        )?;
        Ok(Arc::new(output))
    }
}

fn mono_f32(rate: u32) -> Spec {
    Spec {
        format: Format::F32le,
        channels: 1,
        rate,
    }
}

fn block_frames(rate: u32) -> u32 {
    rate * BLOCK_MILLIS / 1000
}

/// Low-latency playback buffering: start after one block, keep at most
/// `TARGET_BLOCKS` queued on the server.
fn playback_buffer_attr(rate: u32) -> BufferAttr {
    let block_bytes = block_frames(rate) * 4;
    BufferAttr {
        maxlength: block_bytes * TARGET_BLOCKS * 2,
        tlength: block_bytes * TARGET_BLOCKS,
        prebuf: block_bytes,
        minreq: block_bytes,
        fragsize: u32::MAX,
    }
}

/// Spawn a device thread and wait until it reports whether the stream opened.
fn spawn_device<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce(std_mpsc::Sender<std::result::Result<(), String>>) + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel();
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(ready_tx))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(LiveError::Audio(e))
        }
        Err(_) => Err(LiveError::Audio(format!("{} thread exited during startup", name))),
    }
}

async fn join_device(name: &'static str, handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => debug!("{} thread stopped", name),
        Ok(Err(_)) => error!("{} thread panicked", name),
        Err(e) => error!("Failed to join {} thread: {}", name, e),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Microphone stream delivering `frame_size` samples per callback
pub struct PulseInput {
    callback: Arc<Mutex<Option<FrameCallback>>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PulseInput {
    pub fn open(
        app_name: &str,
        device: Option<String>,
        sample_rate: u32,
        frame_size: usize,
    ) -> Result<Self> {
        let callback: Arc<Mutex<Option<FrameCallback>>> = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let app_name = app_name.to_string();
        let thread_callback = callback.clone();
        let thread_shutdown = shutdown.clone();
        let thread = spawn_device("pulse-record", move |ready| {
            let spec = mono_f32(sample_rate);
            let simple = match Simple::new(
                None,
                &app_name,
                Direction::Record,
                device.as_deref(),
                "microphone",
                &spec,
                None,
                None,
            ) {
                Ok(simple) => simple,
                Err(e) => {
                    let _ = ready.send(Err(format!("Failed to open microphone: {}", e)));
                    return;
                }
            };
            info!(
                "Microphone opened ({} Hz, {} samples per frame)",
                sample_rate, frame_size
            );
            let _ = ready.send(Ok(()));
            record_loop(simple, frame_size, thread_callback, thread_shutdown);
        })?;

        Ok(Self {
            callback,
            shutdown,
            thread: Some(thread),
        })
    }
}

fn record_loop(
    simple: Simple,
    frame_size: usize,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut bytes = vec![0u8; frame_size * 4];
    let mut frame = vec![0f32; frame_size];

    while !shutdown.load(Ordering::Acquire) {
        if let Err(e) = simple.read(&mut bytes) {
            error!("Microphone read error: {}", e);
            break;
        }
        for (sample, chunk) in frame.iter_mut().zip(bytes.chunks_exact(4)) {
            *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        // The lock is held for the whole call so detach() never races a frame
        let mut slot = lock(&callback);
        if let Some(on_frame) = slot.as_mut() {
            on_frame(&frame);
        }
    }
    debug!("Record loop exited");
}

#[async_trait]
impl AudioInput for PulseInput {
    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.thread.is_none() {
            return Err(LiveError::Audio("microphone already closed".to_string()));
        }
        *lock(&self.callback) = Some(on_frame);
        Ok(())
    }

    fn detach(&mut self) {
        lock(&self.callback).take();
    }

    async fn close(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.detach();
        join_device("pulse-record", self.thread.take()).await;
    }
}

impl Drop for PulseInput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sample-exact mixer over an absolute frame clock.
///
/// `frames_written` counts frames handed to the server. `frames_played`
/// trails it by the server latency; a buffer counts as ended once
/// `frames_played` passes its last frame.
pub(crate) struct Mixer {
    rate: u32,
    voices: Vec<Voice>,
    /// Fully mixed buffers still queued on the server: (id, end frame)
    draining: Vec<(BufferId, u64)>,
    frames_written: u64,
    frames_played: u64,
    flush_requested: bool,
}

impl Mixer {
    pub(crate) fn new(rate: u32) -> Self {
        Self {
            rate,
            voices: Vec::new(),
            draining: Vec::new(),
            frames_written: 0,
            frames_played: 0,
            flush_requested: false,
        }
    }

    /// Scheduling clock: the next frame to be mixed
    pub(crate) fn current_time(&self) -> f64 {
        self.frames_written as f64 / self.rate as f64
    }

    pub(crate) fn add(&mut self, id: BufferId, samples: Vec<f32>, at: f64) {
        let start_frame = (at.max(0.0) * self.rate as f64).round() as u64;
        if start_frame < self.frames_written {
            warn!(
                "Buffer {} scheduled {} frames in the past",
                id,
                self.frames_written - start_frame
            );
        }
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
    }

    /// Drop a buffer. If any of it was already written, the server queue
    /// has to be flushed as well.
    pub(crate) fn stop(&mut self, id: BufferId) -> bool {
        let written = self.frames_written;
        if let Some(pos) = self.voices.iter().position(|v| v.id == id) {
            let voice = self.voices.remove(pos);
            if voice.start_frame < written {
                self.flush_requested = true;
            }
            return true;
        }
        if let Some(pos) = self.draining.iter().position(|(d, _)| *d == id) {
            self.draining.remove(pos);
            self.flush_requested = true;
            return true;
        }
        false
    }

    pub(crate) fn take_flush(&mut self) -> bool {
        std::mem::take(&mut self.flush_requested)
    }

    /// Mix the next block into `out`. Buffers whose last frame is in this
    /// block move to the draining list.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let block_start = self.frames_written;
        let block_end = block_start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                out[(frame - block_start) as usize] +=
                    voice.samples[(frame - voice.start_frame) as usize];
            }
        }
        self.frames_written = block_end;

        let draining = &mut self.draining;
        self.voices.retain(|v| {
            if v.end_frame() <= block_end {
                draining.push((v.id, v.end_frame()));
                false
            } else {
                true
            }
        });
    }

    /// Update the played position from the server latency and return the
    /// buffers that have now finished on the speakers.
    pub(crate) fn advance(&mut self, latency_frames: u64) -> Vec<BufferId> {
        let played = self.frames_written.saturating_sub(latency_frames);
        self.frames_played = self.frames_played.max(played);

        let played = self.frames_played;
        let mut ended = Vec::new();
        self.draining.retain(|&(id, end)| {
            if end <= played {
                ended.push(id);
                false
            } else {
                true
            }
        });
        ended
    }
}

/// Speaker stream with its own frame clock
pub struct PulseOutput {
    mixer: Arc<Mutex<Mixer>>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PulseOutput {
    pub fn open(
        app_name: &str,
        device: Option<String>,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<BufferId>,
    ) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let app_name = app_name.to_string();
        let thread_mixer = mixer.clone();
        let thread_shutdown = shutdown.clone();
        let thread = spawn_device("pulse-playback", move |ready| {
            let spec = mono_f32(sample_rate);
            let simple = match Simple::new(
                None,
                &app_name,
                Direction::Playback,
                device.as_deref(),
                "assistant voice",
                &spec,
                None,
                Some(&playback_buffer_attr(sample_rate)),
            ) {
                Ok(simple) => simple,
                Err(e) => {
                    let _ = ready.send(Err(format!("Failed to open speakers: {}", e)));
                    return;
                }
            };
            info!("Speakers opened ({} Hz)", sample_rate);
            let _ = ready.send(Ok(()));
            playback_loop(simple, sample_rate, thread_mixer, thread_shutdown, ended);
        })?;

        Ok(Self {
            mixer,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }
}

fn playback_loop(
    simple: Simple,
    sample_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    shutdown: Arc<AtomicBool>,
    ended: mpsc::UnboundedSender<BufferId>,
) {
    let block_len = block_frames(sample_rate) as usize;
    let mut block = vec![0f32; block_len];
    let mut bytes = Vec::with_capacity(block_len * 4);
    let fallback_latency = (block_len as u32 * TARGET_BLOCKS) as u64;

    while !shutdown.load(Ordering::Acquire) {
        let flush = {
            let mut mixer = lock(&mixer);
            let flush = mixer.take_flush();
            mixer.render(&mut block);
            flush
        };
        if flush {
            debug!("Dropping queued speaker audio");
            if let Err(e) = simple.flush() {
                warn!("Speaker flush failed: {}", e);
            }
        }

        bytes.clear();
        for sample in &block {
            bytes.extend_from_slice(&sample.clamp(-1.0, 1.0).to_le_bytes());
        }
        // Blocks while the server buffer is full, which paces the loop
        if let Err(e) = simple.write(&bytes) {
            error!("Speaker write error: {}", e);
            break;
        }

        let latency_frames = match simple.get_latency() {
            Ok(latency) => latency.0 * sample_rate as u64 / 1_000_000,
            Err(e) => {
                debug!("Speaker latency unavailable: {}", e);
                fallback_latency
            }
        };
        let finished = lock(&mixer).advance(latency_frames);
        for id in finished {
            // Receiver gone means the session is tearing down
            let _ = ended.send(id);
        }
    }

    if let Err(e) = simple.flush() {
        debug!("Speaker flush failed: {}", e);
    }
    debug!("Playback loop exited");
}

#[async_trait]
impl AudioOutput for PulseOutput {
    fn current_time(&self) -> f64 {
        lock(&self.mixer).current_time()
    }

    fn start_buffer(&self, id: BufferId, samples: Vec<f32>, at: f64) {
        lock(&self.mixer).add(id, samples, at);
    }

    fn stop_buffer(&self, id: BufferId) {
        lock(&self.mixer).stop(id);
    }

    async fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        let handle = lock(&self.thread).take();
        join_device("pulse-playback", handle).await;
    }
}

impl Drop for PulseOutput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
