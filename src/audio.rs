//! Audio device abstraction
//!
//! The session connector is the only component that opens or closes
//! devices. It does so through [`AudioDevices`], which the PulseAudio
//! backend implements for real hardware and tests replace with mocks.
//!
//! This module also enumerates PulseAudio sources and sinks so users can
//! pick a device by name.

use crate::error::{LiveError, Result};
use async_trait::async_trait;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::def::Retval;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::{properties, Proplist};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::error;

/// Identifies one scheduled playback buffer
pub type BufferId = u64;

/// Receives each captured frame on the device thread
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Open microphone stream delivering fixed-size mono f32 frames
#[async_trait]
pub trait AudioInput: Send {
    /// Attach the frame callback. Frames read before this are discarded.
    fn start(&mut self, on_frame: FrameCallback) -> Result<()>;

    /// Detach the callback. Once this returns no further frame is delivered.
    fn detach(&mut self);

    /// Close the device, waiting for its thread to finish.
    async fn close(&mut self);
}

/// Output timeline that plays buffers at absolute start times
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds.
    fn current_time(&self) -> f64;

    /// Play `samples` starting at `at` seconds on the output clock. When the
    /// buffer finishes on its own, its id is sent on the ended channel given
    /// at open time.
    fn start_buffer(&self, id: BufferId, samples: Vec<f32>, at: f64);

    /// Stop a buffer immediately. Unknown ids are ignored.
    fn stop_buffer(&self, id: BufferId);

    /// Close the device, waiting for its thread to finish.
    async fn close(&self);
}

/// Opens the input and output devices for one session
pub trait AudioDevices: Send + Sync {
    fn open_input(&self, sample_rate: u32, frame_size: usize) -> Result<Box<dyn AudioInput>>;

    fn open_output(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<BufferId>,
    ) -> Result<Arc<dyn AudioOutput>>;
}

/// A PulseAudio source or sink
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device name as passed to PulseAudio
    pub name: String,
    /// Human-readable description
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub kind: DeviceKind,
}

/// Kind of PulseAudio device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Microphone,
    /// Monitor of a sink (what the speakers play)
    Monitor,
    Output,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Microphone => "Microphone",
            DeviceKind::Monitor => "Monitor",
            DeviceKind::Output => "Output",
        }
    }
}

/// List every PulseAudio source and sink.
pub fn list_devices(app_name: &str) -> Result<Vec<AudioDevice>> {
    let mut proplist =
        Proplist::new().ok_or_else(|| LiveError::Audio("Failed to create proplist".to_string()))?;
    proplist
        .set_str(properties::APPLICATION_NAME, app_name)
        .map_err(|_| LiveError::Audio("Failed to set application name".to_string()))?;

    let mut mainloop = Mainloop::new()
        .ok_or_else(|| LiveError::Audio("Failed to create mainloop".to_string()))?;

    let mut context = Context::new_with_proplist(&mainloop, "voxlive-device-lister", &proplist)
        .ok_or_else(|| LiveError::Audio("Failed to create context".to_string()))?;

    context
        .connect(None, ContextFlagSet::NOFLAGS, None)
        .map_err(|e| LiveError::Audio(format!("Failed to connect to PulseAudio: {}", e)))?;

    loop {
        iterate(&mut mainloop)?;
        match context.get_state() {
            ContextState::Ready => break,
            ContextState::Failed | ContextState::Terminated => {
                return Err(LiveError::Audio("PulseAudio connection failed".to_string()));
            }
            _ => {}
        }
    }

    let devices = Arc::new(Mutex::new(Vec::new()));
    let introspector = context.introspect();

    let sources_done = Arc::new(Mutex::new(false));
    let _sources_op = {
        let devices = devices.clone();
        let done = sources_done.clone();
        introspector.get_source_info_list(move |item| match item {
            ListResult::Item(info) => {
                let is_monitor = info.monitor_of_sink.is_some()
                    || info.name.as_ref().is_some_and(|n| n.contains("monitor"));
                if let (Some(name), Some(description)) = (&info.name, &info.description) {
                    lock(&devices).push(AudioDevice {
                        name: name.to_string(),
                        description: description.to_string(),
                        sample_rate: info.sample_spec.rate,
                        channels: info.sample_spec.channels,
                        kind: if is_monitor {
                            DeviceKind::Monitor
                        } else {
                            DeviceKind::Microphone
                        },
                    });
                }
            }
            ListResult::End => *lock(&done) = true,
            ListResult::Error => {
                error!("Error listing audio sources");
                *lock(&done) = true;
            }
        })
    };

    let sinks_done = Arc::new(Mutex::new(false));
    let _sinks_op = {
        let devices = devices.clone();
        let done = sinks_done.clone();
        introspector.get_sink_info_list(move |item| match item {
            ListResult::Item(info) => {
                if let (Some(name), Some(description)) = (&info.name, &info.description) {
                    lock(&devices).push(AudioDevice {
                        name: name.to_string(),
                        description: description.to_string(),
                        sample_rate: info.sample_spec.rate,
                        channels: info.sample_spec.channels,
                        kind: DeviceKind::Output,
                    });
                }
            }
            ListResult::End => *lock(&done) = true,
            ListResult::Error => {
                error!("Error listing audio sinks");
                *lock(&done) = true;
            }
        })
    };

    while !(*lock(&sources_done) && *lock(&sinks_done)) {
        iterate(&mut mainloop)?;
    }

    context.disconnect();
    mainloop.quit(Retval(0));

    let devices = lock(&devices).clone();
    Ok(devices)
}

fn iterate(mainloop: &mut Mainloop) -> Result<()> {
    match mainloop.iterate(true) {
        IterateResult::Quit(_) | IterateResult::Err(_) => {
            Err(LiveError::Audio("Mainloop iterate failed".to_string()))
        }
        IterateResult::Success(_) => Ok(()),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
