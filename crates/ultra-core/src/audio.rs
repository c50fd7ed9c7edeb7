use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};
use thread_priority::{ThreadPriority, set_current_thread_priority};

use crate::engine::Engine;
use crate::error::{AudioError, SinkError};

/// Sleep between retries while the sink reports backpressure.
pub const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SampleWidth {
    U8,
    I16,
}

impl SampleWidth {
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
        }
    }
}

/// PCM layout requested by the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub width: SampleWidth,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, is_16bit: bool, is_stereo: bool) -> Self {
        Self {
            sample_rate,
            width: if is_16bit {
                SampleWidth::I16
            } else {
                SampleWidth::U8
            },
            channels: if is_stereo { 2 } else { 1 },
        }
    }

    pub fn frame_size_bytes(&self) -> usize {
        self.channels as usize * self.width.bytes()
    }
}

/// Effective buffer size in frames.
///
/// Never smaller than the device minimum (rounded up to whole frames), but
/// keeps the caller's larger request.
pub fn negotiate_frame_count(desired: usize, min_device_bytes: usize, frame_size: usize) -> usize {
    if frame_size == 0 {
        return desired;
    }
    desired.max(min_device_bytes.div_ceil(frame_size))
}

/// Write primitive handed to [`Engine::run_audio`].
pub trait AudioOut {
    fn write_i16(&mut self, buf: &[i16]);
    fn write_u8(&mut self, buf: &[u8]);
}

/// Platform audio output device opened for one session.
///
/// Writes return the number of samples accepted. `Ok(0)` means the device is
/// momentarily full; `Err` is terminal for the buffer being written.
pub trait SampleSink: Send {
    fn play(&mut self) -> Result<(), SinkError>;
    fn stop(&mut self);
    fn write_i16(&mut self, buf: &[i16]) -> Result<usize, SinkError>;
    fn write_u8(&mut self, buf: &[u8]) -> Result<usize, SinkError>;
}

/// Factory for [`SampleSink`]s plus the device's buffer constraints.
pub trait AudioDevice: Send + Sync {
    /// Smallest buffer in bytes the driver accepts without underrunning.
    fn min_buffer_bytes(&self, format: &AudioFormat) -> Option<usize>;

    fn open(&self, format: &AudioFormat, frames: usize) -> Result<Box<dyn SampleSink>, SinkError>;

    /// Runs first on the audio thread, before the sink starts playing.
    fn prepare_audio_thread(&self) {
        raise_thread_priority();
    }
}

/// Moves the calling thread to the highest priority the process may use.
/// Failure leaves the thread at its current priority.
pub fn raise_thread_priority() {
    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(()) => debug!("audio: thread priority raised to max"),
        Err(e) => warn!("audio: could not raise thread priority: {e:?}"),
    }
}

/// Device used by headless sessions: accepts and discards everything.
#[derive(Debug, Default)]
pub struct NullAudioDevice;

impl AudioDevice for NullAudioDevice {
    fn min_buffer_bytes(&self, _format: &AudioFormat) -> Option<usize> {
        None
    }

    fn open(
        &self,
        _format: &AudioFormat,
        _frames: usize,
    ) -> Result<Box<dyn SampleSink>, SinkError> {
        Ok(Box::new(NullSink))
    }
}

#[derive(Debug, Default)]
pub struct NullSink;

impl SampleSink for NullSink {
    fn play(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn write_i16(&mut self, buf: &[i16]) -> Result<usize, SinkError> {
        Ok(buf.len())
    }

    fn write_u8(&mut self, buf: &[u8]) -> Result<usize, SinkError> {
        Ok(buf.len())
    }
}

/// Outcome of one or more buffer writes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Samples the sink accepted.
    pub written: usize,
    /// Zero-length writes that caused a retry sleep.
    pub stalls: u32,
    /// Samples discarded after a terminal sink error.
    pub dropped: usize,
}

impl WriteReport {
    fn accumulate(&mut self, other: WriteReport) {
        self.written += other.written;
        self.stalls += other.stalls;
        self.dropped += other.dropped;
    }
}

trait Sample: Copy {
    fn write_to(sink: &mut dyn SampleSink, buf: &[Self]) -> Result<usize, SinkError>;
}

impl Sample for i16 {
    fn write_to(sink: &mut dyn SampleSink, buf: &[Self]) -> Result<usize, SinkError> {
        sink.write_i16(buf)
    }
}

impl Sample for u8 {
    fn write_to(sink: &mut dyn SampleSink, buf: &[Self]) -> Result<usize, SinkError> {
        sink.write_u8(buf)
    }
}

fn write_samples<T: Sample>(sink: &mut dyn SampleSink, buf: &[T], retry: Duration) -> WriteReport {
    let mut report = WriteReport::default();
    let mut offset = 0;

    while offset < buf.len() {
        match T::write_to(sink, &buf[offset..]) {
            Ok(0) => {
                report.stalls += 1;
                trace!("audio: sink full at offset {offset}, retrying");
                thread::sleep(retry);
            }
            Ok(accepted) => {
                offset += accepted.min(buf.len() - offset);
            }
            Err(e) => {
                report.dropped = buf.len() - offset;
                warn!(
                    "audio: error return from write ({e}); dropping {} samples",
                    report.dropped
                );
                break;
            }
        }
    }

    report.written = offset;
    report
}

/// Blocking writer with retry-on-zero semantics.
///
/// A zero-length write sleeps for the retry interval and retries from the
/// same offset. A sink error abandons the rest of the buffer.
pub struct FrameWriter<'a> {
    sink: &'a mut dyn SampleSink,
    retry: Duration,
    totals: WriteReport,
}

impl<'a> FrameWriter<'a> {
    pub fn new(sink: &'a mut dyn SampleSink) -> Self {
        Self::with_retry_interval(sink, WRITE_RETRY_INTERVAL)
    }

    pub fn with_retry_interval(sink: &'a mut dyn SampleSink, retry: Duration) -> Self {
        Self {
            sink,
            retry,
            totals: WriteReport::default(),
        }
    }

    pub fn write_frames_i16(&mut self, buf: &[i16]) -> WriteReport {
        let report = write_samples(self.sink, buf, self.retry);
        self.totals.accumulate(report);
        report
    }

    pub fn write_frames_u8(&mut self, buf: &[u8]) -> WriteReport {
        let report = write_samples(self.sink, buf, self.retry);
        self.totals.accumulate(report);
        report
    }

    /// Totals across every write made through this writer.
    pub fn totals(&self) -> WriteReport {
        self.totals
    }
}

impl AudioOut for FrameWriter<'_> {
    fn write_i16(&mut self, buf: &[i16]) {
        self.write_frames_i16(buf);
    }

    fn write_u8(&mut self, buf: &[u8]) {
        self.write_frames_u8(buf);
    }
}

struct AudioThread {
    handle: JoinHandle<Box<dyn SampleSink>>,
    frames: usize,
}

/// Owns the audio sink and the single audio thread of a session.
///
/// The sink moves into the thread for the duration of playback and comes
/// back through the join handle so [`AudioPipeline::audio_quit`] can stop it.
pub struct AudioPipeline {
    device: Arc<dyn AudioDevice>,
    retry: Duration,
    active: Mutex<Option<AudioThread>>,
}

impl AudioPipeline {
    pub fn new(device: Arc<dyn AudioDevice>) -> Self {
        Self {
            device,
            retry: WRITE_RETRY_INTERVAL,
            active: Mutex::new(None),
        }
    }

    pub fn with_retry_interval(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Negotiates the buffer size, opens the sink and starts the audio thread.
    ///
    /// Returns the effective buffer size in frames.
    pub fn audio_init(
        &self,
        format: AudioFormat,
        desired_frames: usize,
        engine: Arc<dyn Engine>,
    ) -> Result<usize, AudioError> {
        let mut active = self.active();
        if active.is_some() {
            return Err(AudioError::AlreadyActive);
        }

        info!(
            "audio: wanted {} {}-bit {:.3}kHz, {desired_frames} frames buffer",
            if format.channels >= 2 { "stereo" } else { "mono" },
            format.width.bytes() * 8,
            format.sample_rate as f32 / 1000.0
        );

        let frame_size = format.frame_size_bytes();
        let min_bytes = self.device.min_buffer_bytes(&format).unwrap_or(0);
        let frames = negotiate_frame_count(desired_frames, min_bytes, frame_size);
        let mut sink = self.device.open(&format, frames)?;

        let device = Arc::clone(&self.device);
        let retry = self.retry;
        let handle = thread::Builder::new()
            .name("ultra-audio".to_string())
            .spawn(move || {
                device.prepare_audio_thread();
                if let Err(e) = sink.play() {
                    warn!("audio: failed to start playback: {e}");
                    return sink;
                }

                let mut writer = FrameWriter::with_retry_interval(sink.as_mut(), retry);
                engine.run_audio(&mut writer);
                let totals = writer.totals();
                debug!(
                    "audio: thread exiting, wrote {} samples ({} stalls, {} dropped)",
                    totals.written, totals.stalls, totals.dropped
                );
                sink
            })
            .map_err(AudioError::Spawn)?;

        info!("audio: got {frames} frames buffer");
        *active = Some(AudioThread { handle, frames });
        Ok(frames)
    }

    /// Joins the audio thread and stops the sink. Safe to call repeatedly.
    ///
    /// The join has no timeout: the engine's audio call-out must return once
    /// the session is asked to quit, otherwise this blocks forever.
    pub fn audio_quit(&self) {
        let Some(thread) = self.active().take() else {
            return;
        };

        match thread.handle.join() {
            Ok(mut sink) => sink.stop(),
            Err(_) => warn!("audio: audio thread panicked"),
        }
        debug!("audio: pipeline shut down");
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// Buffer size negotiated by the running session, if any.
    pub fn buffer_frames(&self) -> Option<usize> {
        self.active().as_ref().map(|t| t.frames)
    }

    fn active(&self) -> MutexGuard<'_, Option<AudioThread>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.audio_quit();
    }
}
