mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{Reply, ScriptedSink, SinkLog, init_logging, snapshot, wait_until};
use ultra_core::audio::{
    AudioDevice, AudioFormat, AudioPipeline, FrameWriter, SampleSink, WriteReport,
};
use ultra_core::bridge::{Bridge, UiHandle};
use ultra_core::engine::{Engine, StubEngine, StubOptions};
use ultra_core::error::{AudioError, SinkError};

const RETRY: Duration = Duration::from_millis(1);

#[test]
fn zero_length_writes_are_retried_until_everything_is_delivered() {
    init_logging();
    let mut sink = ScriptedSink::new(vec![Reply::Zero, Reply::Zero, Reply::Zero]);
    let log = Arc::clone(&sink.log);
    let data: Vec<i16> = (1..=64).collect();

    let started = Instant::now();
    let report = FrameWriter::with_retry_interval(&mut sink, RETRY).write_frames_i16(&data);

    assert_eq!(
        report,
        WriteReport {
            written: 64,
            stalls: 3,
            dropped: 0
        }
    );
    assert!(started.elapsed() >= RETRY * 3);
    let log = log.lock().unwrap();
    assert_eq!(log.samples, data);
    assert_eq!(log.write_calls, 4);
}

#[test]
fn terminal_error_drops_the_rest_of_the_buffer() {
    init_logging();
    let mut sink = ScriptedSink::new(vec![Reply::Partial(10), Reply::Fail]);
    let log = Arc::clone(&sink.log);
    let data = vec![7u8; 100];

    let report = FrameWriter::with_retry_interval(&mut sink, RETRY).write_frames_u8(&data);

    assert_eq!(report.written, 10);
    assert_eq!(report.dropped, 90);
    assert_eq!(report.stalls, 0);
    assert_eq!(log.lock().unwrap().write_calls, 2);
}

#[test]
fn immediate_error_is_not_retried() {
    let mut sink = ScriptedSink::new(vec![Reply::Fail]);
    let log = Arc::clone(&sink.log);

    let mut writer = FrameWriter::with_retry_interval(&mut sink, RETRY);
    let report = writer.write_frames_i16(&[1, 2, 3]);
    // The next buffer is written normally.
    writer.write_frames_i16(&[4, 5]);

    assert_eq!(report.written, 0);
    assert_eq!(report.dropped, 3);
    assert_eq!(writer.totals().written, 2);
    let log = log.lock().unwrap();
    assert_eq!(log.write_calls, 2);
    assert_eq!(log.samples, vec![4, 5]);
}

#[derive(Default)]
struct ScriptedDevice {
    min_bytes: Option<usize>,
    log: Arc<Mutex<SinkLog>>,
    opened: Mutex<Vec<(AudioFormat, usize)>>,
    thread_names: Mutex<Vec<Option<String>>>,
    prepared_before_play: Mutex<Vec<bool>>,
}

impl AudioDevice for ScriptedDevice {
    fn min_buffer_bytes(&self, _format: &AudioFormat) -> Option<usize> {
        self.min_bytes
    }

    fn open(&self, format: &AudioFormat, frames: usize) -> Result<Box<dyn SampleSink>, SinkError> {
        self.opened.lock().unwrap().push((*format, frames));
        let mut sink = ScriptedSink::new(Vec::new());
        sink.log = Arc::clone(&self.log);
        Ok(Box::new(sink))
    }

    fn prepare_audio_thread(&self) {
        let name = std::thread::current().name().map(str::to_string);
        self.thread_names.lock().unwrap().push(name);
        let played = self.log.lock().unwrap().played;
        self.prepared_before_play.lock().unwrap().push(!played);
        ultra_core::audio::raise_thread_priority();
    }
}

#[test]
fn pipeline_negotiates_device_minimum_and_runs_one_thread() {
    init_logging();
    let device = Arc::new(ScriptedDevice {
        min_bytes: Some(4098),
        ..ScriptedDevice::default()
    });
    let pipeline = AudioPipeline::new(device.clone()).with_retry_interval(RETRY);
    let engine = Arc::new(StubEngine::default());
    let format = AudioFormat::new(44100, true, true);

    let frames = pipeline.audio_init(format, 256, engine.clone()).unwrap();
    assert_eq!(frames, 1025);
    assert_eq!(pipeline.buffer_frames(), Some(1025));
    assert_eq!(*device.opened.lock().unwrap(), vec![(format, 1025)]);

    let second = pipeline.audio_init(format, 256, engine.clone());
    assert!(matches!(second, Err(AudioError::AlreadyActive)));
    assert_eq!(device.opened.lock().unwrap().len(), 1);

    engine.quit();
    pipeline.audio_quit();
    assert!(!pipeline.is_active());
    assert!(device.log.lock().unwrap().stopped);
    assert_eq!(
        *device.thread_names.lock().unwrap(),
        vec![Some("ultra-audio".to_string())]
    );
    assert_eq!(*device.prepared_before_play.lock().unwrap(), vec![true]);

    // Idempotent, and a fresh init starts clean.
    pipeline.audio_quit();
    assert_eq!(pipeline.audio_init(format, 2048, engine.clone()).unwrap(), 2048);
    engine.quit();
    pipeline.audio_quit();
}

#[test]
fn session_streams_engine_audio_until_quit() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("game.z64");
    std::fs::write(&rom, b"rom").unwrap();

    let engine = Arc::new(StubEngine::new(StubOptions {
        audio: Some((AudioFormat::new(32000, true, true), 512)),
        frame_interval: Duration::from_millis(2),
        audio_chunk: 128,
        ..StubOptions::default()
    }));
    let device = Arc::new(ScriptedDevice::default());
    let (ui, _commands) = UiHandle::channel();
    let bridge = Arc::new(
        Bridge::new(engine.clone(), snapshot(dir.path(), Some(rom)), ui)
            .with_audio_device(device.clone()),
    );

    bridge.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.audio_buffers() >= 4));
    assert_eq!(bridge.audio().buffer_frames(), Some(512));

    bridge.lifecycle().quit();

    assert!(!bridge.audio().is_active());
    let log = device.log.lock().unwrap();
    assert!(log.played);
    assert!(log.stopped);
    assert!(log.samples.len() >= 4 * 128);
    assert!(log.samples.iter().all(|&s| s == 0));
    assert_eq!(engine.status(), ultra_core::engine::EmuStatus::Stopped);
}
