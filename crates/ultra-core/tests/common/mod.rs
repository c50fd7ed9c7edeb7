#![allow(dead_code)]

use once_cell::sync::OnceCell;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ultra_core::audio::SampleSink;
use ultra_core::config::{AppData, ConfigSnapshot, Preferences};
use ultra_core::error::SinkError;
use zip::write::SimpleFileOptions;

static LOGGER: OnceCell<()> = OnceCell::new();

pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Writes a zip archive with `entries` (name, contents); names ending in `/`
/// become directories.
pub fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("failed to create zip file");
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).expect("failed to add directory");
        } else {
            zip.start_file(*name, options).expect("failed to start entry");
            zip.write_all(contents).expect("failed to write entry");
        }
    }
    zip.finish().expect("failed to finish zip");
}

pub fn snapshot(data_dir: &Path, selected_game: Option<PathBuf>) -> ConfigSnapshot {
    let prefs = Preferences {
        selected_game,
        fps_refresh: 0,
        ..Preferences::default()
    };
    ConfigSnapshot::new(
        prefs,
        AppData {
            data_dir: data_dir.to_path_buf(),
            hardware_type: 0,
        },
        None,
    )
}

/// What a scripted sink returns for each write, in order. Once the script
/// runs out every write is accepted in full.
#[derive(Clone, Copy, Debug)]
pub enum Reply {
    Full,
    Zero,
    Partial(usize),
    Fail,
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub samples: Vec<i16>,
    pub bytes: Vec<u8>,
    pub write_calls: usize,
    pub played: bool,
    pub stopped: bool,
}

/// Sink whose write results follow a script; shares its log with the test.
pub struct ScriptedSink {
    script: Vec<Reply>,
    pub log: Arc<Mutex<SinkLog>>,
}

impl ScriptedSink {
    pub fn new(script: Vec<Reply>) -> Self {
        Self {
            script: script.into_iter().rev().collect(),
            log: Arc::default(),
        }
    }

    fn next_reply(&mut self, len: usize) -> Result<usize, SinkError> {
        match self.script.pop().unwrap_or(Reply::Full) {
            Reply::Full => Ok(len),
            Reply::Zero => Ok(0),
            Reply::Partial(n) => Ok(n.min(len)),
            Reply::Fail => Err(SinkError::Write("device lost".to_string())),
        }
    }
}

impl SampleSink for ScriptedSink {
    fn play(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().played = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stopped = true;
    }

    fn write_i16(&mut self, buf: &[i16]) -> Result<usize, SinkError> {
        let reply = self.next_reply(buf.len());
        let mut log = self.log.lock().unwrap();
        log.write_calls += 1;
        if let Ok(n) = reply {
            log.samples.extend_from_slice(&buf[..n]);
        }
        reply
    }

    fn write_u8(&mut self, buf: &[u8]) -> Result<usize, SinkError> {
        let reply = self.next_reply(buf.len());
        let mut log = self.log.lock().unwrap();
        log.write_calls += 1;
        if let Ok(n) = reply {
            log.bytes.extend_from_slice(&buf[..n]);
        }
        reply
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
