use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioFormat, AudioOut};
use crate::config::ScreenPosition;
use crate::input::ControllerSnapshot;

/// Parameter reported by the engine through [`EngineHost::state_callback`].
///
/// Raw values follow the native core's parameter numbering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CoreParam {
    EmuState,
    VideoMode,
    SaveStateSlot,
    SpeedFactor,
    SpeedLimiter,
    VideoSize,
    AudioVolume,
    AudioMute,
    InputGameshark,
    StateLoadComplete,
    StateSaveComplete,
    Unknown(i32),
}

impl CoreParam {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::EmuState,
            2 => Self::VideoMode,
            3 => Self::SaveStateSlot,
            4 => Self::SpeedFactor,
            5 => Self::SpeedLimiter,
            6 => Self::VideoSize,
            7 => Self::AudioVolume,
            8 => Self::AudioMute,
            9 => Self::InputGameshark,
            10 => Self::StateLoadComplete,
            11 => Self::StateSaveComplete,
            other => Self::Unknown(other),
        }
    }

    pub const fn raw(self) -> i32 {
        match self {
            Self::EmuState => 1,
            Self::VideoMode => 2,
            Self::SaveStateSlot => 3,
            Self::SpeedFactor => 4,
            Self::SpeedLimiter => 5,
            Self::VideoSize => 6,
            Self::AudioVolume => 7,
            Self::AudioMute => 8,
            Self::InputGameshark => 9,
            Self::StateLoadComplete => 10,
            Self::StateSaveComplete => 11,
            Self::Unknown(raw) => raw,
        }
    }
}

/// Execution state as reported by the engine itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum EmuStatus {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl EmuStatus {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Self::Stopped),
            2 => Some(Self::Running),
            3 => Some(Self::Paused),
            _ => None,
        }
    }

    pub const fn raw(self) -> i32 {
        match self {
            Self::Stopped => 1,
            Self::Running => 2,
            Self::Paused => 3,
        }
    }
}

/// Accessory plugged into a controller port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PakType {
    #[default]
    None,
    MemPak,
    RumblePak,
    TransferPak,
}

impl PakType {
    pub const fn raw(self) -> i32 {
        match self {
            Self::None => 1,
            Self::MemPak => 2,
            Self::RumblePak => 3,
            Self::TransferPak => 4,
        }
    }

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            2 => Self::MemPak,
            3 => Self::RumblePak,
            4 => Self::TransferPak,
            _ => Self::None,
        }
    }
}

/// Call-out surface: requests the bridge issues into the engine.
///
/// Lifecycle call-outs are not validated by the bridge; calling `pause()`
/// on a stopped engine is an engine-side contract violation.
pub trait Engine: Send + Sync {
    /// Runs one emulation session and blocks until it ends.
    ///
    /// The engine must query its configuration through `host` before it
    /// produces the first frame. `host` is only borrowed for the duration of
    /// the session.
    fn run(&self, host: Arc<dyn EngineHost>);

    fn pause(&self);
    fn resume(&self);
    fn reset(&self);
    fn stop(&self);
    fn quit(&self);

    /// Saves to the current slot. Completion is only observable through
    /// [`CoreParam::StateSaveComplete`].
    fn state_save(&self);
    fn state_load(&self);
    fn set_state_slot(&self, slot: u32);
    fn set_speed(&self, percent: i32);
    fn frame_advance(&self);
    fn set_gameshark(&self, pressed: bool);
    fn status(&self) -> EmuStatus;

    /// Audio generation call-out, run on the dedicated audio thread.
    ///
    /// Blocks, writing frames through `out`, and must return promptly once
    /// the session is asked to quit.
    fn run_audio(&self, out: &mut dyn AudioOut);

    fn set_controller_state(&self, controller: usize, snapshot: &ControllerSnapshot);
    fn set_controller_config(&self, controller: usize, plugged: bool, pak: PakType);

    fn file_load(&self, path: &Path);
    fn file_save(&self, path: &Path);

    fn header_name(&self, rom: &Path) -> Option<String>;
    /// Raw CRC pair as reported by the engine; see [`crate::rom::check_crc`].
    fn header_crc(&self, rom: &Path) -> Option<String>;
}

/// Call-in surface: requests the engine issues into the bridge.
pub trait EngineHost: Send + Sync {
    /// A video buffer swap completed.
    fn flip_buffers(&self);

    fn screen_stretch(&self) -> bool;
    fn screen_position(&self) -> ScreenPosition;
    fn auto_frameskip(&self) -> bool;
    fn max_frameskip(&self) -> i32;
    fn use_rgba8888(&self) -> bool;
    fn hardware_type(&self) -> i32;
    fn data_dir(&self) -> PathBuf;
    fn extra_args(&self) -> String;
    /// Playable ROM path, or `None` when the session must be abandoned.
    fn rom_path(&self) -> Option<PathBuf>;

    /// Opens the audio sink and starts the audio thread.
    ///
    /// Returns the negotiated buffer size in frames.
    fn audio_init(&self, format: AudioFormat, desired_frames: usize) -> Option<usize>;
    fn audio_quit(&self);

    fn state_callback(&self, param: CoreParam, value: i32);
    fn show_message(&self, message: &str);
    fn run_on_ui_thread(&self, action: Box<dyn FnOnce() + Send>);
    fn set_title(&self, title: &str);
    fn rumble(&self, controller: usize, active: bool);
}

/// Call-out recorded by [`StubEngine`].
#[derive(Clone, Debug, PartialEq)]
pub enum CallOut {
    Run,
    Pause,
    Resume,
    Reset,
    Stop,
    Quit,
    StateSave,
    StateLoad,
    SetStateSlot(u32),
    SetSpeed(i32),
    FrameAdvance,
    Gameshark(bool),
    ControllerState(usize, ControllerSnapshot),
    ControllerConfig(usize, bool, PakType),
    FileLoad(PathBuf),
    FileSave(PathBuf),
}

#[derive(Clone, Debug)]
pub struct StubOptions {
    /// Audio format and desired frames requested at session start.
    pub audio: Option<(AudioFormat, usize)>,
    pub frame_interval: Duration,
    /// Samples per buffer handed to the audio writer.
    pub audio_chunk: usize,
    pub header_name: Option<String>,
    pub header_crc: Option<String>,
}

impl Default for StubOptions {
    fn default() -> Self {
        Self {
            audio: None,
            frame_interval: Duration::from_millis(16),
            audio_chunk: 512,
            header_name: None,
            header_crc: None,
        }
    }
}

#[derive(Default)]
struct StubControl {
    status: EmuStatus,
    quit: bool,
    advance: bool,
    slot: u32,
    speed: i32,
    frames: u64,
    audio_buffers: u64,
}

/// In-process engine used by tests and by frontends built without the
/// native engine.
///
/// It records every call-out, swaps a "video buffer" per frame interval,
/// writes silence from [`Engine::run_audio`] and reports state changes back
/// through the host the way the native core does.
pub struct StubEngine {
    options: StubOptions,
    calls: Mutex<Vec<CallOut>>,
    control: Mutex<StubControl>,
    wake: Condvar,
    host: Mutex<Option<Arc<dyn EngineHost>>>,
}

impl StubEngine {
    pub fn new(options: StubOptions) -> Self {
        Self {
            options,
            calls: Mutex::new(Vec::new()),
            control: Mutex::new(StubControl {
                speed: 100,
                ..StubControl::default()
            }),
            wake: Condvar::new(),
            host: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<CallOut> {
        lock(&self.calls).clone()
    }

    pub fn frames(&self) -> u64 {
        lock(&self.control).frames
    }

    pub fn audio_buffers(&self) -> u64 {
        lock(&self.control).audio_buffers
    }

    pub fn slot(&self) -> u32 {
        lock(&self.control).slot
    }

    pub fn speed(&self) -> i32 {
        lock(&self.control).speed
    }

    /// Simulates an in-engine hotkey changing the save slot.
    pub fn hotkey_slot(&self, slot: u32) {
        lock(&self.control).slot = slot;
        self.notify(CoreParam::SaveStateSlot, slot as i32);
    }

    /// Simulates an in-engine hotkey changing the speed factor.
    pub fn hotkey_speed(&self, percent: i32) {
        lock(&self.control).speed = percent;
        self.notify(CoreParam::SpeedFactor, percent);
    }

    fn record(&self, call: CallOut) {
        lock(&self.calls).push(call);
    }

    fn notify(&self, param: CoreParam, value: i32) {
        let host = lock(&self.host).clone();
        if let Some(host) = host {
            host.state_callback(param, value);
        }
    }

    fn set_status(&self, status: EmuStatus) {
        {
            let mut control = lock(&self.control);
            if control.status == EmuStatus::Stopped && status != EmuStatus::Stopped {
                return;
            }
            control.status = status;
        }
        self.wake.notify_all();
        self.notify(CoreParam::EmuState, status.raw());
    }

    fn request_quit(&self) {
        lock(&self.control).quit = true;
        self.wake.notify_all();
    }

    /// Blocks while paused; returns `false` once quit was requested.
    ///
    /// Only the video loop may consume a pending frame advance.
    fn wait_runnable(&self, interval: Duration, may_advance: bool) -> bool {
        let mut control = lock(&self.control);
        loop {
            if control.quit {
                return false;
            }
            if control.status == EmuStatus::Running {
                break;
            }
            if control.status == EmuStatus::Paused && may_advance && control.advance {
                control.advance = false;
                break;
            }
            control = self
                .wake
                .wait(control)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(control);

        let control = lock(&self.control);
        let (control, _) = self
            .wake
            .wait_timeout_while(control, interval, |c| !c.quit)
            .unwrap_or_else(PoisonError::into_inner);
        !control.quit
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new(StubOptions::default())
    }
}

impl Engine for StubEngine {
    fn run(&self, host: Arc<dyn EngineHost>) {
        self.record(CallOut::Run);

        let Some(rom) = host.rom_path() else {
            info!("stub engine: no playable ROM, ending session");
            return;
        };
        debug!(
            "stub engine: rom={} args='{}' hw={}",
            rom.display(),
            host.extra_args(),
            host.hardware_type()
        );

        {
            let mut control = lock(&self.control);
            control.advance = false;
            control.status = EmuStatus::Running;
        }
        *lock(&self.host) = Some(Arc::clone(&host));
        host.state_callback(CoreParam::EmuState, EmuStatus::Running.raw());

        if let Some((format, frames)) = self.options.audio {
            host.audio_init(format, frames);
        }

        while self.wait_runnable(self.options.frame_interval, true) {
            lock(&self.control).frames += 1;
            host.flip_buffers();
        }

        host.audio_quit();
        {
            // Cleared here, not on entry: an early quit must still land.
            let mut control = lock(&self.control);
            control.status = EmuStatus::Stopped;
            control.quit = false;
        }
        *lock(&self.host) = None;
        host.state_callback(CoreParam::EmuState, EmuStatus::Stopped.raw());
    }

    fn pause(&self) {
        self.record(CallOut::Pause);
        self.set_status(EmuStatus::Paused);
    }

    fn resume(&self) {
        self.record(CallOut::Resume);
        self.set_status(EmuStatus::Running);
    }

    fn reset(&self) {
        self.record(CallOut::Reset);
        lock(&self.control).frames = 0;
    }

    fn stop(&self) {
        self.record(CallOut::Stop);
        self.request_quit();
    }

    fn quit(&self) {
        self.record(CallOut::Quit);
        self.request_quit();
    }

    fn state_save(&self) {
        self.record(CallOut::StateSave);
        self.notify(CoreParam::StateSaveComplete, 1);
    }

    fn state_load(&self) {
        self.record(CallOut::StateLoad);
        self.notify(CoreParam::StateLoadComplete, 1);
    }

    fn set_state_slot(&self, slot: u32) {
        self.record(CallOut::SetStateSlot(slot));
        lock(&self.control).slot = slot;
    }

    fn set_speed(&self, percent: i32) {
        self.record(CallOut::SetSpeed(percent));
        lock(&self.control).speed = percent;
    }

    fn frame_advance(&self) {
        self.record(CallOut::FrameAdvance);
        lock(&self.control).advance = true;
        self.wake.notify_all();
    }

    fn set_gameshark(&self, pressed: bool) {
        self.record(CallOut::Gameshark(pressed));
    }

    fn status(&self) -> EmuStatus {
        lock(&self.control).status
    }

    fn run_audio(&self, out: &mut dyn AudioOut) {
        let silence = vec![0i16; self.options.audio_chunk.max(1)];
        while self.wait_runnable(self.options.frame_interval, false) {
            out.write_i16(&silence);
            lock(&self.control).audio_buffers += 1;
        }
    }

    fn set_controller_state(&self, controller: usize, snapshot: &ControllerSnapshot) {
        self.record(CallOut::ControllerState(controller, *snapshot));
    }

    fn set_controller_config(&self, controller: usize, plugged: bool, pak: PakType) {
        self.record(CallOut::ControllerConfig(controller, plugged, pak));
    }

    fn file_load(&self, path: &Path) {
        self.record(CallOut::FileLoad(path.to_path_buf()));
    }

    fn file_save(&self, path: &Path) {
        self.record(CallOut::FileSave(path.to_path_buf()));
    }

    fn header_name(&self, _rom: &Path) -> Option<String> {
        self.options.header_name.clone()
    }

    fn header_crc(&self, _rom: &Path) -> Option<String> {
        self.options.header_crc.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_param_raw_values_match_native_numbering() {
        assert_eq!(CoreParam::from_raw(3), CoreParam::SaveStateSlot);
        assert_eq!(CoreParam::from_raw(4), CoreParam::SpeedFactor);
        assert_eq!(CoreParam::from_raw(42), CoreParam::Unknown(42));
        assert_eq!(CoreParam::StateSaveComplete.raw(), 11);
    }

    #[test]
    fn emu_status_rejects_unknown_values() {
        assert_eq!(EmuStatus::from_raw(2), Some(EmuStatus::Running));
        assert_eq!(EmuStatus::from_raw(0), None);
    }

    #[test]
    fn unknown_pak_falls_back_to_none() {
        assert_eq!(PakType::from_raw(3), PakType::RumblePak);
        assert_eq!(PakType::from_raw(99), PakType::None);
    }

    #[test]
    fn stub_does_not_leave_stopped_on_resume() {
        let engine = StubEngine::default();
        engine.resume();
        assert_eq!(engine.status(), EmuStatus::Stopped);
        assert_eq!(engine.calls(), vec![CallOut::Resume]);
    }
}
