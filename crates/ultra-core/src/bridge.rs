use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, warn};

use crate::audio::{AudioDevice, AudioFormat, AudioPipeline, NullAudioDevice};
use crate::config::{ConfigSnapshot, RomPath, ScreenPosition};
use crate::engine::{CoreParam, Engine, EngineHost};
use crate::error::{ErrorSlot, LifecycleError};
use crate::input::{ControllerDigitizer, InputMap, NoVibrators, VibratorRegistry};
use crate::lifecycle::LifecycleController;
use crate::rom::{self, RomResolver, ZipRomResolver};
use crate::telemetry::{Clock, FpsCounter, FpsListener, SystemClock};

/// Delay before exiting after a fatal ROM error, so the message can be read.
pub const EXIT_DELAY: Duration = Duration::from_millis(2000);

/// Work the engine asks the UI-owning thread to perform.
pub enum UiCommand {
    ChangeTitle(String),
    ShowMessage(String),
    Run(Box<dyn FnOnce() + Send>),
    /// Show `message`, then leave the application after `delay`.
    Exit { message: String, delay: Duration },
    /// Abandon the session and return to the caller.
    Finish,
}

impl fmt::Debug for UiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangeTitle(title) => f.debug_tuple("ChangeTitle").field(title).finish(),
            Self::ShowMessage(msg) => f.debug_tuple("ShowMessage").field(msg).finish(),
            Self::Run(_) => f.write_str("Run(..)"),
            Self::Exit { message, delay } => f
                .debug_struct("Exit")
                .field("message", message)
                .field("delay", delay)
                .finish(),
            Self::Finish => f.write_str("Finish"),
        }
    }
}

/// Sending half of the UI command queue.
#[derive(Clone, Debug)]
pub struct UiHandle {
    tx: Sender<UiCommand>,
}

impl UiHandle {
    /// Creates the queue; the receiver belongs to the UI-owning thread.
    pub fn channel() -> (Self, Receiver<UiCommand>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn send(&self, command: UiCommand) {
        if let Err(e) = self.tx.send(command) {
            debug!("ui: receiver gone, dropping {:?}", e.into_inner());
        }
    }

    pub fn change_title(&self, title: &str) {
        self.send(UiCommand::ChangeTitle(title.to_string()));
    }

    pub fn show_message(&self, message: &str) {
        self.send(UiCommand::ShowMessage(message.to_string()));
    }

    pub fn run(&self, action: Box<dyn FnOnce() + Send>) {
        self.send(UiCommand::Run(action));
    }

    pub fn exit(&self, message: &str, delay: Duration) {
        self.send(UiCommand::Exit {
            message: message.to_string(),
            delay,
        });
    }

    pub fn finish(&self) {
        self.send(UiCommand::Finish);
    }
}

/// One emulation session: owns every bridge component and answers the
/// engine's call-ins.
pub struct Bridge {
    engine: Arc<dyn Engine>,
    audio: Arc<AudioPipeline>,
    lifecycle: LifecycleController,
    fps: Mutex<FpsCounter>,
    config: ConfigSnapshot,
    resolver: Box<dyn RomResolver>,
    vibrators: Box<dyn VibratorRegistry>,
    errors: ErrorSlot,
    ui: UiHandle,
}

impl Bridge {
    /// Headless defaults: null audio, zip archives, no vibrators, wall clock.
    pub fn new(engine: Arc<dyn Engine>, config: ConfigSnapshot, ui: UiHandle) -> Self {
        let audio = Arc::new(AudioPipeline::new(Arc::new(NullAudioDevice)));
        let period = config.preferences().fps_refresh;
        Self {
            lifecycle: LifecycleController::new(Arc::clone(&engine), Arc::clone(&audio)),
            engine,
            audio,
            fps: Mutex::new(FpsCounter::new(Box::new(SystemClock::new()), period)),
            config,
            resolver: Box::new(ZipRomResolver),
            vibrators: Box::new(NoVibrators),
            errors: ErrorSlot::new(),
            ui,
        }
    }

    pub fn with_audio_device(self, device: Arc<dyn AudioDevice>) -> Self {
        self.with_audio_pipeline(AudioPipeline::new(device))
    }

    pub fn with_audio_pipeline(mut self, pipeline: AudioPipeline) -> Self {
        self.audio = Arc::new(pipeline);
        self.lifecycle = LifecycleController::new(Arc::clone(&self.engine), Arc::clone(&self.audio));
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn RomResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_vibrators(mut self, vibrators: Box<dyn VibratorRegistry>) -> Self {
        self.vibrators = vibrators;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        let period = self.config.preferences().fps_refresh;
        self.fps = Mutex::new(FpsCounter::new(clock, period));
        self
    }

    /// Pushes the controller port configuration and starts the engine.
    pub fn start(self: &Arc<Self>) -> Result<(), LifecycleError> {
        for (index, port) in self.config.preferences().controllers.iter().enumerate() {
            self.engine.set_controller_config(index, port.plugged, port.pak);
        }
        let host: Arc<dyn EngineHost> = Arc::clone(self) as Arc<dyn EngineHost>;
        self.lifecycle.init(host)
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn audio(&self) -> &AudioPipeline {
        &self.audio
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn errors(&self) -> &ErrorSlot {
        &self.errors
    }

    pub fn ui(&self) -> &UiHandle {
        &self.ui
    }

    /// Digitizer that forwards snapshots for controller `index`.
    pub fn controller(&self, index: usize, map: InputMap) -> ControllerDigitizer {
        ControllerDigitizer::new(index, Arc::clone(&self.engine), map)
    }

    /// Installs the FPS listener; a `period` of 0 disables estimation.
    pub fn set_fps_listener(&self, listener: Option<Box<dyn FpsListener>>, period: u32) {
        self.fps().set_listener(listener, period);
    }

    pub fn header_crc(&self, rom: &Path) -> Option<String> {
        rom::header_crc(
            self.engine.as_ref(),
            self.resolver.as_ref(),
            rom,
            &self.config.scratch_dir(),
            &self.errors,
        )
    }

    pub fn header_name(&self, rom: &Path) -> Option<String> {
        rom::header_name(
            self.engine.as_ref(),
            self.resolver.as_ref(),
            rom,
            &self.config.scratch_dir(),
            &self.errors,
        )
    }

    fn fps(&self) -> MutexGuard<'_, FpsCounter> {
        self.fps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineHost for Bridge {
    fn flip_buffers(&self) {
        self.lifecycle.on_flip();
        self.fps().on_flip();
    }

    fn screen_stretch(&self) -> bool {
        self.config.screen_stretch()
    }

    fn screen_position(&self) -> ScreenPosition {
        self.config.screen_position()
    }

    fn auto_frameskip(&self) -> bool {
        self.config.auto_frameskip()
    }

    fn max_frameskip(&self) -> i32 {
        self.config.max_frameskip()
    }

    fn use_rgba8888(&self) -> bool {
        self.config.use_rgba8888()
    }

    fn hardware_type(&self) -> i32 {
        self.config.hardware_type()
    }

    fn data_dir(&self) -> PathBuf {
        self.config.data_dir().to_path_buf()
    }

    fn extra_args(&self) -> String {
        self.config.extra_args()
    }

    fn rom_path(&self) -> Option<PathBuf> {
        match self.config.resolve_rom_path(self.resolver.as_ref(), &self.errors) {
            RomPath::Ready(path) | RomPath::Extracted(path) => Some(path),
            RomPath::FatalMissing => {
                warn!("bridge: selected ROM does not exist");
                self.ui.exit("Invalid ROM", EXIT_DELAY);
                None
            }
            RomPath::ExtractionFailed => {
                self.errors.retag("OPEN_ROM", "fail_crash");
                self.ui.finish();
                None
            }
        }
    }

    fn audio_init(&self, format: AudioFormat, desired_frames: usize) -> Option<usize> {
        match self
            .audio
            .audio_init(format, desired_frames, Arc::clone(&self.engine))
        {
            Ok(frames) => Some(frames),
            Err(e) => {
                error!("bridge: audio init failed: {e}");
                self.errors.set("AUDIO_INIT", e.to_string());
                None
            }
        }
    }

    fn audio_quit(&self) {
        self.audio.audio_quit();
    }

    fn state_callback(&self, param: CoreParam, value: i32) {
        self.lifecycle.on_state_callback(param, value);
    }

    fn show_message(&self, message: &str) {
        self.ui.show_message(message);
    }

    fn run_on_ui_thread(&self, action: Box<dyn FnOnce() + Send>) {
        self.ui.run(action);
    }

    fn set_title(&self, title: &str) {
        self.ui.change_title(title);
    }

    fn rumble(&self, controller: usize, active: bool) {
        crate::input::rumble(self.vibrators.as_ref(), controller, active);
    }
}
