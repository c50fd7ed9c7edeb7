mod audio;
mod console;
#[cfg(not(target_os = "android"))]
mod gamepad;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::{Receiver, never, select};
use log::{error, info, warn};

use ultra_core::bridge::{Bridge, UiCommand, UiHandle};
use ultra_core::config::{self, AppData, ConfigSnapshot};
use ultra_core::engine::{CoreParam, Engine, StubEngine};
use ultra_core::lifecycle::LifecycleState;
use ultra_engine::NativeEngine;

use console::ConsoleCommand;

const POLL_INTERVAL: Duration = Duration::from_millis(8);

#[derive(Parser)]
#[command(version, about = "N64 emulation frontend")]
struct Args {
    /// ROM or .zip archive to run (defaults to the last selected game)
    rom: Option<PathBuf>,

    /// Preferences file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for saves, states and the archive scratch area
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Hardware profile to report when preferences say auto-detect
    #[arg(long, default_value_t = 0)]
    hardware: i32,

    /// Swaps per FPS estimate (0 disables the counter)
    #[arg(long)]
    fps_period: Option<u32>,

    /// Cheat arguments passed to the engine verbatim
    #[arg(long)]
    cheats: Option<String>,

    /// Run without audio output or gamepads
    #[arg(long)]
    headless: bool,

    /// Use the built-in stub engine even when the native engine is available
    #[arg(long)]
    stub: bool,

    /// Quit after this many seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// Print the ROM's header CRC and name, then exit
    #[arg(long)]
    info: bool,
}

fn pick_engine(force_stub: bool) -> Arc<dyn Engine> {
    if force_stub {
        return Arc::new(StubEngine::default());
    }
    match NativeEngine::new() {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            warn!("{e}; using the stub engine");
            Arc::new(StubEngine::default())
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    ultra_engine::install_android_log_sink();

    let args = Args::parse();

    let prefs_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_preferences_path);
    let mut prefs = config::load_from_file(&prefs_path);
    if let Some(rom) = &args.rom {
        prefs.selected_game = Some(rom.clone());
        if let Err(e) = config::save_to_file(&prefs_path, &prefs) {
            warn!("could not remember the selected game: {e}");
        }
    }
    if let Some(period) = args.fps_period {
        prefs.fps_refresh = period;
    }
    let period = prefs.fps_refresh;

    let data_dir = args.data_dir.clone().unwrap_or_else(|| {
        prefs_path
            .parent()
            .map(|dir| dir.join("data"))
            .unwrap_or_else(|| PathBuf::from("data"))
    });
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        warn!("{}: {e}", data_dir.display());
    }

    let snapshot = ConfigSnapshot::new(
        prefs,
        AppData {
            data_dir,
            hardware_type: args.hardware,
        },
        args.cheats.clone(),
    );

    let engine = pick_engine(args.stub);
    let (ui, commands) = UiHandle::channel();
    let mut bridge = Bridge::new(engine, snapshot, ui);

    #[cfg(not(target_os = "android"))]
    let mut rumble = None;
    if !args.headless {
        bridge = bridge.with_audio_device(Arc::new(audio::CpalAudioDevice));
        #[cfg(not(target_os = "android"))]
        {
            let (slots, requests) = gamepad::vibrators();
            bridge = bridge.with_vibrators(Box::new(slots));
            rumble = Some(requests);
        }
    }
    let bridge = Arc::new(bridge);

    if args.info {
        return print_rom_info(&bridge);
    }

    bridge.set_fps_listener(Some(Box::new(|fps: u32| info!("{fps} FPS"))), period);
    let _subscription = bridge.lifecycle().subscribe(|param: CoreParam, value: i32| {
        match param {
            CoreParam::StateSaveComplete => info!("state saved"),
            CoreParam::StateLoadComplete => info!("state loaded"),
            CoreParam::SaveStateSlot => info!("slot {value}"),
            CoreParam::SpeedFactor => info!("speed {value}%"),
            _ => {}
        }
    });

    #[cfg(not(target_os = "android"))]
    let mut gamepads = rumble.and_then(|requests| {
        let pads = (0..ultra_core::input::NUM_CONTROLLERS)
            .map(|port| {
                bridge
                    .controller(port, gamepad::default_map())
                    .with_octagon(ultra_engine::AXIS_MAX)
            })
            .collect();
        gamepad::GamepadInput::new(pads, requests)
    });

    if let Err(e) = bridge.start() {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    eprintln!("{}", console::HELP);
    let mut console = console::spawn();
    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));

    let code = loop {
        let mut console_closed = false;
        let outcome = select! {
            recv(commands) -> command => match command {
                Ok(command) => handle_ui(command),
                Err(_) => Some(ExitCode::SUCCESS),
            },
            recv(console) -> command => match command {
                Ok(command) => handle_console(&bridge, command),
                Err(_) => {
                    console_closed = true;
                    None
                }
            },
            default(POLL_INTERVAL) => None,
        };
        if console_closed {
            console = never();
        }
        if let Some(code) = outcome {
            break code;
        }

        #[cfg(not(target_os = "android"))]
        if let Some(gamepads) = gamepads.as_mut() {
            gamepads.poll();
        }

        if bridge.lifecycle().state() == LifecycleState::Stopped {
            info!("session ended");
            break drain(&commands).unwrap_or(ExitCode::SUCCESS);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break ExitCode::SUCCESS;
        }
    };

    bridge.lifecycle().quit();
    code
}

fn handle_ui(command: UiCommand) -> Option<ExitCode> {
    match command {
        UiCommand::ChangeTitle(title) => info!("title: {title}"),
        UiCommand::ShowMessage(message) => info!("{message}"),
        UiCommand::Run(action) => action(),
        UiCommand::Exit { message, delay } => {
            error!("{message}");
            std::thread::sleep(delay);
            return Some(ExitCode::FAILURE);
        }
        UiCommand::Finish => return Some(ExitCode::FAILURE),
    }
    None
}

/// Runs whatever the engine queued before it stopped.
fn drain(commands: &Receiver<UiCommand>) -> Option<ExitCode> {
    let mut code = None;
    while let Ok(command) = commands.try_recv() {
        code = code.or(handle_ui(command));
    }
    code
}

fn handle_console(bridge: &Arc<Bridge>, command: ConsoleCommand) -> Option<ExitCode> {
    let lifecycle = bridge.lifecycle();
    match command {
        ConsoleCommand::Pause => lifecycle.pause(),
        ConsoleCommand::Resume => lifecycle.resume(),
        ConsoleCommand::Reset => lifecycle.reset(),
        ConsoleCommand::Advance => lifecycle.frame_advance(),
        ConsoleCommand::Save(None) => lifecycle.save_state(),
        ConsoleCommand::Save(Some(slot)) => lifecycle.save_state_in(slot),
        ConsoleCommand::Load(None) => lifecycle.load_state(),
        ConsoleCommand::Load(Some(slot)) => lifecycle.load_state_from(slot),
        ConsoleCommand::Slot(slot) => lifecycle.set_slot(slot),
        ConsoleCommand::Speed(percent) => lifecycle.set_speed(percent),
        ConsoleCommand::Gameshark(pressed) => lifecycle.set_gameshark(pressed),
        ConsoleCommand::SaveFile(path) => lifecycle.file_save(&path),
        ConsoleCommand::LoadFile(path) => lifecycle.file_load(&path),
        ConsoleCommand::Crc(rom) => match bridge.header_crc(&rom) {
            Some(crc) => println!("{crc}"),
            None => report_error(bridge),
        },
        ConsoleCommand::Name(rom) => match bridge.header_name(&rom) {
            Some(name) => println!("{name}"),
            None => report_error(bridge),
        },
        ConsoleCommand::Status => println!("{:?}", lifecycle.status()),
        ConsoleCommand::Stop => lifecycle.stop(),
        ConsoleCommand::Quit => return Some(ExitCode::SUCCESS),
    }
    None
}

fn report_error(bridge: &Bridge) {
    match bridge.errors().last() {
        Some(last) => eprintln!("{}: {}", last.context, last.message),
        None => eprintln!("no result"),
    }
    bridge.errors().clear();
}

fn print_rom_info(bridge: &Bridge) -> ExitCode {
    let Some(rom) = bridge.config().preferences().selected_game.clone() else {
        error!("no ROM selected");
        return ExitCode::FAILURE;
    };
    let crc = bridge.header_crc(&rom);
    let name = bridge.header_name(&rom);
    match (crc, name) {
        (Some(crc), Some(name)) => {
            println!("{name}\t{crc}");
            ExitCode::SUCCESS
        }
        _ => {
            report_error(bridge);
            ExitCode::FAILURE
        }
    }
}
