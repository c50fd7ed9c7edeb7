#![allow(
    non_camel_case_types,
    dead_code,
    clippy::upper_case_acronyms,
    clippy::missing_safety_doc
)]

//! Low-level (unsafe) bindings to the ultra engine's C ABI.
//!
//! Most consumers should use the safe wrapper in `ultra-engine` instead of
//! calling these functions directly.

use core::ffi::c_void;
use std::os::raw::{c_char, c_int};

/// Number of digital buttons in a controller state array.
pub const ULTRA_NUM_BUTTONS: usize = 16;
/// Full-scale analog stick deflection accepted by the engine.
pub const ULTRA_AXIS_MAX: c_int = 80;

// Parameter ids passed to `state_callback`.
pub const ULTRA_PARAM_EMU_STATE: c_int = 1;
pub const ULTRA_PARAM_VIDEO_MODE: c_int = 2;
pub const ULTRA_PARAM_SAVESTATE_SLOT: c_int = 3;
pub const ULTRA_PARAM_SPEED_FACTOR: c_int = 4;
pub const ULTRA_PARAM_SPEED_LIMITER: c_int = 5;
pub const ULTRA_PARAM_VIDEO_SIZE: c_int = 6;
pub const ULTRA_PARAM_AUDIO_VOLUME: c_int = 7;
pub const ULTRA_PARAM_AUDIO_MUTE: c_int = 8;
pub const ULTRA_PARAM_INPUT_GAMESHARK: c_int = 9;
pub const ULTRA_PARAM_STATE_LOADCOMPLETE: c_int = 10;
pub const ULTRA_PARAM_STATE_SAVECOMPLETE: c_int = 11;

pub const ULTRA_EMUSTATE_STOPPED: c_int = 1;
pub const ULTRA_EMUSTATE_RUNNING: c_int = 2;
pub const ULTRA_EMUSTATE_PAUSED: c_int = 3;

pub const ULTRA_PAK_NONE: c_int = 1;
pub const ULTRA_PAK_MEMPAK: c_int = 2;
pub const ULTRA_PAK_RUMBLEPAK: c_int = 3;
pub const ULTRA_PAK_TRANSFERPAK: c_int = 4;

/// Fills `buf` with a NUL-terminated string and returns the full length,
/// excluding the terminator. A return larger than `cap - 1` means the
/// string was truncated; a negative return means "no value".
pub type ultra_func_string =
    Option<unsafe extern "C" fn(user: *mut c_void, buf: *mut c_char, cap: usize) -> isize>;
pub type ultra_func_void = Option<unsafe extern "C" fn(user: *mut c_void)>;
pub type ultra_func_bool = Option<unsafe extern "C" fn(user: *mut c_void) -> bool>;
pub type ultra_func_int = Option<unsafe extern "C" fn(user: *mut c_void) -> c_int>;
pub type ultra_func_audio_init = Option<
    unsafe extern "C" fn(
        user: *mut c_void,
        sample_rate: c_int,
        is_16bit: bool,
        is_stereo: bool,
        desired_frames: c_int,
    ) -> c_int,
>;
pub type ultra_func_state_callback =
    Option<unsafe extern "C" fn(user: *mut c_void, param: c_int, value: c_int)>;
pub type ultra_func_text = Option<unsafe extern "C" fn(user: *mut c_void, text: *const c_char)>;
pub type ultra_func_rumble =
    Option<unsafe extern "C" fn(user: *mut c_void, controller: c_int, active: bool)>;
pub type ultra_ui_task = Option<unsafe extern "C" fn(arg: *mut c_void)>;
pub type ultra_func_run_on_ui =
    Option<unsafe extern "C" fn(user: *mut c_void, task: ultra_ui_task, arg: *mut c_void)>;

/// Host call-ins registered for one `ultra_run` session.
#[repr(C)]
pub struct ultra_host {
    pub user: *mut c_void,
    pub flip_buffers: ultra_func_void,
    pub screen_stretch: ultra_func_bool,
    pub screen_position: ultra_func_int,
    pub auto_frameskip: ultra_func_bool,
    pub max_frameskip: ultra_func_int,
    pub use_rgba8888: ultra_func_bool,
    pub hardware_type: ultra_func_int,
    pub data_dir: ultra_func_string,
    pub extra_args: ultra_func_string,
    pub rom_path: ultra_func_string,
    /// Returns the negotiated buffer size in frames, or a negative value.
    pub audio_init: ultra_func_audio_init,
    pub audio_quit: ultra_func_void,
    pub state_callback: ultra_func_state_callback,
    pub show_message: ultra_func_text,
    pub set_title: ultra_func_text,
    pub rumble: ultra_func_rumble,
    pub run_on_ui_thread: ultra_func_run_on_ui,
}

pub type ultra_func_write_i16 =
    Option<unsafe extern "C" fn(user: *mut c_void, samples: *const i16, count: usize)>;
pub type ultra_func_write_u8 =
    Option<unsafe extern "C" fn(user: *mut c_void, samples: *const u8, count: usize)>;

/// Sample writer handed to `ultra_run_audio_thread`.
#[repr(C)]
pub struct ultra_audio_writer {
    pub user: *mut c_void,
    pub write_i16: ultra_func_write_i16,
    pub write_u8: ultra_func_write_u8,
}

unsafe extern "C" {
    /// Runs one session; blocks until the engine stops.
    pub fn ultra_run(host: *const ultra_host) -> c_int;
    pub fn ultra_pause();
    pub fn ultra_resume();
    pub fn ultra_reset();
    pub fn ultra_stop();
    pub fn ultra_quit();
    pub fn ultra_state() -> c_int;

    pub fn ultra_state_save();
    pub fn ultra_state_load();
    pub fn ultra_state_set_slot(slot: c_int);
    pub fn ultra_set_speed(percent: c_int);
    pub fn ultra_frame_advance();
    pub fn ultra_gameshark(pressed: bool);

    pub fn ultra_file_load(path: *const c_char);
    pub fn ultra_file_save(path: *const c_char);

    /// Blocks generating audio until the session quits.
    pub fn ultra_run_audio_thread(writer: *mut ultra_audio_writer);

    pub fn ultra_set_controller_state(
        controller: c_int,
        buttons: *const bool,
        axis_x: c_int,
        axis_y: c_int,
    );
    pub fn ultra_set_controller_config(controller: c_int, plugged: bool, pak: c_int);

    /// Both header queries follow the `ultra_func_string` return convention.
    pub fn ultra_header_name(rom: *const c_char, buf: *mut c_char, cap: usize) -> isize;
    pub fn ultra_header_crc(rom: *const c_char, buf: *mut c_char, cap: usize) -> isize;
}
