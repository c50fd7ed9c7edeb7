//! Trampolines from the native engine's call-in table to [`EngineHost`].

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use ultra_core::audio::{AudioFormat, AudioOut};
use ultra_core::engine::{CoreParam, EngineHost};
use ultra_engine_sys as sys;

struct HostSession {
    host: Arc<dyn EngineHost>,
}

pub(crate) fn run_session(host: Arc<dyn EngineHost>) {
    let session = Box::new(HostSession { host });
    let table = sys::ultra_host {
        user: (&*session) as *const HostSession as *mut c_void,
        flip_buffers: Some(cb_flip_buffers),
        screen_stretch: Some(cb_screen_stretch),
        screen_position: Some(cb_screen_position),
        auto_frameskip: Some(cb_auto_frameskip),
        max_frameskip: Some(cb_max_frameskip),
        use_rgba8888: Some(cb_use_rgba8888),
        hardware_type: Some(cb_hardware_type),
        data_dir: Some(cb_data_dir),
        extra_args: Some(cb_extra_args),
        rom_path: Some(cb_rom_path),
        audio_init: Some(cb_audio_init),
        audio_quit: Some(cb_audio_quit),
        state_callback: Some(cb_state_callback),
        show_message: Some(cb_show_message),
        set_title: Some(cb_set_title),
        rumble: Some(cb_rumble),
        run_on_ui_thread: Some(cb_run_on_ui_thread),
    };

    debug!("entering native session");
    let code = unsafe { sys::ultra_run(&table) };
    if code != 0 {
        warn!("native session ended with code {code}");
    }
    // The table's user pointer dies with `session` here; ultra_run has returned.
    drop(session);
}

pub(crate) fn run_audio(out: &mut dyn AudioOut) {
    let mut out = out;
    let mut writer = sys::ultra_audio_writer {
        user: (&mut out) as *mut &mut dyn AudioOut as *mut c_void,
        write_i16: Some(cb_write_i16),
        write_u8: Some(cb_write_u8),
    };
    unsafe { sys::ultra_run_audio_thread(&mut writer) };
}

unsafe fn with_host<'a>(user: *mut c_void) -> Option<&'a dyn EngineHost> {
    if user.is_null() {
        return None;
    }
    Some(&*(*(user as *const HostSession)).host)
}

/// Copies `value` into a caller buffer, returning the untruncated length.
unsafe fn fill_string(value: &str, buf: *mut c_char, cap: usize) -> isize {
    let bytes = value.as_bytes();
    if !buf.is_null() && cap > 0 {
        let n = bytes.len().min(cap - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf as *mut u8, n);
        *buf.add(n) = 0;
    }
    isize::try_from(bytes.len()).unwrap_or(isize::MAX)
}

unsafe fn fill_path(path: &Path, buf: *mut c_char, cap: usize) -> isize {
    fill_string(&path.to_string_lossy(), buf, cap)
}

unsafe fn text<'a>(text: *const c_char) -> Option<std::borrow::Cow<'a, str>> {
    if text.is_null() {
        return None;
    }
    Some(CStr::from_ptr(text).to_string_lossy())
}

unsafe extern "C" fn cb_flip_buffers(user: *mut c_void) {
    if let Some(host) = with_host(user) {
        host.flip_buffers();
    }
}

unsafe extern "C" fn cb_screen_stretch(user: *mut c_void) -> bool {
    with_host(user).is_some_and(|host| host.screen_stretch())
}

unsafe extern "C" fn cb_screen_position(user: *mut c_void) -> c_int {
    with_host(user).map_or(1, |host| host.screen_position().raw())
}

unsafe extern "C" fn cb_auto_frameskip(user: *mut c_void) -> bool {
    with_host(user).is_some_and(|host| host.auto_frameskip())
}

unsafe extern "C" fn cb_max_frameskip(user: *mut c_void) -> c_int {
    with_host(user).map_or(0, |host| host.max_frameskip())
}

unsafe extern "C" fn cb_use_rgba8888(user: *mut c_void) -> bool {
    with_host(user).is_some_and(|host| host.use_rgba8888())
}

unsafe extern "C" fn cb_hardware_type(user: *mut c_void) -> c_int {
    with_host(user).map_or(-1, |host| host.hardware_type())
}

unsafe extern "C" fn cb_data_dir(user: *mut c_void, buf: *mut c_char, cap: usize) -> isize {
    match with_host(user) {
        Some(host) => fill_path(&host.data_dir(), buf, cap),
        None => -1,
    }
}

unsafe extern "C" fn cb_extra_args(user: *mut c_void, buf: *mut c_char, cap: usize) -> isize {
    match with_host(user) {
        Some(host) => fill_string(&host.extra_args(), buf, cap),
        None => -1,
    }
}

unsafe extern "C" fn cb_rom_path(user: *mut c_void, buf: *mut c_char, cap: usize) -> isize {
    match with_host(user).and_then(|host| host.rom_path()) {
        Some(path) => fill_path(&path, buf, cap),
        None => -1,
    }
}

unsafe extern "C" fn cb_audio_init(
    user: *mut c_void,
    sample_rate: c_int,
    is_16bit: bool,
    is_stereo: bool,
    desired_frames: c_int,
) -> c_int {
    let Some(host) = with_host(user) else {
        return -1;
    };
    let (Ok(rate), Ok(desired)) = (u32::try_from(sample_rate), usize::try_from(desired_frames))
    else {
        warn!("engine requested audio with rate {sample_rate}, frames {desired_frames}");
        return -1;
    };
    host.audio_init(AudioFormat::new(rate, is_16bit, is_stereo), desired)
        .and_then(|frames| c_int::try_from(frames).ok())
        .unwrap_or(-1)
}

unsafe extern "C" fn cb_audio_quit(user: *mut c_void) {
    if let Some(host) = with_host(user) {
        host.audio_quit();
    }
}

unsafe extern "C" fn cb_state_callback(user: *mut c_void, param: c_int, value: c_int) {
    if let Some(host) = with_host(user) {
        host.state_callback(CoreParam::from_raw(param), value);
    }
}

unsafe extern "C" fn cb_show_message(user: *mut c_void, message: *const c_char) {
    if let (Some(host), Some(message)) = (with_host(user), text(message)) {
        host.show_message(&message);
    }
}

unsafe extern "C" fn cb_set_title(user: *mut c_void, title: *const c_char) {
    if let (Some(host), Some(title)) = (with_host(user), text(title)) {
        host.set_title(&title);
    }
}

unsafe extern "C" fn cb_rumble(user: *mut c_void, controller: c_int, active: bool) {
    let (Some(host), Ok(controller)) = (with_host(user), usize::try_from(controller)) else {
        return;
    };
    host.rumble(controller, active);
}

/// Native task queued for the UI thread.
struct UiTask {
    task: unsafe extern "C" fn(*mut c_void),
    arg: *mut c_void,
}

// Safety: the engine hands the task off for execution on another thread;
// ownership of `arg` travels with it.
unsafe impl Send for UiTask {}

impl UiTask {
    fn run(self) {
        unsafe { (self.task)(self.arg) }
    }
}

unsafe extern "C" fn cb_run_on_ui_thread(
    user: *mut c_void,
    task: sys::ultra_ui_task,
    arg: *mut c_void,
) {
    let (Some(host), Some(task)) = (with_host(user), task) else {
        return;
    };
    let task = UiTask { task, arg };
    host.run_on_ui_thread(Box::new(move || task.run()));
}

unsafe fn with_out<'a>(user: *mut c_void) -> Option<&'a mut &'a mut dyn AudioOut> {
    (user as *mut &mut dyn AudioOut).as_mut()
}

unsafe extern "C" fn cb_write_i16(user: *mut c_void, samples: *const i16, count: usize) {
    if samples.is_null() {
        return;
    }
    if let Some(out) = with_out(user) {
        out.write_i16(std::slice::from_raw_parts(samples, count));
    }
}

unsafe extern "C" fn cb_write_u8(user: *mut c_void, samples: *const u8, count: usize) {
    if samples.is_null() {
        return;
    }
    if let Some(out) = with_out(user) {
        out.write_u8(std::slice::from_raw_parts(samples, count));
    }
}
