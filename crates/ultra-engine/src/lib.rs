#![cfg_attr(
    any(feature = "bundled", feature = "system"),
    allow(unsafe_op_in_unsafe_fn)
)]
#![cfg_attr(
    not(any(feature = "bundled", feature = "system")),
    allow(unused_variables, dead_code)
)]

//! Native N64 engine behind the [`Engine`] call-out surface.
//!
//! The engine itself is a C library linked through `ultra-engine-sys`. Without
//! the `bundled` or `system` feature this crate builds a stub whose
//! [`NativeEngine::new`] reports [`EngineError::Unavailable`], so frontends can
//! fall back to another engine.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use ultra_core::audio::AudioOut;
use ultra_core::engine::{EmuStatus, Engine, EngineHost, PakType};
use ultra_core::input::ControllerSnapshot;

#[cfg(any(feature = "bundled", feature = "system"))]
use ultra_engine_sys as sys;

#[cfg(any(feature = "bundled", feature = "system"))]
mod host;

/// Full-scale stick deflection in engine units.
#[cfg(any(feature = "bundled", feature = "system"))]
pub const AXIS_MAX: i32 = sys::ULTRA_AXIS_MAX;
#[cfg(not(any(feature = "bundled", feature = "system")))]
pub const AXIS_MAX: i32 = 80;

// The core's raw ids must match the ones the C library was built with.
#[cfg(any(feature = "bundled", feature = "system"))]
const _: () = {
    use ultra_core::engine::CoreParam;
    use ultra_core::input::NUM_BUTTONS;

    assert!(NUM_BUTTONS == sys::ULTRA_NUM_BUTTONS);
    assert!(CoreParam::EmuState.raw() == sys::ULTRA_PARAM_EMU_STATE);
    assert!(CoreParam::VideoMode.raw() == sys::ULTRA_PARAM_VIDEO_MODE);
    assert!(CoreParam::SaveStateSlot.raw() == sys::ULTRA_PARAM_SAVESTATE_SLOT);
    assert!(CoreParam::SpeedFactor.raw() == sys::ULTRA_PARAM_SPEED_FACTOR);
    assert!(CoreParam::SpeedLimiter.raw() == sys::ULTRA_PARAM_SPEED_LIMITER);
    assert!(CoreParam::VideoSize.raw() == sys::ULTRA_PARAM_VIDEO_SIZE);
    assert!(CoreParam::AudioVolume.raw() == sys::ULTRA_PARAM_AUDIO_VOLUME);
    assert!(CoreParam::AudioMute.raw() == sys::ULTRA_PARAM_AUDIO_MUTE);
    assert!(CoreParam::InputGameshark.raw() == sys::ULTRA_PARAM_INPUT_GAMESHARK);
    assert!(CoreParam::StateLoadComplete.raw() == sys::ULTRA_PARAM_STATE_LOADCOMPLETE);
    assert!(CoreParam::StateSaveComplete.raw() == sys::ULTRA_PARAM_STATE_SAVECOMPLETE);
    assert!(EmuStatus::Stopped.raw() == sys::ULTRA_EMUSTATE_STOPPED);
    assert!(EmuStatus::Running.raw() == sys::ULTRA_EMUSTATE_RUNNING);
    assert!(EmuStatus::Paused.raw() == sys::ULTRA_EMUSTATE_PAUSED);
    assert!(PakType::None.raw() == sys::ULTRA_PAK_NONE);
    assert!(PakType::MemPak.raw() == sys::ULTRA_PAK_MEMPAK);
    assert!(PakType::RumblePak.raw() == sys::ULTRA_PAK_RUMBLEPAK);
    assert!(PakType::TransferPak.raw() == sys::ULTRA_PAK_TRANSFERPAK);
};

#[cfg(target_os = "android")]
pub fn install_android_log_sink() {
    use std::ffi::CString;
    use std::os::raw::{c_char, c_int};

    const TAG: &str = "ultra";

    unsafe extern "C" {
        fn __android_log_write(prio: c_int, tag: *const c_char, text: *const c_char) -> c_int;
    }

    struct AndroidLogger;

    impl log::Log for AndroidLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            // Android priorities: VERBOSE=2, DEBUG=3, INFO=4, WARN=5, ERROR=6.
            let prio = match record.level() {
                log::Level::Trace => 2,
                log::Level::Debug => 3,
                log::Level::Info => 4,
                log::Level::Warn => 5,
                log::Level::Error => 6,
            };

            let mut message = format!("[{}] {}", record.target(), record.args());
            if message.contains('\0') {
                message = message.replace('\0', "?");
            }

            let (Ok(tag), Ok(message)) = (CString::new(TAG), CString::new(message)) else {
                return;
            };
            unsafe {
                let _ = __android_log_write(prio, tag.as_ptr(), message.as_ptr());
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: AndroidLogger = AndroidLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Debug);
    }
}

#[cfg(not(target_os = "android"))]
pub fn install_android_log_sink() {}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("native engine not built (enable the 'bundled' or 'system' feature)")]
    Unavailable,
    #[error("native engine is already in use")]
    InUse,
}

/// The native engine keeps process-global state, so only one handle may exist.
static CLAIMED: AtomicBool = AtomicBool::new(false);

/// Handle to the process-wide native engine.
pub struct NativeEngine {
    _claim: (),
}

impl NativeEngine {
    pub fn new() -> Result<Self, EngineError> {
        if !cfg!(any(feature = "bundled", feature = "system")) {
            return Err(EngineError::Unavailable);
        }
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(EngineError::InUse);
        }
        log::info!("native engine ready");
        Ok(Self { _claim: () })
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        CLAIMED.store(false, Ordering::Release);
    }
}

/// Scales a normalized stick axis to engine units.
pub fn axis_to_engine(value: f32) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(-1.0, 1.0) * AXIS_MAX as f32).round() as i32
}

#[cfg(any(feature = "bundled", feature = "system"))]
fn path_to_c(path: &Path) -> Option<std::ffi::CString> {
    match std::ffi::CString::new(path.to_string_lossy().into_owned()) {
        Ok(path) => Some(path),
        Err(_) => {
            log::warn!("path contains a NUL byte: {}", path.display());
            None
        }
    }
}

/// Calls a native string query, growing the buffer once if it was truncated.
#[cfg(any(feature = "bundled", feature = "system"))]
fn query_string(
    mut query: impl FnMut(*mut std::os::raw::c_char, usize) -> isize,
) -> Option<String> {
    let mut cap = 256;
    loop {
        let mut buf = vec![0u8; cap];
        let len = query(buf.as_mut_ptr().cast(), cap);
        let len = usize::try_from(len).ok()?;
        if len < cap {
            buf.truncate(len);
            return Some(String::from_utf8_lossy(&buf).into_owned());
        }
        if cap > 256 {
            return None;
        }
        cap = len + 1;
    }
}

impl Engine for NativeEngine {
    fn run(&self, host: Arc<dyn EngineHost>) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        host::run_session(host);
    }

    fn pause(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_pause()
        };
    }

    fn resume(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_resume()
        };
    }

    fn reset(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_reset()
        };
    }

    fn stop(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_stop()
        };
    }

    fn quit(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_quit()
        };
    }

    fn state_save(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_state_save()
        };
    }

    fn state_load(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_state_load()
        };
    }

    fn set_state_slot(&self, slot: u32) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_state_set_slot(slot.min(i32::MAX as u32) as i32)
        };
    }

    fn set_speed(&self, percent: i32) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_set_speed(percent)
        };
    }

    fn frame_advance(&self) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_frame_advance()
        };
    }

    fn set_gameshark(&self, pressed: bool) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_gameshark(pressed)
        };
    }

    fn status(&self) -> EmuStatus {
        #[cfg(any(feature = "bundled", feature = "system"))]
        {
            let raw = unsafe { sys::ultra_state() };
            return EmuStatus::from_raw(raw).unwrap_or_default();
        }
        #[cfg(not(any(feature = "bundled", feature = "system")))]
        EmuStatus::Stopped
    }

    fn run_audio(&self, out: &mut dyn AudioOut) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        host::run_audio(out);
    }

    fn set_controller_state(&self, controller: usize, snapshot: &ControllerSnapshot) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_set_controller_state(
                controller as i32,
                snapshot.buttons.as_ptr(),
                axis_to_engine(snapshot.axis_x),
                axis_to_engine(snapshot.axis_y),
            )
        };
    }

    fn set_controller_config(&self, controller: usize, plugged: bool, pak: PakType) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        unsafe {
            sys::ultra_set_controller_config(controller as i32, plugged, pak.raw())
        };
    }

    fn file_load(&self, path: &Path) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        if let Some(path) = path_to_c(path) {
            unsafe { sys::ultra_file_load(path.as_ptr()) };
        }
    }

    fn file_save(&self, path: &Path) {
        #[cfg(any(feature = "bundled", feature = "system"))]
        if let Some(path) = path_to_c(path) {
            unsafe { sys::ultra_file_save(path.as_ptr()) };
        }
    }

    fn header_name(&self, rom: &Path) -> Option<String> {
        #[cfg(any(feature = "bundled", feature = "system"))]
        {
            let rom = path_to_c(rom)?;
            return query_string(|buf, cap| unsafe {
                sys::ultra_header_name(rom.as_ptr(), buf, cap)
            });
        }
        #[cfg(not(any(feature = "bundled", feature = "system")))]
        None
    }

    fn header_crc(&self, rom: &Path) -> Option<String> {
        #[cfg(any(feature = "bundled", feature = "system"))]
        {
            let rom = path_to_c(rom)?;
            return query_string(|buf, cap| unsafe {
                sys::ultra_header_crc(rom.as_ptr(), buf, cap)
            });
        }
        #[cfg(not(any(feature = "bundled", feature = "system")))]
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axes_scale_to_engine_units() {
        assert_eq!(axis_to_engine(0.0), 0);
        assert_eq!(axis_to_engine(1.0), AXIS_MAX);
        assert_eq!(axis_to_engine(-1.0), -AXIS_MAX);
        assert_eq!(axis_to_engine(0.5), 40);
        assert_eq!(axis_to_engine(3.0), AXIS_MAX);
        assert_eq!(axis_to_engine(f32::NAN), 0);
    }
}
