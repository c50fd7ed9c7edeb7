use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::audio::AudioPipeline;
use crate::engine::{CoreParam, EmuStatus, Engine, EngineHost};
use crate::error::LifecycleError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Running,
    Paused,
    Stopped,
}

impl LifecycleState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Lifecycle state plus the sub-flags mirrored from the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: LifecycleState,
    pub slot: u32,
    pub speed_percent: i32,
    pub frame_advance_pending: bool,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            slot: 0,
            speed_percent: 100,
            frame_advance_pending: false,
        }
    }
}

/// Receives out-of-band state changes reported by the engine.
///
/// Runs on the engine's thread with the listener lock held; it must not
/// block or subscribe another listener.
pub trait StateListener: Send {
    fn on_state_changed(&mut self, param: CoreParam, value: i32);
}

impl<F> StateListener for F
where
    F: FnMut(CoreParam, i32) + Send,
{
    fn on_state_changed(&mut self, param: CoreParam, value: i32) {
        self(param, value)
    }
}

#[derive(Default)]
struct ListenerSlot {
    generation: u64,
    listener: Option<Box<dyn StateListener>>,
}

/// Registration handle returned by [`LifecycleController::subscribe`].
///
/// Dropping it removes the listener unless a newer subscription has
/// already replaced it.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct StateSubscription {
    slot: Weak<Mutex<ListenerSlot>>,
    generation: u64,
}

impl StateSubscription {
    pub fn cancel(self) {}

    pub fn is_current(&self) -> bool {
        self.slot
            .upgrade()
            .is_some_and(|slot| lock(&slot).generation == self.generation)
    }
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        let Some(slot) = self.slot.upgrade() else {
            return;
        };
        let mut slot = lock(&slot);
        if slot.generation == self.generation {
            slot.listener = None;
        }
    }
}

/// Drives the engine through its session lifecycle.
///
/// Transitions are not serialized internally: callers must not issue
/// overlapping commands from different threads.
pub struct LifecycleController {
    engine: Arc<dyn Engine>,
    audio: Arc<AudioPipeline>,
    status: Arc<Mutex<SessionStatus>>,
    listener: Arc<Mutex<ListenerSlot>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleController {
    pub fn new(engine: Arc<dyn Engine>, audio: Arc<AudioPipeline>) -> Self {
        Self {
            engine,
            audio,
            status: Arc::new(Mutex::new(SessionStatus::default())),
            listener: Arc::new(Mutex::new(ListenerSlot::default())),
            thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.status).state
    }

    pub fn status(&self) -> SessionStatus {
        *lock(&self.status)
    }

    /// Starts a session on the `ultra-engine` thread.
    ///
    /// A no-op while a session is active. The session ends (and the state
    /// becomes `Stopped`) when [`Engine::run`] returns.
    pub fn init(&self, host: Arc<dyn EngineHost>) -> Result<(), LifecycleError> {
        let state = self.state();
        if state.is_active() {
            warn!("lifecycle: init ignored, session already {state:?}");
            return Ok(());
        }

        // A finished session's thread may still be unwinding.
        self.join_engine_thread();
        {
            let mut status = lock(&self.status);
            status.state = LifecycleState::Running;
            status.frame_advance_pending = false;
        }

        let engine = Arc::clone(&self.engine);
        let status = Arc::clone(&self.status);
        let spawned = thread::Builder::new()
            .name("ultra-engine".to_string())
            .spawn(move || {
                engine.run(host);
                lock(&status).state = LifecycleState::Stopped;
                debug!("lifecycle: engine session returned");
            });

        match spawned {
            Ok(handle) => {
                *lock(&self.thread) = Some(handle);
                info!("lifecycle: engine started");
                Ok(())
            }
            Err(e) => {
                lock(&self.status).state = LifecycleState::Stopped;
                Err(LifecycleError::Spawn(e))
            }
        }
    }

    pub fn pause(&self) {
        if self.transition(LifecycleState::Running, LifecycleState::Paused) {
            self.engine.pause();
            info!("lifecycle: paused");
        }
    }

    pub fn resume(&self) {
        if self.transition(LifecycleState::Paused, LifecycleState::Running) {
            self.engine.resume();
            info!("lifecycle: resumed");
        }
    }

    /// Resets the emulated hardware; the session stays in its current state.
    pub fn reset(&self) {
        let state = self.state();
        if state.is_active() {
            self.engine.reset();
            info!("lifecycle: reset");
        } else {
            warn!("lifecycle: reset ignored while {state:?}");
        }
    }

    pub fn stop(&self) {
        if self.enter_stopped() {
            self.engine.stop();
            info!("lifecycle: stopped");
        }
    }

    /// Ends the session and waits for the engine and audio threads.
    ///
    /// Blocks until the engine's session body and audio call-out return.
    pub fn quit(&self) {
        if self.enter_stopped() {
            self.engine.quit();
        }
        self.join_engine_thread();
        self.audio.audio_quit();
        info!("lifecycle: shut down");
    }

    /// Saves to the current slot. Completion arrives as
    /// [`CoreParam::StateSaveComplete`].
    pub fn save_state(&self) {
        self.engine.state_save();
    }

    pub fn load_state(&self) {
        self.engine.state_load();
    }

    pub fn save_state_in(&self, slot: u32) {
        self.set_slot(slot);
        self.save_state();
    }

    pub fn load_state_from(&self, slot: u32) {
        self.set_slot(slot);
        self.load_state();
    }

    pub fn set_slot(&self, slot: u32) {
        lock(&self.status).slot = slot;
        self.engine.set_state_slot(slot);
    }

    /// Range checking is left to the engine.
    pub fn set_speed(&self, percent: i32) {
        lock(&self.status).speed_percent = percent;
        self.engine.set_speed(percent);
    }

    pub fn frame_advance(&self) {
        lock(&self.status).frame_advance_pending = true;
        self.engine.frame_advance();
    }

    pub fn set_gameshark(&self, pressed: bool) {
        self.engine.set_gameshark(pressed);
    }

    pub fn file_save(&self, path: &Path) {
        self.engine.file_save(path);
    }

    pub fn file_load(&self, path: &Path) {
        self.engine.file_load(path);
    }

    /// A video frame completed; clears a pending frame advance.
    pub fn on_flip(&self) {
        lock(&self.status).frame_advance_pending = false;
    }

    /// Registers the single state listener, replacing any previous one.
    pub fn subscribe(&self, listener: impl StateListener + 'static) -> StateSubscription {
        let mut slot = lock(&self.listener);
        slot.generation += 1;
        slot.listener = Some(Box::new(listener));
        StateSubscription {
            slot: Arc::downgrade(&self.listener),
            generation: slot.generation,
        }
    }

    /// Engine call-in: mirrors the change and hands it to the listener.
    ///
    /// The listener lock is held across both steps so concurrent call-ins
    /// are mirrored and delivered in the same order.
    pub fn on_state_callback(&self, param: CoreParam, value: i32) {
        let mut slot = lock(&self.listener);
        {
            let mut status = lock(&self.status);
            match param {
                CoreParam::EmuState => match EmuStatus::from_raw(value) {
                    Some(EmuStatus::Running) if status.state == LifecycleState::Paused => {
                        status.state = LifecycleState::Running;
                    }
                    Some(EmuStatus::Paused) if status.state == LifecycleState::Running => {
                        status.state = LifecycleState::Paused;
                    }
                    Some(EmuStatus::Stopped) => status.state = LifecycleState::Stopped,
                    _ => {}
                },
                CoreParam::SaveStateSlot if value >= 0 => status.slot = value as u32,
                CoreParam::SpeedFactor => status.speed_percent = value,
                _ => {}
            }
        }

        if let Some(listener) = slot.listener.as_mut() {
            listener.on_state_changed(param, value);
        }
    }

    /// Waits for the current session's engine thread to return.
    pub fn join(&self) {
        self.join_engine_thread();
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        let mut status = lock(&self.status);
        if status.state != from {
            warn!(
                "lifecycle: {to:?} requested while {:?}, ignoring",
                status.state
            );
            return false;
        }
        status.state = to;
        true
    }

    fn enter_stopped(&self) -> bool {
        let mut status = lock(&self.status);
        let was_active = status.state.is_active();
        if status.state != LifecycleState::Uninitialized {
            status.state = LifecycleState::Stopped;
        }
        was_active
    }

    fn join_engine_thread(&self) {
        let Some(handle) = lock(&self.thread).take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            warn!("lifecycle: not joining the engine thread from itself");
            return;
        }
        if handle.join().is_err() {
            warn!("lifecycle: engine thread panicked");
            lock(&self.status).state = LifecycleState::Stopped;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullAudioDevice;
    use crate::engine::{CallOut, StubEngine};

    fn controller() -> (LifecycleController, Arc<StubEngine>) {
        let engine = Arc::new(StubEngine::default());
        let audio = Arc::new(AudioPipeline::new(Arc::new(NullAudioDevice)));
        (LifecycleController::new(engine.clone(), audio), engine)
    }

    #[test]
    fn pause_and_resume_ignored_before_init() {
        let (lifecycle, engine) = controller();
        lifecycle.pause();
        lifecycle.resume();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn replaced_subscription_does_not_remove_newer_listener() {
        let (lifecycle, _engine) = controller();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = lifecycle.subscribe(|_: CoreParam, _: i32| {});
        let sink = Arc::clone(&seen);
        let second = lifecycle.subscribe(move |p: CoreParam, v: i32| {
            sink.lock().unwrap().push((p, v));
        });
        assert!(!first.is_current());
        drop(first);

        lifecycle.on_state_callback(CoreParam::SpeedFactor, 150);
        assert_eq!(*seen.lock().unwrap(), vec![(CoreParam::SpeedFactor, 150)]);
        assert_eq!(lifecycle.status().speed_percent, 150);

        second.cancel();
        lifecycle.on_state_callback(CoreParam::SaveStateSlot, 4);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(lifecycle.status().slot, 4);
    }

    #[test]
    fn concurrent_call_ins_mirror_what_the_listener_saw_last() {
        let (lifecycle, _engine) = controller();
        let last = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&last);
        let _subscription = lifecycle.subscribe(move |p: CoreParam, v: i32| {
            if p == CoreParam::SpeedFactor {
                *sink.lock().unwrap() = Some(v);
            }
        });

        for _ in 0..20 {
            std::thread::scope(|scope| {
                for base in [100, 200, 300, 400] {
                    let lifecycle = &lifecycle;
                    scope.spawn(move || {
                        for step in 0..50 {
                            lifecycle.on_state_callback(CoreParam::SpeedFactor, base + step);
                        }
                    });
                }
            });
            assert_eq!(Some(lifecycle.status().speed_percent), *last.lock().unwrap());
        }
    }

    #[test]
    fn running_callback_never_leaves_stopped() {
        let (lifecycle, engine) = controller();
        lifecycle.on_state_callback(CoreParam::EmuState, EmuStatus::Stopped.raw());
        lifecycle.on_state_callback(CoreParam::EmuState, EmuStatus::Running.raw());
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);

        lifecycle.resume();
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert!(!engine.calls().contains(&CallOut::Resume));
    }
}
