use std::time::Instant;

use log::trace;

/// Millisecond time source for [`FpsCounter`].
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock measured from construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

pub trait FpsListener: Send {
    fn on_fps_changed(&mut self, fps: u32);
}

impl<F> FpsListener for F
where
    F: FnMut(u32) + Send,
{
    fn on_fps_changed(&mut self, fps: u32) {
        self(fps)
    }
}

/// Periodic frame-rate estimator driven by buffer swaps.
///
/// Every `period` swaps the average rate since the previous emission is
/// rounded and handed to the listener. No smoothing across periods.
pub struct FpsCounter {
    clock: Box<dyn Clock>,
    period: u32,
    frames: u32,
    last_ms: u64,
    listener: Option<Box<dyn FpsListener>>,
}

impl FpsCounter {
    pub fn new(clock: Box<dyn Clock>, period: u32) -> Self {
        let last_ms = clock.now_ms();
        Self {
            clock,
            period,
            frames: 0,
            last_ms,
            listener: None,
        }
    }

    /// Replaces the listener and restarts the measurement window.
    pub fn set_listener(&mut self, listener: Option<Box<dyn FpsListener>>, period: u32) {
        self.listener = listener;
        self.period = period;
        self.frames = 0;
        self.last_ms = self.clock.now_ms();
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    /// Counts one swap. Returns the estimate when one was emitted.
    pub fn on_flip(&mut self) -> Option<u32> {
        if self.period == 0 {
            return None;
        }
        let listener = self.listener.as_mut()?;

        self.frames += 1;
        if self.frames < self.period {
            return None;
        }

        let now = self.clock.now_ms();
        let elapsed = now.saturating_sub(self.last_ms).max(1);
        let fps = (self.frames as f32 / elapsed as f32 * 1000.0).round() as u32;
        trace!("fps: {} frames in {elapsed} ms -> {fps}", self.frames);

        listener.on_fps_changed(fps);
        self.frames = 0;
        self.last_ms = now;
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StepClock(Arc<AtomicU64>);

    impl Clock for StepClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn counter(period: u32) -> (FpsCounter, Arc<AtomicU64>) {
        let time = Arc::new(AtomicU64::new(0));
        let mut counter = FpsCounter::new(Box::new(StepClock(Arc::clone(&time))), period);
        counter.set_listener(Some(Box::new(|_fps: u32| {})), period);
        (counter, time)
    }

    #[test]
    fn emits_rounded_rate_every_period() {
        let (mut counter, time) = counter(15);
        let mut emitted = Vec::new();
        for _ in 0..30 {
            time.fetch_add(17, Ordering::SeqCst);
            if let Some(fps) = counter.on_flip() {
                emitted.push(fps);
            }
        }
        // 15 frames / 255 ms = 58.82 fps
        assert_eq!(emitted, vec![59, 59]);
    }

    #[test]
    fn disabled_without_listener_or_period() {
        let time = Arc::new(AtomicU64::new(0));
        let mut counter = FpsCounter::new(Box::new(StepClock(Arc::clone(&time))), 1);
        time.store(100, Ordering::SeqCst);
        assert_eq!(counter.on_flip(), None);

        let (mut counter, _time) = self::counter(0);
        assert_eq!(counter.on_flip(), None);
    }
}
