use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use crate::engine::Engine;

pub const NUM_CONTROLLERS: usize = 4;
pub const NUM_BUTTONS: usize = 16;

/// Size of the default axis filter: 64 axes, both directions.
pub const DEFAULT_NUM_INPUTS: usize = 128;

/// Length of a single rumble pulse; the engine re-triggers it while active.
pub const VIBRATE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Unified code for digital and analog inputs.
///
/// Buttons use their non-negative key code. Each half of an analog axis gets
/// its own negative code: `-(axis * 2 + 1)` for the positive direction and
/// `-(axis * 2 + 2)` for the negative one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputCode(i32);

impl InputCode {
    pub const fn button(key: u16) -> Self {
        Self(key as i32)
    }

    pub const fn axis(axis: u32, positive: bool) -> Self {
        Self(-((axis as i32) * 2 + if positive { 1 } else { 2 }))
    }

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_axis(self) -> bool {
        self.0 < 0
    }

    pub fn axis_index(self) -> Option<u32> {
        self.is_axis().then(|| ((-self.0 - 1) / 2) as u32)
    }

    /// Direction an axis code reads; `false` for buttons.
    pub fn is_positive(self) -> bool {
        self.is_axis() && (-self.0) % 2 == 1
    }
}

/// Declared physical range of an analog axis.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AxisRange {
    pub min: f32,
    pub range: f32,
}

/// Maps a raw axis sample into `[-1, 1]`.
///
/// Without a usable declared range the raw value passes through unmodified.
pub fn normalize(raw: f32, range: Option<AxisRange>) -> f32 {
    match range {
        Some(r) if r.range > 0.0 && r.range.is_finite() => {
            (2.0 * (raw - r.min) / r.range - 1.0).clamp(-1.0, 1.0)
        }
        _ => raw,
    }
}

/// Pull strength of `value` in the direction `code` reads.
pub fn gate(code: InputCode, value: f32) -> f32 {
    if code.is_positive() == (value > 0.0) {
        value.abs()
    } else {
        0.0
    }
}

/// One analog motion event from a physical device.
pub trait MotionSource {
    fn axis_value(&self, axis: u32) -> f32;
    fn motion_range(&self, axis: u32) -> Option<AxisRange>;
}

/// Resolves motion events into per-direction strengths for a set of codes.
#[derive(Clone, Debug)]
pub struct AxisDigitizer {
    codes: Vec<InputCode>,
}

impl AxisDigitizer {
    pub fn new() -> Self {
        Self {
            codes: (0..DEFAULT_NUM_INPUTS as i32)
                .map(|i| InputCode::from_raw(-(i + 1)))
                .collect(),
        }
    }

    /// Replaces the codes read on every event. Button codes are ignored.
    pub fn set_input_code_filter(&mut self, codes: &[InputCode]) {
        self.codes = codes.iter().copied().filter(|c| c.is_axis()).collect();
    }

    pub fn input_codes(&self) -> &[InputCode] {
        &self.codes
    }

    pub fn digitize(&self, event: &impl MotionSource) -> Vec<(InputCode, f32)> {
        self.codes
            .iter()
            .filter_map(|&code| {
                let axis = code.axis_index()?;
                let value = normalize(event.axis_value(axis), event.motion_range(axis));
                Some((code, gate(code, value)))
            })
            .collect()
    }
}

impl Default for AxisDigitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Clips a stick displacement to the octagonal gate of an N64 controller.
///
/// The octagon has its vertices at `half_width` on the axes and diagonals.
/// Points inside it come back unchanged.
pub fn constrain_to_octagon(dx: i32, dy: i32, half_width: i32) -> (i32, i32) {
    let dc = half_width as f32;
    let da = dc * 0.5f32.sqrt();
    let sign_x = if dx < 0 { -1.0 } else { 1.0 };
    let sign_y = if dy < 0 { -1.0 } else { 1.0 };
    let (fx, fy) = (dx as f32, dy as f32);

    // A ray along a diagonal meets the edges only at their shared vertex.
    if dx.unsigned_abs() == dy.unsigned_abs() {
        return if fx.abs() > da {
            ((sign_x * da) as i32, (sign_y * da) as i32)
        } else {
            (dx, dy)
        };
    }

    let edge = if sign_x * fx > sign_y * fy {
        [sign_x * dc, 0.0, sign_x * da, sign_y * da]
    } else {
        [0.0, sign_y * dc, sign_x * da, sign_y * da]
    };

    segments_cross([0.0, 0.0, fx, fy], edge).unwrap_or((dx, dy))
}

/// Intersection of segment `a` (from its first point) with segment `b`,
/// truncated to integers. `b`'s far endpoint is excluded.
fn segments_cross(a: [f32; 4], b: [f32; 4]) -> Option<(i32, i32)> {
    let (p_x, p_y) = (a[0], a[1]);
    let (v1_x, v1_y) = (a[2] - a[0], a[3] - a[1]);
    let (q_x, q_y) = (b[0], b[1]);
    let (v2_x, v2_y) = (b[2] - b[0], b[3] - b[1]);

    let div = -v2_x * v1_y + v1_x * v2_y;
    if div == 0.0 {
        return None;
    }

    let s = (-v1_y * (p_x - q_x) + v1_x * (p_y - q_y)) / div;
    let t = (v2_x * (p_y - q_y) - v2_y * (p_x - q_x)) / div;

    if (0.0..1.0).contains(&s) && (0.0..=1.0).contains(&t) {
        Some(((p_x + t * v1_x) as i32, (p_y + t * v1_y) as i32))
    } else {
        None
    }
}

/// Button slots in the order the engine expects them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum N64Button {
    DpadRight = 0,
    DpadLeft,
    DpadDown,
    DpadUp,
    Start,
    Z,
    B,
    A,
    CRight,
    CLeft,
    CDown,
    CUp,
    R,
    L,
    Reserved1,
    Reserved2,
}

impl N64Button {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Fixed-shape per-controller state handed to the engine.
#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct ControllerSnapshot {
    pub buttons: [bool; NUM_BUTTONS],
    pub axis_x: f32,
    pub axis_y: f32,
}

impl ControllerSnapshot {
    pub fn pressed(&self, button: N64Button) -> bool {
        self.buttons[button.index()]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HalfAxis {
    Right,
    Left,
    Up,
    Down,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MapTarget {
    Button(N64Button),
    Analog(HalfAxis),
}

/// Input code → controller element assignments.
#[derive(Clone, Debug)]
pub struct InputMap {
    targets: HashMap<InputCode, MapTarget>,
    press_threshold: f32,
}

impl InputMap {
    pub fn new() -> Self {
        Self {
            targets: HashMap::new(),
            press_threshold: 0.5,
        }
    }

    pub fn bind(&mut self, code: InputCode, target: MapTarget) -> &mut Self {
        self.targets.insert(code, target);
        self
    }

    pub fn unbind(&mut self, code: InputCode) {
        self.targets.remove(&code);
    }

    pub fn target(&self, code: InputCode) -> Option<MapTarget> {
        self.targets.get(&code).copied()
    }

    /// Strength at which an analog input mapped to a button counts as pressed.
    pub fn set_press_threshold(&mut self, threshold: f32) {
        self.press_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn press_threshold(&self) -> f32 {
        self.press_threshold
    }

    /// Codes the axis digitizer needs to read for this map.
    pub fn axis_codes(&self) -> Vec<InputCode> {
        let mut codes: Vec<_> = self.targets.keys().copied().filter(|c| c.is_axis()).collect();
        codes.sort_unstable_by(|a, b| b.cmp(a));
        codes
    }
}

impl Default for InputMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds and forwards the snapshot for one controller index.
pub struct ControllerDigitizer {
    index: usize,
    engine: Arc<dyn Engine>,
    map: InputMap,
    buttons: [bool; NUM_BUTTONS],
    // Indexed by HalfAxis.
    analog: [f32; 4],
    octagon: Option<i32>,
}

impl ControllerDigitizer {
    pub fn new(index: usize, engine: Arc<dyn Engine>, map: InputMap) -> Self {
        Self {
            index,
            engine,
            map,
            buttons: [false; NUM_BUTTONS],
            analog: [0.0; 4],
            octagon: None,
        }
    }

    /// Shapes the stick through [`constrain_to_octagon`] at `half_width`
    /// engine units.
    pub fn with_octagon(mut self, half_width: i32) -> Self {
        self.octagon = (half_width > 0).then_some(half_width);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn map(&self) -> &InputMap {
        &self.map
    }

    pub fn set_map(&mut self, map: InputMap) {
        self.map = map;
        self.buttons = [false; NUM_BUTTONS];
        self.analog = [0.0; 4];
    }

    /// Digital key event.
    pub fn on_button(&mut self, code: InputCode, pressed: bool) -> ControllerSnapshot {
        self.apply(code, if pressed { 1.0 } else { 0.0 });
        self.forward()
    }

    /// Batch of strengths from one input event, as produced by
    /// [`AxisDigitizer::digitize`].
    pub fn on_input(&mut self, inputs: &[(InputCode, f32)]) -> ControllerSnapshot {
        for &(code, strength) in inputs {
            self.apply(code, strength);
        }
        self.forward()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let x = self.analog[HalfAxis::Right as usize] - self.analog[HalfAxis::Left as usize];
        let y = self.analog[HalfAxis::Up as usize] - self.analog[HalfAxis::Down as usize];
        let (axis_x, axis_y) = match self.octagon {
            Some(half_width) => {
                let scale = half_width as f32;
                let (cx, cy) =
                    constrain_to_octagon((x * scale) as i32, (y * scale) as i32, half_width);
                (cx as f32 / scale, cy as f32 / scale)
            }
            None => (x, y),
        };

        ControllerSnapshot {
            buttons: self.buttons,
            axis_x: axis_x.clamp(-1.0, 1.0),
            axis_y: axis_y.clamp(-1.0, 1.0),
        }
    }

    fn apply(&mut self, code: InputCode, strength: f32) {
        match self.map.target(code) {
            Some(MapTarget::Button(button)) => {
                self.buttons[button.index()] = strength >= self.map.press_threshold();
            }
            Some(MapTarget::Analog(half)) => {
                self.analog[half as usize] = strength.clamp(0.0, 1.0);
            }
            None => trace!("input: unmapped code {} on controller {}", code.raw(), self.index),
        }
    }

    fn forward(&self) -> ControllerSnapshot {
        let snapshot = self.snapshot();
        self.engine.set_controller_state(self.index, &snapshot);
        snapshot
    }
}

pub trait Vibrator: Send + Sync {
    fn vibrate(&self, duration: Duration);
    fn cancel(&self);
}

/// Controller index → bound vibration device.
pub trait VibratorRegistry: Send + Sync {
    fn vibrator(&self, controller: usize) -> Option<&dyn Vibrator>;
}

/// Registry with no devices bound; every rumble is a no-op.
#[derive(Debug, Default)]
pub struct NoVibrators;

impl VibratorRegistry for NoVibrators {
    fn vibrator(&self, _controller: usize) -> Option<&dyn Vibrator> {
        None
    }
}

/// Fixed table of vibrators, one optional device per controller index.
#[derive(Default)]
pub struct VibratorSlots {
    slots: [Option<Box<dyn Vibrator>>; NUM_CONTROLLERS],
}

impl VibratorSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, controller: usize, vibrator: Box<dyn Vibrator>) {
        if let Some(slot) = self.slots.get_mut(controller) {
            *slot = Some(vibrator);
        }
    }
}

impl VibratorRegistry for VibratorSlots {
    fn vibrator(&self, controller: usize) -> Option<&dyn Vibrator> {
        self.slots.get(controller)?.as_deref()
    }
}

pub fn rumble(registry: &dyn VibratorRegistry, controller: usize, active: bool) {
    let Some(vibrator) = registry.vibrator(controller) else {
        return;
    };
    debug!("input: rumble controller {controller} {}", if active { "on" } else { "off" });
    if active {
        vibrator.vibrate(VIBRATE_TIMEOUT);
    } else {
        vibrator.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_codes_decode_to_axis_and_direction() {
        let pos = InputCode::axis(3, true);
        let neg = InputCode::axis(3, false);
        assert_eq!(pos.raw(), -7);
        assert_eq!(neg.raw(), -8);
        assert_eq!(pos.axis_index(), Some(3));
        assert_eq!(neg.axis_index(), Some(3));
        assert!(pos.is_positive());
        assert!(!neg.is_positive());
        assert_eq!(InputCode::button(96).axis_index(), None);
    }

    #[test]
    fn default_filter_covers_both_directions_of_64_axes() {
        let digitizer = AxisDigitizer::new();
        let codes = digitizer.input_codes();
        assert_eq!(codes.len(), DEFAULT_NUM_INPUTS);
        assert_eq!(codes[0], InputCode::axis(0, true));
        assert_eq!(codes[1], InputCode::axis(0, false));
        assert_eq!(codes[127], InputCode::axis(63, false));
    }

    #[test]
    fn undeclared_range_passes_raw_value_through() {
        assert_eq!(normalize(0.25, None), 0.25);
        let range = AxisRange {
            min: 0.0,
            range: 255.0,
        };
        assert_eq!(normalize(0.0, Some(range)), -1.0);
        assert_eq!(normalize(255.0, Some(range)), 1.0);
    }

    #[test]
    fn gating_splits_one_axis_into_two_strengths() {
        let pos = InputCode::axis(0, true);
        let neg = InputCode::axis(0, false);
        assert_eq!(gate(pos, 0.6), 0.6);
        assert_eq!(gate(neg, 0.6), 0.0);
        assert_eq!(gate(pos, -0.4), 0.0);
        assert_eq!(gate(neg, -0.4), 0.4);
    }

    #[test]
    fn octagon_keeps_inner_points_and_clips_outer_ones() {
        assert_eq!(constrain_to_octagon(0, 0, 80), (0, 0));
        assert_eq!(constrain_to_octagon(10, -20, 80), (10, -20));
        assert_eq!(constrain_to_octagon(160, 0, 80), (80, 0));
        assert_eq!(constrain_to_octagon(0, -160, 80), (0, -80));
    }

    #[test]
    fn diagonal_pull_stops_at_the_corner() {
        assert_eq!(constrain_to_octagon(80, 80, 80), (56, 56));
        assert_eq!(constrain_to_octagon(200, 200, 80), (56, 56));
        assert_eq!(constrain_to_octagon(57, 57, 80), (56, 56));
        assert_eq!(constrain_to_octagon(-57, 57, 80), (-56, 56));
        assert_eq!(constrain_to_octagon(56, -56, 80), (56, -56));
    }

    type Pulses = Arc<std::sync::Mutex<Vec<Option<Duration>>>>;

    struct RecordingVibrator(Pulses);

    impl Vibrator for RecordingVibrator {
        fn vibrate(&self, duration: Duration) {
            self.0.lock().unwrap().push(Some(duration));
        }

        fn cancel(&self) {
            self.0.lock().unwrap().push(None);
        }
    }

    #[test]
    fn rumble_pulses_bound_device_only() {
        rumble(&NoVibrators, 0, true);

        let pulses = Pulses::default();
        let mut slots = VibratorSlots::new();
        slots.bind(1, Box::new(RecordingVibrator(Arc::clone(&pulses))));
        rumble(&slots, 0, true);
        rumble(&slots, 7, true);
        rumble(&slots, 1, true);
        rumble(&slots, 1, false);

        assert_eq!(*pulses.lock().unwrap(), vec![Some(VIBRATE_TIMEOUT), None]);
    }
}
