//! Physical gamepads via `gilrs`, fed through the bridge's digitizers.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use gilrs::ff::{BaseEffect, BaseEffectType, Effect, EffectBuilder, Replay, Ticks};
use gilrs::{Axis, Button, EventType, GamepadId, Gilrs};
use log::{debug, info, warn};

use ultra_core::input::{
    AxisDigitizer, AxisRange, ControllerDigitizer, HalfAxis, InputCode, InputMap, MapTarget,
    MotionSource, N64Button, NUM_CONTROLLERS, Vibrator, VibratorSlots,
};

/// Axis numbering used for [`InputCode::axis`].
const PAD_AXES: [Axis; 6] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::RightStickX,
    Axis::RightStickY,
    Axis::LeftZ,
    Axis::RightZ,
];

const RUMBLE_MAGNITUDE: u16 = 48_000;

/// Stable button numbering used for [`InputCode::button`].
pub fn button_code(button: Button) -> Option<InputCode> {
    let key = match button {
        Button::South => 0,
        Button::East => 1,
        Button::North => 2,
        Button::West => 3,
        Button::LeftTrigger => 4,
        Button::LeftTrigger2 => 5,
        Button::RightTrigger => 6,
        Button::RightTrigger2 => 7,
        Button::Select => 8,
        Button::Start => 9,
        Button::Mode => 10,
        Button::LeftThumb => 11,
        Button::RightThumb => 12,
        Button::DPadUp => 13,
        Button::DPadDown => 14,
        Button::DPadLeft => 15,
        Button::DPadRight => 16,
        _ => return None,
    };
    Some(InputCode::button(key))
}

fn bind_button(map: &mut InputMap, button: Button, target: N64Button) {
    if let Some(code) = button_code(button) {
        map.bind(code, MapTarget::Button(target));
    }
}

/// Xbox-style layout: left stick drives the analog stick, right stick the C
/// buttons.
pub fn default_map() -> InputMap {
    let mut map = InputMap::new();
    bind_button(&mut map, Button::South, N64Button::A);
    bind_button(&mut map, Button::West, N64Button::B);
    bind_button(&mut map, Button::LeftTrigger2, N64Button::Z);
    bind_button(&mut map, Button::RightTrigger2, N64Button::Z);
    bind_button(&mut map, Button::Start, N64Button::Start);
    bind_button(&mut map, Button::LeftTrigger, N64Button::L);
    bind_button(&mut map, Button::RightTrigger, N64Button::R);
    bind_button(&mut map, Button::DPadUp, N64Button::DpadUp);
    bind_button(&mut map, Button::DPadDown, N64Button::DpadDown);
    bind_button(&mut map, Button::DPadLeft, N64Button::DpadLeft);
    bind_button(&mut map, Button::DPadRight, N64Button::DpadRight);

    map.bind(InputCode::axis(0, true), MapTarget::Analog(HalfAxis::Right))
        .bind(InputCode::axis(0, false), MapTarget::Analog(HalfAxis::Left))
        .bind(InputCode::axis(1, false), MapTarget::Analog(HalfAxis::Up))
        .bind(InputCode::axis(1, true), MapTarget::Analog(HalfAxis::Down))
        .bind(InputCode::axis(2, true), MapTarget::Button(N64Button::CRight))
        .bind(InputCode::axis(2, false), MapTarget::Button(N64Button::CLeft))
        .bind(InputCode::axis(3, false), MapTarget::Button(N64Button::CUp))
        .bind(InputCode::axis(3, true), MapTarget::Button(N64Button::CDown));
    map
}

struct PadAxes<'a>(gilrs::Gamepad<'a>);

impl MotionSource for PadAxes<'_> {
    fn axis_value(&self, axis: u32) -> f32 {
        let Some(&which) = PAD_AXES.get(axis as usize) else {
            return 0.0;
        };
        let value = self.0.value(which);
        // gilrs reports up as positive; motion codes count y downward.
        match which {
            Axis::LeftStickY | Axis::RightStickY => -value,
            _ => value,
        }
    }

    fn motion_range(&self, axis: u32) -> Option<AxisRange> {
        ((axis as usize) < PAD_AXES.len()).then_some(AxisRange {
            min: -1.0,
            range: 2.0,
        })
    }
}

pub enum RumbleRequest {
    Start { port: usize, duration: Duration },
    Stop { port: usize },
}

struct PortVibrator {
    port: usize,
    tx: Sender<RumbleRequest>,
}

impl Vibrator for PortVibrator {
    fn vibrate(&self, duration: Duration) {
        let _ = self.tx.send(RumbleRequest::Start {
            port: self.port,
            duration,
        });
    }

    fn cancel(&self) {
        let _ = self.tx.send(RumbleRequest::Stop { port: self.port });
    }
}

/// Vibrators for every port; requests are applied by [`GamepadInput::poll`]
/// on the thread that owns `gilrs`.
pub fn vibrators() -> (VibratorSlots, Receiver<RumbleRequest>) {
    let (tx, rx) = unbounded();
    let mut slots = VibratorSlots::new();
    for port in 0..NUM_CONTROLLERS {
        slots.bind(
            port,
            Box::new(PortVibrator {
                port,
                tx: tx.clone(),
            }),
        );
    }
    (slots, rx)
}

pub struct GamepadInput {
    gilrs: Gilrs,
    ports: [Option<GamepadId>; NUM_CONTROLLERS],
    pads: Vec<ControllerDigitizer>,
    axes: AxisDigitizer,
    rumble: Receiver<RumbleRequest>,
    effects: [Option<Effect>; NUM_CONTROLLERS],
}

impl GamepadInput {
    /// `pads[i]` drives controller port `i`.
    pub fn new(pads: Vec<ControllerDigitizer>, rumble: Receiver<RumbleRequest>) -> Option<Self> {
        let gilrs = match Gilrs::new() {
            Ok(gilrs) => gilrs,
            Err(e) => {
                warn!("gamepads unavailable: {e}");
                return None;
            }
        };

        let mut axes = AxisDigitizer::new();
        let mut codes: Vec<InputCode> =
            pads.iter().flat_map(|pad| pad.map().axis_codes()).collect();
        codes.sort_by_key(|code| std::cmp::Reverse(code.raw()));
        codes.dedup();
        axes.set_input_code_filter(&codes);

        let mut input = Self {
            gilrs,
            ports: [None; NUM_CONTROLLERS],
            pads,
            axes,
            rumble,
            effects: Default::default(),
        };
        let connected: Vec<GamepadId> = input.gilrs.gamepads().map(|(id, _)| id).collect();
        for id in connected {
            input.attach(id);
        }
        Some(input)
    }

    fn attach(&mut self, id: GamepadId) {
        if self.ports.contains(&Some(id)) {
            return;
        }
        let Some(port) = self.ports.iter().position(Option::is_none) else {
            return;
        };
        self.ports[port] = Some(id);
        info!("gamepad '{}' on port {}", self.gilrs.gamepad(id).name(), port + 1);
    }

    fn detach(&mut self, id: GamepadId) {
        for (port, slot) in self.ports.iter_mut().enumerate() {
            if *slot == Some(id) {
                *slot = None;
                self.effects[port] = None;
                info!("gamepad left port {}", port + 1);
            }
        }
    }

    fn port_of(&self, id: GamepadId) -> Option<usize> {
        self.ports.iter().position(|slot| *slot == Some(id))
    }

    /// Drains gamepad events into the digitizers and applies pending rumble.
    pub fn poll(&mut self) {
        while let Some(event) = self.gilrs.next_event() {
            let id = event.id;
            match event.event {
                EventType::Connected => self.attach(id),
                EventType::Disconnected => self.detach(id),
                EventType::ButtonPressed(button, _) | EventType::ButtonReleased(button, _) => {
                    let pressed = matches!(event.event, EventType::ButtonPressed(..));
                    let (Some(port), Some(code)) = (self.port_of(id), button_code(button)) else {
                        continue;
                    };
                    if let Some(pad) = self.pads.get_mut(port) {
                        pad.on_button(code, pressed);
                    }
                }
                EventType::AxisChanged(..) => {
                    let Some(port) = self.port_of(id) else {
                        continue;
                    };
                    let inputs = self.axes.digitize(&PadAxes(self.gilrs.gamepad(id)));
                    if let Some(pad) = self.pads.get_mut(port) {
                        pad.on_input(&inputs);
                    }
                }
                _ => {}
            }
        }

        while let Ok(request) = self.rumble.try_recv() {
            self.apply_rumble(request);
        }
    }

    fn apply_rumble(&mut self, request: RumbleRequest) {
        match request {
            RumbleRequest::Start { port, duration } => {
                let Some(Some(id)) = self.ports.get(port).copied() else {
                    return;
                };
                if !self.gilrs.gamepad(id).is_ff_supported() {
                    return;
                }
                let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
                let effect = EffectBuilder::new()
                    .add_effect(BaseEffect {
                        kind: BaseEffectType::Strong {
                            magnitude: RUMBLE_MAGNITUDE,
                        },
                        scheduling: Replay {
                            play_for: Ticks::from_ms(ms),
                            ..Default::default()
                        },
                        ..Default::default()
                    })
                    .gamepads(&[id])
                    .finish(&mut self.gilrs);
                match effect.and_then(|effect| effect.play().map(|()| effect)) {
                    Ok(effect) => self.effects[port] = Some(effect),
                    Err(e) => debug!("rumble on port {} failed: {e}", port + 1),
                }
            }
            RumbleRequest::Stop { port } => {
                if let Some(effect) = self.effects.get_mut(port).and_then(Option::take) {
                    let _ = effect.stop();
                }
            }
        }
    }
}
