use std::sync::Arc;

use ultra_core::engine::{CallOut, StubEngine};
use ultra_core::input::{
    AxisDigitizer, AxisRange, ControllerDigitizer, HalfAxis, InputCode, InputMap, MapTarget,
    MotionSource, N64Button, constrain_to_octagon, normalize,
};

const DIAGONAL_COS: f32 = 0.923_879_5; // cos(22.5°)
const DIAGONAL_SIN: f32 = 0.382_683_43; // sin(22.5°)

fn inside_octagon(x: i32, y: i32, half_width: i32) -> bool {
    let (x, y) = ((x as f32).abs(), (y as f32).abs());
    let apothem = half_width as f32 * DIAGONAL_COS;
    let slack = 1e-3 * half_width as f32;
    x * DIAGONAL_COS + y * DIAGONAL_SIN <= apothem + slack
        && x * DIAGONAL_SIN + y * DIAGONAL_COS <= apothem + slack
}

#[test]
fn normalized_axis_stays_in_unit_range() {
    let ranges = [
        AxisRange {
            min: -1.0,
            range: 2.0,
        },
        AxisRange {
            min: 0.0,
            range: 255.0,
        },
        AxisRange {
            min: -32768.0,
            range: 65535.0,
        },
    ];
    for range in ranges {
        for step in -20..=120 {
            let raw = range.min + range.range * step as f32 / 100.0;
            let v = normalize(raw, Some(range));
            assert!((-1.0..=1.0).contains(&v), "{raw} in {range:?} -> {v}");
        }
    }
}

#[test]
fn centered_stick_stays_centered() {
    for half_width in [1, 40, 80, 127] {
        assert_eq!(constrain_to_octagon(0, 0, half_width), (0, 0));
    }
}

#[test]
fn octagon_boundary_is_never_pierced() {
    let half_width = 80;
    for dx in (-200..=200).step_by(7) {
        for dy in (-200..=200).step_by(5) {
            let (x, y) = constrain_to_octagon(dx, dy, half_width);
            assert!(
                inside_octagon(x, y, half_width),
                "({dx}, {dy}) -> ({x}, {y}) escapes the gate"
            );
            // Clipping only ever pulls the stick toward the center.
            assert!(x.abs() <= dx.abs() && y.abs() <= dy.abs());
            assert!(x.signum() * dx.signum() >= 0 && y.signum() * dy.signum() >= 0);
        }
    }
}

#[test]
fn octagon_clips_along_the_ray() {
    let (x, y) = constrain_to_octagon(200, 100, 80);
    // Point lies on the edge between (80, 0) and (56.57, 56.57).
    assert!((60..=70).contains(&x), "x = {x}");
    assert_eq!(y, x / 2);
}

struct Event {
    values: Vec<f32>,
    ranges: Vec<Option<AxisRange>>,
}

impl MotionSource for Event {
    fn axis_value(&self, axis: u32) -> f32 {
        self.values.get(axis as usize).copied().unwrap_or(0.0)
    }

    fn motion_range(&self, axis: u32) -> Option<AxisRange> {
        self.ranges.get(axis as usize).copied().flatten()
    }
}

fn stick_map() -> InputMap {
    let mut map = InputMap::new();
    map.bind(InputCode::axis(0, true), MapTarget::Analog(HalfAxis::Right))
        .bind(InputCode::axis(0, false), MapTarget::Analog(HalfAxis::Left))
        .bind(InputCode::axis(1, false), MapTarget::Analog(HalfAxis::Up))
        .bind(InputCode::axis(1, true), MapTarget::Analog(HalfAxis::Down))
        .bind(InputCode::axis(2, true), MapTarget::Button(N64Button::Z))
        .bind(InputCode::button(96), MapTarget::Button(N64Button::A));
    map
}

#[test]
fn motion_event_becomes_snapshot_on_the_engine() {
    let engine = Arc::new(StubEngine::default());
    let map = stick_map();
    let mut axes = AxisDigitizer::new();
    axes.set_input_code_filter(&map.axis_codes());
    assert_eq!(axes.input_codes().len(), 5);

    let mut pad = ControllerDigitizer::new(1, engine.clone(), map);
    let range = Some(AxisRange {
        min: 0.0,
        range: 200.0,
    });
    let event = Event {
        // x = +0.5, y = -0.25 (up), trigger fully pulled
        values: vec![150.0, 75.0, 1.0],
        ranges: vec![range, range, None],
    };

    let snapshot = pad.on_input(&axes.digitize(&event));
    assert_eq!(snapshot.axis_x, 0.5);
    assert_eq!(snapshot.axis_y, 0.25);
    assert!(snapshot.pressed(N64Button::Z));
    assert!(!snapshot.pressed(N64Button::A));

    let snapshot = pad.on_button(InputCode::button(96), true);
    assert!(snapshot.pressed(N64Button::A));
    assert_eq!(snapshot.axis_x, 0.5);

    let forwarded: Vec<_> = engine
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            CallOut::ControllerState(index, snapshot) => Some((index, snapshot)),
            _ => None,
        })
        .collect();
    assert_eq!(forwarded.len(), 2);
    assert!(forwarded.iter().all(|(index, _)| *index == 1));
    assert_eq!(forwarded[1].1, snapshot);
}

#[test]
fn opposite_directions_do_not_cancel() {
    let engine = Arc::new(StubEngine::default());
    let mut pad = ControllerDigitizer::new(0, engine, stick_map());

    let left = pad.on_input(&[
        (InputCode::axis(0, true), 0.0),
        (InputCode::axis(0, false), 0.8),
    ]);
    assert!((left.axis_x + 0.8).abs() < 1e-6);

    let released = pad.on_input(&[(InputCode::axis(0, false), 0.0)]);
    assert_eq!(released.axis_x, 0.0);
}

#[test]
fn octagon_shaping_limits_full_diagonal_pull() {
    let engine = Arc::new(StubEngine::default());
    let mut pad = ControllerDigitizer::new(0, engine, stick_map()).with_octagon(80);

    let snapshot = pad.on_input(&[
        (InputCode::axis(0, true), 1.0),
        (InputCode::axis(1, true), 0.6),
    ]);
    let (x, y) = ((snapshot.axis_x * 80.0) as i32, (snapshot.axis_y * 80.0) as i32);
    assert!(inside_octagon(x, y, 80), "({x}, {y})");
    assert!(snapshot.axis_x < 1.0);
    assert!(snapshot.axis_y < 0.0);
}

#[test]
fn full_diagonal_pull_lands_on_the_corner() {
    let engine = Arc::new(StubEngine::default());
    let mut pad = ControllerDigitizer::new(0, engine, stick_map()).with_octagon(80);

    let snapshot = pad.on_input(&[
        (InputCode::axis(0, true), 1.0),
        (InputCode::axis(1, false), 1.0),
    ]);
    assert_eq!(snapshot.axis_x, 56.0 / 80.0);
    assert_eq!(snapshot.axis_y, 56.0 / 80.0);

    for (dx, dy) in [(80, 80), (-120, 120), (57, -57), (-200, -200)] {
        let (x, y) = constrain_to_octagon(dx, dy, 80);
        assert!(inside_octagon(x, y, 80), "({dx}, {dy}) -> ({x}, {y})");
    }
}
