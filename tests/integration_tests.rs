//! Integration tests for trackpoint-midbutton
//!
//! These replay timestamped event scripts through the emulator and the
//! evdev codec. Tests that require hardware live in hardware_tests.rs.

use evdev::{EventType, InputEvent, Key, RelativeAxisType};
use std::time::{Duration, Instant};
use trackpoint_midbutton::driver::dispatch;
use trackpoint_midbutton::event::{FrameDecoder, encode};
use trackpoint_midbutton::{Button, Emulator, EmulatorState, OutputEvent, RawEvent, Timings};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn timings(left: u64, right: u64) -> Timings {
    Timings {
        left_deadline: ms(left),
        right_deadline: ms(right),
    }
}

/// Replays a script where `None` stands for an idle wakeup of the driver.
/// Returns each output together with the instant it was produced.
fn replay(
    emu: &mut Emulator,
    script: &[(u64, Option<RawEvent>)],
    t0: Instant,
) -> Vec<(u64, OutputEvent)> {
    let mut emitted = Vec::new();
    for (offset, event) in script {
        let at = t0 + ms(*offset);
        let out = match event {
            Some(ev) => emu.handle_event(*ev, at),
            None => emu.handle_timeout(at),
        };
        emitted.extend(out.into_iter().map(|o| (*offset, o)));
    }
    emitted
}

fn events_only(emitted: &[(u64, OutputEvent)]) -> Vec<OutputEvent> {
    emitted.iter().map(|(_, o)| *o).collect()
}

/// Scenario A: quick left click is flushed on release
#[test]
fn test_scenario_quick_left_click() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    let emitted = replay(
        &mut emu,
        &[
            (0, Some(RawEvent::ButtonDown(Button::Left))),
            (5, Some(RawEvent::ButtonUp(Button::Left))),
        ],
        t0,
    );
    assert_eq!(
        emitted,
        vec![(5, OutputEvent::press(Button::Left)), (5, OutputEvent::release(Button::Left))]
    );
}

/// Scenario B: left then right within the left deadline
#[test]
fn test_scenario_left_first_middle() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    let emitted = replay(
        &mut emu,
        &[
            (0, Some(RawEvent::ButtonDown(Button::Left))),
            (30, Some(RawEvent::ButtonDown(Button::Right))),
            (150, None),
            (200, Some(RawEvent::ButtonUp(Button::Left))),
            (210, Some(RawEvent::ButtonUp(Button::Right))),
        ],
        t0,
    );
    assert_eq!(
        emitted,
        vec![(30, OutputEvent::press(Button::Middle)), (200, OutputEvent::release(Button::Middle))]
    );
    assert_eq!(emu.state(), EmulatorState::Idle);
}

/// Scenario C: right then left within the right deadline
#[test]
fn test_scenario_right_first_middle() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    let emitted = replay(
        &mut emu,
        &[
            (0, Some(RawEvent::ButtonDown(Button::Right))),
            (10, Some(RawEvent::ButtonDown(Button::Left))),
            (100, Some(RawEvent::ButtonUp(Button::Right))),
        ],
        t0,
    );
    assert_eq!(
        emitted,
        vec![(10, OutputEvent::press(Button::Middle)), (100, OutputEvent::release(Button::Middle))]
    );
}

/// Scenario D: a held left button is committed at the deadline
#[test]
fn test_scenario_left_hold_times_out() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    let emitted = replay(
        &mut emu,
        &[
            (0, Some(RawEvent::ButtonDown(Button::Left))),
            (150, None),
            (170, Some(RawEvent::Move { dx: 4, dy: 1 })),
            (180, Some(RawEvent::Move { dx: 2, dy: 0 })),
        ],
        t0,
    );
    assert_eq!(
        emitted,
        vec![
            (150, OutputEvent::press(Button::Left)),
            (170, OutputEvent::Move { dx: 4, dy: 1 }),
            (180, OutputEvent::Move { dx: 2, dy: 0 }),
        ]
    );
}

/// Right press past the right deadline is an ordinary right click
#[test]
fn test_right_deadline_is_shorter() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    let emitted = replay(
        &mut emu,
        &[
            (0, Some(RawEvent::ButtonDown(Button::Right))),
            (80, Some(RawEvent::ButtonDown(Button::Left))),
            (90, Some(RawEvent::ButtonUp(Button::Left))),
            (95, Some(RawEvent::ButtonUp(Button::Right))),
        ],
        t0,
    );
    assert_eq!(
        events_only(&emitted),
        vec![
            OutputEvent::press(Button::Right),
            OutputEvent::press(Button::Left),
            OutputEvent::release(Button::Left),
            OutputEvent::release(Button::Right),
        ]
    );
}

/// Left-only activity (clicks and drags, with or without timeouts) comes
/// out exactly as it went in.
#[test]
fn test_left_only_stream_is_lossless() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    let script: Vec<(u64, Option<RawEvent>)> = vec![
        (0, Some(RawEvent::ButtonDown(Button::Left))),
        (10, Some(RawEvent::Move { dx: 1, dy: 2 })),
        (20, Some(RawEvent::Move { dx: -3, dy: 0 })),
        (40, Some(RawEvent::ButtonUp(Button::Left))),
        (60, Some(RawEvent::Move { dx: 5, dy: 5 })),
        (100, Some(RawEvent::ButtonDown(Button::Left))),
        (130, Some(RawEvent::Move { dx: 1, dy: 0 })),
        (250, None),
        (260, Some(RawEvent::Move { dx: 7, dy: -1 })),
        (400, Some(RawEvent::ButtonUp(Button::Left))),
        // Deadline passes unobserved; the release itself resolves it.
        (500, Some(RawEvent::ButtonDown(Button::Left))),
        (900, Some(RawEvent::ButtonUp(Button::Left))),
    ];
    let expected: Vec<OutputEvent> = script
        .iter()
        .filter_map(|(_, ev)| ev.map(OutputEvent::from))
        .collect();

    let emitted = replay(&mut emu, &script, t0);
    assert_eq!(events_only(&emitted), expected);
    assert_eq!(emu.state(), EmulatorState::Idle);
}

/// Motion between the two presses is absorbed entirely.
#[test]
fn test_motion_before_partner_is_dropped() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    for moves in 0..5 {
        let mut script = vec![(0, Some(RawEvent::ButtonDown(Button::Left)))];
        for i in 0..moves {
            script.push((1 + i, Some(RawEvent::Move { dx: 1, dy: -1 })));
        }
        script.push((100, Some(RawEvent::ButtonDown(Button::Right))));
        script.push((120, Some(RawEvent::ButtonUp(Button::Right))));
        script.push((130, Some(RawEvent::ButtonUp(Button::Left))));

        let start = t0 + ms(1000 * moves);
        let emitted = replay(&mut emu, &script, start);
        assert_eq!(
            events_only(&emitted),
            vec![OutputEvent::press(Button::Middle), OutputEvent::release(Button::Middle)],
            "with {moves} moves"
        );
    }
}

/// Every synthesized middle press gets exactly one release, whichever
/// button goes up first.
#[test]
fn test_middle_press_release_balanced() {
    let orders = [
        [Button::Left, Button::Right],
        [Button::Right, Button::Left],
    ];
    for first in [Button::Left, Button::Right] {
        for release in orders {
            let t0 = Instant::now();
            let mut emu = Emulator::new(timings(150, 60));
            let partner = first.partner().unwrap();
            let emitted = replay(
                &mut emu,
                &[
                    (0, Some(RawEvent::ButtonDown(first))),
                    (20, Some(RawEvent::ButtonDown(partner))),
                    (30, Some(RawEvent::ButtonDown(first))),
                    (300, Some(RawEvent::ButtonUp(release[0]))),
                    (310, Some(RawEvent::ButtonUp(release[1]))),
                    (320, Some(RawEvent::ButtonUp(release[1]))),
                ],
                t0,
            );
            let count = |wanted: OutputEvent| emitted.iter().filter(|(_, o)| *o == wanted).count();
            let presses = count(OutputEvent::press(Button::Middle));
            let releases = count(OutputEvent::release(Button::Middle));
            assert_eq!((presses, releases), (1, 1));
            assert_eq!(emitted.len(), 2);
        }
    }
}

/// Repeated downs for a held button emit nothing extra
#[test]
fn test_duplicate_down_is_idempotent() {
    let t0 = Instant::now();
    let mut emu = Emulator::new(timings(150, 60));
    let emitted = replay(
        &mut emu,
        &[
            (0, Some(RawEvent::ButtonDown(Button::Right))),
            (5, Some(RawEvent::ButtonDown(Button::Right))),
            (10, Some(RawEvent::ButtonDown(Button::Right))),
            (20, Some(RawEvent::ButtonUp(Button::Right))),
        ],
        t0,
    );
    assert_eq!(
        events_only(&emitted),
        vec![OutputEvent::press(Button::Right), OutputEvent::release(Button::Right)]
    );
}

fn key(code: Key, value: i32) -> InputEvent {
    InputEvent::new(EventType::KEY, code.code(), value)
}

fn rel(axis: RelativeAxisType, value: i32) -> InputEvent {
    InputEvent::new(EventType::RELATIVE, axis.0, value)
}

fn syn() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

/// Raw evdev frames in, evdev frames out
#[test]
fn test_evdev_pipeline_middle_click() {
    let t0 = Instant::now();
    let raw = [
        (0, key(Key::BTN_LEFT, 1)),
        (0, syn()),
        (5, rel(RelativeAxisType::REL_X, 1)),
        (5, rel(RelativeAxisType::REL_Y, 1)),
        (5, syn()),
        (25, key(Key::BTN_RIGHT, 1)),
        (25, syn()),
        (40, rel(RelativeAxisType::REL_Y, -6)),
        (40, syn()),
        (90, key(Key::BTN_LEFT, 0)),
        (90, key(Key::BTN_RIGHT, 0)),
        (90, syn()),
    ];

    let mut decoder = FrameDecoder::new();
    let mut batch = Vec::new();
    for (offset, ev) in &raw {
        if let Some(frame) = decoder.push(ev) {
            batch.extend(frame.into_iter().map(|e| (e, t0 + ms(*offset))));
        }
    }

    let mut emu = Emulator::new(timings(150, 60));
    let out = dispatch(&mut emu, batch);
    let encoded: Vec<(u16, u16, i32)> = encode(&out)
        .iter()
        .map(|ev| (ev.event_type().0, ev.code(), ev.value()))
        .collect();

    assert_eq!(
        encoded,
        vec![
            (EventType::KEY.0, Key::BTN_MIDDLE.code(), 1),
            (EventType::SYNCHRONIZATION.0, 0, 0),
            (EventType::RELATIVE.0, RelativeAxisType::REL_Y.0, -6),
            (EventType::SYNCHRONIZATION.0, 0, 0),
            (EventType::KEY.0, Key::BTN_MIDDLE.code(), 0),
            (EventType::SYNCHRONIZATION.0, 0, 0),
        ]
    );
}

/// The default settings file parses into the default timings
#[test]
fn test_settings_toml_format() {
    let settings_toml = r#"
left_deadline_ms = 150
right_deadline_ms = 60
device_names = ["trackpoint", "SYNA30B4:00 06CB:CE09"]
"#;
    let settings =
        trackpoint_midbutton::settings::Settings::parse(settings_toml).expect("Should parse TOML");
    assert_eq!(settings.timings().unwrap(), Timings::default());
}
