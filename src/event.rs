//! Pointer event vocabulary and evdev translation
//!
//! The emulator only understands a small vocabulary: left/right button
//! presses and releases plus relative motion. Everything else a device
//! reports is carried along untouched as a [`RawCode`].

use evdev::{
    EventType, InputEvent, InputEventKind, Key, MiscType, RelativeAxisType, Synchronization,
};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Left,
    Right,
    Middle,
}

impl Button {
    pub fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::BTN_LEFT => Some(Self::Left),
            Key::BTN_RIGHT => Some(Self::Right),
            Key::BTN_MIDDLE => Some(Self::Middle),
            _ => None,
        }
    }

    pub fn key(self) -> Key {
        match self {
            Self::Left => Key::BTN_LEFT,
            Self::Right => Key::BTN_RIGHT,
            Self::Middle => Key::BTN_MIDDLE,
        }
    }

    /// The physical button paired with this one for middle emulation.
    pub fn partner(self) -> Option<Self> {
        match self {
            Self::Left => Some(Self::Right),
            Self::Right => Some(Self::Left),
            Self::Middle => None,
        }
    }
}

/// An evdev event outside the emulator's vocabulary, kept verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCode {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

impl From<&InputEvent> for RawCode {
    fn from(ev: &InputEvent) -> Self {
        Self {
            event_type: ev.event_type().0,
            code: ev.code(),
            value: ev.value(),
        }
    }
}

impl From<RawCode> for InputEvent {
    fn from(raw: RawCode) -> Self {
        InputEvent::new(EventType(raw.event_type), raw.code, raw.value)
    }
}

/// One input event as read from the source device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    ButtonDown(Button),
    ButtonUp(Button),
    Move { dx: i32, dy: i32 },
    Other(RawCode),
}

/// One event to be written to the virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Button { button: Button, pressed: bool },
    Move { dx: i32, dy: i32 },
    Passthrough(RawCode),
}

impl OutputEvent {
    pub fn press(button: Button) -> Self {
        Self::Button { button, pressed: true }
    }

    pub fn release(button: Button) -> Self {
        Self::Button { button, pressed: false }
    }
}

impl From<RawEvent> for OutputEvent {
    fn from(ev: RawEvent) -> Self {
        match ev {
            RawEvent::ButtonDown(button) => Self::press(button),
            RawEvent::ButtonUp(button) => Self::release(button),
            RawEvent::Move { dx, dy } => Self::Move { dx, dy },
            RawEvent::Other(raw) => Self::Passthrough(raw),
        }
    }
}

/// Groups evdev events into frames (terminated by `SYN_REPORT`) and
/// translates each frame into [`RawEvent`]s.
///
/// `REL_X`/`REL_Y` of one frame are merged into a single `Move` placed
/// where the first motion event of the frame appeared. An `MSC_SCAN`
/// sharing a frame with a LEFT/RIGHT key is dropped: that key may be
/// held back or replaced by a middle press, so its scan code would
/// arrive orphaned.
///
/// `evdev::Device::fetch_events` resynchronizes after `SYN_DROPPED`
/// itself; the `SYN_DROPPED` handling here only matters for raw streams.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    frame: Vec<RawEvent>,
    motion_slot: Option<usize>,
    dropping: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one evdev event. Returns the decoded frame once its
    /// `SYN_REPORT` is seen.
    pub fn push(&mut self, ev: &InputEvent) -> Option<Vec<RawEvent>> {
        match ev.kind() {
            InputEventKind::Synchronization(Synchronization::SYN_REPORT) => {
                if self.dropping {
                    self.dropping = false;
                    self.reset();
                    return None;
                }
                let frame = self.take_frame();
                (!frame.is_empty()).then_some(frame)
            }
            InputEventKind::Synchronization(Synchronization::SYN_DROPPED) => {
                warn!("Kernel event buffer overrun (SYN_DROPPED), discarding partial frame");
                self.reset();
                self.dropping = true;
                None
            }
            // The sink writes its own frame boundaries.
            InputEventKind::Synchronization(_) => None,
            _ if self.dropping => None,
            InputEventKind::Key(key) => {
                let event = match Button::from_key(key) {
                    Some(button @ (Button::Left | Button::Right)) => {
                        if ev.value() == 0 {
                            RawEvent::ButtonUp(button)
                        } else {
                            RawEvent::ButtonDown(button)
                        }
                    }
                    _ => RawEvent::Other(RawCode::from(ev)),
                };
                self.frame.push(event);
                None
            }
            InputEventKind::RelAxis(axis @ (RelativeAxisType::REL_X | RelativeAxisType::REL_Y)) => {
                let slot = match self.motion_slot {
                    Some(slot) => slot,
                    None => {
                        self.frame.push(RawEvent::Move { dx: 0, dy: 0 });
                        let slot = self.frame.len() - 1;
                        self.motion_slot = Some(slot);
                        slot
                    }
                };
                if let RawEvent::Move { dx, dy } = &mut self.frame[slot] {
                    if axis == RelativeAxisType::REL_X {
                        *dx += ev.value();
                    } else {
                        *dy += ev.value();
                    }
                }
                None
            }
            _ => {
                self.frame.push(RawEvent::Other(RawCode::from(ev)));
                None
            }
        }
    }

    fn take_frame(&mut self) -> Vec<RawEvent> {
        self.motion_slot = None;
        let mut frame = std::mem::take(&mut self.frame);
        let has_button = frame
            .iter()
            .any(|ev| matches!(ev, RawEvent::ButtonDown(_) | RawEvent::ButtonUp(_)));
        frame.retain(|ev| match ev {
            RawEvent::Move { dx: 0, dy: 0 } => false,
            RawEvent::Other(raw) => !(has_button && is_scan(raw)),
            _ => true,
        });
        frame
    }

    fn reset(&mut self) {
        self.frame.clear();
        self.motion_slot = None;
    }
}

fn is_scan(raw: &RawCode) -> bool {
    raw.event_type == EventType::MISC.0 && raw.code == MiscType::MSC_SCAN.0
}

fn syn_report() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, Synchronization::SYN_REPORT.0, 0)
}

/// Translate output events into evdev events for the virtual device.
///
/// Every button and motion event closes its own frame with a
/// `SYN_REPORT`; pass-through codes join the frame of whatever follows
/// them. The batch always ends on a `SYN_REPORT`.
pub fn encode(events: &[OutputEvent]) -> Vec<InputEvent> {
    let mut out = Vec::with_capacity(events.len() * 3);
    let mut open_frame = false;

    for ev in events {
        match *ev {
            OutputEvent::Button { button, pressed } => {
                out.push(InputEvent::new(EventType::KEY, button.key().code(), i32::from(pressed)));
                out.push(syn_report());
                open_frame = false;
            }
            OutputEvent::Move { dx, dy } => {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if dx != 0 {
                    out.push(InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, dx));
                }
                if dy != 0 {
                    out.push(InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_Y.0, dy));
                }
                out.push(syn_report());
                open_frame = false;
            }
            OutputEvent::Passthrough(raw) => {
                out.push(InputEvent::from(raw));
                open_frame = true;
            }
        }
    }

    if open_frame {
        out.push(syn_report());
    }
    out
}
