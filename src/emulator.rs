//! Middle button emulation state machine
//!
//! A LEFT or RIGHT press is held back until its meaning is known: either
//! the partner button goes down within the deadline (the pair becomes a
//! synthesized MIDDLE click) or the press is released / its deadline
//! expires (it was an ordinary click or drag, and everything buffered is
//! replayed in order).
//!
//! The emulator does no I/O. Every input is fed together with the
//! instant it arrived, and every call returns the events to write to the
//! virtual device.

use crate::event::{Button, OutputEvent, RawEvent};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Grace periods granted to a pending button before it is committed as
/// an ordinary click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub left_deadline: Duration,
    pub right_deadline: Duration,
}

impl Timings {
    pub fn deadline(&self, button: Button) -> Duration {
        match button {
            Button::Right => self.right_deadline,
            _ => self.left_deadline,
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            left_deadline: Duration::from_millis(150),
            right_deadline: Duration::from_millis(60),
        }
    }
}

/// Set of physical buttons (LEFT/RIGHT) currently held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonSet {
    left: bool,
    right: bool,
}

impl ButtonSet {
    pub fn single(button: Button) -> Self {
        let mut set = Self::default();
        set.insert(button);
        set
    }

    pub fn both() -> Self {
        Self { left: true, right: true }
    }

    pub fn contains(&self, button: Button) -> bool {
        match button {
            Button::Left => self.left,
            Button::Right => self.right,
            Button::Middle => false,
        }
    }

    pub fn insert(&mut self, button: Button) {
        match button {
            Button::Left => self.left = true,
            Button::Right => self.right = true,
            Button::Middle => {}
        }
    }

    pub fn remove(&mut self, button: Button) {
        match button {
            Button::Left => self.left = false,
            Button::Right => self.right = false,
            Button::Middle => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.left && !self.right
    }

    pub fn iter(&self) -> impl Iterator<Item = Button> + '_ {
        [Button::Left, Button::Right]
            .into_iter()
            .filter(|b| self.contains(*b))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    /// Neither button held (or only stray releases still expected).
    Idle,
    /// One button down, role undecided.
    Pending(Button),
    /// Button(s) committed as ordinary and forwarded down to the sink.
    Forwarding(ButtonSet),
    /// Synthesized MIDDLE reported down; the set is what is still held.
    Middle(ButtonSet),
}

/// Events held back while a button is pending.
#[derive(Debug, Default)]
pub struct PendingQueue {
    events: Vec<RawEvent>,
}

impl PendingQueue {
    pub fn push(&mut self, event: RawEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Replay everything in original order.
    pub fn commit(&mut self, out: &mut Vec<OutputEvent>) {
        out.extend(self.events.drain(..).map(OutputEvent::from));
    }

    pub fn discard(&mut self) -> usize {
        let dropped = self.events.len();
        self.events.clear();
        dropped
    }
}

/// One-shot deadline armed for the pending button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub button: Button,
    pub at: Instant,
}

#[derive(Debug)]
pub struct Emulator {
    timings: Timings,
    state: EmulatorState,
    queue: PendingQueue,
    timer: Option<Timer>,
}

impl Emulator {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            state: EmulatorState::Idle,
            queue: PendingQueue::default(),
            timer: None,
        }
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    pub fn state(&self) -> EmulatorState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// When the driver must wake up to expire the pending button.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.at)
    }

    /// Feed one input event that arrived at `at`.
    ///
    /// A timer that expired strictly before `at` is fired first; on a tie
    /// the event wins.
    pub fn handle_event(&mut self, event: RawEvent, at: Instant) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        if let Some(timer) = self.timer {
            if timer.at < at {
                self.expire(timer, &mut out);
            }
        }

        match event {
            RawEvent::ButtonDown(button @ (Button::Left | Button::Right)) => {
                self.on_down(button, at, event, &mut out)
            }
            RawEvent::ButtonUp(button @ (Button::Left | Button::Right)) => {
                self.on_up(button, event, &mut out)
            }
            RawEvent::Move { .. } => self.on_move(event, &mut out),
            // MIDDLE and anything foreign never touch the state machine.
            RawEvent::ButtonDown(_) | RawEvent::ButtonUp(_) | RawEvent::Other(_) => {
                trace!("Passthrough: {:?}", event);
                out.push(event.into());
            }
        }
        out
    }

    /// Called by the driver when it woke up without input at `now`.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        if let Some(timer) = self.timer {
            if timer.at <= now {
                self.expire(timer, &mut out);
            }
        }
        out
    }

    /// Drop anything pending and release every button the sink currently
    /// sees as down. Used on shutdown so nothing stays stuck.
    pub fn release_all(&mut self) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        self.timer = None;
        match self.state {
            EmulatorState::Idle => {}
            EmulatorState::Pending(button) => {
                let dropped = self.queue.discard();
                debug!("Shutdown: dropping pending {:?} ({} buffered events)", button, dropped);
            }
            EmulatorState::Forwarding(held) => {
                out.extend(held.iter().map(OutputEvent::release));
            }
            EmulatorState::Middle(_) => out.push(OutputEvent::release(Button::Middle)),
        }
        self.state = EmulatorState::Idle;
        out
    }

    fn expire(&mut self, timer: Timer, out: &mut Vec<OutputEvent>) {
        self.timer = None;
        if self.state != EmulatorState::Pending(timer.button) {
            // Stale deadline from a state that was already left.
            trace!("Ignoring expired timer for {:?} in state {:?}", timer.button, self.state);
            return;
        }
        debug!(
            "TIMEOUT: {:?} committed as ordinary click, flushing {} events",
            timer.button,
            self.queue.len()
        );
        self.queue.commit(out);
        self.state = EmulatorState::Forwarding(ButtonSet::single(timer.button));
    }

    fn on_down(
        &mut self,
        button: Button,
        at: Instant,
        event: RawEvent,
        out: &mut Vec<OutputEvent>,
    ) {
        match self.state {
            EmulatorState::Idle => {
                let deadline = self.timings.deadline(button);
                let timer = Timer {
                    button,
                    at: at + deadline,
                };
                debug!("PENDING: {:?} down, deciding within {:?}", button, deadline);
                debug_assert!(self.queue.is_empty(), "queue must be empty outside pending");
                self.queue.push(event);
                self.timer = Some(timer);
                self.state = EmulatorState::Pending(button);
            }
            EmulatorState::Pending(pending) if pending.partner() == Some(button) => {
                self.timer = None;
                let dropped = self.queue.discard();
                debug!(
                    "MIDDLE: {:?} then {:?}, synthesizing middle press ({} events dropped)",
                    pending, button, dropped
                );
                out.push(OutputEvent::press(Button::Middle));
                self.state = EmulatorState::Middle(ButtonSet::both());
            }
            EmulatorState::Pending(_) => {
                trace!("Ignoring repeated {:?} down while pending", button);
            }
            EmulatorState::Forwarding(mut held) => {
                if held.contains(button) {
                    trace!("Ignoring repeated {:?} down", button);
                    return;
                }
                held.insert(button);
                trace!("Forward: {:?}", event);
                out.push(event.into());
                self.state = EmulatorState::Forwarding(held);
            }
            EmulatorState::Middle(_) => {
                trace!("Swallowing {:?} down during middle gesture", button);
            }
        }
    }

    fn on_up(&mut self, button: Button, event: RawEvent, out: &mut Vec<OutputEvent>) {
        match self.state {
            EmulatorState::Idle => {
                trace!("Swallowing stray {:?} up", button);
            }
            EmulatorState::Pending(pending) if pending == button => {
                self.timer = None;
                debug!(
                    "CLICK: {:?} released before deadline, flushing {} events",
                    button,
                    self.queue.len()
                );
                self.queue.commit(out);
                out.push(event.into());
                self.state = EmulatorState::Idle;
            }
            EmulatorState::Pending(_) => {
                trace!("Ignoring stray {:?} up while pending", button);
            }
            EmulatorState::Forwarding(mut held) => {
                if !held.contains(button) {
                    trace!("Ignoring stray {:?} up", button);
                    return;
                }
                held.remove(button);
                trace!("Forward: {:?}", event);
                out.push(event.into());
                self.state = if held.is_empty() {
                    EmulatorState::Idle
                } else {
                    EmulatorState::Forwarding(held)
                };
            }
            EmulatorState::Middle(held) => {
                if !held.contains(button) {
                    trace!("Ignoring stray {:?} up during middle gesture", button);
                    return;
                }
                debug!("MIDDLE: {:?} released, synthesizing middle release", button);
                out.push(OutputEvent::release(Button::Middle));
                self.state = EmulatorState::Idle;
            }
        }
    }

    fn on_move(&mut self, event: RawEvent, out: &mut Vec<OutputEvent>) {
        match self.state {
            EmulatorState::Pending(_) => self.queue.push(event),
            _ => out.push(event.into()),
        }
    }
}
