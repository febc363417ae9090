//! trackpoint-midbutton - middle button emulation for two-button trackpoints
//!
//! Presses of LEFT and RIGHT that land close together are replaced by a
//! synthesized MIDDLE press on a uinput virtual device. Everything else
//! is forwarded unchanged.

pub mod device;
pub mod driver;
pub mod emulator;
pub mod event;
pub mod settings;

pub use emulator::{Emulator, EmulatorState, Timings};
pub use event::{Button, OutputEvent, RawEvent};
