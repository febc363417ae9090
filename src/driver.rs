//! Driver loop: source → emulator → sink

use crate::device::{EventSink, EventSource};
use crate::emulator::Emulator;
use crate::event::{OutputEvent, RawEvent};
use anyhow::Result;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Upper bound on a single wait, so a stop request is noticed promptly.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Feed one batch of timestamped input through the emulator.
pub fn dispatch(emulator: &mut Emulator, batch: Vec<(RawEvent, Instant)>) -> Vec<OutputEvent> {
    let mut out = Vec::new();
    for (event, at) in batch {
        out.extend(emulator.handle_event(event, at));
    }
    out
}

pub struct Driver<S: EventSource, K: EventSink> {
    source: S,
    sink: K,
    emulator: Emulator,
    stop: Arc<AtomicBool>,
}

impl<S: EventSource, K: EventSink> Driver<S, K> {
    pub fn new(source: S, sink: K, emulator: Emulator, stop: Arc<AtomicBool>) -> Self {
        Self {
            source,
            sink,
            emulator,
            stop,
        }
    }

    /// Run until the stop flag is raised or the source fails. Whatever
    /// the sink still sees as pressed is released on the way out.
    pub fn run(&mut self) -> Result<()> {
        let timings = self.emulator.timings();
        info!(
            "Emulating middle button (left deadline {:?}, right deadline {:?})",
            timings.left_deadline, timings.right_deadline
        );

        let mut result = Ok(());
        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.step() {
                result = Err(e);
                break;
            }
        }

        let release = self.emulator.release_all();
        if let Err(e) = self.sink.emit(&release) {
            warn!("Failed to release buttons on shutdown: {e:#}");
        }
        info!("Driver loop stopped");
        result
    }

    /// Wait for the next input or the pending deadline, whichever is
    /// first, and forward the outcome.
    pub fn step(&mut self) -> Result<()> {
        let timeout = match self.emulator.next_deadline() {
            Some(at) => at
                .saturating_duration_since(Instant::now())
                .min(STOP_POLL_INTERVAL),
            None => STOP_POLL_INTERVAL,
        };

        let batch = self.source.next_batch(Some(timeout))?;
        let out = if batch.is_empty() {
            self.emulator.handle_timeout(Instant::now())
        } else {
            dispatch(&mut self.emulator, batch)
        };

        if !out.is_empty() {
            self.sink.emit(&out)?;
        }
        Ok(())
    }

    pub fn emulator(&self) -> &Emulator {
        &self.emulator
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }
}
