//! Elapsed-time accumulator for instrumentation. Never drives control flow.

use std::fmt;

#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    started: Option<u64>,
    total: u64,
    samples: u32,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn begin(&mut self, now: u64) {
        self.started = Some(now);
    }

    /// Close the current sample. No-op if not running.
    pub fn end(&mut self, now: u64) {
        if let Some(started) = self.started.take() {
            self.total += now.saturating_sub(started);
            self.samples += 1;
        }
    }

    /// Drop the running sample without recording it.
    pub fn cancel(&mut self) {
        self.started = None;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn average(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.total as f64 / self.samples as f64
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timer<{} samples, {:.2} average>",
            self.samples,
            self.average()
        )
    }
}
