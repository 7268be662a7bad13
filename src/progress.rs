//! Progress reporting threaded through every pipeline stage

use std::sync::{Arc, Mutex};

/// Callback invoked synchronously on every progress update. It must not block.
pub type ProgressHandler = Arc<dyn Fn(&ProgressReport) + Send + Sync>;

/// The only externally observable state of a running export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    /// 0..=100, never decreasing within one run
    pub percent: u8,
    /// Human-readable description of the current step
    pub status: String,
}

/// A slice of the 0-100 range owned by one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl ProgressBand {
    pub const PREPARE: ProgressBand = ProgressBand { start: 0, end: 15 };
    pub const CAPTURE: ProgressBand = ProgressBand { start: 15, end: 55 };
    pub const COMPOSITE: ProgressBand = ProgressBand { start: 55, end: 60 };
    pub const PAGINATE: ProgressBand = ProgressBand { start: 60, end: 85 };
    pub const TEXT: ProgressBand = ProgressBand { start: 85, end: 98 };

    /// Percent after `done` of `total` work items.
    pub fn at(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        let span = (self.end - self.start) as usize;
        let done = done.min(total);
        self.start + (span * done / total) as u8
    }
}

/// Clamps reports so the percent is monotonic and forwards them to the
/// caller's handler. Shared by reference between concurrently polled stages.
pub struct ProgressTracker {
    current: Mutex<ProgressReport>,
    handler: Option<ProgressHandler>,
}

impl ProgressTracker {
    pub fn new(handler: Option<ProgressHandler>) -> Self {
        Self {
            current: Mutex::new(ProgressReport {
                percent: 0,
                status: String::new(),
            }),
            handler,
        }
    }

    /// Record a report. A percent lower than the last one is raised to it;
    /// the status always updates.
    pub fn report(&self, percent: u8, status: impl Into<String>) {
        let snapshot = {
            let mut cur = match self.current.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            cur.percent = cur.percent.max(percent.min(100));
            cur.status = status.into();
            cur.clone()
        };
        log::debug!("progress {}%: {}", snapshot.percent, snapshot.status);
        if let Some(cb) = &self.handler {
            cb(&snapshot);
        }
    }

    /// Update the status line without moving the percent.
    pub fn status(&self, status: impl Into<String>) {
        let percent = self.snapshot().percent;
        self.report(percent, status);
    }

    pub fn snapshot(&self) -> ProgressReport {
        match self.current.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
