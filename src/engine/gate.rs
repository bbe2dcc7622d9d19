//! Run window gate consulted before every chunk.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::window::{self, RunWindow};

/// Source of "now". Run windows are evaluated on local wall-clock time,
/// run timestamps are recorded in UTC.
pub trait WallClock: Send + Sync {
    fn now_local(&self) -> NaiveDateTime;
    fn now_utc(&self) -> DateTime<Utc>;
}

/// System clock in the process time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl WallClock for LocalClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open,
    Closed { wait: Duration },
}

#[derive(Clone)]
pub struct RunWindowGate {
    window: Option<RunWindow>,
    clock: Arc<dyn WallClock>,
}

impl std::fmt::Debug for RunWindowGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunWindowGate").field("window", &self.window).finish_non_exhaustive()
    }
}

impl RunWindowGate {
    pub fn new(window: Option<RunWindow>, clock: Arc<dyn WallClock>) -> Self {
        Self { window, clock }
    }

    /// Gate that never closes.
    pub fn always_open(clock: Arc<dyn WallClock>) -> Self {
        Self::new(None, clock)
    }

    #[must_use]
    pub fn check(&self) -> GateDecision {
        let now = self.clock.now_local();
        if window::is_open(now, self.window.as_ref()) {
            GateDecision::Open
        } else {
            GateDecision::Closed {
                wait: window::time_until_open(now, self.window.as_ref()),
            }
        }
    }

    #[must_use]
    pub fn window(&self) -> Option<&RunWindow> {
        self.window.as_ref()
    }
}
