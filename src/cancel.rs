// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::Error;

/// Represents the current cancel state.
#[derive(PartialEq)]
enum CancelState {
    Untouched,
    Cancelled,
}

/// The outcome of a bounded wait.
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The finished flag was set.
    Finished,
    /// The timeout elapsed first.
    TimedOut,
    /// The handle was cancelled.
    Cancelled,
}

/// A cancel handle is threaded through every suspension point of a capture. Sleeps and waits
/// return early once it is cancelled.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<Mutex<CancelState>>,
    condvar: Arc<Condvar>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(CancelState::Untouched)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if the handle has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock() == CancelState::Cancelled
    }

    /// Sleeps for the given duration unless cancelled first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Error> {
        match self.wait_timeout(&AtomicBool::new(false), duration) {
            WaitOutcome::Cancelled => Err(Error::InterruptedWait),
            _ => Ok(()),
        }
    }

    /// Waits until finished is set, the handle is cancelled, or the timeout passes.
    /// Whoever sets finished must call notify afterwards.
    pub fn wait_timeout(&self, finished: &AtomicBool, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.cancelled.lock();
        loop {
            if *cancelled == CancelState::Cancelled {
                return WaitOutcome::Cancelled;
            }
            if finished.load(Ordering::Acquire) {
                return WaitOutcome::Finished;
            }
            if self.condvar.wait_until(&mut cancelled, deadline).timed_out() {
                return if *cancelled == CancelState::Cancelled {
                    WaitOutcome::Cancelled
                } else if finished.load(Ordering::Acquire) {
                    WaitOutcome::Finished
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }

    /// Wakes up anything waiting on this handle so it can re-check its flags.
    pub fn notify(&self) {
        // Taking the lock orders the notification after any in-progress flag check.
        drop(self.cancelled.lock());
        self.condvar.notify_all();
    }

    /// Cancels everything waiting on this handle.
    pub fn cancel(&self) {
        let mut cancel_state = self.cancelled.lock();
        if *cancel_state == CancelState::Untouched {
            *cancel_state = CancelState::Cancelled;
            self.condvar.notify_all();
        }
    }
}
