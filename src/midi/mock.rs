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
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use midly::live::LiveEvent;
use parking_lot::Mutex;
use tracing::info;

use crate::Error;

/// A mock device. Records everything sent to it instead of playing anything.
/// Names containing "fail" refuse to open.
#[derive(Clone)]
pub struct Device {
    name: String,
    fail_open: bool,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    open_connections: Arc<AtomicUsize>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            fail_open: name.contains("fail"),
            sent: Arc::new(Mutex::new(Vec::new())),
            open_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the raw bytes of every message sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Returns the number of connections that are currently open.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<Box<dyn super::Connection>, Error> {
        if self.fail_open {
            return Err(Error::device_open(&self.name, "mock device refused to open"));
        }

        self.open_connections.fetch_add(1, Ordering::SeqCst);
        info!(device = self.name, "Opened mock MIDI output.");
        Ok(Box::new(Connection {
            sent: self.sent.clone(),
            open_connections: self.open_connections.clone(),
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

struct Connection {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    open_connections: Arc<AtomicUsize>,
}

impl super::Connection for Connection {
    fn send(&mut self, event: LiveEvent<'static>) -> Result<(), Error> {
        let buf = super::encode(&event)?;
        self.sent.lock().push(buf);
        Ok(())
    }

    fn close(self: Box<Self>) {
        // Drop handles the bookkeeping.
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}
