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
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, warn};

use crate::Error;

/// Set once a priority failure has been reported, so it isn't repeated for every note.
static PRIORITY_WARNED: AtomicBool = AtomicBool::new(false);

/// Default priority for the capture writer thread when AUTOSAMPLER_THREAD_PRIORITY is unset.
const DEFAULT_WRITER_THREAD_PRIORITY: u8 = 60;

/// Formats a duration as H:MM:SS.
pub fn format_duration(duration: Duration) -> String {
    format_seconds(duration.as_secs() as i64)
}

/// Formats a signed number of seconds as H:MM:SS, with a leading minus for negative values.
pub fn format_seconds(seconds: i64) -> String {
    let abs_seconds = seconds.unsigned_abs();
    let positive = format!(
        "{}:{:02}:{:02}",
        abs_seconds / 3600,
        (abs_seconds % 3600) / 60,
        abs_seconds % 60
    );
    if seconds < 0 {
        format!("-{}", positive)
    } else {
        positive
    }
}

/// Reads AUTOSAMPLER_THREAD_PRIORITY (0-99), falling back to the default.
pub fn writer_thread_priority() -> Option<ThreadPriorityValue> {
    std::env::var("AUTOSAMPLER_THREAD_PRIORITY")
        .ok()
        .and_then(|v| {
            let n = v.parse::<u8>().ok()?;
            (n < 100).then(|| ThreadPriorityValue::try_from(n).ok())?
        })
        .or_else(|| ThreadPriorityValue::try_from(DEFAULT_WRITER_THREAD_PRIORITY).ok())
}

/// Raises the priority of the calling thread. Failure only costs latency, so it is logged once
/// and otherwise ignored.
pub fn raise_current_thread_priority() {
    let Some(priority) = writer_thread_priority() else {
        return;
    };
    match set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
        Ok(()) => debug!(priority = ?priority, "Raised writer thread priority."),
        Err(e) if first_failure(&PRIORITY_WARNED) => {
            warn!(error = ?e, "Unable to raise writer thread priority.")
        }
        Err(e) => debug!(error = ?e, "Unable to raise writer thread priority."),
    }
}

/// True only for the first caller to report a failure on the given flag.
fn first_failure(warned: &AtomicBool) -> bool {
    !warned.swap(true, Ordering::Relaxed)
}

/// Picks a device by name. An exact match wins, otherwise the name must be contained in exactly
/// one device name.
pub fn find_device<T>(
    devices: Vec<T>,
    name: &str,
    name_of: impl Fn(&T) -> &str,
    kind: &str,
) -> Result<T, Error> {
    let name = name.trim();
    let (exact, mut matches): (Vec<T>, Vec<T>) = devices
        .into_iter()
        .filter(|device| name_of(device).contains(name))
        .partition(|device| name_of(device).trim() == name);

    if let Some(device) = exact.into_iter().next() {
        return Ok(device);
    }
    match matches.len() {
        0 => Err(Error::device_open(
            name,
            format!("no {} found with that name", kind),
        )),
        1 => Ok(matches.swap_remove(0)),
        _ => Err(Error::device_open(
            name,
            format!(
                "found too many devices that match ({}), use a less ambiguous device name",
                matches
                    .iter()
                    .map(|device| name_of(device).to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
        )),
    }
}
