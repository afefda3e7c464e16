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
use std::{io, path::PathBuf};

use crate::config::ConfigError;

/// Errors produced while sampling an instrument.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected a note in scientific pitch notation, got {0:?}")]
    InvalidNoteName(String),

    #[error("invalid capture request: {0}")]
    InvalidRequest(String),

    #[error("unable to open device {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("error sending MIDI message: {0}")]
    Control(String),

    #[error("error writing audio to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error("wait was interrupted")]
    InterruptedWait,

    #[error("unable to start thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("another capture session is already using these devices")]
    SessionBusy,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sampling note {note} failed: {source}")]
    NoteFailed {
        note: u8,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Convenience constructor for device open failures.
    pub fn device_open(device: impl Into<String>, reason: impl ToString) -> Error {
        Error::DeviceOpen {
            device: device.into(),
            reason: reason.to_string(),
        }
    }

    /// Write failures only affect the note being captured, so the batch may choose to
    /// carry on. Everything else stops the batch.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Write { .. } | Error::Wav(_) => true,
            Error::NoteFailed { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}
