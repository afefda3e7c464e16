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
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{audio, midi, Error};

/// The instrument being sampled: where notes are sent and where its audio comes back.
/// Both devices are exclusive, so only one capture session may hold the rig at a time.
#[derive(Clone)]
pub struct Rig {
    midi: Arc<dyn midi::Device>,
    audio: Arc<dyn audio::Device>,
    in_use: Arc<AtomicBool>,
}

impl Rig {
    /// Creates a new rig from the given devices.
    pub fn new(midi: Arc<dyn midi::Device>, audio: Arc<dyn audio::Device>) -> Rig {
        Rig {
            midi,
            audio,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolves both devices by name.
    pub fn from_names(midi_device: &str, audio_device: &str) -> Result<Rig, Error> {
        Ok(Rig::new(
            midi::get_device(midi_device)?,
            audio::get_device(audio_device)?,
        ))
    }

    /// Takes exclusive ownership of the devices until the lease is dropped.
    pub fn lease(&self) -> Result<SessionLease, Error> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SessionBusy);
        }

        Ok(SessionLease { rig: self.clone() })
    }
}

impl fmt::Display for Rig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MIDI: {}, Audio: {}", self.midi, self.audio)
    }
}

/// Exclusive access to a rig's devices for the duration of one capture.
pub struct SessionLease {
    rig: Rig,
}

impl SessionLease {
    /// The MIDI output to trigger notes on.
    pub fn midi(&self) -> &dyn midi::Device {
        self.rig.midi.as_ref()
    }

    /// The audio input to record from.
    pub fn audio(&self) -> &dyn audio::Device {
        self.rig.audio.as_ref()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.rig.in_use.store(false, Ordering::Release);
    }
}
