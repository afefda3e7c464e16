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
use std::{fmt, sync::Arc};

use midly::{
    live::LiveEvent,
    num::{u4, u7},
    MidiMessage,
};

use crate::Error;

mod midir;
pub mod mock;

/// A MIDI output device that an instrument listens on.
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Opens a connection to the device. The connection is closed when dropped.
    fn open(&self) -> Result<Box<dyn Connection>, Error>;
}

/// An open MIDI output connection.
pub trait Connection: Send {
    /// Sends the event immediately.
    fn send(&mut self, event: LiveEvent<'static>) -> Result<(), Error>;

    /// Closes the connection.
    fn close(self: Box<Self>);
}

/// Builds a note-on event on the first channel.
pub fn note_on(note: u8, velocity: u8) -> LiveEvent<'static> {
    LiveEvent::Midi {
        channel: u4::new(0),
        message: MidiMessage::NoteOn {
            key: u7::new(note),
            vel: u7::new(velocity),
        },
    }
}

/// Builds a note-off event on the first channel.
pub fn note_off(note: u8, velocity: u8) -> LiveEvent<'static> {
    LiveEvent::Midi {
        channel: u4::new(0),
        message: MidiMessage::NoteOff {
            key: u7::new(note),
            vel: u7::new(velocity),
        },
    }
}

/// Serializes an event into its raw bytes.
pub(crate) fn encode(event: &LiveEvent<'static>) -> Result<Vec<u8>, Error> {
    // Choosing 8 here because that's what nodi does.
    let mut buf: Vec<u8> = Vec::with_capacity(8);
    event
        .write(&mut buf)
        .map_err(|e| Error::Control(format!("{:?}", e)))?;
    Ok(buf)
}

/// Lists MIDI output devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Error> {
    midir::list()
}

/// Gets an output device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Error> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}
