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
use std::fmt;

use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use midly::live::LiveEvent;
use tracing::{debug, info, span, Level};

use crate::{util, Error};

/// A MIDI output port as seen by midir.
pub struct Device {
    name: String,
    output_port: MidiOutputPort,
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<Box<dyn super::Connection>, Error> {
        let span = span!(Level::INFO, "open (midir)");
        let _enter = span.enter();

        let output = MidiOutput::new("autosampler output")
            .map_err(|e| Error::device_open(&self.name, e))?;
        let connection = output
            .connect(&self.output_port, "autosampler trigger")
            .map_err(|e| Error::device_open(&self.name, e))?;

        info!(device = self.name, "Opened MIDI output.");
        Ok(Box::new(Connection {
            name: self.name.clone(),
            connection,
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Output)", self.name)
    }
}

/// An open midir output connection.
struct Connection {
    name: String,
    connection: MidiOutputConnection,
}

impl super::Connection for Connection {
    fn send(&mut self, event: LiveEvent<'static>) -> Result<(), Error> {
        debug!(
            device = self.name,
            event = format!("{:?}", event),
            "Sending event."
        );

        let buf = super::encode(&event)?;
        self.connection
            .send(&buf)
            .map_err(|e| Error::Control(e.to_string()))
    }

    fn close(self: Box<Self>) {
        self.connection.close();
        info!(device = self.name, "Closed MIDI output.");
    }
}

/// Lists midir output devices and produces the Device trait.
pub fn list() -> Result<Vec<Box<dyn super::Device>>, Error> {
    Ok(list_midir_devices()?
        .into_iter()
        .map(|device| {
            let device: Box<dyn super::Device> = Box::new(device);
            device
        })
        .collect())
}

/// Lists midir output ports. Only ports that accept messages are listed, so input-only
/// devices never show up here.
fn list_midir_devices() -> Result<Vec<Device>, Error> {
    let output = MidiOutput::new("autosampler output listing")
        .map_err(|e| Error::device_open("MIDI", e))?;

    let mut devices = output
        .ports()
        .into_iter()
        .map(|port| {
            let name = output
                .port_name(&port)
                .map_err(|e| Error::device_open("MIDI", e))?;
            Ok(Device {
                name,
                output_port: port,
            })
        })
        .collect::<Result<Vec<Device>, Error>>()?;

    devices.sort_by_key(|device| device.name.clone());
    Ok(devices)
}

/// Gets the given midir device.
pub fn get(name: &str) -> Result<Device, Error> {
    util::find_device(
        list_midir_devices()?,
        name,
        |device| device.name.as_str(),
        "MIDI output",
    )
}
