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
use std::{fmt, thread};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SizedSample,
};
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, span, Level};

use crate::{
    audio::{CaptureFormat, ChunkReader, Connection as _, Input},
    util, Error,
};

/// A small wrapper around a cpal::Device that is capable of recording.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of input channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal input devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn super::Device>>, Error> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn super::Device> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices that expose at least one input configuration.
    fn list_cpal_devices() -> Result<Vec<Device>, Error> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(err = e.to_string(), host = host_id.name(), "Unable to open host");
                    continue;
                }
            };
            let host_devices = match host.input_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let max_channels = match device.supported_input_configs() {
                    Ok(configs) => configs.map(|config| config.channels()).max().unwrap_or(0),
                    Err(_) => continue,
                };

                if max_channels > 0 {
                    let name = device
                        .description()
                        .map(|description| description.name().to_string())
                        .map_err(|e| Error::device_open("audio", e))?;
                    devices.push(Device {
                        name,
                        max_channels,
                        host_id,
                        device,
                    });
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device.
    pub fn get(name: &str) -> Result<Device, Error> {
        util::find_device(
            Device::list_cpal_devices()?,
            name,
            |device| device.name.as_str(),
            "audio input",
        )
    }

    /// Picks a supported input configuration running at the requested rate, preferring
    /// 16 bit integer samples and as few channels as possible.
    fn input_config(
        &self,
        format: CaptureFormat,
    ) -> Result<(cpal::StreamConfig, cpal::SampleFormat), Error> {
        let configs = self
            .device
            .supported_input_configs()
            .map_err(|e| Error::device_open(&self.name, e))?;

        let range = configs
            .filter(|range| {
                range.min_sample_rate() <= format.sample_rate
                    && format.sample_rate <= range.max_sample_rate()
            })
            .min_by_key(|range| {
                (
                    range.sample_format() != cpal::SampleFormat::I16,
                    range.channels(),
                )
            })
            .ok_or_else(|| {
                Error::device_open(
                    &self.name,
                    format!("no input configuration supports {} Hz", format.sample_rate),
                )
            })?;

        Ok((
            cpal::StreamConfig {
                channels: range.channels(),
                sample_rate: format.sample_rate,
                buffer_size: cpal::BufferSize::Default,
            },
            range.sample_format(),
        ))
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self, format: CaptureFormat) -> Result<Input, Error> {
        let span = span!(Level::INFO, "open (cpal)");
        let _enter = span.enter();

        let (config, sample_format) = self.input_config(format)?;
        info!(
            device = self.name,
            channels = config.channels,
            sample_rate = format.sample_rate,
            format = ?sample_format,
            "Opening audio input."
        );

        let (sample_tx, sample_rx) = crossbeam_channel::unbounded::<Vec<i16>>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), Error>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        // cpal streams are not Send on every host, so the stream is created and dropped on its
        // own thread.
        let device = self.device.clone();
        let name = self.name.clone();
        let stream_thread = thread::Builder::new()
            .name("autosampler-input".to_string())
            .spawn(move || {
                run_stream(
                    device,
                    name,
                    config,
                    sample_format,
                    sample_tx,
                    ready_tx,
                    stop_rx,
                )
            })
            .map_err(Error::Spawn)?;

        let mut connection = Box::new(Connection {
            name: self.name.clone(),
            stop_tx: Some(stop_tx),
            stream_thread: Some(stream_thread),
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Input {
                connection,
                reader: Box::new(ChunkReader::new(sample_rx)),
            }),
            Ok(Err(e)) => {
                connection.stop();
                Err(e)
            }
            Err(_) => {
                connection.stop();
                Err(Error::device_open(&self.name, "input stream thread exited"))
            }
        }
    }
}

/// Builds the input stream, reports whether it started, then keeps it alive until stopped.
fn run_stream(
    device: cpal::Device,
    name: String,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    sample_tx: Sender<Vec<i16>>,
    ready_tx: Sender<Result<(), Error>>,
    stop_rx: Receiver<()>,
) {
    let stream = match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, sample_tx),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, sample_tx),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, sample_tx),
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, sample_tx),
        cpal::SampleFormat::F64 => build_stream::<f64>(&device, &config, sample_tx),
        other => {
            let _ = ready_tx.send(Err(Error::device_open(
                &name,
                format!("unsupported input sample format {:?}", other),
            )));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(Error::device_open(&name, e)));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(Error::device_open(&name, e)));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Returns on an explicit stop or once the connection is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    info!(device = name, "Audio input stream stopped.");
}

/// Builds an input stream that keeps the first channel of every frame and forwards it as i16.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_tx: Sender<Vec<i16>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk: Vec<i16> = data
                .chunks(channels)
                .map(|frame| frame[0].to_sample::<i16>())
                .collect();
            // The reader going away just means the capture is over.
            let _ = sample_tx.send(chunk);
        },
        |err| error!("CPAL input stream error: {}", err),
        None,
    )
}

/// The control half of an open cpal input.
struct Connection {
    name: String,
    stop_tx: Option<Sender<()>>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl super::Connection for Connection {
    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(stream_thread) = self.stream_thread.take() {
            if stream_thread.join().is_err() {
                error!(device = self.name, "Audio input thread panicked.");
            }
        }
    }

    fn close(mut self: Box<Self>) {
        self.stop();
        info!(device = self.name, "Closed audio input.");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
    }
}
