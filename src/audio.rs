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
    io::{self, Read},
    sync::Arc,
};

use crate::Error;

pub mod cpal;
pub mod mock;

/// The format every capture is recorded in: mono, signed 16 bit little endian PCM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        CaptureFormat {
            sample_rate: 44100,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl CaptureFormat {
    /// Number of bytes in one frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// The WAV spec matching this format.
    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// An audio input device that can be recorded from.
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Opens the device and starts streaming in the given format.
    fn open(&self, format: CaptureFormat) -> Result<Input, Error>;
}

/// Controls an open input stream.
pub trait Connection: Send {
    /// Stops the stream. The paired reader reaches end of stream once buffered audio is drained.
    /// Calling this more than once is harmless.
    fn stop(&mut self);

    /// Stops and releases the device.
    fn close(self: Box<Self>);
}

/// An open input: the control half stays with the session, the reader moves to the writer thread.
pub struct Input {
    pub connection: Box<dyn Connection>,
    pub reader: Box<dyn Read + Send>,
}

/// Reads little endian i16 PCM out of chunks delivered over a channel. Returns end of stream
/// once every sender is gone.
pub struct ChunkReader {
    receiver: crossbeam_channel::Receiver<Vec<i16>>,
    pending: Vec<u8>,
    position: usize,
}

impl ChunkReader {
    pub fn new(receiver: crossbeam_channel::Receiver<Vec<i16>>) -> ChunkReader {
        ChunkReader {
            receiver,
            pending: Vec::new(),
            position: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.position >= self.pending.len() {
            let chunk = match self.receiver.recv() {
                Ok(chunk) => chunk,
                Err(_) => return Ok(0),
            };
            self.pending.clear();
            self.pending
                .extend(chunk.iter().flat_map(|sample| sample.to_le_bytes()));
            self.position = 0;
        }

        let available = &self.pending[self.position..];
        let read = available.len().min(buf.len());
        buf[..read].copy_from_slice(&available[..read]);
        self.position += read;
        Ok(read)
    }
}

/// Lists input devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Error> {
    cpal::Device::list()
}

/// Gets an input device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Error> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(cpal::Device::get(name)?))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chunk_reader() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(vec![1i16, -2]).unwrap();
        tx.send(vec![]).unwrap();
        tx.send(vec![0x0102]).unwrap();
        drop(tx);

        let mut reader = ChunkReader::new(rx);
        let mut buf = [0u8; 3];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0x01, 0x00, 0xfe]);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0xff);
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[0x02, 0x01]);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_capture_format() {
        let format = CaptureFormat::default();
        assert_eq!(format.bytes_per_frame(), 2);
        let spec = format.wav_spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
    }
}
