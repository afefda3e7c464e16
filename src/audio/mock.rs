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
    f32::consts::PI,
    fmt,
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::info;

use crate::{
    audio::{CaptureFormat, ChunkReader, Connection as _, Input},
    Error,
};

/// Frames generated per chunk, roughly what a real input callback delivers.
const CHUNK_FRAMES: usize = 512;

/// How much an "unplug" device delivers before its reads start failing.
const UNPLUG_AFTER_BYTES: usize = 8192;

/// What the mock instrument sounds like.
#[derive(Clone, Copy, Debug)]
pub enum Signal {
    /// A sine tone that stops dead after the given duration, followed by digital silence.
    Tone { length: Duration },
    /// Noise that never decays.
    Noise,
}

/// A mock input device. Generates audio in real time instead of recording anything.
/// Names containing "fail" refuse to open, names containing "noise" never go quiet and names
/// containing "unplug" stop delivering audio with a read error shortly after opening.
#[derive(Clone)]
pub struct Device {
    name: String,
    fail_open: bool,
    fail_read_after: Option<usize>,
    signal: Signal,
    opened: Arc<AtomicUsize>,
    open_connections: Arc<AtomicUsize>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        let signal = if name.contains("noise") {
            Signal::Noise
        } else {
            Signal::Tone {
                length: Duration::from_millis(100),
            }
        };

        Device {
            name: name.to_string(),
            fail_open: name.contains("fail"),
            fail_read_after: name.contains("unplug").then_some(UNPLUG_AFTER_BYTES),
            signal,
            opened: Arc::new(AtomicUsize::new(0)),
            open_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replaces the generated signal.
    pub fn with_signal(mut self, signal: Signal) -> Device {
        self.signal = signal;
        self
    }

    /// Returns how many times the device has been opened successfully.
    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
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

    fn open(&self, format: CaptureFormat) -> Result<Input, Error> {
        if self.fail_open {
            return Err(Error::device_open(&self.name, "mock device refused to open"));
        }

        let (sample_tx, sample_rx) = crossbeam_channel::unbounded::<Vec<i16>>();
        let stopped = Arc::new(AtomicBool::new(false));
        let generator = {
            let stopped = stopped.clone();
            let signal = self.signal;
            thread::spawn(move || generate(signal, format.sample_rate, sample_tx, stopped))
        };

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_connections.fetch_add(1, Ordering::SeqCst);
        info!(device = self.name, "Opened mock audio input.");

        let reader = ChunkReader::new(sample_rx);
        Ok(Input {
            connection: Box::new(Connection {
                stopped,
                generator: Some(generator),
                open_connections: self.open_connections.clone(),
            }),
            reader: match self.fail_read_after {
                Some(remaining) => Box::new(Unplugged {
                    inner: reader,
                    remaining,
                }),
                None => Box::new(reader),
            },
        })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// Produces paced chunks until stopped or until the reader hangs up.
fn generate(
    signal: Signal,
    sample_rate: u32,
    sample_tx: crossbeam_channel::Sender<Vec<i16>>,
    stopped: Arc<AtomicBool>,
) {
    let chunk_duration = Duration::from_secs_f64(CHUNK_FRAMES as f64 / sample_rate as f64);
    let mut frame: usize = 0;
    let mut seed: u32 = 0x1234_5678;

    while !stopped.load(Ordering::SeqCst) {
        let chunk: Vec<i16> = (0..CHUNK_FRAMES)
            .map(|i| match signal {
                Signal::Tone { length } => {
                    let t = (frame + i) as f32 / sample_rate as f32;
                    if t < length.as_secs_f32() {
                        (8000.0 * (2.0 * PI * 440.0 * t).sin()) as i16
                    } else {
                        0
                    }
                }
                Signal::Noise => {
                    seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    ((seed >> 16) as i16) / 4
                }
            })
            .collect();
        frame += CHUNK_FRAMES;

        if sample_tx.send(chunk).is_err() {
            return;
        }
        thread::sleep(chunk_duration);
    }
}

/// Passes through a fixed number of bytes, then fails every read.
struct Unplugged<R> {
    inner: R,
    remaining: usize,
}

impl<R: Read> Read for Unplugged<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::other("mock device unplugged"));
        }

        let limit = buf.len().min(self.remaining);
        let read = self.inner.read(&mut buf[..limit])?;
        self.remaining -= read;
        Ok(read)
    }
}

struct Connection {
    stopped: Arc<AtomicBool>,
    generator: Option<thread::JoinHandle<()>>,
    open_connections: Arc<AtomicUsize>,
}

impl super::Connection for Connection {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(generator) = self.generator.take() {
            let _ = generator.join();
        }
    }

    fn close(mut self: Box<Self>) {
        self.stop();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
        self.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}
