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
    fs::File,
    io::{BufWriter, ErrorKind, Read},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use hound::WavWriter;
use tracing::{debug, error};

use crate::{
    audio::CaptureFormat, cancel::CancelHandle, capture::silence::SilenceGate, util, Error,
};

/// Bytes pulled from the stream per read.
const READ_SIZE: usize = 4096;

/// How many frames to write between header updates, so an interrupted capture still leaves a
/// readable file behind. About a second of audio.
const FLUSH_INTERVAL_FRAMES: u64 = 44100;

/// What the writer thread produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub frames_written: u64,
    pub silence_detected: bool,
}

/// Appends little endian i16 PCM bytes to a WAV file as they arrive.
pub struct PcmWriter {
    path: PathBuf,
    wav: WavWriter<BufWriter<File>>,
    carry: Option<u8>,
    frames_written: u64,
    frames_since_flush: u64,
}

impl PcmWriter {
    /// Creates the output file and writes its header.
    pub fn create(path: &Path, format: CaptureFormat) -> Result<PcmWriter, Error> {
        let wav = WavWriter::create(path, format.wav_spec()).map_err(|e| wav_error(path, e))?;
        Ok(PcmWriter {
            path: path.to_path_buf(),
            wav,
            carry: None,
            frames_written: 0,
            frames_since_flush: 0,
        })
    }

    /// Appends raw bytes. A trailing odd byte is held until the next call.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let mut bytes = bytes;
        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((high, rest)) => {
                    self.write_sample(i16::from_le_bytes([low, *high]))?;
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return Ok(());
                }
            }
        }

        let mut samples = bytes.chunks_exact(2);
        for sample in samples.by_ref() {
            self.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        self.carry = samples.remainder().first().copied();

        if self.frames_since_flush >= FLUSH_INTERVAL_FRAMES {
            self.wav.flush().map_err(|e| wav_error(&self.path, e))?;
            self.frames_since_flush = 0;
        }
        Ok(())
    }

    fn write_sample(&mut self, sample: i16) -> Result<(), Error> {
        self.wav
            .write_sample(sample)
            .map_err(|e| wav_error(&self.path, e))?;
        self.frames_written += 1;
        self.frames_since_flush += 1;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Updates the header and closes the file. A dangling odd byte is dropped.
    pub fn finalize(self) -> Result<u64, Error> {
        let PcmWriter {
            path,
            wav,
            frames_written,
            ..
        } = self;
        wav.finalize().map_err(|e| wav_error(&path, e))?;
        Ok(frames_written)
    }
}

/// hound reports plain I/O failures through its own error type; keep those as write errors.
fn wav_error(path: &Path, e: hound::Error) -> Error {
    match e {
        hound::Error::IoError(source) => Error::Write {
            path: path.to_path_buf(),
            source,
        },
        other => Error::Wav(other),
    }
}

/// Sets the finished flag and wakes the orchestrator when the writer exits, even by panic.
struct FinishedGuard {
    finished: Arc<AtomicBool>,
    cancel_handle: CancelHandle,
}

impl Drop for FinishedGuard {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
        self.cancel_handle.notify();
    }
}

/// Streams the gated input into the WAV file on a new thread until the stream ends.
pub fn spawn<R: Read + Send + 'static>(
    mut gate: SilenceGate<R>,
    mut writer: PcmWriter,
    finished: Arc<AtomicBool>,
    cancel_handle: CancelHandle,
) -> Result<thread::JoinHandle<Result<WriterStats, Error>>, Error> {
    thread::Builder::new()
        .name("autosampler-writer".to_string())
        .spawn(move || {
            let _guard = FinishedGuard {
                finished,
                cancel_handle,
            };
            util::raise_current_thread_priority();

            let mut buf = vec![0u8; READ_SIZE];
            loop {
                let read = match gate.read(&mut buf) {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(source) => {
                        error!(err = %source, "Error reading audio input.");
                        return Err(Error::Write {
                            path: writer.path.clone(),
                            source,
                        });
                    }
                };

                if let Err(e) = writer.append(&buf[..read]) {
                    error!(err = %e, "Error writing audio.");
                    return Err(e);
                }
            }

            let silence_detected = gate.is_silent();
            let frames_written = writer.finalize()?;
            debug!(frames_written, silence_detected, "Writer finished.");
            Ok(WriterStats {
                frames_written,
                silence_detected,
            })
        })
        .map_err(Error::Spawn)
}
