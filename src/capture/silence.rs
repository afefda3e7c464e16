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
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::debug;

/// Size of the window of most recent bytes that silence is judged over.
pub const RING_CAPACITY: usize = 4096;

/// Approximate RMS to peak ratio of a full scale sine.
const RMS_TO_PEAK: f64 = 0.707;

/// Half of the range of a signed byte.
const HALF_RANGE: f64 = 128.0;

/// Utilization at or below this is considered silent.
const SILENCE_THRESHOLD: f64 = 0.01;

/// Arms a silence gate from another thread. Arming is one way.
#[derive(Clone)]
pub struct ArmHandle(Arc<AtomicBool>);

impl ArmHandle {
    /// Starts silence detection on the gate.
    pub fn arm(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Wraps a raw PCM byte stream and ends it once the signal has decayed to silence.
///
/// Until armed every read passes through untouched. Once armed, each read is also copied into a
/// ring buffer of the most recent bytes. After the ring has been filled at least once, the read
/// is turned into end of stream if the energy in the ring is low enough. That decision sticks.
pub struct SilenceGate<R> {
    inner: R,
    armed: Arc<AtomicBool>,
    ring: Box<[u8; RING_CAPACITY]>,
    cursor: usize,
    total_written: u64,
    silent: bool,
}

impl<R: Read> SilenceGate<R> {
    /// Creates a new, unarmed gate.
    pub fn new(inner: R) -> SilenceGate<R> {
        SilenceGate {
            inner,
            armed: Arc::new(AtomicBool::new(false)),
            ring: Box::new([0; RING_CAPACITY]),
            cursor: 0,
            total_written: 0,
            silent: false,
        }
    }

    /// Returns a handle that arms this gate.
    pub fn arm_handle(&self) -> ArmHandle {
        ArmHandle(self.armed.clone())
    }

    /// Returns true once the gate has ended the stream because of silence.
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    fn accumulate(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.ring[self.cursor] = *byte;
            self.cursor = (self.cursor + 1) % RING_CAPACITY;
        }
        self.total_written = self.total_written.wrapping_add(bytes.len() as u64);
    }

    /// Rough fraction of full scale energy held in the ring. Bytes are weighed as signed values.
    fn utilization(&self) -> f64 {
        let checksum: u64 = self
            .ring
            .iter()
            .map(|byte| (*byte as i8).unsigned_abs() as u64)
            .sum();
        checksum as f64 / (RMS_TO_PEAK * HALF_RANGE * RING_CAPACITY as f64)
    }
}

impl<R: Read> Read for SilenceGate<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.silent {
            return Ok(0);
        }

        let read = self.inner.read(buf)?;
        if read == 0 || !self.armed.load(Ordering::Acquire) {
            return Ok(read);
        }

        self.accumulate(&buf[..read]);
        if self.total_written > RING_CAPACITY as u64 {
            let utilization = self.utilization();
            if utilization <= SILENCE_THRESHOLD {
                debug!(utilization, "Signal decayed to silence, ending stream.");
                self.silent = true;
                return Ok(0);
            }
        }

        Ok(read)
    }
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Read};

    use super::*;

    /// Reads in fixed size chunks and returns how many bytes came through before end of stream.
    fn drain<R: Read>(gate: &mut SilenceGate<R>, chunk: usize) -> usize {
        let mut buf = vec![0u8; chunk];
        let mut total = 0;
        loop {
            match gate.read(&mut buf).unwrap() {
                0 => return total,
                n => total += n,
            }
        }
    }

    #[test]
    fn test_unarmed_passes_through() {
        let mut gate = SilenceGate::new(Cursor::new(vec![0u8; 3 * RING_CAPACITY]));
        assert_eq!(drain(&mut gate, 1024), 3 * RING_CAPACITY);
        assert!(!gate.is_silent());
    }

    #[test]
    fn test_never_ends_before_ring_fills() {
        let mut gate = SilenceGate::new(Cursor::new(vec![0u8; RING_CAPACITY - 1]));
        gate.arm_handle().arm();
        assert_eq!(drain(&mut gate, 100), RING_CAPACITY - 1);
        assert!(!gate.is_silent());
    }

    #[test]
    fn test_exactly_full_ring_does_not_end() {
        let mut gate = SilenceGate::new(Cursor::new(vec![0u8; RING_CAPACITY]));
        gate.arm_handle().arm();
        assert_eq!(drain(&mut gate, 1024), RING_CAPACITY);
        assert!(!gate.is_silent());
    }

    #[test]
    fn test_zeros_end_on_first_read_after_fill() {
        let mut gate = SilenceGate::new(Cursor::new(vec![0u8; 4 * RING_CAPACITY]));
        gate.arm_handle().arm();
        assert_eq!(drain(&mut gate, 1024), RING_CAPACITY);
        assert!(gate.is_silent());

        // The decision sticks.
        let mut buf = [0u8; 16];
        assert_eq!(gate.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_bytes_before_arming_are_ignored() {
        let mut gate = SilenceGate::new(Cursor::new(vec![0u8; 4 * RING_CAPACITY]));
        let mut buf = vec![0u8; 2 * RING_CAPACITY];
        assert_eq!(gate.read(&mut buf).unwrap(), 2 * RING_CAPACITY);

        gate.arm_handle().arm();
        assert_eq!(drain(&mut gate, 1024), RING_CAPACITY);
        assert!(gate.is_silent());
    }

    #[test]
    fn test_loud_signal_keeps_going() {
        let loud: Vec<u8> = (0..4 * RING_CAPACITY).map(|i| (i % 200) as u8).collect();
        let mut gate = SilenceGate::new(Cursor::new(loud));
        gate.arm_handle().arm();
        assert_eq!(drain(&mut gate, 512), 4 * RING_CAPACITY);
        assert!(!gate.is_silent());
    }

    #[test]
    fn test_decay_into_silence() {
        let mut signal: Vec<u8> = (0..2 * RING_CAPACITY).map(|i| (i % 100) as u8).collect();
        signal.extend(vec![0u8; 4 * RING_CAPACITY]);
        let mut gate = SilenceGate::new(Cursor::new(signal));
        gate.arm_handle().arm();

        // The ring only goes quiet once it no longer holds any of the signal, and the read that
        // flushes the last of it out is the one that ends the stream.
        assert_eq!(drain(&mut gate, 512), 3 * RING_CAPACITY - 512);
        assert!(gate.is_silent());
    }

    #[test]
    fn test_bytes_are_weighed_as_signed() {
        // 0xff is -1, so a ring full of it sits just above the threshold (about 0.011).
        let mut gate = SilenceGate::new(Cursor::new(vec![0xffu8; 4 * RING_CAPACITY]));
        gate.arm_handle().arm();
        assert_eq!(drain(&mut gate, 1024), 4 * RING_CAPACITY);
        assert!(!gate.is_silent());

        // Half of that is under it.
        let low: Vec<u8> = (0..4 * RING_CAPACITY)
            .map(|i| if i % 2 == 0 { 0xff } else { 0x00 })
            .collect();
        let mut gate = SilenceGate::new(Cursor::new(low));
        gate.arm_handle().arm();
        assert_eq!(drain(&mut gate, 1024), RING_CAPACITY);
        assert!(gate.is_silent());
    }
}
