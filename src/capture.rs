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
    fmt, io,
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, span, warn, Level};

use crate::{
    audio::{self, CaptureFormat},
    cancel::{CancelHandle, WaitOutcome},
    midi,
    note::to_note_name,
    rig::Rig,
    Error,
};

use self::silence::{ArmHandle, SilenceGate};
use self::writer::PcmWriter;

pub mod silence;
pub mod writer;

/// How long to wait for the tail to go silent before giving up on it.
pub const DEFAULT_MAX_TAIL: Duration = Duration::from_secs(30);

/// Everything needed to capture a single note.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    note: u8,
    velocity: u8,
    sustain: Duration,
    total: Duration,
    output_path: PathBuf,
}

impl Request {
    /// Creates a new request. The total duration must be longer than the sustain.
    pub fn new(
        note: u8,
        velocity: u8,
        sustain: Duration,
        total: Duration,
        output_path: PathBuf,
    ) -> Result<Request, Error> {
        if note > 127 {
            return Err(Error::InvalidRequest(format!("note {} is out of range", note)));
        }
        if velocity > 127 {
            return Err(Error::InvalidRequest(format!(
                "velocity {} is out of range",
                velocity
            )));
        }
        if total <= sustain {
            return Err(Error::InvalidRequest(format!(
                "sample length {:?} must be longer than the sustain {:?}",
                total, sustain
            )));
        }

        Ok(Request {
            note,
            velocity,
            sustain,
            total,
            output_path,
        })
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn sustain(&self) -> Duration {
        self.sustain
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// Time between releasing the note and arming silence detection.
    pub fn tail(&self) -> Duration {
        self.total - self.sustain
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

/// The states a capture session moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Opening,
    Triggering,
    Sustaining,
    Releasing,
    AwaitingTail,
    Closing,
    Closed,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The result of a successful capture.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub note: u8,
    pub velocity: u8,
    pub path: PathBuf,
    pub frames_written: u64,
    /// False if the tail never went quiet and the recording was cut at the maximum tail length.
    pub silence_detected: bool,
    pub elapsed: Duration,
}

/// Session settings that are the same for every note.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Options {
    pub format: CaptureFormat,
    pub max_tail: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            format: CaptureFormat::default(),
            max_tail: DEFAULT_MAX_TAIL,
        }
    }
}

/// One trigger, record and release cycle for a single note.
pub struct Session<'a> {
    request: &'a Request,
    options: Options,
    cancel_handle: CancelHandle,
    state: State,
}

impl<'a> Session<'a> {
    /// Creates a new idle session.
    pub fn new(
        request: &'a Request,
        options: Options,
        cancel_handle: CancelHandle,
    ) -> Session<'a> {
        Session {
            request,
            options,
            cancel_handle,
            state: State::Idle,
        }
    }

    /// The current state of the session.
    pub fn state(&self) -> State {
        self.state
    }

    /// Runs the capture to completion. Devices are always released before this returns.
    pub fn run(&mut self, rig: &Rig) -> Result<Report, Error> {
        let span = span!(Level::INFO, "capture", note = self.request.note);
        let _enter = span.enter();

        if self.state != State::Idle {
            return Err(Error::InvalidRequest(format!(
                "session already ran and is {}",
                self.state
            )));
        }

        let result = self.capture(rig);
        match &result {
            Ok(report) => info!(
                note = report.note,
                name = to_note_name(report.note),
                path = %report.path.display(),
                frames = report.frames_written,
                silence_detected = report.silence_detected,
                "Captured note."
            ),
            Err(e) => {
                self.transition(State::Failed);
                error!(err = %e, "Capture failed.");
            }
        }
        result
    }

    fn transition(&mut self, state: State) {
        debug!(
            note = self.request.note,
            from = %self.state,
            to = %state,
            "Capture state change."
        );
        self.state = state;
    }

    fn capture(&mut self, rig: &Rig) -> Result<Report, Error> {
        let start = Instant::now();
        let path = self.request.output_path.clone();

        self.transition(State::Opening);
        let lease = rig.lease()?;
        // Anything opened here is closed on drop if a later step fails.
        let mut midi = lease.midi().open()?;
        let audio::Input {
            connection: mut audio,
            reader,
        } = lease.audio().open(self.options.format)?;
        let pcm = PcmWriter::create(&path, self.options.format)?;

        self.transition(State::Triggering);
        let gate = SilenceGate::new(reader);
        let arm_handle = gate.arm_handle();
        let finished = Arc::new(AtomicBool::new(false));
        let writer_thread =
            writer::spawn(gate, pcm, finished.clone(), self.cancel_handle.clone())?;

        let triggered = self.trigger(midi.as_mut(), &arm_handle);

        let tail = match &triggered {
            Ok(()) => {
                self.transition(State::AwaitingTail);
                self.cancel_handle
                    .wait_timeout(&finished, self.options.max_tail)
            }
            // Nothing left to wait for once the trigger has failed.
            Err(_) => WaitOutcome::Cancelled,
        };
        if tail == WaitOutcome::TimedOut {
            warn!(
                note = self.request.note,
                max_tail = ?self.options.max_tail,
                "Tail never went silent, cutting the recording."
            );
        }

        self.transition(State::Closing);
        // Stopping the input ends the stream, so the writer drains what is left and exits.
        audio.stop();
        let written = writer_thread.join().unwrap_or_else(|_| {
            Err(Error::Write {
                path: path.clone(),
                source: io::Error::other("writer thread panicked"),
            })
        });
        midi.close();
        audio.close();
        drop(lease);

        triggered?;
        if tail == WaitOutcome::Cancelled {
            return Err(Error::InterruptedWait);
        }
        let stats = written?;

        self.transition(State::Closed);
        Ok(Report {
            note: self.request.note,
            velocity: self.request.velocity,
            path,
            frames_written: stats.frames_written,
            silence_detected: stats.silence_detected,
            elapsed: start.elapsed(),
        })
    }

    /// Plays the note, holds it, releases it and arms silence detection once the tail window has
    /// passed. The note is never left hanging if a wait is interrupted.
    fn trigger(
        &mut self,
        connection: &mut dyn midi::Connection,
        arm_handle: &ArmHandle,
    ) -> Result<(), Error> {
        let (note, velocity) = (self.request.note, self.request.velocity);

        connection.send(midi::note_on(note, velocity))?;

        self.transition(State::Sustaining);
        if let Err(e) = self.cancel_handle.sleep(self.request.sustain) {
            if let Err(off) = connection.send(midi::note_off(note, velocity)) {
                warn!(err = %off, "Unable to release note after interruption.");
            }
            return Err(e);
        }

        self.transition(State::Releasing);
        connection.send(midi::note_off(note, velocity))?;
        self.cancel_handle.sleep(self.request.tail())?;

        arm_handle.arm();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Duration};

    use crate::testutil::mock_rig;

    use super::*;

    fn request(dir: &Path, note: u8) -> Request {
        Request::new(
            note,
            127,
            Duration::from_millis(20),
            Duration::from_millis(60),
            dir.join(format!("sample_{}.wav", note)),
        )
        .unwrap()
    }

    #[test]
    fn test_request_validation() {
        let path = PathBuf::from("x.wav");
        let second = Duration::from_secs(1);
        assert!(Request::new(60, 127, second, second, path.clone()).is_err());
        assert!(Request::new(60, 127, second * 2, second, path.clone()).is_err());
        assert!(Request::new(128, 127, second, second * 2, path.clone()).is_err());
        assert!(Request::new(60, 128, second, second * 2, path.clone()).is_err());

        let request = Request::new(60, 127, Duration::ZERO, second * 2, path).unwrap();
        assert_eq!(request.tail(), second * 2);
    }

    #[test]
    fn test_capture_note() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, midi, audio) = mock_rig("mock-midi", "mock-audio");
        let request = request(dir.path(), 60);

        let mut session = Session::new(&request, Options::default(), CancelHandle::new());
        let report = session.run(&rig).unwrap();

        assert_eq!(session.state(), State::Closed);
        assert_eq!(report.note, 60);
        assert_eq!(report.velocity, 127);
        assert!(report.silence_detected);
        assert!(report.elapsed >= Duration::from_millis(60));
        assert_eq!(midi.sent(), vec![vec![0x90, 60, 127], vec![0x80, 60, 127]]);
        assert_eq!(midi.open_connections(), 0);
        assert_eq!(audio.open_connections(), 0);

        // The whole 100ms tone makes it into the file before the gate closes.
        let reader = hound::WavReader::open(&report.path).unwrap();
        assert_eq!(reader.spec(), CaptureFormat::default().wav_spec());
        assert_eq!(reader.duration() as u64, report.frames_written);
        assert!(report.frames_written >= 4410);

        // The devices are free for the next note.
        assert!(rig.lease().is_ok());
    }

    #[test]
    fn test_audio_open_failure_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, midi, _) = mock_rig("mock-midi", "mock-fail-audio");
        let request = request(dir.path(), 62);

        let mut session = Session::new(&request, Options::default(), CancelHandle::new());
        assert!(matches!(session.run(&rig), Err(Error::DeviceOpen { .. })));

        assert_eq!(session.state(), State::Failed);
        assert!(midi.sent().is_empty());
        assert_eq!(midi.open_connections(), 0);
        assert!(!request.output_path().exists());
        assert!(rig.lease().is_ok());
    }

    #[test]
    fn test_midi_open_failure_opens_no_audio() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, _, audio) = mock_rig("mock-fail-midi", "mock-audio");
        let request = request(dir.path(), 62);

        let mut session = Session::new(&request, Options::default(), CancelHandle::new());
        assert!(matches!(session.run(&rig), Err(Error::DeviceOpen { .. })));
        assert_eq!(audio.times_opened(), 0);
    }

    #[test]
    fn test_busy_rig() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, midi, _) = mock_rig("mock-midi", "mock-audio");
        let _lease = rig.lease().unwrap();
        let request = request(dir.path(), 64);

        let mut session = Session::new(&request, Options::default(), CancelHandle::new());
        assert!(matches!(session.run(&rig), Err(Error::SessionBusy)));
        assert!(midi.sent().is_empty());
    }

    #[test]
    fn test_tail_that_never_decays_is_cut() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, midi, _) = mock_rig("mock-midi", "mock-noise");
        let request = request(dir.path(), 65);
        let options = Options {
            max_tail: Duration::from_millis(50),
            ..Options::default()
        };

        let report = Session::new(&request, options, CancelHandle::new())
            .run(&rig)
            .unwrap();
        assert!(!report.silence_detected);
        assert!(report.frames_written > 0);
        assert_eq!(midi.sent().len(), 2);
    }

    #[test]
    fn test_cancel_while_sustaining() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, midi, audio) = mock_rig("mock-midi", "mock-audio");
        let request = Request::new(
            67,
            127,
            Duration::from_secs(30),
            Duration::from_secs(60),
            dir.path().join("sample_67.wav"),
        )
        .unwrap();

        let cancel_handle = CancelHandle::new();
        let canceller = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancel_handle.cancel();
            })
        };

        let mut session = Session::new(&request, Options::default(), cancel_handle);
        assert!(matches!(session.run(&rig), Err(Error::InterruptedWait)));
        canceller.join().unwrap();

        assert_eq!(session.state(), State::Failed);
        // The note is released even though the sustain was cut short.
        assert_eq!(midi.sent(), vec![vec![0x90, 67, 127], vec![0x80, 67, 127]]);
        assert_eq!(midi.open_connections(), 0);
        assert_eq!(audio.open_connections(), 0);
        // The partial file stays behind and is readable.
        assert!(hound::WavReader::open(request.output_path()).is_ok());
    }

    #[test]
    fn test_cancel_while_awaiting_tail() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, midi, audio) = mock_rig("mock-midi", "mock-noise");
        let request = request(dir.path(), 70);
        let options = Options {
            max_tail: Duration::from_secs(30),
            ..Options::default()
        };

        let cancel_handle = CancelHandle::new();
        let canceller = {
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                cancel_handle.cancel();
            })
        };

        let start = Instant::now();
        let mut session = Session::new(&request, options, cancel_handle);
        assert!(matches!(session.run(&rig), Err(Error::InterruptedWait)));
        canceller.join().unwrap();

        // The wait ended on the cancel, not on the tail limit.
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(session.state(), State::Failed);
        assert_eq!(midi.sent(), vec![vec![0x90, 70, 127], vec![0x80, 70, 127]]);
        assert_eq!(midi.open_connections(), 0);
        assert_eq!(audio.open_connections(), 0);
    }

    #[test]
    fn test_input_failure_after_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, midi, audio) = mock_rig("mock-midi", "mock-unplug-audio");
        let request = request(dir.path(), 71);

        let mut session = Session::new(&request, Options::default(), CancelHandle::new());
        assert!(matches!(session.run(&rig), Err(Error::Write { .. })));

        assert_eq!(session.state(), State::Failed);
        assert_eq!(midi.sent(), vec![vec![0x90, 71, 127], vec![0x80, 71, 127]]);
        assert_eq!(midi.open_connections(), 0);
        assert_eq!(audio.open_connections(), 0);
        assert!(rig.lease().is_ok());
    }

    #[test]
    fn test_session_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let (rig, _, _) = mock_rig("mock-midi", "mock-audio");
        let request = request(dir.path(), 69);

        let mut session = Session::new(&request, Options::default(), CancelHandle::new());
        session.run(&rig).unwrap();
        assert!(matches!(session.run(&rig), Err(Error::InvalidRequest(_))));
    }
}
