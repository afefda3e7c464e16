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
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tokio::sync::mpsc;
use tracing::{debug, info, span, warn, Level};

use crate::{
    cancel::CancelHandle,
    capture::{Options, Report, Request, Session},
    config::SamplerConfig,
    note::to_note_name,
    rig::Rig,
    util, Error,
};

/// Every note is struck at full velocity.
pub const VELOCITY: u8 = 127;

/// Picks the notes to sample: every interval from start, plus the end note itself.
/// The result is ascending and has no duplicates.
pub fn note_selection(start: u8, end: u8, interval: u8) -> Result<Vec<u8>, Error> {
    if end > 127 {
        return Err(Error::InvalidRequest(format!("end note {} is out of range", end)));
    }
    if start > end {
        return Err(Error::InvalidRequest(format!(
            "start note {} is above end note {}",
            start, end
        )));
    }
    if interval == 0 {
        return Err(Error::InvalidRequest("interval must be at least 1".to_string()));
    }

    let mut notes: BTreeSet<u8> = (start..=end).step_by(interval as usize).collect();
    notes.insert(end);
    Ok(notes.into_iter().collect())
}

/// Fills in {note}, {name} and {velocity} in a file name template.
pub fn expand_naming(template: &str, note: u8, velocity: u8) -> String {
    template
        .replace("{note}", &note.to_string())
        .replace("{name}", &to_note_name(note))
        .replace("{velocity}", &velocity.to_string())
}

/// Emitted after each note has been handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub note: u8,
    pub velocity: u8,
    /// 1 based position of the note in the batch.
    pub current: usize,
    pub total: usize,
}

/// What a finished batch produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub reports: Vec<Report>,
    /// Notes whose file could not be written and were passed over.
    pub skipped: Vec<u8>,
}

/// Messages from a sampler running in the background.
#[derive(Debug)]
pub enum SamplerEvent {
    Progress(Progress),
    Finished(Result<Summary, Error>),
}

/// Controls a sampler running on its own thread.
pub struct SamplerHandle {
    events: mpsc::UnboundedReceiver<SamplerEvent>,
    cancel_handle: CancelHandle,
}

impl SamplerHandle {
    /// Waits for the next event. Returns None once the sampler thread is gone.
    pub async fn recv(&mut self) -> Option<SamplerEvent> {
        self.events.recv().await
    }

    /// Waits for the next event outside of an async context.
    pub fn blocking_recv(&mut self) -> Option<SamplerEvent> {
        self.events.blocking_recv()
    }

    /// Stops the batch. The note in flight is released and the batch finishes with an error.
    pub fn cancel(&self) {
        self.cancel_handle.cancel();
    }
}

/// Samples a range of notes, one file per note.
#[derive(Clone, Debug)]
pub struct Sampler {
    notes: Vec<u8>,
    sustain: Duration,
    sample_length: Duration,
    options: Options,
    output_directory: PathBuf,
    naming: String,
    continue_on_write_error: bool,
}

impl Sampler {
    /// Creates a sampler from the given configuration. Devices are not touched.
    pub fn new(config: &SamplerConfig) -> Result<Sampler, Error> {
        let notes = note_selection(config.start_note()?, config.end_note()?, config.interval()?)?;
        let sustain = config.sustain()?;
        let sample_length = config.sample_length()?;
        if sample_length <= sustain {
            return Err(Error::InvalidRequest(format!(
                "sample length {:?} must be longer than the sustain {:?}",
                sample_length, sustain
            )));
        }

        Ok(Sampler {
            notes,
            sustain,
            sample_length,
            options: Options {
                max_tail: config.max_tail()?,
                ..Options::default()
            },
            output_directory: config.output_directory(),
            naming: config.naming().to_string(),
            continue_on_write_error: config.continue_on_write_error(),
        })
    }

    /// The notes that will be sampled, in order.
    pub fn notes(&self) -> &[u8] {
        &self.notes
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Where the sample for the given note is written.
    pub fn output_path(&self, note: u8) -> PathBuf {
        self.output_directory
            .join(expand_naming(&self.naming, note, VELOCITY))
    }

    /// Lower bound on how long the batch takes. Tails that ring on take longer.
    pub fn estimated_duration(&self) -> Duration {
        self.sample_length
            .checked_mul(self.notes.len() as u32)
            .unwrap_or(Duration::MAX)
    }

    /// Samples every note in order, calling on_progress after each one. Stops at the first
    /// failure, leaving any files already written in place.
    pub fn run<F>(
        &self,
        rig: &Rig,
        cancel_handle: &CancelHandle,
        mut on_progress: F,
    ) -> Result<Summary, Error>
    where
        F: FnMut(Progress),
    {
        let span = span!(Level::INFO, "sampler");
        let _enter = span.enter();

        fs::create_dir_all(&self.output_directory).map_err(|source| Error::Write {
            path: self.output_directory.clone(),
            source,
        })?;

        let total = self.notes.len();
        info!(
            rig = %rig,
            notes = total,
            estimated = %util::format_duration(self.estimated_duration()),
            "Sampling."
        );

        let mut summary = Summary::default();
        for (i, &note) in self.notes.iter().enumerate() {
            if cancel_handle.is_cancelled() {
                return Err(Error::NoteFailed {
                    note,
                    source: Box::new(Error::InterruptedWait),
                });
            }

            match self.sample_note(rig, cancel_handle, note) {
                Ok(report) => summary.reports.push(report),
                Err(e) if e.is_recoverable() && self.continue_on_write_error => {
                    warn!(note, err = %e, "Unable to write sample, skipping note.");
                    summary.skipped.push(note);
                }
                Err(e) => {
                    return Err(Error::NoteFailed {
                        note,
                        source: Box::new(e),
                    })
                }
            }

            on_progress(Progress {
                note,
                velocity: VELOCITY,
                current: i + 1,
                total,
            });
        }

        info!(
            written = summary.reports.len(),
            skipped = summary.skipped.len(),
            "Finished sampling."
        );
        Ok(summary)
    }

    fn sample_note(
        &self,
        rig: &Rig,
        cancel_handle: &CancelHandle,
        note: u8,
    ) -> Result<Report, Error> {
        let request = Request::new(
            note,
            VELOCITY,
            self.sustain,
            self.sample_length,
            self.output_path(note),
        )?;
        Session::new(&request, self.options, cancel_handle.clone()).run(rig)
    }

    /// Runs the batch on a new thread. Progress and the final result arrive through the handle.
    pub fn spawn(self, rig: Rig) -> Result<SamplerHandle, Error> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let cancel_handle = CancelHandle::new();
        let thread_cancel_handle = cancel_handle.clone();

        thread::Builder::new()
            .name("autosampler-sampler".to_string())
            .spawn(move || {
                let result = self.run(&rig, &thread_cancel_handle, |progress| {
                    // The receiver only goes away when nobody is listening any more.
                    let _ = events_tx.send(SamplerEvent::Progress(progress));
                });
                if events_tx.send(SamplerEvent::Finished(result)).is_err() {
                    debug!("Sampler handle dropped before the batch finished.");
                }
            })
            .map_err(Error::Spawn)?;

        Ok(SamplerHandle {
            events,
            cancel_handle,
        })
    }
}

#[cfg(test)]
mod test {
    use std::{path::Path, time::Duration};

    use crate::{
        config::SamplerConfig,
        note::NoteSpec,
        testutil::{eventually, mock_rig},
    };

    use super::*;

    fn config(output_directory: &Path, start: u8, end: u8) -> SamplerConfig {
        SamplerConfig {
            midi_device: Some("mock-midi".to_string()),
            audio_device: Some("mock-audio".to_string()),
            start_note: Some(NoteSpec::Number(start)),
            end_note: Some(NoteSpec::Number(end)),
            sustain: Some("10ms".to_string()),
            sample_length: Some("50ms".to_string()),
            output_directory: Some(output_directory.to_path_buf()),
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_note_selection() {
        assert_eq!(note_selection(60, 72, 6).unwrap(), vec![60, 66, 72]);
        assert_eq!(note_selection(60, 65, 6).unwrap(), vec![60, 65]);
        assert_eq!(note_selection(60, 60, 1).unwrap(), vec![60]);
        assert_eq!(note_selection(0, 127, 127).unwrap(), vec![0, 127]);
        assert_eq!(note_selection(120, 127, 200).unwrap(), vec![120, 127]);
        assert_eq!(note_selection(0, 127, 1).unwrap().len(), 128);

        assert!(matches!(
            note_selection(72, 60, 1),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            note_selection(60, 72, 0),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            note_selection(60, 128, 1),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_expand_naming() {
        assert_eq!(
            expand_naming("sample_{note}_{velocity}.wav", 60, 127),
            "sample_60_127.wav"
        );
        assert_eq!(expand_naming("{name}.wav", 61, 127), "Db4.wav");
        assert_eq!(expand_naming("fixed.wav", 61, 127), "fixed.wav");
    }

    #[test]
    fn test_new_validates_config() {
        let dir = tempfile::tempdir().unwrap();

        let mut bad = config(dir.path(), 60, 72);
        bad.sample_length = Some("10ms".to_string());
        assert!(matches!(Sampler::new(&bad), Err(Error::InvalidRequest(_))));

        let mut bad = config(dir.path(), 60, 72);
        bad.end_note = None;
        assert!(matches!(Sampler::new(&bad), Err(Error::Config(_))));

        let mut bad = config(dir.path(), 72, 60);
        bad.interval = Some(6);
        assert!(matches!(Sampler::new(&bad), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_estimated_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 60, 72);
        config.interval = Some(6);
        config.sample_length = Some("2s".to_string());

        let sampler = Sampler::new(&config).unwrap();
        assert_eq!(sampler.notes(), &[60, 66, 72]);
        assert_eq!(sampler.estimated_duration(), Duration::from_secs(6));
        assert_eq!(
            sampler.output_path(66),
            dir.path().join("sample_66_127.wav")
        );
    }

    #[test]
    fn test_run_samples_every_note() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("samples");
        let sampler = Sampler::new(&config(&output, 60, 62)).unwrap();
        let (rig, midi, audio) = mock_rig("mock-midi", "mock-audio");

        let mut progress = Vec::new();
        let summary = sampler
            .run(&rig, &CancelHandle::new(), |p| progress.push(p))
            .unwrap();

        assert_eq!(
            progress,
            (60..=62)
                .enumerate()
                .map(|(i, note)| Progress {
                    note,
                    velocity: 127,
                    current: i + 1,
                    total: 3,
                })
                .collect::<Vec<_>>()
        );
        assert_eq!(summary.reports.len(), 3);
        assert!(summary.skipped.is_empty());
        for note in 60..=62 {
            let path = output.join(format!("sample_{}_127.wav", note));
            let reader = hound::WavReader::open(&path).unwrap();
            assert!(reader.duration() > 0);
        }

        // A note on and a note off per note, in order.
        let sent = midi.sent();
        assert_eq!(sent.len(), 6);
        assert_eq!(sent[0], vec![0x90, 60, 127]);
        assert_eq!(sent[1], vec![0x80, 60, 127]);
        assert_eq!(sent[4], vec![0x90, 62, 127]);
        assert_eq!(audio.times_opened(), 3);
        assert_eq!(audio.open_connections(), 0);
        assert_eq!(midi.open_connections(), 0);
    }

    #[test]
    fn test_run_aborts_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = Sampler::new(&config(dir.path(), 60, 64)).unwrap();
        let (rig, midi, _) = mock_rig("mock-midi", "mock-fail-audio");

        let mut progress = Vec::new();
        let result = sampler.run(&rig, &CancelHandle::new(), |p| progress.push(p));

        match result {
            Err(Error::NoteFailed { note, source }) => {
                assert_eq!(note, 60);
                assert!(matches!(*source, Error::DeviceOpen { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(progress.is_empty());
        assert!(midi.sent().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 60, 61);
        config.naming = Some("missing/{note}.wav".to_string());

        let (rig, midi, _) = mock_rig("mock-midi", "mock-audio");
        let result = Sampler::new(&config)
            .unwrap()
            .run(&rig, &CancelHandle::new(), |_| {});
        match result {
            Err(e @ Error::NoteFailed { note: 60, .. }) => assert!(e.is_recoverable()),
            other => panic!("unexpected result: {:?}", other),
        }

        config.continue_on_write_error = Some(true);
        let mut progress = Vec::new();
        let summary = Sampler::new(&config)
            .unwrap()
            .run(&rig, &CancelHandle::new(), |p| progress.push(p.current))
            .unwrap();
        assert!(summary.reports.is_empty());
        assert_eq!(summary.skipped, vec![60, 61]);
        assert_eq!(progress, vec![1, 2]);

        // The file is created before anything is played.
        assert!(midi.sent().is_empty());
    }

    #[test]
    fn test_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = Sampler::new(&config(dir.path(), 60, 61)).unwrap();
        let (rig, _, _) = mock_rig("mock-midi", "mock-audio");

        let mut handle = sampler.spawn(rig).unwrap();
        let mut currents = Vec::new();
        let summary = loop {
            match handle.blocking_recv() {
                Some(SamplerEvent::Progress(progress)) => currents.push(progress.current),
                Some(SamplerEvent::Finished(result)) => break result.unwrap(),
                None => panic!("sampler thread went away"),
            }
        };

        assert_eq!(currents, vec![1, 2]);
        assert_eq!(summary.reports.len(), 2);
        assert!(handle.blocking_recv().is_none());
    }

    #[test]
    fn test_cancel_spawned() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), 60, 72);
        config.sustain = Some("10s".to_string());
        config.sample_length = Some("11s".to_string());
        let (rig, midi, audio) = mock_rig("mock-midi", "mock-audio");

        let mut handle = Sampler::new(&config).unwrap().spawn(rig).unwrap();
        eventually(|| midi.sent().len() == 1, "note was never played");
        handle.cancel();

        match handle.blocking_recv() {
            Some(SamplerEvent::Finished(Err(Error::NoteFailed { note, source }))) => {
                assert_eq!(note, 60);
                assert!(matches!(*source, Error::InterruptedWait));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // The held note was released and the devices closed.
        assert_eq!(midi.sent()[1], vec![0x80, 60, 127]);
        assert_eq!(midi.open_connections(), 0);
        assert_eq!(audio.open_connections(), 0);
    }
}
