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
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use crate::note::NoteSpec;

pub use self::error::ConfigError;

mod error;

const DEFAULT_INTERVAL: u8 = 1;
const DEFAULT_SUSTAIN: Duration = Duration::from_secs(1);
const DEFAULT_SAMPLE_LENGTH: Duration = Duration::from_secs(2);
const DEFAULT_MAX_TAIL: Duration = crate::capture::DEFAULT_MAX_TAIL;
const DEFAULT_OUTPUT_DIRECTORY: &str = "samples";

/// Default file name template.
pub const DEFAULT_NAMING: &str = "sample_{note}_{velocity}.wav";

/// A YAML representation of a sampling run. Every field may also come from the command line,
/// which is why nothing is mandatory at parse time.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SamplerConfig {
    /// The MIDI output that triggers the instrument.
    pub midi_device: Option<String>,
    /// The audio input the instrument is recorded from.
    pub audio_device: Option<String>,
    /// The first note to sample, as a number or a name like C4.
    pub start_note: Option<NoteSpec>,
    /// The last note to sample. Always included.
    pub end_note: Option<NoteSpec>,
    /// Distance in semitones between sampled notes.
    pub interval: Option<u8>,
    /// How long each note is held, e.g. "1s" or "500ms".
    pub sustain: Option<String>,
    /// How long to record before listening for silence.
    pub sample_length: Option<String>,
    /// The longest the tail may ring on before the recording is cut.
    pub max_tail: Option<String>,
    /// Where the WAV files go.
    pub output_directory: Option<PathBuf>,
    /// File name template. Supports {note}, {name} and {velocity}.
    pub naming: Option<String>,
    /// Keep going when a single file can't be written.
    pub continue_on_write_error: Option<bool>,
}

impl SamplerConfig {
    /// Deserializes a file from the path into a sampler configuration.
    pub fn deserialize(path: &Path) -> Result<SamplerConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<SamplerConfig>()?)
    }

    pub fn midi_device(&self) -> Result<&str, ConfigError> {
        self.midi_device
            .as_deref()
            .ok_or(ConfigError::Missing {
                field: "midi_device",
            })
    }

    pub fn audio_device(&self) -> Result<&str, ConfigError> {
        self.audio_device
            .as_deref()
            .ok_or(ConfigError::Missing {
                field: "audio_device",
            })
    }

    pub fn start_note(&self) -> Result<u8, ConfigError> {
        resolve_note("start_note", self.start_note.as_ref())
    }

    pub fn end_note(&self) -> Result<u8, ConfigError> {
        resolve_note("end_note", self.end_note.as_ref())
    }

    /// Returns the interval (default: 1). Zero is rejected.
    pub fn interval(&self) -> Result<u8, ConfigError> {
        match self.interval.unwrap_or(DEFAULT_INTERVAL) {
            0 => Err(ConfigError::Invalid {
                field: "interval",
                reason: "must be at least 1".to_string(),
            }),
            interval => Ok(interval),
        }
    }

    /// Returns the sustain (default: 1s).
    pub fn sustain(&self) -> Result<Duration, ConfigError> {
        parse_duration("sustain", self.sustain.as_ref(), DEFAULT_SUSTAIN)
    }

    /// Returns the sample length (default: 2s).
    pub fn sample_length(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "sample_length",
            self.sample_length.as_ref(),
            DEFAULT_SAMPLE_LENGTH,
        )
    }

    /// Returns the maximum tail (default: 30s).
    pub fn max_tail(&self) -> Result<Duration, ConfigError> {
        parse_duration("max_tail", self.max_tail.as_ref(), DEFAULT_MAX_TAIL)
    }

    /// Returns the output directory (default: samples).
    pub fn output_directory(&self) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIRECTORY))
    }

    /// Returns the file name template. Empty templates fall back to the default.
    pub fn naming(&self) -> &str {
        match self.naming.as_deref() {
            Some(naming) if !naming.trim().is_empty() => naming,
            _ => DEFAULT_NAMING,
        }
    }

    pub fn continue_on_write_error(&self) -> bool {
        self.continue_on_write_error.unwrap_or(false)
    }
}

fn resolve_note(field: &'static str, note: Option<&NoteSpec>) -> Result<u8, ConfigError> {
    note.ok_or(ConfigError::Missing { field })?
        .resolve()
        .map_err(|e| ConfigError::Invalid {
            field,
            reason: e.to_string(),
        })
}

fn parse_duration(
    field: &'static str,
    value: Option<&String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => Ok(DurationString::from_string(value.clone())
            .map_err(|e| ConfigError::Duration {
                field,
                reason: e.to_string(),
            })?
            .into()),
        None => Ok(default),
    }
}
