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

use serde::Deserialize;

use crate::Error;

/// Spellings for each pitch class. The first entry is the canonical spelling.
const PITCH_CLASSES: [&[&str]; 12] = [
    &["C"],
    &["Db", "C#"],
    &["D"],
    &["Eb", "D#"],
    &["E"],
    &["F"],
    &["Gb", "F#"],
    &["G"],
    &["Ab", "G#"],
    &["A"],
    &["Bb", "A#"],
    &["B"],
];

/// Converts a note in scientific pitch notation (e.g. C4, C#3, Db-1) into a MIDI note number.
pub fn to_note_number(name: &str) -> Result<u8, Error> {
    let name = name.trim();
    let invalid = || Error::InvalidNoteName(name.to_string());

    let (offset, spelling) = PITCH_CLASSES
        .iter()
        .enumerate()
        .flat_map(|(offset, spellings)| spellings.iter().map(move |s| (offset, *s)))
        .filter(|(_, spelling)| name.starts_with(spelling))
        .max_by_key(|(_, spelling)| spelling.len())
        .ok_or_else(invalid)?;

    let octave: i32 = name[spelling.len()..].parse().map_err(|_| invalid())?;
    let number = offset as i32 + (octave + 1) * 12;

    u8::try_from(number)
        .ok()
        .filter(|number| *number <= 127)
        .ok_or_else(invalid)
}

/// Converts a MIDI note number into its canonical name, e.g. 61 becomes Db4.
pub fn to_note_name(number: u8) -> String {
    let offset = (number % 12) as usize;
    let octave = (number as i32 - offset as i32) / 12 - 1;
    format!("{}{}", PITCH_CLASSES[offset][0], octave)
}

/// A note as written in a configuration file: either a MIDI number or a name.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum NoteSpec {
    Number(u8),
    Name(String),
}

impl NoteSpec {
    /// Resolves the spec into a MIDI note number.
    pub fn resolve(&self) -> Result<u8, Error> {
        match self {
            NoteSpec::Number(number) if *number <= 127 => Ok(*number),
            NoteSpec::Number(number) => Err(Error::InvalidNoteName(number.to_string())),
            NoteSpec::Name(name) => match name.trim().parse::<u8>() {
                Ok(number) => NoteSpec::Number(number).resolve(),
                Err(_) => to_note_number(name),
            },
        }
    }
}

impl From<u8> for NoteSpec {
    fn from(number: u8) -> Self {
        NoteSpec::Number(number)
    }
}

impl fmt::Display for NoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteSpec::Number(number) => write!(f, "{}", number),
            NoteSpec::Name(name) => write!(f, "{}", name),
        }
    }
}
