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
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crate::{audio, midi, rig::Rig};

/// Builds a rig out of mock devices and hands back the mocks so tests can inspect them.
pub fn mock_rig(
    midi_name: &str,
    audio_name: &str,
) -> (Rig, midi::mock::Device, audio::mock::Device) {
    let midi = midi::mock::Device::get(midi_name);
    let audio = audio::mock::Device::get(audio_name);
    let rig = Rig::new(Arc::new(midi.clone()), Arc::new(audio.clone()));
    (rig, midi, audio)
}

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(100);
    let mut tick = Duration::from_millis(5);

    loop {
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}
