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
use std::error::Error;
use std::path::PathBuf;

use autosampler::config::SamplerConfig;
use autosampler::note::{to_note_name, NoteSpec};
use autosampler::rig::Rig;
use autosampler::sampler::{self, Sampler, SamplerEvent};
use autosampler::{audio, midi, util};
use clap::{crate_version, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Samples a MIDI instrument into one WAV file per note."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio input devices.
    Devices {},
    /// Lists the available MIDI output devices.
    MidiDevices {},
    /// Prints the notes that would be sampled.
    Notes {
        /// The first note, as a number or a name like C2.
        start: String,
        /// The last note. Always included.
        end: String,
        /// Distance in semitones between sampled notes.
        #[arg[short, long, default_value_t = 1]]
        interval: u8,
    },
    /// Samples the instrument.
    Sample {
        /// A YAML sampler config. Flags override its values.
        #[arg[short, long]]
        config: Option<PathBuf>,
        /// The MIDI output to trigger notes on.
        #[arg[short, long]]
        midi_device: Option<String>,
        /// The audio input to record from.
        #[arg[short, long]]
        audio_device: Option<String>,
        /// The first note, as a number or a name like C2.
        #[arg[short, long]]
        start: Option<String>,
        /// The last note. Always included.
        #[arg[short, long]]
        end: Option<String>,
        /// Distance in semitones between sampled notes.
        #[arg[short, long]]
        interval: Option<u8>,
        /// How long each note is held, e.g. 1s or 500ms.
        #[arg[long]]
        sustain: Option<String>,
        /// How long to record before listening for silence, e.g. 2s.
        #[arg[short, long]]
        length: Option<String>,
        /// The directory to write samples to.
        #[arg[short, long]]
        output: Option<PathBuf>,
        /// The file name template. Supports {note}, {name} and {velocity}.
        #[arg[short, long]]
        naming: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Notes {
            start,
            end,
            interval,
        } => {
            let notes = sampler::note_selection(
                NoteSpec::Name(start).resolve()?,
                NoteSpec::Name(end).resolve()?,
                interval,
            )?;

            println!("Notes (count: {}):", notes.len());
            for note in notes {
                println!("- {} ({})", to_note_name(note), note);
            }
        }
        Commands::Sample {
            config,
            midi_device,
            audio_device,
            start,
            end,
            interval,
            sustain,
            length,
            output,
            naming,
        } => {
            let mut sampler_config = match config {
                Some(path) => SamplerConfig::deserialize(&path)?,
                None => SamplerConfig::default(),
            };
            if midi_device.is_some() {
                sampler_config.midi_device = midi_device;
            }
            if audio_device.is_some() {
                sampler_config.audio_device = audio_device;
            }
            if let Some(start) = start {
                sampler_config.start_note = Some(NoteSpec::Name(start));
            }
            if let Some(end) = end {
                sampler_config.end_note = Some(NoteSpec::Name(end));
            }
            if interval.is_some() {
                sampler_config.interval = interval;
            }
            if sustain.is_some() {
                sampler_config.sustain = sustain;
            }
            if length.is_some() {
                sampler_config.sample_length = length;
            }
            if output.is_some() {
                sampler_config.output_directory = output;
            }
            if naming.is_some() {
                sampler_config.naming = naming;
            }

            let sampler = Sampler::new(&sampler_config)?;
            let rig = Rig::from_names(
                sampler_config.midi_device()?,
                sampler_config.audio_device()?,
            )?;

            println!(
                "Sampling {} notes, estimated time {}.",
                sampler.notes().len(),
                util::format_duration(sampler.estimated_duration())
            );

            let mut handle = sampler.spawn(rig)?;
            let mut watching_ctrl_c = true;
            loop {
                tokio::select! {
                    event = handle.recv() => match event {
                        Some(SamplerEvent::Progress(progress)) => println!(
                            "{} {} {}/{}",
                            progress.note, progress.velocity, progress.current, progress.total
                        ),
                        Some(SamplerEvent::Finished(Ok(summary))) => {
                            for note in summary.skipped {
                                println!("Skipped {} ({})", to_note_name(note), note);
                            }
                            println!("Finished sampling");
                            return Ok(());
                        }
                        Some(SamplerEvent::Finished(Err(e))) => {
                            if let autosampler::Error::NoteFailed { note, .. } = &e {
                                eprintln!("Sampling failed at {} ({}).", to_note_name(*note), note);
                            }
                            return Err(e.into());
                        }
                        None => return Err("sampler exited without a result".into()),
                    },
                    result = tokio::signal::ctrl_c(), if watching_ctrl_c => {
                        watching_ctrl_c = false;
                        match result {
                            Ok(()) => {
                                println!("Cancelling, releasing the current note.");
                                handle.cancel();
                            }
                            Err(e) => warn!(err = %e, "Unable to listen for ctrl-c."),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
