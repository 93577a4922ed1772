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
mod script;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use synthbridge::config::Config;
use synthbridge::instrument::Instrument;
use synthbridge::voices::TraceSink;
use synthbridge::worklet::{mock, WorkletProcessor};
use tracing_subscriber::EnvFilter;

use crate::script::{Action, Script};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Voice allocation and worklet messaging for a polyphonic synth."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plays a performance script against the mock engine and prints every
    /// voice allocation decision.
    Simulate {
        /// The path to the performance script.
        script_path: PathBuf,
        /// The path to the configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Prints the effective configuration.
    Config {
        /// The path to the configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    Ok(match path {
        Some(path) => Config::deserialize(path)?,
        None => Config::default(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            script_path,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let script = Script::deserialize(&script_path)?;
            simulate(&config, script).await?;
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", serde_yml::to_string(&config)?);
        }
    }

    Ok(())
}

/// Renders blocks offline, applying each script event once the audio clock reaches it.
async fn simulate(config: &Config, script: Script) -> Result<(), Box<dyn Error>> {
    let (trace, trace_rx) = TraceSink::channel();
    let (instrument, mut processor) = Instrument::with_engine(config, mock::Engine::new(), trace)?;
    let instrument = Arc::new(instrument);
    processor.initialize()?;

    let mut out = vec![0.0f32; processor.block_size() * 2];
    let mut peak = 0.0f32;

    if let Some(patch) = script.patch {
        let loader = instrument.clone();
        let task = tokio::spawn(async move { loader.load_patch(&patch).await });
        while !task.is_finished() {
            processor.process(&mut out);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let voice_limit = task.await??;
        println!("Patch loaded with {} voices", voice_limit);
    }

    let mut events = script.events;
    events.sort_by(|a, b| a.at.total_cmp(&b.at));
    let end = events.last().map(|event| event.at).unwrap_or(0.0) + script.tail;

    for event in events {
        render_until(&mut processor, &mut out, &mut peak, event.at);
        match event.action {
            Action::NoteOn { note, velocity } => {
                instrument.note_on(note, velocity, event.at);
            }
            Action::NoteOff { note } => {
                instrument.note_off(note, event.at);
            }
            Action::Schedule {
                note,
                velocity,
                duration,
            } => {
                instrument.schedule_note(note, velocity, event.at, duration);
            }
            Action::Midi { bytes } => instrument.handle_midi(&bytes, event.at)?,
            Action::StopAll => instrument.stop_all(),
        }
        for decision in trace_rx.try_iter() {
            println!("{:>9.4}s  {:?}", event.at, decision);
        }
    }

    render_until(&mut processor, &mut out, &mut peak, end);
    println!(
        "Rendered {:.3}s ({} frames), peak level {:.3}",
        processor.clock().now(),
        processor.clock().frames(),
        peak
    );
    instrument.shutdown();
    Ok(())
}

fn render_until(
    processor: &mut WorkletProcessor<mock::Engine>,
    out: &mut [f32],
    peak: &mut f32,
    time: f64,
) {
    while processor.clock().now() < time {
        processor.process(out);
        *peak = out.iter().fold(*peak, |peak, sample| peak.max(sample.abs()));
    }
}
