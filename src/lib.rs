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

//! Voice allocation and worklet messaging for a polyphonic synth front-end.
//!
//! An [`instrument::Instrument`] owns a fixed pool of voices, decides which
//! voice plays each note, and schedules gate, frequency, and gain automation
//! that the audio thread reads every block. Structural edits travel to the
//! engine over a correlated request/response channel.

pub mod config;
pub mod instrument;
pub mod protocol;
pub mod voices;
pub mod worklet;

#[cfg(test)]
mod testutil;
