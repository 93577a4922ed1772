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

//! Voice allocation and scheduling for the fixed hardware voice pool.
//!
//! This module provides:
//! - The voice table and note registry backing allocation
//! - A release-aware allocator with round-robin reuse and voice stealing
//! - A scheduler that turns allocation decisions into parameter automation
//! - A structured trace of every allocation decision

mod allocator;
mod events;
mod registry;
mod scheduler;
mod table;

pub use allocator::{Allocation, VoiceAllocator};
pub use events::{StealReason, TraceSink, VoiceEvent};
pub use registry::NoteRegistry;
pub use scheduler::{AutomationSink, GateAction, Scheduler, TriggerOptions, VoiceParam};
pub use table::{Voice, VoiceTable};

/// Converts a MIDI note number to its equal tempered frequency (A4 = 440Hz).
pub fn note_to_frequency(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}
