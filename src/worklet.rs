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

//! The real-time side: the engine host, its parameter automation, and the
//! thread that drives it.

mod engine;
pub mod mock;
mod params;
mod processor;
mod render;

pub use engine::{BlockParams, Connection, EngineError, SynthEngine, VoiceParams, MACRO_COUNT};
pub use params::{AudioClock, ParameterBank};
pub use processor::WorkletProcessor;
pub use render::{spawn_render_thread, CancelHandle};
