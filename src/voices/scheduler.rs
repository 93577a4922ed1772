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

//! Turns allocation decisions into timed gate, frequency, and gain automation.

use std::time::Duration;

use tracing::debug;

use crate::config::GatePolicy;

/// A per-voice parameter read by the audio callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceParam {
    Gate,
    Frequency,
    Gain,
}

impl VoiceParam {
    pub const ALL: [VoiceParam; 3] = [VoiceParam::Gate, VoiceParam::Frequency, VoiceParam::Gain];
}

/// A thread-safe parameter automation primitive. Times are audio clock seconds.
pub trait AutomationSink: Send + Sync {
    /// Removes every event scheduled at or after `from`.
    fn cancel_scheduled(&self, voice: usize, param: VoiceParam, from: f64);

    /// Removes every event at or after `time` and pins the value the parameter
    /// would have had at `time`, so a following ramp starts from there.
    fn cancel_and_hold(&self, voice: usize, param: VoiceParam, time: f64);

    /// Jumps to `value` at `time`.
    fn set_value_at(&self, voice: usize, param: VoiceParam, value: f32, time: f64);

    /// Ramps linearly from the previous event to `value`, arriving at `end_time`.
    fn ramp_to_value_at(&self, voice: usize, param: VoiceParam, value: f32, end_time: f64);
}

/// How the triggering voice was struck.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerOptions {
    /// The voice was already sounding (retriggered or stolen).
    pub retrigger: bool,
    /// The caller permits a legato glide instead of a new attack.
    pub legato_allowed: bool,
}

/// What a trigger did to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// Gate forced low then high again to restart the envelope.
    Pulse,
    /// Gate set high directly.
    Open,
    /// Gate held high while the frequency glides.
    Legato,
}

/// Schedules voice automation. Every trigger cancels the voice's pending
/// automation first so events on a parameter stay in time order.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pulse_duration: f64,
    gate_policy: GatePolicy,
    voice_limit: usize,
    glide_time: f64,
}

impl Scheduler {
    /// Creates a scheduler. The gate pulse lasts at least one processing block.
    pub fn new(gate_pulse_min: Duration, block_duration: f64, gate_policy: GatePolicy) -> Scheduler {
        Scheduler {
            pulse_duration: gate_pulse_min.as_secs_f64().max(block_duration),
            gate_policy,
            voice_limit: 1,
            glide_time: 0.0,
        }
    }

    /// Updates the patch dependent settings after a patch load.
    pub fn set_patch(&mut self, voice_limit: usize, glide_time: f64) {
        self.voice_limit = voice_limit;
        self.glide_time = glide_time.max(0.0);
    }

    /// Returns the gate pulse duration in seconds.
    pub fn pulse_duration(&self) -> f64 {
        self.pulse_duration
    }

    /// Returns the gate policy.
    pub fn gate_policy(&self) -> GatePolicy {
        self.gate_policy
    }

    fn legato(&self, options: TriggerOptions) -> bool {
        self.gate_policy == GatePolicy::LegatoInMono
            && options.legato_allowed
            && self.voice_limit == 1
            && self.glide_time > 0.0
    }

    /// Starts a note on the voice at `time`.
    pub fn trigger(
        &self,
        sink: &dyn AutomationSink,
        voice: usize,
        frequency: f32,
        velocity: u8,
        time: f64,
        options: TriggerOptions,
    ) -> GateAction {
        let legato = options.retrigger && self.legato(options);

        sink.cancel_scheduled(voice, VoiceParam::Gate, time);
        sink.cancel_scheduled(voice, VoiceParam::Gain, time);

        if legato {
            sink.cancel_and_hold(voice, VoiceParam::Frequency, time);
            sink.ramp_to_value_at(voice, VoiceParam::Frequency, frequency, time + self.glide_time);
        } else {
            sink.cancel_scheduled(voice, VoiceParam::Frequency, time);
            sink.set_value_at(voice, VoiceParam::Frequency, frequency, time);
        }
        sink.set_value_at(voice, VoiceParam::Gain, velocity as f32 / 127.0, time);

        let action = if !options.retrigger {
            sink.set_value_at(voice, VoiceParam::Gate, 1.0, time);
            GateAction::Open
        } else if legato {
            sink.set_value_at(voice, VoiceParam::Gate, 1.0, time);
            GateAction::Legato
        } else {
            sink.set_value_at(voice, VoiceParam::Gate, 0.0, time);
            sink.set_value_at(voice, VoiceParam::Gate, 1.0, time + self.pulse_duration);
            GateAction::Pulse
        };

        debug!(voice, frequency, velocity, time, ?action, "Voice triggered");
        action
    }

    /// Closes the voice's gate at `time`, leaving frequency and gain automation alone.
    pub fn release(&self, sink: &dyn AutomationSink, voice: usize, time: f64) {
        sink.cancel_scheduled(voice, VoiceParam::Gate, time);
        sink.set_value_at(voice, VoiceParam::Gate, 0.0, time);
        debug!(voice, time, "Voice gate closed");
    }

    /// Cancels all automation on every voice from `now` and closes every gate.
    pub fn stop_all(&self, sink: &dyn AutomationSink, voices: usize, now: f64) {
        for voice in 0..voices {
            for param in VoiceParam::ALL {
                sink.cancel_scheduled(voice, param, now);
            }
            sink.set_value_at(voice, VoiceParam::Gate, 0.0, now);
        }
    }
}
