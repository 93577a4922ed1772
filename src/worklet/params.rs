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

//! Automated voice parameters shared between the instrument and the audio thread.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::engine::{BlockParams, VoiceParams, MACRO_COUNT};
use crate::voices::{AutomationSink, VoiceParam};

const DEFAULT_FREQUENCY: f32 = 440.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum EventKind {
    Set,
    Ramp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Event {
    time: f64,
    value: f32,
    kind: EventKind,
}

/// The time ordered automation events of one parameter.
#[derive(Debug, Clone)]
struct Lane {
    initial: f32,
    events: Vec<Event>,
}

impl Lane {
    fn new(initial: f32) -> Lane {
        Lane {
            initial,
            events: Vec::new(),
        }
    }

    /// Inserts after any event at the same time so same-time events apply in call order.
    fn insert(&mut self, event: Event) {
        let position = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(position, event);
    }

    fn cancel_from(&mut self, from: f64) {
        self.events.retain(|e| e.time < from);
    }

    fn value_at(&self, time: f64) -> f32 {
        let next = self.events.partition_point(|e| e.time <= time);
        let (start_time, start_value) = match next.checked_sub(1) {
            Some(previous) => (self.events[previous].time, self.events[previous].value),
            None => (f64::NEG_INFINITY, self.initial),
        };

        match self.events.get(next) {
            Some(ramp) if ramp.kind == EventKind::Ramp && start_time.is_finite() => {
                let progress = (time - start_time) / (ramp.time - start_time);
                start_value + (ramp.value - start_value) * progress as f32
            }
            _ => start_value,
        }
    }

    /// Drops events that can no longer affect values at or after `time`.
    fn prune(&mut self, time: f64) {
        let settled = self.events.partition_point(|e| e.time <= time);
        if settled > 1 {
            self.events.drain(..settled - 1);
        }
    }
}

/// Per-voice gate, frequency, and gain automation plus the global macro and
/// master gain controls. Each lane has its own lock so the audio thread only
/// ever contends with a trigger on the same parameter.
#[derive(Debug)]
pub struct ParameterBank {
    voices: usize,
    lanes: Vec<Mutex<Lane>>,
    macros: [AtomicU32; MACRO_COUNT],
    master_gain: AtomicU32,
}

impl ParameterBank {
    /// Creates a bank for the given number of voices with gates closed.
    pub fn new(voices: usize) -> ParameterBank {
        let lanes = (0..voices)
            .flat_map(|_| VoiceParam::ALL)
            .map(|param| {
                Mutex::new(Lane::new(match param {
                    VoiceParam::Gate | VoiceParam::Gain => 0.0,
                    VoiceParam::Frequency => DEFAULT_FREQUENCY,
                }))
            })
            .collect();
        ParameterBank {
            voices,
            lanes,
            macros: std::array::from_fn(|_| AtomicU32::new(0f32.to_bits())),
            master_gain: AtomicU32::new(1f32.to_bits()),
        }
    }

    /// Returns the number of voices.
    pub fn voices(&self) -> usize {
        self.voices
    }

    fn lane(&self, voice: usize, param: VoiceParam) -> Option<&Mutex<Lane>> {
        let offset = match param {
            VoiceParam::Gate => 0,
            VoiceParam::Frequency => 1,
            VoiceParam::Gain => 2,
        };
        if voice >= self.voices {
            return None;
        }
        self.lanes.get(voice * VoiceParam::ALL.len() + offset)
    }

    /// Returns the automated value of the parameter at `time`.
    pub fn value_at(&self, voice: usize, param: VoiceParam, time: f64) -> f32 {
        self.lane(voice, param)
            .map(|lane| lane.lock().value_at(time))
            .unwrap_or_default()
    }

    /// Sets a macro knob. Out of range indices are ignored.
    pub fn set_macro(&self, index: usize, value: f32) {
        if let Some(knob) = self.macros.get(index) {
            knob.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn macro_value(&self, index: usize) -> Option<f32> {
        self.macros
            .get(index)
            .map(|knob| f32::from_bits(knob.load(Ordering::Relaxed)))
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain
            .store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    /// Evaluates every parameter at the start of a block and forgets
    /// automation that has already played out.
    pub fn block_params(&self, time: f64, frames: usize) -> BlockParams {
        let voices = (0..self.voices)
            .map(|voice| VoiceParams {
                gate: self.evaluate(voice, VoiceParam::Gate, time),
                frequency: self.evaluate(voice, VoiceParam::Frequency, time),
                gain: self.evaluate(voice, VoiceParam::Gain, time),
            })
            .collect();

        BlockParams {
            time,
            frames,
            voices,
            macros: std::array::from_fn(|i| f32::from_bits(self.macros[i].load(Ordering::Relaxed))),
            master_gain: self.master_gain(),
        }
    }

    fn evaluate(&self, voice: usize, param: VoiceParam, time: f64) -> f32 {
        self.lane(voice, param)
            .map(|lane| {
                let mut lane = lane.lock();
                let value = lane.value_at(time);
                lane.prune(time);
                value
            })
            .unwrap_or_default()
    }
}

impl AutomationSink for ParameterBank {
    fn cancel_scheduled(&self, voice: usize, param: VoiceParam, from: f64) {
        if let Some(lane) = self.lane(voice, param) {
            lane.lock().cancel_from(from);
        }
    }

    fn cancel_and_hold(&self, voice: usize, param: VoiceParam, time: f64) {
        if let Some(lane) = self.lane(voice, param) {
            let mut lane = lane.lock();
            let held = lane.value_at(time);
            lane.cancel_from(time);
            lane.insert(Event {
                time,
                value: held,
                kind: EventKind::Set,
            });
        }
    }

    fn set_value_at(&self, voice: usize, param: VoiceParam, value: f32, time: f64) {
        if let Some(lane) = self.lane(voice, param) {
            lane.lock().insert(Event {
                time,
                value,
                kind: EventKind::Set,
            });
        }
    }

    fn ramp_to_value_at(&self, voice: usize, param: VoiceParam, value: f32, end_time: f64) {
        if let Some(lane) = self.lane(voice, param) {
            lane.lock().insert(Event {
                time: end_time,
                value,
                kind: EventKind::Ramp,
            });
        }
    }
}

/// The audio clock: frames rendered so far at a fixed sample rate. Clones
/// share the same counter.
#[derive(Debug, Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> AudioClock {
        AudioClock {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Returns the current audio time in seconds.
    pub fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Moves the clock forward after a block has been rendered.
    pub fn advance(&self, frames: usize) {
        self.frames.fetch_add(frames as u64, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let bank = ParameterBank::new(2);
        assert_eq!(bank.value_at(0, VoiceParam::Gate, 1.0), 0.0);
        assert_eq!(bank.value_at(1, VoiceParam::Frequency, 1.0), 440.0);
        assert_eq!(bank.value_at(5, VoiceParam::Gate, 1.0), 0.0);
        assert_eq!(bank.master_gain(), 1.0);
    }

    #[test]
    fn test_set_values_apply_from_their_time() {
        let bank = ParameterBank::new(1);
        bank.set_value_at(0, VoiceParam::Gate, 0.0, 1.0);
        bank.set_value_at(0, VoiceParam::Gate, 1.0, 1.005);

        assert_eq!(bank.value_at(0, VoiceParam::Gate, 1.0), 0.0);
        assert_eq!(bank.value_at(0, VoiceParam::Gate, 1.004), 0.0);
        assert_eq!(bank.value_at(0, VoiceParam::Gate, 1.005), 1.0);
        assert_eq!(bank.value_at(0, VoiceParam::Gate, 9.0), 1.0);
    }

    #[test]
    fn test_same_time_events_apply_in_call_order() {
        let bank = ParameterBank::new(1);
        bank.set_value_at(0, VoiceParam::Gate, 1.0, 2.0);
        bank.set_value_at(0, VoiceParam::Gate, 0.0, 2.0);
        assert_eq!(bank.value_at(0, VoiceParam::Gate, 2.0), 0.0);
    }

    #[test]
    fn test_ramp_interpolates() {
        let bank = ParameterBank::new(1);
        bank.set_value_at(0, VoiceParam::Frequency, 100.0, 1.0);
        bank.ramp_to_value_at(0, VoiceParam::Frequency, 200.0, 2.0);

        assert_eq!(bank.value_at(0, VoiceParam::Frequency, 0.5), 440.0);
        assert!((bank.value_at(0, VoiceParam::Frequency, 1.5) - 150.0).abs() < 1e-3);
        assert_eq!(bank.value_at(0, VoiceParam::Frequency, 2.5), 200.0);
    }

    #[test]
    fn test_cancel_and_hold_mid_ramp() {
        let bank = ParameterBank::new(1);
        bank.set_value_at(0, VoiceParam::Frequency, 100.0, 0.0);
        bank.ramp_to_value_at(0, VoiceParam::Frequency, 200.0, 1.0);

        bank.cancel_and_hold(0, VoiceParam::Frequency, 0.25);
        bank.ramp_to_value_at(0, VoiceParam::Frequency, 300.0, 0.75);

        assert!((bank.value_at(0, VoiceParam::Frequency, 0.25) - 125.0).abs() < 1e-3);
        assert!((bank.value_at(0, VoiceParam::Frequency, 0.5) - 212.5).abs() < 1e-3);
        assert_eq!(bank.value_at(0, VoiceParam::Frequency, 1.0), 300.0);
    }

    #[test]
    fn test_cancel_scheduled_keeps_earlier_events() {
        let bank = ParameterBank::new(1);
        bank.set_value_at(0, VoiceParam::Gain, 0.5, 1.0);
        bank.set_value_at(0, VoiceParam::Gain, 0.9, 2.0);
        bank.cancel_scheduled(0, VoiceParam::Gain, 1.5);

        assert_eq!(bank.value_at(0, VoiceParam::Gain, 3.0), 0.5);
    }

    #[test]
    fn test_block_params_prunes_without_changing_values() {
        let bank = ParameterBank::new(1);
        bank.set_value_at(0, VoiceParam::Frequency, 100.0, 0.0);
        bank.set_value_at(0, VoiceParam::Frequency, 150.0, 0.5);
        bank.ramp_to_value_at(0, VoiceParam::Frequency, 250.0, 1.5);
        bank.set_macro(1, 0.25);
        bank.set_master_gain(0.8);

        let params = bank.block_params(1.0, 128);
        assert_eq!(params.frames, 128);
        assert!((params.voices[0].frequency - 200.0).abs() < 1e-3);
        assert_eq!(params.macros, [0.0, 0.25, 0.0, 0.0]);
        assert_eq!(params.master_gain, 0.8);

        // The ramp still starts from the last settled event.
        assert!((bank.value_at(0, VoiceParam::Frequency, 1.0) - 200.0).abs() < 1e-3);
        assert_eq!(bank.value_at(0, VoiceParam::Frequency, 2.0), 250.0);
    }

    #[test]
    fn test_clock_advances_by_frames() {
        let clock = AudioClock::new(48000);
        let shared = clock.clone();
        assert_eq!(clock.now(), 0.0);
        shared.advance(48000);
        assert_eq!(clock.now(), 1.0);
        assert_eq!(clock.frames(), 48000);
    }
}
