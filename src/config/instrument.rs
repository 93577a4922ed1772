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
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{parse_duration, ConfigError};

/// The hardware voice pool never exceeds this many voices.
pub const MAX_POOL_SIZE: usize = 8;

const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_BLOCK_SIZE: usize = 128;
const DEFAULT_GATE_PULSE_MIN: Duration = Duration::from_millis(5);
const DEFAULT_RELEASE_GUARD: Duration = Duration::from_millis(100);

/// How a retriggered voice treats its gate.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Pulse the gate on retrigger unless a single voice patch is gliding legato.
    #[default]
    LegatoInMono,
    /// Pulse the gate on every retrigger or steal.
    AlwaysPulse,
}

/// A YAML representation of the instrument settings.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct InstrumentConfig {
    /// The number of hardware voices the engine is started with.
    #[serde(default = "default_pool_size")]
    pool_size: usize,

    /// The audio context sample rate.
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,

    /// The number of frames in one audio processing block.
    #[serde(default = "default_block_size")]
    block_size: usize,

    /// The shortest gate pulse used to force an envelope retrigger.
    gate_pulse_min: Option<String>,

    /// Added to the longest envelope release before a releasing voice may be reused.
    release_guard: Option<String>,

    /// Retrigger gating policy.
    #[serde(default)]
    gate_policy: GatePolicy,

    /// Whether a held note may claim a second voice when struck again.
    #[serde(default)]
    allow_duplicate_notes: bool,
}

fn default_pool_size() -> usize {
    MAX_POOL_SIZE
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        InstrumentConfig {
            pool_size: default_pool_size(),
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            gate_pulse_min: None,
            release_guard: None,
            gate_policy: GatePolicy::default(),
            allow_duplicate_notes: false,
        }
    }
}

impl InstrumentConfig {
    /// Creates a new instrument configuration with default timing.
    pub fn new(pool_size: usize, sample_rate: u32, block_size: usize) -> InstrumentConfig {
        InstrumentConfig {
            pool_size,
            sample_rate,
            block_size,
            ..Default::default()
        }
    }

    /// Returns a copy of this configuration with the given gate policy.
    pub fn with_gate_policy(mut self, gate_policy: GatePolicy) -> InstrumentConfig {
        self.gate_policy = gate_policy;
        self
    }

    /// Returns a copy of this configuration with duplicate notes allowed or not.
    pub fn with_duplicate_notes(mut self, allow: bool) -> InstrumentConfig {
        self.allow_duplicate_notes = allow;
        self
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::Invalid {
                field: "instrument.pool_size",
                reason: format!("must be between 1 and {}", MAX_POOL_SIZE),
            });
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "instrument.sample_rate",
                reason: "must be positive".to_string(),
            });
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid {
                field: "instrument.block_size",
                reason: "must be positive".to_string(),
            });
        }
        self.gate_pulse_min()?;
        self.release_guard()?;
        Ok(())
    }

    /// Returns the voice pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the block size in frames.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the minimum gate pulse duration.
    pub fn gate_pulse_min(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "instrument.gate_pulse_min",
            self.gate_pulse_min.as_ref(),
            DEFAULT_GATE_PULSE_MIN,
        )
    }

    /// Returns the release guard band.
    pub fn release_guard(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "instrument.release_guard",
            self.release_guard.as_ref(),
            DEFAULT_RELEASE_GUARD,
        )
    }

    /// Returns the gate policy.
    pub fn gate_policy(&self) -> GatePolicy {
        self.gate_policy
    }

    /// Returns whether duplicate notes may claim extra voices.
    pub fn allow_duplicate_notes(&self) -> bool {
        self.allow_duplicate_notes
    }

    /// Returns the duration of one processing block in seconds.
    pub fn block_duration(&self) -> f64 {
        self.block_size as f64 / self.sample_rate as f64
    }
}
