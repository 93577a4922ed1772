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

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PATCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A YAML representation of the worklet request/response settings.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ProtocolConfig {
    /// How long a correlated request waits for its response.
    timeout: Option<String>,

    /// How long a patch load waits for its response.
    patch_timeout: Option<String>,

    /// How many requests may be held before the engine reports ready.
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            timeout: None,
            patch_timeout: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ProtocolConfig {
    /// Creates a new protocol configuration with default timeouts.
    pub fn new(queue_capacity: usize) -> ProtocolConfig {
        ProtocolConfig {
            queue_capacity,
            ..Default::default()
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "protocol.queue_capacity",
                reason: "must be positive".to_string(),
            });
        }
        self.timeout()?;
        self.patch_timeout()?;
        Ok(())
    }

    /// Returns the default request timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("protocol.timeout", self.timeout.as_ref(), DEFAULT_TIMEOUT)
    }

    /// Returns the patch load timeout.
    pub fn patch_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            "protocol.patch_timeout",
            self.patch_timeout.as_ref(),
            DEFAULT_PATCH_TIMEOUT,
        )
    }

    /// Returns the pre-ready queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}
