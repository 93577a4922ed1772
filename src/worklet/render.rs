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
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, span, Level};

use super::engine::SynthEngine;
use super::processor::WorkletProcessor;

/// Stops a render thread. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> CancelHandle {
        CancelHandle::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Drives the processor one block per block period on a dedicated thread
/// until cancelled. The processor is handed back when the thread ends.
pub fn spawn_render_thread<E: SynthEngine>(
    mut processor: WorkletProcessor<E>,
    cancel_handle: CancelHandle,
) -> io::Result<JoinHandle<WorkletProcessor<E>>> {
    let block_size = processor.block_size();
    let tick_duration =
        Duration::from_secs_f64(block_size as f64 / processor.clock().sample_rate() as f64);

    thread::Builder::new()
        .name("worklet render".to_string())
        .spawn(move || {
            let span = span!(Level::INFO, "worklet render");
            let _enter = span.enter();
            info!(tick_ms = tick_duration.as_secs_f64() * 1000.0, "Render thread started");

            let mut out = vec![0.0f32; block_size * 2];
            let mut last_time = Instant::now();
            while !cancel_handle.is_cancelled() {
                processor.process(&mut out);
                last_time += tick_duration;
                spin_sleep::sleep(last_time.saturating_duration_since(Instant::now()));
            }

            info!(frames = processor.clock().frames(), "Render thread stopped");
            processor
        })
}
