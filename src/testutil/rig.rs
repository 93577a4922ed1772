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

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::config::Config;
use crate::instrument::Instrument;
use crate::voices::{TraceSink, VoiceEvent};
use crate::worklet::{mock, spawn_render_thread, CancelHandle, WorkletProcessor};

type Render = (CancelHandle, JoinHandle<WorkletProcessor<mock::Engine>>);

/// An instrument wired to a mock engine in process. The processor is idle
/// until [`Rig::start`], so note tests can hold the audio clock still.
pub struct Rig {
    pub instrument: Arc<Instrument>,
    pub probe: mock::Probe,
    pub trace: Receiver<VoiceEvent>,
    processor: Option<WorkletProcessor<mock::Engine>>,
    render: Option<Render>,
}

impl Rig {
    /// Wires a rig. Must be called from within a Tokio runtime.
    pub fn new(config: &Config) -> Rig {
        let engine = mock::Engine::new();
        let probe = engine.probe();
        let (trace, trace_rx) = TraceSink::channel();
        let (instrument, processor) =
            Instrument::with_engine(config, engine, trace).expect("wire instrument");
        Rig {
            instrument: Arc::new(instrument),
            probe,
            trace: trace_rx,
            processor: Some(processor),
            render: None,
        }
    }

    pub fn with_defaults() -> Rig {
        Rig::new(&Config::default())
    }

    /// Initializes the processor if needed and renders on a background thread.
    pub fn start(&mut self) {
        let mut processor = self.processor.take().expect("processor already running");
        if !processor.is_initialized() {
            processor.initialize().expect("initialize");
        }
        let cancel_handle = CancelHandle::new();
        let join = spawn_render_thread(processor, cancel_handle.clone()).expect("spawn render");
        self.render = Some((cancel_handle, join));
    }

    /// Stops rendering, freezing the audio clock.
    pub fn stop(&mut self) {
        if let Some((cancel_handle, join)) = self.render.take() {
            cancel_handle.cancel();
            self.processor = Some(join.join().expect("join render thread"));
        }
    }

    /// Returns the idle processor for manual driving.
    pub fn processor(&mut self) -> &mut WorkletProcessor<mock::Engine> {
        self.processor.as_mut().expect("processor is running")
    }

    /// Returns every trace event emitted since the last drain.
    pub fn drain_trace(&self) -> Vec<VoiceEvent> {
        self.trace.try_iter().collect()
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        if let Some((cancel_handle, _)) = self.render.as_ref() {
            cancel_handle.cancel();
        }
    }
}
