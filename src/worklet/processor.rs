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

//! The audio thread side of the worklet channel.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::engine::{Connection, EngineError, SynthEngine};
use super::params::{AudioClock, ParameterBank};
use crate::protocol::{Command, EngineMessage, Envelope};

/// Hosts the engine on the audio thread. Commands are drained without
/// blocking at the start of every block and answered by message id.
pub struct WorkletProcessor<E: SynthEngine> {
    engine: E,
    commands: Receiver<String>,
    responses: UnboundedSender<String>,
    params: Arc<ParameterBank>,
    clock: AudioClock,
    block_size: usize,
    initialized: bool,
    ready_posted: bool,
}

impl<E: SynthEngine> WorkletProcessor<E> {
    pub fn new(
        engine: E,
        commands: Receiver<String>,
        responses: UnboundedSender<String>,
        params: Arc<ParameterBank>,
        clock: AudioClock,
        block_size: usize,
    ) -> WorkletProcessor<E> {
        WorkletProcessor {
            engine,
            commands,
            responses,
            params,
            clock,
            block_size,
            initialized: false,
            ready_posted: false,
        }
    }

    /// Initializes the engine. Ready is posted on the first block afterwards.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        let result = self
            .engine
            .initialize(self.clock.sample_rate(), self.block_size);
        match &result {
            Ok(()) => {
                self.initialized = true;
                info!(
                    sample_rate = self.clock.sample_rate(),
                    block_size = self.block_size,
                    "Worklet initialized"
                );
            }
            Err(e) => error!(err = %e, "Engine failed to initialize"),
        }
        result
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    /// Processes one block into `out`, interleaved stereo of `block_size` frames.
    pub fn process(&mut self, out: &mut [f32]) {
        if !self.initialized {
            out.fill(0.0);
            return;
        }

        if !self.ready_posted {
            self.ready_posted = true;
            self.post(&EngineMessage::Ready);
        }

        while let Ok(raw) = self.commands.try_recv() {
            self.handle_raw(&raw);
        }

        let params = self.params.block_params(self.clock.now(), self.block_size);
        if let Err(e) = self.engine.process_audio_block(&params, out) {
            warn!(err = %e, "Engine failed to render block");
            out.fill(0.0);
        }
        self.clock.advance(self.block_size);
    }

    fn handle_raw(&mut self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(err = %e, "Unreadable message from instrument");
                return;
            }
        };
        let message_id = value
            .get("messageId")
            .and_then(Value::as_str)
            .map(str::to_string);

        match serde_json::from_value::<Envelope>(value) {
            Ok(envelope) => self.handle(envelope),
            Err(e) => {
                warn!(err = %e, ?message_id, "Malformed message from instrument");
                if let Some(message_id) = message_id {
                    self.post(&EngineMessage::failure(message_id, format!("malformed message: {}", e)));
                }
            }
        }
    }

    fn handle(&mut self, envelope: Envelope) {
        let operation = envelope.command.operation();
        let result = self.execute(envelope.command);

        let Some(message_id) = envelope.message_id else {
            if let Err(e) = result {
                warn!(operation, err = %e, "Untracked operation failed");
            }
            return;
        };

        debug!(operation, message_id = %message_id, success = result.is_ok(), "Operation handled");
        let response = match result {
            Ok(data) => EngineMessage::success(message_id, data),
            Err(e) => EngineMessage::failure(message_id, e.to_string()),
        };
        self.post(&response);
    }

    fn execute(&mut self, command: Command) -> Result<Option<Value>, EngineError> {
        let engine = &mut self.engine;
        match command {
            Command::LoadPatch { patch } => engine.load_patch(&patch).map(|voices| Some(json!(voices))),
            Command::CreateNode { node_type } => engine.create_node(node_type).map(|id| Some(json!(id))),
            Command::UpdateNode { node_id, state } => engine.update_node(&node_id, &state).map(|_| None),
            Command::DeleteNode { node_id } => engine.delete_node(&node_id).map(|_| None),
            Command::Connect {
                from_id,
                from_port,
                to_id,
                to_port,
                amount,
                modulation_type,
                transform,
            } => engine
                .connect(Connection {
                    from_id: &from_id,
                    from_port: &from_port,
                    to_id: &to_id,
                    to_port: &to_port,
                    amount,
                    modulation_type,
                    transform,
                })
                .map(|_| None),
            Command::RemoveConnection { from_id, to_id, port } => {
                engine.remove_connection(&from_id, &to_id, &port).map(|_| None)
            }
            Command::GetCurrentState => engine.current_state().map(Some),
            Command::GetCpuUsage => engine.cpu_usage().map(|usage| Some(json!(usage))),
            Command::GetWaveformPreview { node_id, length } => engine
                .waveform_preview(&node_id, length)
                .map(|samples| Some(json!(samples))),
            Command::ExportData => engine.export_data().map(Some),
            Command::ImportAsset { name, data } => engine.import_asset(&name, &data).map(|_| None),
        }
    }

    fn post(&self, message: &EngineMessage) {
        match serde_json::to_string(message) {
            Ok(encoded) => {
                if self.responses.send(encoded).is_err() {
                    debug!("Instrument no longer listening");
                }
            }
            Err(e) => error!(err = %e, "Unable to encode engine message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::protocol::{link, ChannelTransport, NodeType, Transport};
    use crate::voices::{AutomationSink, VoiceParam};
    use crate::worklet::mock;

    struct Fixture {
        processor: WorkletProcessor<mock::Engine>,
        transport: ChannelTransport,
        responses: UnboundedReceiver<String>,
        params: Arc<ParameterBank>,
        probe: mock::Probe,
    }

    fn fixture() -> Fixture {
        let engine = mock::Engine::new();
        let probe = engine.probe();
        let (transport, commands) = link();
        let (tx, responses) = mpsc::unbounded_channel();
        let params = Arc::new(ParameterBank::new(2));
        let processor = WorkletProcessor::new(engine, commands, tx, params.clone(), AudioClock::new(48000), 128);
        Fixture {
            processor,
            transport,
            responses,
            params,
            probe,
        }
    }

    fn next_message(responses: &mut UnboundedReceiver<String>) -> EngineMessage {
        let raw = responses.try_recv().expect("message posted");
        serde_json::from_str(&raw).expect("decode")
    }

    #[test]
    fn test_ready_after_initialize_only() {
        let mut f = fixture();
        let mut out = vec![1.0; 256];

        f.processor.process(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(f.responses.try_recv().is_err());
        assert_eq!(f.processor.clock().frames(), 0);

        f.processor.initialize().expect("initialize");
        f.processor.process(&mut out);
        f.processor.process(&mut out);
        assert_eq!(next_message(&mut f.responses), EngineMessage::Ready);
        assert!(f.responses.try_recv().is_err());
        assert_eq!(f.processor.clock().frames(), 256);
    }

    #[test]
    fn test_failed_initialize_never_ready() {
        let (_transport, commands) = link();
        let (tx, mut responses) = mpsc::unbounded_channel();
        let mut processor = WorkletProcessor::new(
            mock::Engine::failing(),
            commands,
            tx,
            Arc::new(ParameterBank::new(1)),
            AudioClock::new(48000),
            128,
        );
        assert!(processor.initialize().is_err());
        processor.process(&mut [0.0; 256]);
        assert!(responses.try_recv().is_err());
    }

    #[test]
    fn test_responds_by_message_id() {
        let mut f = fixture();
        f.processor.initialize().expect("initialize");
        f.transport
            .post(&Envelope::with_id(
                Command::CreateNode {
                    node_type: NodeType::Lfo,
                },
                "m-1",
            ))
            .expect("post");
        f.transport
            .post(&Envelope::with_id(
                Command::DeleteNode {
                    node_id: "nope".to_string(),
                },
                "m-2",
            ))
            .expect("post");

        f.processor.process(&mut [0.0; 256]);
        assert_eq!(next_message(&mut f.responses), EngineMessage::Ready);
        assert_eq!(
            next_message(&mut f.responses),
            EngineMessage::success("m-1", Some(json!("node-1")))
        );
        assert_eq!(
            next_message(&mut f.responses),
            EngineMessage::failure("m-2", "node nope not found")
        );
    }

    #[test]
    fn test_untracked_commands_get_no_reply() {
        let mut f = fixture();
        f.processor.initialize().expect("initialize");
        f.transport
            .post(&Envelope::new(Command::ImportAsset {
                name: "ir.wav".to_string(),
                data: vec![1, 2, 3],
            }))
            .expect("post");

        f.processor.process(&mut [0.0; 256]);
        assert_eq!(next_message(&mut f.responses), EngineMessage::Ready);
        assert!(f.responses.try_recv().is_err());
        assert!(f.probe.calls().contains(&"importAsset".to_string()));
    }

    #[test]
    fn test_malformed_message_fails_its_request() {
        let (tx, commands) = crossbeam_channel::unbounded();
        let (responses_tx, mut responses) = mpsc::unbounded_channel();
        let mut processor = WorkletProcessor::new(
            mock::Engine::new(),
            commands,
            responses_tx,
            Arc::new(ParameterBank::new(1)),
            AudioClock::new(48000),
            128,
        );
        processor.initialize().expect("initialize");
        tx.send(r#"{"type":"teleport","messageId":"m-9"}"#.to_string())
            .expect("send");
        tx.send("garbage".to_string()).expect("send");

        processor.process(&mut [0.0; 256]);
        assert_eq!(next_message(&mut responses), EngineMessage::Ready);
        match next_message(&mut responses) {
            EngineMessage::OperationResponse {
                message_id, success, ..
            } => {
                assert_eq!(message_id, "m-9");
                assert!(!success);
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert!(responses.try_recv().is_err());
    }

    #[test]
    fn test_reads_parameters_at_block_start() {
        let mut f = fixture();
        f.processor.initialize().expect("initialize");
        let block = 128.0 / 48000.0;

        // Gate opens during the second block, so the engine first sees it on the third.
        f.params.set_value_at(1, VoiceParam::Gate, 1.0, block * 1.5);
        f.params.set_value_at(1, VoiceParam::Gain, 0.75, 0.0);

        f.processor.process(&mut [0.0; 256]);
        f.processor.process(&mut [0.0; 256]);
        assert_eq!(f.probe.last_block().expect("block").voices[1].gate, 0.0);

        f.processor.process(&mut [0.0; 256]);
        let last = f.probe.last_block().expect("block");
        assert_eq!(last.voices[1].gate, 1.0);
        assert_eq!(last.voices[1].gain, 0.75);
        assert!((last.time - block * 2.0).abs() < 1e-9);
    }
}
