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

//! Correlates requests to the worklet with their responses.
//!
//! Requests made before the engine reports ready are held in a bounded queue
//! and flushed in order once it does. Every live request is tracked by id
//! until its response arrives or its timeout fires, whichever is first.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::ProtocolError;
use super::message::{Command, EngineMessage, Envelope};
use super::transport::Transport;
use crate::config::{ConfigError, ProtocolConfig};

/// The payload of a successful response.
pub type Response = Option<Value>;

type Responder = oneshot::Sender<Result<Response, ProtocolError>>;

/// A request that has been transmitted and is awaiting its response.
struct PendingRequest {
    operation: &'static str,
    responder: Responder,
    timeout_handle: JoinHandle<()>,
    started: Instant,
}

/// A request made before the engine was ready.
struct QueuedOperation {
    envelope: Envelope,
    responder: Responder,
    timeout: Duration,
}

#[derive(Default)]
struct State {
    ready: bool,
    pending: HashMap<String, PendingRequest>,
    queue: VecDeque<QueuedOperation>,
}

struct Inner {
    state: Mutex<State>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    queue_capacity: usize,
    default_timeout: Duration,
    /// Distinguishes ids generated by different clients.
    nonce: u32,
    next_id: AtomicU64,
}

/// The instrument side of the worklet channel. Clones share the same tables.
///
/// Sending and flushing arm Tokio timers, so both must happen inside a Tokio runtime.
#[derive(Clone)]
pub struct WorkletClient {
    inner: Arc<Inner>,
}

impl WorkletClient {
    /// Creates a client with no transport attached.
    pub fn new(queue_capacity: usize, default_timeout: Duration) -> WorkletClient {
        WorkletClient {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                transport: RwLock::new(None),
                queue_capacity,
                default_timeout,
                nonce: rand::random(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a client from the protocol configuration.
    pub fn from_config(config: &ProtocolConfig) -> Result<WorkletClient, ConfigError> {
        Ok(WorkletClient::new(config.queue_capacity(), config.timeout()?))
    }

    /// Attaches the channel messages are transmitted over.
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        *self.inner.transport.write() = Some(transport);
    }

    /// Detaches the channel. Later transmissions fail with a transport error.
    pub fn detach(&self) {
        *self.inner.transport.write() = None;
    }

    /// Returns true once the engine has reported ready.
    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Returns the number of requests waiting for the engine to become ready.
    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Returns the timeout used by [`WorkletClient::request`].
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Sends a command with the default timeout and waits for its response.
    pub async fn request(&self, command: Command) -> Result<Response, ProtocolError> {
        self.send(Envelope::new(command), self.inner.default_timeout)
            .await
    }

    /// Sends the envelope and waits for its response. The timeout starts when
    /// the envelope is transmitted, not while it waits for the engine to be ready.
    pub async fn send(&self, envelope: Envelope, timeout: Duration) -> Result<Response, ProtocolError> {
        let operation = envelope.command.operation();
        let response = self.submit(envelope, timeout)?;
        response
            .await
            .unwrap_or(Err(ProtocolError::Cleared { operation }))
    }

    fn submit(
        &self,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<Response, ProtocolError>>, ProtocolError> {
        let operation = envelope.command.operation();
        envelope.command.validate()?;

        let (responder, response) = oneshot::channel();
        let mut state = self.inner.state.lock();

        if let Some(message_id) = &envelope.message_id {
            let queued = state
                .queue
                .iter()
                .any(|op| op.envelope.message_id.as_ref() == Some(message_id));
            if queued || state.pending.contains_key(message_id) {
                return Err(ProtocolError::Validation {
                    operation,
                    reason: format!("message id {} is already in flight", message_id),
                });
            }
        }

        if !state.ready {
            if state.queue.len() >= self.inner.queue_capacity {
                warn!(
                    operation,
                    capacity = self.inner.queue_capacity,
                    "Engine not ready and request queue is full"
                );
                return Err(ProtocolError::QueueFull {
                    capacity: self.inner.queue_capacity,
                });
            }
            debug!(
                operation,
                queued = state.queue.len() + 1,
                "Engine not ready, queueing request"
            );
            state.queue.push_back(QueuedOperation {
                envelope,
                responder,
                timeout,
            });
            return Ok(response);
        }

        self.inner.dispatch(&mut state, envelope, responder, timeout);
        Ok(response)
    }

    /// Sends a command with no response, no timeout and no tracking. Failures
    /// are logged, since no caller is waiting to hear about them.
    pub fn send_fire_and_forget(&self, command: Command) {
        let operation = command.operation();
        if let Err(e) = command.validate() {
            warn!(operation, error = %e, "Dropping invalid message");
            return;
        }

        // Holding the state lock keeps transmissions in send order.
        let _state = self.inner.state.lock();
        let transport = self.inner.transport.read().clone();
        match transport {
            Some(transport) => {
                if let Err(e) = transport.post(&Envelope::new(command)) {
                    warn!(operation, error = %e, "Failed to post message");
                }
            }
            None => warn!(operation, "No worklet channel attached, dropping message"),
        }
    }

    /// Marks the engine ready and flushes queued requests in arrival order.
    /// Only the first call has any effect.
    pub fn mark_ready(&self) {
        let mut state = self.inner.state.lock();
        if state.ready {
            debug!("Duplicate ready signal ignored");
            return;
        }
        state.ready = true;

        let queued: Vec<QueuedOperation> = state.queue.drain(..).collect();
        info!(flushed = queued.len(), "Worklet ready");
        for op in queued {
            self.inner
                .dispatch(&mut state, op.envelope, op.responder, op.timeout);
        }
    }

    /// Handles a message posted by the engine.
    pub fn handle_message(&self, message: EngineMessage) {
        match message {
            EngineMessage::Ready => self.mark_ready(),
            EngineMessage::OperationResponse {
                message_id,
                success,
                data,
                error,
            } => self.resolve(&message_id, success, data, error),
        }
    }

    /// Decodes and handles a JSON message posted by the engine.
    pub fn handle_raw(&self, raw: &str) -> Result<(), ProtocolError> {
        let message: EngineMessage = serde_json::from_str(raw)?;
        self.handle_message(message);
        Ok(())
    }

    fn resolve(&self, message_id: &str, success: bool, data: Response, error: Option<String>) {
        let pending = self.inner.state.lock().pending.remove(message_id);
        let Some(pending) = pending else {
            warn!(message_id, "Response for unknown or expired request, discarding");
            return;
        };

        pending.timeout_handle.abort();
        let result = if success {
            Ok(data)
        } else {
            Err(ProtocolError::Engine {
                operation: pending.operation,
                message: error.unwrap_or_else(|| "unknown engine error".to_string()),
            })
        };

        debug!(
            message_id,
            operation = pending.operation,
            success,
            elapsed_ms = pending.started.elapsed().as_millis() as u64,
            "Response received"
        );
        if pending.responder.send(result).is_err() {
            debug!(message_id, "Requester no longer waiting");
        }
    }

    /// Rejects every pending and queued request and resets readiness, so a
    /// restarted engine can flush a fresh queue.
    pub fn clear(&self) {
        let (pending, queued) = {
            let mut state = self.inner.state.lock();
            state.ready = false;
            (mem::take(&mut state.pending), mem::take(&mut state.queue))
        };

        info!(
            pending = pending.len(),
            queued = queued.len(),
            "Clearing worklet requests"
        );
        for (_, request) in pending {
            request.timeout_handle.abort();
            let _ = request.responder.send(Err(ProtocolError::Cleared {
                operation: request.operation,
            }));
        }
        for op in queued {
            let _ = op.responder.send(Err(ProtocolError::Cleared {
                operation: op.envelope.command.operation(),
            }));
        }
    }
}

impl Inner {
    fn next_message_id(&self) -> String {
        format!(
            "{:08x}-{}",
            self.nonce,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Registers and transmits a request. Called with the state lock held so
    /// transmissions keep send order and a fast response always finds its entry.
    fn dispatch(
        self: &Arc<Self>,
        state: &mut State,
        mut envelope: Envelope,
        responder: Responder,
        timeout: Duration,
    ) {
        let operation = envelope.command.operation();
        let message_id = envelope
            .message_id
            .get_or_insert_with(|| self.next_message_id())
            .clone();

        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            warn!(operation, "No worklet channel attached");
            let _ = responder.send(Err(ProtocolError::Transport {
                operation,
                reason: "worklet channel not attached".to_string(),
            }));
            return;
        };

        state.pending.insert(
            message_id.clone(),
            PendingRequest {
                operation,
                responder,
                timeout_handle: Self::arm_timeout(Arc::downgrade(self), message_id.clone(), timeout),
                started: Instant::now(),
            },
        );

        if let Err(e) = transport.post(&envelope) {
            warn!(operation, error = %e, "Failed to post request");
            if let Some(request) = state.pending.remove(&message_id) {
                request.timeout_handle.abort();
                let _ = request.responder.send(Err(ProtocolError::Transport {
                    operation,
                    reason: e.to_string(),
                }));
            }
            return;
        }
        debug!(operation, message_id = %message_id, "Request sent");
    }

    fn arm_timeout(inner: Weak<Inner>, message_id: String, timeout: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                inner.expire(&message_id);
            }
        })
    }

    fn expire(&self, message_id: &str) {
        let pending = self.state.lock().pending.remove(message_id);
        if let Some(request) = pending {
            let elapsed_ms = request.started.elapsed().as_millis();
            warn!(
                message_id,
                operation = request.operation,
                elapsed_ms = elapsed_ms as u64,
                "Request timed out"
            );
            let _ = request.responder.send(Err(ProtocolError::Timeout {
                operation: request.operation,
                elapsed_ms,
            }));
        }
    }
}

impl std::fmt::Debug for WorkletClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WorkletClient")
            .field("ready", &state.ready)
            .field("pending", &state.pending.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::message::NodeType;
    use crate::protocol::transport::TransportError;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Envelope>>,
    }

    impl Recorder {
        fn ids(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter_map(|envelope| envelope.message_id.clone())
                .collect()
        }
    }

    impl Transport for Recorder {
        fn post(&self, envelope: &Envelope) -> Result<(), TransportError> {
            self.sent.lock().push(envelope.clone());
            Ok(())
        }
    }

    struct Broken;

    impl Transport for Broken {
        fn post(&self, _envelope: &Envelope) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }
    }

    fn client_with_recorder(queue_capacity: usize) -> (WorkletClient, Arc<Recorder>) {
        let client = WorkletClient::new(queue_capacity, Duration::from_secs(5));
        let recorder = Arc::new(Recorder::default());
        client.attach(recorder.clone());
        (client, recorder)
    }

    fn create_oscillator() -> Command {
        Command::CreateNode {
            node_type: NodeType::Oscillator,
        }
    }

    #[tokio::test]
    async fn test_queue_flushes_in_order() {
        let (client, recorder) = client_with_recorder(10);
        let timeout = Duration::from_secs(5);

        for id in ["a", "b", "c"] {
            client
                .submit(Envelope::with_id(create_oscillator(), id), timeout)
                .expect("queued");
        }
        assert!(recorder.sent.lock().is_empty());
        assert_eq!(client.queued_count(), 3);

        client.mark_ready();
        assert_eq!(recorder.ids(), vec!["a", "b", "c"]);
        assert_eq!(client.queued_count(), 0);
        assert_eq!(client.pending_count(), 3);

        // A second ready signal must not transmit anything again.
        client.mark_ready();
        assert_eq!(recorder.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let (client, recorder) = client_with_recorder(10);
        client.mark_ready();
        for _ in 0..5 {
            client
                .submit(Envelope::new(Command::GetCpuUsage), Duration::from_secs(5))
                .expect("sent");
        }

        let mut ids = recorder.ids();
        assert_eq!(ids.len(), 5);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn test_queue_capacity_applies_backpressure() {
        let (client, _recorder) = client_with_recorder(2);
        let timeout = Duration::from_secs(5);

        client
            .submit(Envelope::new(Command::GetCpuUsage), timeout)
            .expect("first");
        client
            .submit(Envelope::new(Command::GetCpuUsage), timeout)
            .expect("second");
        let result = client.submit(Envelope::new(Command::GetCpuUsage), timeout);
        assert!(matches!(result, Err(ProtocolError::QueueFull { capacity: 2 })));
    }

    #[tokio::test]
    async fn test_response_resolves_by_id() {
        let (client, recorder) = client_with_recorder(10);
        client.mark_ready();

        let first = client
            .submit(Envelope::new(create_oscillator()), Duration::from_secs(5))
            .expect("first");
        let second = client
            .submit(Envelope::new(create_oscillator()), Duration::from_secs(5))
            .expect("second");
        let ids = recorder.ids();

        // Responses arrive out of order.
        client.handle_message(EngineMessage::success(ids[1].clone(), Some(json!("osc-2"))));
        client.handle_message(EngineMessage::success(ids[0].clone(), Some(json!("osc-1"))));

        assert_eq!(first.await.expect("first").expect("ok"), Some(json!("osc-1")));
        assert_eq!(second.await.expect("second").expect("ok"), Some(json!("osc-2")));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_error_surfaces_verbatim() {
        let (client, recorder) = client_with_recorder(10);
        client.mark_ready();
        let response = client
            .submit(
                Envelope::new(Command::DeleteNode {
                    node_id: "missing".to_string(),
                }),
                Duration::from_secs(5),
            )
            .expect("sent");
        let id = recorder.ids().remove(0);

        client
            .handle_raw(&format!(
                r#"{{"type":"operationResponse","messageId":"{}","success":false,"error":"node missing not found"}}"#,
                id
            ))
            .expect("decoded");

        let err = response.await.expect("answered").expect_err("should fail");
        assert!(matches!(err, ProtocolError::Engine { operation: "deleteNode", .. }));
        assert_eq!(err.to_string(), "node missing not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_terminal() {
        let (client, recorder) = client_with_recorder(10);
        client.mark_ready();

        let err = client
            .send(Envelope::new(create_oscillator()), Duration::from_millis(1000))
            .await
            .expect_err("should time out");
        match &err {
            ProtocolError::Timeout {
                operation,
                elapsed_ms,
            } => {
                assert_eq!(*operation, "createNode");
                assert!(*elapsed_ms >= 1000);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("createNode"));
        assert!(err.to_string().contains("1000 ms"));
        assert_eq!(client.pending_count(), 0);

        // The late response is discarded.
        let id = recorder.ids().remove(0);
        client.handle_message(EngineMessage::success(id, Some(json!("osc-1"))));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_starts_at_flush() {
        let (client, _recorder) = client_with_recorder(10);
        let response = client
            .submit(Envelope::new(Command::GetCpuUsage), Duration::from_millis(100))
            .expect("queued");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.queued_count(), 1);

        client.mark_ready();
        let err = response.await.expect("answered").expect_err("times out");
        match err {
            ProtocolError::Timeout { elapsed_ms, .. } => assert!(elapsed_ms < 500),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_has_no_side_effect() {
        let (client, recorder) = client_with_recorder(10);
        client.mark_ready();

        let result = client
            .send(
                Envelope::new(Command::LoadPatch {
                    patch: String::new(),
                }),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(ProtocolError::Validation { .. })));
        assert!(recorder.sent.lock().is_empty());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_supplied_id_rejected() {
        let (client, _recorder) = client_with_recorder(10);
        client.mark_ready();
        let _first = client
            .submit(Envelope::with_id(Command::GetCpuUsage, "same"), Duration::from_secs(5))
            .expect("first");

        let second = client.submit(Envelope::with_id(Command::GetCpuUsage, "same"), Duration::from_secs(5));
        assert!(matches!(second, Err(ProtocolError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_transport_not_attached() {
        let client = WorkletClient::new(10, Duration::from_secs(5));
        client.mark_ready();

        let result = client.request(Command::GetCpuUsage).await;
        assert!(matches!(result, Err(ProtocolError::Transport { .. })));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_post_failure() {
        let client = WorkletClient::new(10, Duration::from_secs(5));
        client.attach(Arc::new(Broken));
        client.mark_ready();

        let result = client.request(Command::GetCpuUsage).await;
        assert!(matches!(result, Err(ProtocolError::Transport { .. })));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_rejects_pending_and_queued() {
        let (client, _recorder) = client_with_recorder(10);
        let queued = client
            .submit(Envelope::new(Command::GetCpuUsage), Duration::from_secs(5))
            .expect("queued");
        client.clear();
        assert!(matches!(
            queued.await.expect("answered"),
            Err(ProtocolError::Cleared {
                operation: "getCpuUsage"
            })
        ));

        client.mark_ready();
        let pending = client
            .submit(Envelope::new(Command::ExportData), Duration::from_secs(5))
            .expect("sent");
        client.clear();
        assert!(matches!(
            pending.await.expect("answered"),
            Err(ProtocolError::Cleared {
                operation: "exportData"
            })
        ));
        assert_eq!(client.pending_count(), 0);
        assert!(!client.is_ready());
    }

    #[tokio::test]
    async fn test_fire_and_forget_bypasses_tracking() {
        let (client, recorder) = client_with_recorder(10);

        client.send_fire_and_forget(Command::ImportAsset {
            name: "kick.wav".to_string(),
            data: vec![0, 1, 2],
        });
        client.send_fire_and_forget(Command::ImportAsset {
            name: String::new(),
            data: vec![],
        });

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_id, None);
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_message() {
        let (client, _recorder) = client_with_recorder(10);
        assert!(matches!(
            client.handle_raw("not json"),
            Err(ProtocolError::Serialization(_))
        ));
        client.handle_raw(r#"{"type":"ready"}"#).expect("ready");
        assert!(client.is_ready());
    }
}
