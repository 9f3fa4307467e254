//! Deterministic in-memory network backend for tests and embedders that
//! want to exercise the server without sockets.

use std::collections::VecDeque;

use crate::protocol::ClientHandle;
use crate::server::{BackendEvent, NetworkBackend};

/// Scripted backend: events are queued ahead of time and drained one batch
/// per poll, while sends and closes are recorded for inspection.
#[derive(Default)]
pub struct FakeBackend {
    pub started_port: Option<u16>,
    pub start_result: bool,
    pub stopped: bool,
    pub send_result: bool,
    pub sent: Vec<(ClientHandle, Vec<u8>)>,
    pub closed: Vec<ClientHandle>,
    pending: VecDeque<Vec<BackendEvent>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            start_result: true,
            send_result: true,
            ..Self::default()
        }
    }

    /// Queue one batch of events to be returned by the next poll.
    pub fn queue_events(&mut self, events: Vec<BackendEvent>) {
        self.pending.push_back(events);
    }

    /// Sent payloads decoded as UTF-8, for assertion convenience.
    pub fn sent_text(&self) -> Vec<(ClientHandle, String)> {
        self.sent
            .iter()
            .map(|(client, bytes)| {
                (*client, String::from_utf8_lossy(bytes).into_owned())
            })
            .collect()
    }
}

impl NetworkBackend for FakeBackend {
    fn start(&mut self, port: u16) -> bool {
        self.started_port = Some(port);
        self.start_result
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn poll(&mut self) -> Vec<BackendEvent> {
        self.pending.pop_front().unwrap_or_default()
    }

    fn send(&mut self, client: ClientHandle, payload: &[u8]) -> bool {
        self.sent.push((client, payload.to_vec()));
        self.send_result
    }

    fn close(&mut self, client: ClientHandle) {
        self.closed.push(client);
    }
}
