//! The line-protocol TCP server: session buffering, dispatch, and reply
//! routing over a pluggable network backend.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::dispatch::CommandDispatcher;
use crate::protocol::{ClientHandle, CommandOrigin};

/// Events surfaced by a network backend's poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Connected(ClientHandle),
    Data(ClientHandle, Vec<u8>),
    Closed(ClientHandle),
}

/// The narrow seam over the actual socket machinery. The production
/// implementation is [`crate::MioBackend`]; tests drive
/// [`crate::FakeBackend`].
pub trait NetworkBackend {
    /// Bind a loopback listener. Returns whether binding succeeded.
    fn start(&mut self, port: u16) -> bool;

    /// Close the listener and every client.
    fn stop(&mut self);

    /// Drain pending connection, data and close events without blocking.
    fn poll(&mut self) -> Vec<BackendEvent>;

    /// Ship bytes to a client; false when the client is gone or stalled.
    fn send(&mut self, client: ClientHandle, payload: &[u8]) -> bool;

    /// Drop one client connection.
    fn close(&mut self, client: ClientHandle);
}

/// Notified whenever a client is dropped, so pending deferred work can be
/// cancelled.
pub type ClientCloseCallback = Rc<dyn Fn(ClientHandle)>;

#[derive(Default)]
struct Session {
    buffer: Vec<u8>,
    authed: bool,
}

/// Accepts clients, splits their byte stream into protocol lines and ships
/// replies. Deferred responses are left for the queued sink to deliver.
pub struct TextModeServer<B: NetworkBackend> {
    backend: Rc<RefCell<B>>,
    sessions: HashMap<ClientHandle, Session>,
    running: bool,
    port: u16,
    close_after_response: bool,
    auth_token: String,
    client_close_callback: Option<ClientCloseCallback>,
}

impl<B: NetworkBackend> TextModeServer<B> {
    pub fn new(backend: Rc<RefCell<B>>) -> Self {
        Self {
            backend,
            sessions: HashMap::new(),
            running: false,
            port: 0,
            close_after_response: false,
            auth_token: String::new(),
            client_close_callback: None,
        }
    }

    pub fn set_close_after_response(&mut self, enable: bool) {
        self.close_after_response = enable;
    }

    /// Configure the shared-secret gate; an empty token disables it.
    pub fn set_auth_token(&mut self, token: impl Into<String>) {
        self.auth_token = token.into();
    }

    pub fn set_client_close_callback(&mut self, callback: ClientCloseCallback) {
        self.client_close_callback = Some(callback);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listener. Re-binding the same port while running is a
    /// no-op; a different port restarts the listener.
    pub fn start(&mut self, port: u16) -> bool {
        if self.running && port == self.port {
            return true;
        }

        self.stop();

        if !self.backend.borrow_mut().start(port) {
            return false;
        }

        self.running = true;
        self.port = port;
        true
    }

    /// Close the listener and every client, clearing session buffers.
    pub fn stop(&mut self) {
        let clients: Vec<ClientHandle> = self.sessions.keys().copied().collect();
        for client in clients {
            self.backend.borrow_mut().close(client);
        }
        self.sessions.clear();
        self.backend.borrow_mut().stop();
        self.running = false;
        self.port = 0;
    }

    /// Ship bytes to a client outside the normal reply path.
    pub fn send(&self, client: ClientHandle, payload: &[u8]) -> bool {
        self.backend.borrow_mut().send(client, payload)
    }

    /// Drop a client, notifying the close callback if it had a session.
    pub fn close(&mut self, client: ClientHandle) {
        self.drop_client(client);
    }

    /// Drain backend events and dispatch complete lines. Called once per
    /// emulator poll tick; never blocks.
    pub fn poll(&mut self, dispatcher: &mut CommandDispatcher) {
        if !self.running {
            return;
        }

        let events = self.backend.borrow_mut().poll();
        for event in events {
            match event {
                BackendEvent::Connected(client) => {
                    self.sessions.insert(client, Session::default());
                },
                BackendEvent::Data(client, data) => {
                    self.handle_data(client, &data, dispatcher);
                },
                BackendEvent::Closed(client) => {
                    self.drop_client(client);
                },
            }
        }
    }

    fn handle_data(
        &mut self,
        client: ClientHandle,
        data: &[u8],
        dispatcher: &mut CommandDispatcher,
    ) {
        match self.sessions.get_mut(&client) {
            Some(session) => session.buffer.extend_from_slice(data),
            None => return,
        }

        while let Some(line) = self.take_line(client) {
            if !self.auth_token.is_empty() && !self.gate_line(client, &line) {
                // The gate consumed the line (or dropped the client).
                if !self.sessions.contains_key(&client) {
                    return;
                }
                continue;
            }

            let response = dispatcher.handle_command(&line, CommandOrigin::new(client));
            if response.deferred {
                continue;
            }

            if !self
                .backend
                .borrow_mut()
                .send(client, response.payload.as_bytes())
            {
                self.drop_client(client);
                return;
            }

            if self.close_after_response {
                self.drop_client(client);
                return;
            }

            if dispatcher.consume_exit_request() {
                self.drop_client(client);
                return;
            }
        }
    }

    /// Pop the next newline-terminated line from the client's buffer,
    /// stripping the terminator and any trailing CR.
    fn take_line(&mut self, client: ClientHandle) -> Option<String> {
        let session = self.sessions.get_mut(&client)?;
        let newline = session.buffer.iter().position(|&byte| byte == b'\n')?;

        let mut line: Vec<u8> = session.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Enforce the shared-secret gate. Returns true when the line should
    /// continue into the dispatcher.
    fn gate_line(&mut self, client: ClientHandle, line: &str) -> bool {
        let authed = self
            .sessions
            .get(&client)
            .map(|session| session.authed)
            .unwrap_or(false);

        let auth_argument = line
            .trim()
            .strip_prefix("AUTH")
            .filter(|rest| rest.is_empty() || rest.starts_with(' '))
            .map(str::trim);

        match auth_argument {
            Some(token) if token == self.auth_token => {
                if let Some(session) = self.sessions.get_mut(&client) {
                    session.authed = true;
                }
                // Keep the connection open even under close_after_response;
                // a gate that hangs up on success is unusable.
                if !self.backend.borrow_mut().send(client, b"Auth OK\n") {
                    self.drop_client(client);
                }
                false
            },
            Some(_) => {
                log::warn!("client {client} failed authentication");
                self.drop_client(client);
                false
            },
            None if authed => true,
            None => {
                if !self
                    .backend
                    .borrow_mut()
                    .send(client, b"ERR auth required\n")
                {
                    self.drop_client(client);
                }
                false
            },
        }
    }

    fn drop_client(&mut self, client: ClientHandle) {
        let existed = self.sessions.remove(&client).is_some();
        self.backend.borrow_mut().close(client);
        if existed {
            if let Some(callback) = &self.client_close_callback {
                callback(client);
            }
        }
    }
}
