//! Mio-backed network backend: a loopback listener plus token-addressed
//! client streams, drained without blocking from the emulator's poll loop.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::protocol::ClientHandle;
use crate::server::{BackendEvent, NetworkBackend};

const LISTENER: Token = Token(0);
const MAX_CLIENTS: usize = 8;
const RECEIVE_BUFFER_SIZE: usize = 4096;
const EVENT_CAPACITY: usize = 64;

/// Upper bound on how long a send may keep retrying a stalled client
/// before the connection is reported dead.
const SEND_RETRY_LIMIT: Duration = Duration::from_secs(1);

pub struct MioBackend {
    poll: Option<Poll>,
    events: Events,
    listener: Option<TcpListener>,
    clients: HashMap<ClientHandle, TcpStream>,
    next_token: usize,
    /// Close events queued for clients this side hung up on, so the server
    /// observes them on the next poll.
    synthetic: Vec<BackendEvent>,
}

impl Default for MioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MioBackend {
    pub fn new() -> Self {
        Self {
            poll: None,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener: None,
            clients: HashMap::new(),
            next_token: 1,
            synthetic: Vec::new(),
        }
    }

    fn accept_pending(&mut self, out: &mut Vec<BackendEvent>) {
        loop {
            let Some(listener) = &self.listener else { return };
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.clients.len() >= MAX_CLIENTS {
                        log::warn!("rejecting client {addr}: limit reached");
                        continue;
                    }

                    let token = Token(self.next_token);
                    let handle = self.next_token as ClientHandle;
                    self.next_token += 1;

                    let Some(poll) = &self.poll else { return };
                    if let Err(err) = poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE,
                    ) {
                        log::warn!("unable to register client {addr}: {err}");
                        continue;
                    }

                    self.clients.insert(handle, stream);
                    out.push(BackendEvent::Connected(handle));
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("accept failed: {err}");
                    break;
                },
            }
        }
    }

    fn read_client(&mut self, handle: ClientHandle, out: &mut Vec<BackendEvent>) {
        let Some(stream) = self.clients.get_mut(&handle) else { return };

        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];
        let mut closed = false;
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => {
                    closed = true;
                    break;
                },
                Ok(received) => {
                    out.push(BackendEvent::Data(handle, buffer[..received].to_vec()));
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("read from client {handle} failed: {err}");
                    closed = true;
                    break;
                },
            }
        }

        if closed {
            self.deregister(handle);
            out.push(BackendEvent::Closed(handle));
        }
    }

    fn deregister(&mut self, handle: ClientHandle) {
        if let Some(mut stream) = self.clients.remove(&handle) {
            if let Some(poll) = &self.poll {
                if let Err(err) = poll.registry().deregister(&mut stream) {
                    log::debug!("deregister of client {handle} failed: {err}");
                }
            }
        }
    }
}

impl NetworkBackend for MioBackend {
    fn start(&mut self, port: u16) -> bool {
        self.stop();

        let poll = match Poll::new() {
            Ok(poll) => poll,
            Err(err) => {
                log::warn!("poller init failed: {err}");
                return false;
            },
        };

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let mut listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(err) => {
                log::warn!("unable to bind {addr}: {err}");
                return false;
            },
        };

        if let Err(err) =
            poll.registry()
                .register(&mut listener, LISTENER, Interest::READABLE)
        {
            log::warn!("unable to register listener: {err}");
            return false;
        }

        log::info!("listening on {addr}");
        self.poll = Some(poll);
        self.listener = Some(listener);
        true
    }

    fn stop(&mut self) {
        let handles: Vec<ClientHandle> = self.clients.keys().copied().collect();
        for handle in handles {
            self.deregister(handle);
        }
        self.listener = None;
        self.poll = None;
        self.synthetic.clear();
    }

    fn poll(&mut self) -> Vec<BackendEvent> {
        let mut out: Vec<BackendEvent> = std::mem::take(&mut self.synthetic);

        let Some(poll) = self.poll.as_mut() else { return out };

        loop {
            match poll.poll(&mut self.events, Some(Duration::ZERO)) {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("socket poll failed: {err}");
                    return out;
                },
            }
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        for token in ready {
            if token == LISTENER {
                self.accept_pending(&mut out);
            } else {
                self.read_client(token.0 as ClientHandle, &mut out);
            }
        }

        out
    }

    fn send(&mut self, client: ClientHandle, payload: &[u8]) -> bool {
        let Some(stream) = self.clients.get_mut(&client) else {
            return false;
        };

        let deadline = Instant::now() + SEND_RETRY_LIMIT;
        let mut written = 0;
        while written < payload.len() {
            match stream.write(&payload[written..]) {
                Ok(0) => return false,
                Ok(sent) => written += sent,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        log::warn!("send to client {client} timed out");
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                },
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::warn!("send to client {client} failed: {err}");
                    return false;
                },
            }
        }

        let _ = stream.flush();
        true
    }

    fn close(&mut self, client: ClientHandle) {
        if self.clients.contains_key(&client) {
            self.deregister(client);
            self.synthetic.push(BackendEvent::Closed(client));
        }
    }
}
