//! Ownership and lifecycle for the whole control plane: binds a
//! [`ServiceConfig`] to the dispatcher, keyboard, queued sink and server,
//! and pumps them from the emulator's poll loop.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use dostap_surface::{build_ansi_frame, EncodingOptions, Snapshot, SnapshotError};

use crate::config::ServiceConfig;
use crate::dispatch::CommandDispatcher;
use crate::error::ServiceError;
use crate::keyboard::{KeySink, KeyboardProcessor};
use crate::memory::MemoryBus;
use crate::protocol::CommandResponse;
use crate::queue::{FrameProvider, KeyboardHandler, QueuedTypeActionSink};
use crate::server::{NetworkBackend, TextModeServer};

/// Captures the current text plane; wired to the emulator's video state.
pub type SnapshotProvider = Rc<dyn Fn() -> Result<Snapshot, SnapshotError>>;

/// Invoked when a client requests emulator shutdown via EXIT.
pub type ExitHook = Rc<dyn Fn()>;

/// Assembles a [`Controller`] from the emulator-facing seams.
pub struct ControllerBuilder<B: NetworkBackend> {
    backend: B,
    snapshot_provider: Option<SnapshotProvider>,
    memory: Option<Rc<RefCell<dyn MemoryBus>>>,
    key_sink: Option<KeySink>,
    exit_hook: Option<ExitHook>,
}

impl<B: NetworkBackend + 'static> ControllerBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            snapshot_provider: None,
            memory: None,
            key_sink: None,
            exit_hook: None,
        }
    }

    pub fn with_snapshot_provider(mut self, provider: SnapshotProvider) -> Self {
        self.snapshot_provider = Some(provider);
        self
    }

    pub fn with_memory_bus(mut self, bus: Rc<RefCell<dyn MemoryBus>>) -> Self {
        self.memory = Some(bus);
        self
    }

    pub fn with_key_sink(mut self, sink: KeySink) -> Self {
        self.key_sink = Some(sink);
        self
    }

    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    pub fn build(self) -> Controller<B> {
        let backend = Rc::new(RefCell::new(self.backend));

        let key_sink = self.key_sink.unwrap_or_else(|| Box::new(|_, _| {}));
        let keyboard = Rc::new(RefCell::new(KeyboardProcessor::new(key_sink)));

        let send_backend = Rc::clone(&backend);
        let close_backend = Rc::clone(&backend);
        let sink = Rc::new(RefCell::new(QueuedTypeActionSink::new(
            Rc::new(move |client, payload: &str| {
                send_backend.borrow_mut().send(client, payload.as_bytes())
            }),
            Rc::new(move |client| close_backend.borrow_mut().close(client)),
        )));

        let mut server = TextModeServer::new(Rc::clone(&backend));
        let cancel_sink = Rc::clone(&sink);
        server.set_client_close_callback(Rc::new(move |client| {
            cancel_sink.borrow_mut().cancel_client(client);
        }));

        Controller {
            config: ServiceConfig::default(),
            backend,
            server,
            keyboard,
            sink,
            dispatcher: CommandDispatcher::new(),
            snapshot_provider: self.snapshot_provider,
            memory: self.memory,
            exit_hook: self.exit_hook,
            shutdown_requested: Rc::new(Cell::new(false)),
        }
    }
}

/// Lifecycle states: Inactive until configured with `enable`, back to
/// Inactive on disable or shutdown. A port change while active rebinds the
/// listener atomically from the caller's point of view.
pub struct Controller<B: NetworkBackend> {
    config: ServiceConfig,
    backend: Rc<RefCell<B>>,
    server: TextModeServer<B>,
    keyboard: Rc<RefCell<KeyboardProcessor>>,
    sink: Rc<RefCell<QueuedTypeActionSink>>,
    dispatcher: CommandDispatcher,
    snapshot_provider: Option<SnapshotProvider>,
    memory: Option<Rc<RefCell<dyn MemoryBus>>>,
    exit_hook: Option<ExitHook>,
    shutdown_requested: Rc<Cell<bool>>,
}

impl<B: NetworkBackend> Controller<B> {
    /// Apply a configuration: rebuild the dispatcher, update the sink and
    /// server knobs, and start or stop the listener as needed.
    pub fn configure(&mut self, config: ServiceConfig) {
        let config = config.clamped();

        self.dispatcher = self.build_dispatcher(&config);

        {
            let mut sink = self.sink.borrow_mut();
            sink.set_close_after_response(config.close_after_response);
            sink.set_inter_token_frame_delay(config.inter_token_frame_delay);
        }

        self.server
            .set_close_after_response(config.close_after_response);
        self.server.set_auth_token(config.resolved_auth_token());

        if config.enable {
            if !self.server.is_running() || self.server.port() != config.port {
                if !self.server.start(config.port) {
                    log::warn!(
                        "unable to start listener on port {}",
                        config.port
                    );
                }
            }
        } else if self.server.is_running() {
            self.server.stop();
        }

        self.config = config;
    }

    fn build_dispatcher(&self, config: &ServiceConfig) -> CommandDispatcher {
        let mut dispatcher = CommandDispatcher::new();

        if let Some(snapshot_provider) = &self.snapshot_provider {
            dispatcher = dispatcher
                .with_frame_provider(self.build_frame_provider(config, snapshot_provider));
        }

        let handler_keyboard = Rc::clone(&self.keyboard);
        let keyboard_handler: KeyboardHandler = Rc::new(move |command: &str| {
            handler_keyboard.borrow_mut().handle_command(command)
        });
        dispatcher = dispatcher.with_keyboard_handler(keyboard_handler);

        let keys_keyboard = Rc::clone(&self.keyboard);
        dispatcher = dispatcher
            .with_keys_down_provider(Box::new(move || keys_keyboard.borrow().active_keys()));

        let shutdown = Rc::clone(&self.shutdown_requested);
        let exit_hook = self.exit_hook.clone();
        dispatcher = dispatcher.with_exit_handler(Box::new(move || {
            shutdown.set(true);
            if let Some(hook) = &exit_hook {
                hook();
            }
        }));

        if let Some(memory) = &self.memory {
            dispatcher = dispatcher.with_memory_bus(Rc::clone(memory));
        }

        dispatcher.set_macro_interkey_frames(config.macro_interkey_frames);
        dispatcher.set_debug_region(config.debug_address(), config.debug_length);
        dispatcher.set_type_sink(Rc::clone(&self.sink));
        dispatcher.set_type_sink_requires_client(true);
        dispatcher.set_queue_non_frame_commands(true);
        dispatcher.set_allow_deferred_frames(true);

        dispatcher
    }

    fn build_frame_provider(
        &self,
        config: &ServiceConfig,
        snapshot_provider: &SnapshotProvider,
    ) -> FrameProvider {
        let enable = config.enable;
        let show_attributes = config.show_attributes;
        let sentinel = config.sentinel.clone();
        let provider = Rc::clone(snapshot_provider);
        let keyboard = Rc::clone(&self.keyboard);

        Rc::new(move || {
            if !enable {
                return Err(ServiceError::Disabled);
            }
            let snapshot = provider().map_err(ServiceError::from)?;
            let options = EncodingOptions {
                show_attributes,
                sentinel: sentinel.clone(),
                keys_down: keyboard.borrow().active_keys(),
            };
            Ok(build_ansi_frame(&snapshot, &options))
        })
    }

    /// Pump the server then the queued sink. Called once per emulator poll
    /// tick; never blocks.
    pub fn poll(&mut self) {
        self.server.poll(&mut self.dispatcher);
        self.sink.borrow_mut().poll();
    }

    /// Handle a protocol line with no client attached, for host-side
    /// introspection.
    pub fn handle_command(&mut self, line: &str) -> CommandResponse {
        self.dispatcher.handle_line(line)
    }

    /// Stop the listener and release any held keys.
    pub fn shutdown(&mut self) {
        self.server.stop();
        self.keyboard.borrow_mut().release_all();
    }

    /// Whether a client requested emulator shutdown via EXIT.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.get()
    }

    pub fn is_listening(&self) -> bool {
        self.server.is_running()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn backend(&self) -> Rc<RefCell<B>> {
        Rc::clone(&self.backend)
    }

    pub fn dispatcher(&mut self) -> &mut CommandDispatcher {
        &mut self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBackend;
    use crate::keys::KeyCode;
    use crate::memory::testing::VecBus;
    use crate::server::BackendEvent;
    use dostap_surface::{CursorState, TextCell};

    fn test_snapshot_provider() -> SnapshotProvider {
        Rc::new(|| {
            Ok(Snapshot {
                columns: 2,
                rows: 1,
                cells: vec![TextCell::new(b'E', 0x1E), TextCell::new(b'F', 0x07)],
                cursor: CursorState::default(),
            })
        })
    }

    fn plain_config(enable: bool) -> ServiceConfig {
        ServiceConfig {
            enable,
            show_attributes: false,
            sentinel: "*".to_string(),
            ..ServiceConfig::default()
        }
    }

    fn build_controller() -> (
        Controller<FakeBackend>,
        Rc<RefCell<Vec<(KeyCode, bool)>>>,
    ) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink_events = Rc::clone(&events);
        let controller = ControllerBuilder::new(FakeBackend::new())
            .with_snapshot_provider(test_snapshot_provider())
            .with_memory_bus(Rc::new(RefCell::new(VecBus::new(0x10000))))
            .with_key_sink(Box::new(move |key, pressed| {
                sink_events.borrow_mut().push((key, pressed));
            }))
            .build();
        (controller, events)
    }

    const EXPECTED_FRAME: &str = "*META cols=2\n\
                                  *META rows=1\n\
                                  *META cursor=disabled\n\
                                  *META attributes=hide\n\
                                  *META keys_down=\n\
                                  *PAYLOAD\nEF\n";

    #[test]
    fn enable_starts_the_listener_and_disable_stops_it() {
        let (mut controller, _events) = build_controller();

        controller.configure(plain_config(false));
        assert!(!controller.is_listening());

        controller.configure(plain_config(true));
        assert!(controller.is_listening());
        assert_eq!(controller.backend().borrow().started_port, Some(6000));

        controller.configure(plain_config(false));
        assert!(!controller.is_listening());
    }

    #[test]
    fn port_change_rebinds_the_listener() {
        let (mut controller, _events) = build_controller();

        controller.configure(plain_config(true));
        assert_eq!(controller.backend().borrow().started_port, Some(6000));

        let mut config = plain_config(true);
        config.port = 6123;
        controller.configure(config);
        assert!(controller.is_listening());
        assert_eq!(controller.backend().borrow().started_port, Some(6123));
    }

    #[test]
    fn get_serves_an_encoded_frame_over_the_wire() {
        let (mut controller, _events) = build_controller();
        controller.configure(plain_config(true));

        {
            let backend = controller.backend();
            let mut backend = backend.borrow_mut();
            backend.queue_events(vec![BackendEvent::Connected(1)]);
            backend.queue_events(vec![BackendEvent::Data(1, b"GET\n".to_vec())]);
        }

        controller.poll();
        controller.poll();

        assert_eq!(
            controller.backend().borrow().sent_text(),
            vec![(1, EXPECTED_FRAME.to_string())]
        );
    }

    #[test]
    fn get_fails_while_disabled() {
        let (mut controller, _events) = build_controller();
        controller.configure(plain_config(false));

        let response = controller.handle_command("GET");
        assert!(!response.ok);
        assert_eq!(response.payload, "ERR text-mode server disabled\n");
    }

    #[test]
    fn deferred_type_runs_across_polls_and_sends_the_frame() {
        let (mut controller, events) = build_controller();
        controller.configure(plain_config(true));

        {
            let backend = controller.backend();
            let mut backend = backend.borrow_mut();
            backend.queue_events(vec![BackendEvent::Connected(2)]);
            backend.queue_events(vec![BackendEvent::Data(
                2,
                b"TYPE A 3frames VIEW\n".to_vec(),
            )]);
        }

        // Nothing is sent while the plan is still executing.
        controller.poll();
        controller.poll();
        assert!(controller.backend().borrow().sent.is_empty());

        for _ in 0..8 {
            controller.poll();
        }

        assert_eq!(
            *events.borrow(),
            vec![(KeyCode::A, true), (KeyCode::A, false)]
        );
        let sent = controller.backend().borrow().sent_text();
        assert_eq!(sent, vec![(2, EXPECTED_FRAME.to_string())]);
    }

    #[test]
    fn client_disconnect_cancels_pending_type_plans() {
        let (mut controller, events) = build_controller();
        controller.configure(plain_config(true));

        {
            let backend = controller.backend();
            let mut backend = backend.borrow_mut();
            backend.queue_events(vec![BackendEvent::Connected(3)]);
            backend.queue_events(vec![BackendEvent::Data(
                3,
                b"TYPE 10frames A GET\n".to_vec(),
            )]);
            backend.queue_events(vec![BackendEvent::Closed(3)]);
        }

        controller.poll();
        controller.poll();
        controller.poll();
        for _ in 0..20 {
            controller.poll();
        }

        // The plan died before its key action ran.
        assert!(events.borrow().is_empty());
        assert!(controller.backend().borrow().sent.is_empty());

        let stats = controller.dispatcher().stats();
        assert_eq!(stats.failures(), 1);
    }

    #[test]
    fn exit_raises_the_shutdown_flag_and_fires_the_hook() {
        let hook_fired = Rc::new(Cell::new(false));
        let hook_flag = Rc::clone(&hook_fired);
        let mut controller = ControllerBuilder::new(FakeBackend::new())
            .with_snapshot_provider(test_snapshot_provider())
            .with_exit_hook(Rc::new(move || hook_flag.set(true)))
            .build();
        controller.configure(plain_config(true));

        let response = controller.handle_command("EXIT");
        assert!(response.ok);
        assert!(controller.shutdown_requested());
        assert!(hook_fired.get());
    }

    #[test]
    fn keyboard_state_feeds_stats_and_frame_metadata() {
        let (mut controller, _events) = build_controller();
        controller.configure(plain_config(true));

        assert!(controller.handle_command("DOWN Shift").ok);

        let response = controller.handle_command("STATS");
        assert!(response.payload.ends_with("keys_down=Shift\n"));

        let response = controller.handle_command("GET");
        assert!(response.ok);
        assert!(response.payload.contains("*META keys_down=Shift\n"));
    }

    #[test]
    fn shutdown_releases_held_keys() {
        let (mut controller, events) = build_controller();
        controller.configure(plain_config(true));

        assert!(controller.handle_command("DOWN Shift").ok);
        controller.shutdown();

        assert_eq!(
            *events.borrow(),
            vec![(KeyCode::LeftShift, true), (KeyCode::LeftShift, false)]
        );
        assert!(!controller.is_listening());
    }

    #[test]
    fn debug_region_round_trip() {
        let (mut controller, _events) = build_controller();
        let mut config = plain_config(true);
        config.debug_segment = 0x0900;
        config.debug_length = 5;
        controller.configure(config);

        let response = controller.handle_command("POKE 0x9000 484F535424");
        assert!(response.ok);
        assert_eq!(response.payload, "OK\n");

        let response = controller.handle_command("DEBUG");
        assert!(response.ok);
        assert_eq!(response.payload, "address=0x00009000 data=484F535424\n");
    }
}
