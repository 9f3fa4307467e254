//! The protocol command dispatcher: verb parsing, routing and request
//! accounting.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::memory::{peek_region, poke_region, MemoryBus};
use crate::plan::{plan_type_command, TypeAction, TypeCommandPlan};
use crate::protocol::{CommandOrigin, CommandResponse};
use crate::queue::{FrameProvider, KeyboardHandler, QueuedTypeActionSink};

/// Request counters shared with deferred completions.
#[derive(Debug, Default)]
pub struct DispatchStats {
    requests: Cell<u64>,
    success: Cell<u64>,
    failures: Cell<u64>,
}

impl DispatchStats {
    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn success(&self) -> u64 {
        self.success.get()
    }

    pub fn failures(&self) -> u64 {
        self.failures.get()
    }

    fn add_request(&self) {
        self.requests.set(self.requests.get() + 1);
    }

    fn record(&self, ok: bool) {
        if ok {
            self.success.set(self.success.get() + 1);
        } else {
            self.failures.set(self.failures.get() + 1);
        }
    }
}

/// Provides the display names of currently held keys for STATS and frame
/// metadata.
pub type KeysDownProvider = Box<dyn Fn() -> Vec<String>>;

/// Hook invoked when a client asks the emulator to exit.
pub type ExitHandler = Box<dyn Fn()>;

/// Every verb the dispatcher recognises, in canonical spelling. AUTH is
/// listed for the case-sensitivity hint even though the gate itself lives
/// on the server.
const VERBS: &[&str] = &[
    "GET", "VIEW", "TYPE", "STATS", "EXIT", "PRESS", "DOWN", "UP", "RESET",
    "PEEK", "POKE", "DEBUG", "AUTH",
];

/// Parses one protocol line, routes it to a handler and keeps the request
/// counters. Verbs are uppercase-exact.
pub struct CommandDispatcher {
    frame_provider: Option<FrameProvider>,
    keyboard_handler: Option<KeyboardHandler>,
    exit_handler: Option<ExitHandler>,
    keys_down_provider: Option<KeysDownProvider>,
    memory: Option<Rc<RefCell<dyn MemoryBus>>>,
    type_sink: Option<Rc<RefCell<QueuedTypeActionSink>>>,
    stats: Rc<DispatchStats>,
    exit_requested: bool,
    macro_interkey_frames: u32,
    debug_address: u32,
    debug_length: u32,
    type_sink_requires_client: bool,
    queue_non_frame_commands: bool,
    allow_deferred_frames: bool,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            frame_provider: None,
            keyboard_handler: None,
            exit_handler: None,
            keys_down_provider: None,
            memory: None,
            type_sink: None,
            stats: Rc::new(DispatchStats::default()),
            exit_requested: false,
            macro_interkey_frames: 0,
            debug_address: 0,
            debug_length: 0,
            type_sink_requires_client: false,
            queue_non_frame_commands: true,
            allow_deferred_frames: true,
        }
    }

    pub fn with_frame_provider(mut self, provider: FrameProvider) -> Self {
        self.frame_provider = Some(provider);
        self
    }

    pub fn with_keyboard_handler(mut self, handler: KeyboardHandler) -> Self {
        self.keyboard_handler = Some(handler);
        self
    }

    pub fn with_exit_handler(mut self, handler: ExitHandler) -> Self {
        self.exit_handler = Some(handler);
        self
    }

    pub fn with_keys_down_provider(mut self, provider: KeysDownProvider) -> Self {
        self.keys_down_provider = Some(provider);
        self
    }

    pub fn with_memory_bus(mut self, bus: Rc<RefCell<dyn MemoryBus>>) -> Self {
        self.memory = Some(bus);
        self
    }

    pub fn set_type_sink(&mut self, sink: Rc<RefCell<QueuedTypeActionSink>>) {
        self.type_sink = Some(sink);
    }

    pub fn set_macro_interkey_frames(&mut self, frames: u32) {
        self.macro_interkey_frames = frames;
    }

    pub fn set_debug_region(&mut self, address: u32, length: u32) {
        self.debug_address = address;
        self.debug_length = length;
    }

    /// When set, plans with actions but no client to answer run
    /// synchronously instead of being queued.
    pub fn set_type_sink_requires_client(&mut self, requires_client: bool) {
        self.type_sink_requires_client = requires_client;
    }

    /// When cleared, plans that do not request a frame run synchronously.
    pub fn set_queue_non_frame_commands(&mut self, enable: bool) {
        self.queue_non_frame_commands = enable;
    }

    /// When cleared, frame-requesting plans run synchronously and return
    /// the frame inline.
    pub fn set_allow_deferred_frames(&mut self, enable: bool) {
        self.allow_deferred_frames = enable;
    }

    pub fn stats(&self) -> Rc<DispatchStats> {
        Rc::clone(&self.stats)
    }

    /// True once after EXIT was handled; reading it clears the flag.
    pub fn consume_exit_request(&mut self) -> bool {
        std::mem::take(&mut self.exit_requested)
    }

    /// Handle a protocol line with no client attached.
    pub fn handle_line(&mut self, line: &str) -> CommandResponse {
        self.handle_command(line, CommandOrigin::NONE)
    }

    /// Handle one protocol line from the given client.
    pub fn handle_command(
        &mut self,
        line: &str,
        origin: CommandOrigin,
    ) -> CommandResponse {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return CommandResponse::error("empty command");
        }

        let (verb, argument) = match trimmed.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (trimmed, ""),
        };

        match verb {
            "GET" | "VIEW" => self.handle_get(argument),
            "TYPE" => self.handle_type(argument, origin),
            "STATS" => self.handle_stats(),
            "EXIT" => self.handle_exit(),
            "PRESS" | "DOWN" | "UP" | "RESET" => {
                self.handle_keyboard(verb, argument)
            },
            "PEEK" => self.handle_peek(argument),
            "POKE" => self.handle_poke(argument),
            "DEBUG" => self.handle_debug(),
            _ => {
                let upper = verb.to_ascii_uppercase();
                if upper != verb && VERBS.contains(&upper.as_str()) {
                    return CommandResponse::error(format!(
                        "commands are case-sensitive, use {upper}"
                    ));
                }
                CommandResponse::error("unknown command")
            },
        }
    }

    fn handle_get(&mut self, argument: &str) -> CommandResponse {
        let Some(provider) = &self.frame_provider else {
            return CommandResponse::error("service unavailable");
        };

        self.stats.add_request();
        let showspc = argument.eq_ignore_ascii_case("SHOWSPC");

        match provider() {
            Ok(frame) => {
                self.stats.record(true);
                CommandResponse::success(if showspc {
                    show_spaces(&frame)
                } else {
                    frame
                })
            },
            Err(err) => {
                self.stats.record(false);
                CommandResponse::error(err.to_string())
            },
        }
    }

    fn handle_stats(&self) -> CommandResponse {
        let keys_down = self
            .keys_down_provider
            .as_ref()
            .map(|provider| provider())
            .unwrap_or_default();
        CommandResponse::success(format!(
            "requests={} success={} failures={} keys_down={}\n",
            self.stats.requests(),
            self.stats.success(),
            self.stats.failures(),
            keys_down.join(",")
        ))
    }

    fn handle_exit(&mut self) -> CommandResponse {
        self.stats.add_request();
        if let Some(handler) = &self.exit_handler {
            handler();
        }
        self.exit_requested = true;
        self.stats.record(true);
        CommandResponse::success("OK\n")
    }

    fn handle_keyboard(&mut self, verb: &str, argument: &str) -> CommandResponse {
        let Some(handler) = &self.keyboard_handler else {
            return CommandResponse::error("keyboard unavailable");
        };

        self.stats.add_request();
        let line = if argument.is_empty() {
            verb.to_string()
        } else {
            format!("{verb} {argument}")
        };
        let response = handler(&line);
        self.stats.record(response.ok);
        response
    }

    fn handle_type(
        &mut self,
        argument: &str,
        origin: CommandOrigin,
    ) -> CommandResponse {
        let Some(handler) = self.keyboard_handler.clone() else {
            self.stats.add_request();
            self.stats.record(false);
            return CommandResponse::error("keyboard unavailable");
        };

        self.stats.add_request();
        let plan = plan_type_command(argument, self.macro_interkey_frames);

        let needs_inline = !plan.actions.is_empty()
            && ((self.type_sink_requires_client && origin.client == 0)
                || (!self.queue_non_frame_commands && !plan.request_frame)
                || (!self.allow_deferred_frames && plan.request_frame));

        match self.type_sink.clone() {
            Some(sink) if !needs_inline => {
                // Counters for queued plans settle exactly once, at
                // completion.
                let stats = Rc::clone(&self.stats);
                sink.borrow_mut().execute(
                    &plan,
                    origin,
                    handler,
                    self.frame_provider.clone(),
                    Box::new(move |success: bool| stats.record(success)),
                )
            },
            _ => {
                let response = self.execute_plan_inline(&plan, &handler);
                self.stats.record(response.ok);
                response
            },
        }
    }

    /// Drive a plan to completion right now: key events are submitted
    /// back-to-back and delays are skipped, since there is no client pacing
    /// to honour.
    fn execute_plan_inline(
        &self,
        plan: &TypeCommandPlan,
        handler: &KeyboardHandler,
    ) -> CommandResponse {
        for action in &plan.actions {
            let command = match action {
                TypeAction::Press(key) => format!("PRESS {key}"),
                TypeAction::Down(key) => format!("DOWN {key}"),
                TypeAction::Up(key) => format!("UP {key}"),
                TypeAction::DelayMs(_) | TypeAction::DelayFrames(_) => continue,
            };
            let response = handler(&command);
            if !response.ok {
                log::warn!(
                    "TYPE command {command:?} failed: {}",
                    response.payload.trim_end()
                );
            }
        }

        if !plan.request_frame {
            return CommandResponse::success("OK\n");
        }

        match &self.frame_provider {
            None => CommandResponse::error("service unavailable"),
            Some(provider) => match provider() {
                Ok(frame) => CommandResponse::success(frame),
                Err(err) => CommandResponse::error(err.to_string()),
            },
        }
    }

    fn handle_peek(&mut self, argument: &str) -> CommandResponse {
        let Some(memory) = &self.memory else {
            return CommandResponse::error("memory unavailable");
        };

        self.stats.add_request();
        let mut args = argument.split_whitespace();
        let parsed = match (args.next(), args.next(), args.next()) {
            (Some(addr), Some(len), None) => {
                parse_address(addr).zip(parse_number(len))
            },
            _ => None,
        };
        let Some((address, length)) = parsed else {
            self.stats.record(false);
            return CommandResponse::error("invalid peek arguments");
        };

        match peek_region(&*memory.borrow(), address, length) {
            Ok(bytes) => {
                self.stats.record(true);
                CommandResponse::success(format_region(address, &bytes))
            },
            Err(err) => {
                self.stats.record(false);
                CommandResponse::error(err.to_string())
            },
        }
    }

    fn handle_poke(&mut self, argument: &str) -> CommandResponse {
        let Some(memory) = &self.memory else {
            return CommandResponse::error("memory unavailable");
        };

        self.stats.add_request();
        let mut args = argument.split_whitespace();
        let (address, data) = match (args.next(), args.next(), args.next()) {
            (Some(addr), Some(hex), None) => {
                let Some(address) = parse_address(addr) else {
                    self.stats.record(false);
                    return CommandResponse::error("invalid poke arguments");
                };
                let Some(data) = parse_hex_bytes(hex) else {
                    self.stats.record(false);
                    return CommandResponse::error("invalid hex data");
                };
                (address, data)
            },
            _ => {
                self.stats.record(false);
                return CommandResponse::error("invalid poke arguments");
            },
        };

        match poke_region(&mut *memory.borrow_mut(), address, &data) {
            Ok(_) => {
                self.stats.record(true);
                CommandResponse::success("OK\n")
            },
            Err(err) => {
                self.stats.record(false);
                CommandResponse::error(err.to_string())
            },
        }
    }

    fn handle_debug(&mut self) -> CommandResponse {
        let Some(memory) = &self.memory else {
            return CommandResponse::error("memory unavailable");
        };

        self.stats.add_request();
        if self.debug_length == 0 {
            self.stats.record(false);
            return CommandResponse::error("debug region not configured");
        }

        match peek_region(&*memory.borrow(), self.debug_address, self.debug_length)
        {
            Ok(bytes) => {
                self.stats.record(true);
                CommandResponse::success(format_region(self.debug_address, &bytes))
            },
            Err(err) => {
                self.stats.record(false);
                CommandResponse::error(err.to_string())
            },
        }
    }
}

/// Replace every ASCII space with a middle dot, used by `GET SHOWSPC` to
/// make trailing blanks visible.
fn show_spaces(frame: &str) -> String {
    frame.replace(' ', "\u{00B7}")
}

fn format_region(address: u32, bytes: &[u8]) -> String {
    let mut data = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        data.push_str(&format!("{byte:02X}"));
    }
    format!("address=0x{address:08X} data={data}\n")
}

/// Addresses accept decimal, `0x` hex, trailing-`h` hex, and `SEG:OFF`.
fn parse_address(token: &str) -> Option<u32> {
    if let Some((segment, offset)) = token.split_once(':') {
        let segment = u32::from_str_radix(segment, 16).ok()?;
        let offset = u32::from_str_radix(offset, 16).ok()?;
        return Some(crate::memory::combine_segment_offset(segment, offset));
    }
    parse_number(token)
}

fn parse_number(token: &str) -> Option<u32> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = token.strip_suffix('h').or_else(|| token.strip_suffix('H'))
    {
        return u32::from_str_radix(hex, 16).ok();
    }
    token.parse().ok()
}

fn parse_hex_bytes(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() || text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&text[index..index + 2], 16).ok())
        .collect()
}
