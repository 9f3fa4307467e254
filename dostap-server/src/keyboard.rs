use std::collections::HashMap;

use crate::keys::{display_name, parse_key_name, KeyCode};
use crate::protocol::CommandResponse;

/// Sink receiving simulated key transitions destined for the emulator's
/// keyboard bus.
pub type KeySink = Box<dyn FnMut(KeyCode, bool)>;

/// Handles the keyboard verbs (PRESS/DOWN/UP/RESET/STATS) and tracks which
/// keys are currently held so they can be reported and released.
pub struct KeyboardProcessor {
    sink: KeySink,
    pressed: HashMap<KeyCode, String>,
    commands: u64,
    success: u64,
    failures: u64,
}

impl KeyboardProcessor {
    pub fn new(sink: KeySink) -> Self {
        Self {
            sink,
            pressed: HashMap::new(),
            commands: 0,
            success: 0,
            failures: 0,
        }
    }

    /// Handle one keyboard command line. The verb is matched
    /// case-insensitively; key tokens are case-sensitive.
    pub fn handle_command(&mut self, raw_command: &str) -> CommandResponse {
        let trimmed = raw_command.trim();
        if trimmed.is_empty() {
            log::debug!("keyboard command empty");
            return CommandResponse::error("empty command");
        }

        let (verb, args) = match trimmed.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (trimmed, ""),
        };
        let verb = verb.to_ascii_uppercase();
        log::debug!("keyboard command verb={verb} args={args:?}");

        if verb == "STATS" {
            return self.handle_stats();
        }

        self.commands += 1;

        let response = match verb.as_str() {
            "PRESS" => self.handle_press(args),
            "DOWN" => self.handle_down(args),
            "UP" => self.handle_up(args),
            "RESET" => self.handle_reset(),
            _ => CommandResponse::error("unknown command"),
        };

        if response.ok {
            self.success += 1;
        } else {
            self.failures += 1;
        }
        response
    }

    /// Release every held key and clear the bookkeeping. Never fails.
    pub fn release_all(&mut self) {
        let pressed = std::mem::take(&mut self.pressed);
        for (key, name) in pressed {
            log::debug!("keyboard reset releases {name}");
            (self.sink)(key, false);
        }
    }

    /// Display names of all currently held keys, sorted lexicographically.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pressed.values().cloned().collect();
        keys.sort();
        keys
    }

    fn handle_press(&mut self, args: &str) -> CommandResponse {
        let (token, key) = match self.parse_key_argument(args) {
            Ok(parsed) => parsed,
            Err(response) => return response,
        };
        if self.pressed.contains_key(&key) {
            log::debug!("press rejected, {token} already down");
            return CommandResponse::error("key already down");
        }

        (self.sink)(key, true);
        (self.sink)(key, false);
        CommandResponse::success("OK\n")
    }

    fn handle_down(&mut self, args: &str) -> CommandResponse {
        let (token, key) = match self.parse_key_argument(args) {
            Ok(parsed) => parsed,
            Err(response) => return response,
        };
        if self.pressed.contains_key(&key) {
            log::debug!("down rejected, {token} already down");
            return CommandResponse::error("key already down");
        }

        (self.sink)(key, true);
        self.pressed.insert(key, display_name(&token));
        CommandResponse::success("OK\n")
    }

    fn handle_up(&mut self, args: &str) -> CommandResponse {
        let (_token, key) = match self.parse_key_argument(args) {
            Ok(parsed) => parsed,
            Err(response) => return response,
        };
        if self.pressed.remove(&key).is_none() {
            return CommandResponse::error("key not down");
        }

        (self.sink)(key, false);
        CommandResponse::success("OK\n")
    }

    fn handle_reset(&mut self) -> CommandResponse {
        self.release_all();
        CommandResponse::success("OK\n")
    }

    fn handle_stats(&self) -> CommandResponse {
        CommandResponse::success(format!(
            "commands={} success={} failures={}\n",
            self.commands, self.success, self.failures
        ))
    }

    /// Extract a single key token from the argument list and resolve it.
    fn parse_key_argument(
        &self,
        args: &str,
    ) -> Result<(String, KeyCode), CommandResponse> {
        let mut tokens = args.split_whitespace();
        let token = match tokens.next() {
            Some(token) => token.to_string(),
            None => return Err(CommandResponse::error("missing key")),
        };
        if tokens.next().is_some() {
            return Err(CommandResponse::error("unexpected arguments"));
        }
        match parse_key_name(&token) {
            Some(key) => Ok((token, key)),
            None => Err(CommandResponse::error("unknown key")),
        }
    }
}
