use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::memory::combine_segment_offset;
use dostap_surface::DEFAULT_SENTINEL;

/// Environment variable consulted when no auth token is configured.
const AUTH_TOKEN_ENV: &str = "DOSTAP_AUTH_TOKEN";

const DEFAULT_PORT: u16 = 6000;
const MAX_FRAME_DELAY: u32 = 60;
const MAX_DEBUG_LENGTH: u32 = 4096;

/// Errors emitted while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO failed")]
    Io(#[from] std::io::Error),
    #[error("config JSON failed")]
    Json(#[from] serde_json::Error),
}

/// The `[textmode_server]` configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Start the TCP listener.
    pub enable: bool,
    /// Listener port, valid range 1024-65535.
    pub port: u16,
    /// Emit ANSI color escapes when true, plain text when false.
    pub show_attributes: bool,
    /// UTF-8 sentinel prefixing metadata and payload lines.
    pub sentinel: String,
    /// Drop the connection after each command response.
    pub close_after_response: bool,
    /// Frames inserted between characters of quoted TYPE strings (0-60).
    pub macro_interkey_frames: u32,
    /// Frames inserted between queued TYPE actions (0-60).
    pub inter_token_frame_delay: u32,
    /// Real-mode segment anchoring the DEBUG region.
    pub debug_segment: u32,
    /// Offset added to the shifted segment.
    pub debug_offset: u32,
    /// DEBUG region length in bytes (0-4096); 0 disables DEBUG.
    pub debug_length: u32,
    /// Shared secret for AUTH; supports `${ENV}` expansion, empty disables.
    pub auth_token: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enable: false,
            port: DEFAULT_PORT,
            show_attributes: true,
            sentinel: DEFAULT_SENTINEL.to_string(),
            close_after_response: false,
            macro_interkey_frames: 1,
            inter_token_frame_delay: 1,
            debug_segment: 0,
            debug_offset: 0,
            debug_length: 0,
            auth_token: String::new(),
        }
    }
}

impl ServiceConfig {
    /// Force every value into its documented range, logging anything that
    /// had to move.
    pub fn clamped(mut self) -> Self {
        if self.port < 1024 {
            log::warn!(
                "port {} below the allowed range, using {DEFAULT_PORT}",
                self.port
            );
            self.port = DEFAULT_PORT;
        }
        if self.macro_interkey_frames > MAX_FRAME_DELAY {
            log::warn!(
                "macro_interkey_frames {} clamped to {MAX_FRAME_DELAY}",
                self.macro_interkey_frames
            );
            self.macro_interkey_frames = MAX_FRAME_DELAY;
        }
        if self.inter_token_frame_delay > MAX_FRAME_DELAY {
            log::warn!(
                "inter_token_frame_delay {} clamped to {MAX_FRAME_DELAY}",
                self.inter_token_frame_delay
            );
            self.inter_token_frame_delay = MAX_FRAME_DELAY;
        }
        if self.debug_length > MAX_DEBUG_LENGTH {
            log::warn!(
                "debug_length {} clamped to {MAX_DEBUG_LENGTH}",
                self.debug_length
            );
            self.debug_length = MAX_DEBUG_LENGTH;
        }
        self
    }

    /// Linear base address of the DEBUG region.
    pub fn debug_address(&self) -> u32 {
        combine_segment_offset(self.debug_segment, self.debug_offset)
    }

    /// The auth token with `${ENV}` references expanded, falling back to
    /// the `DOSTAP_AUTH_TOKEN` environment variable when empty.
    pub fn resolved_auth_token(&self) -> String {
        let expanded = expand_env(&self.auth_token);
        if !expanded.is_empty() {
            return expanded;
        }
        std::env::var(AUTH_TOKEN_ENV).unwrap_or_default()
    }
}

/// Replace `${NAME}` spans with the named environment variable; unset
/// variables expand to nothing and malformed spans pass through verbatim.
fn expand_env(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if let Ok(env_value) = std::env::var(name) {
                    result.push_str(&env_value);
                }
                rest = &after[end + 1..];
            },
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            },
        }
    }
    result.push_str(rest);
    result
}

/// Load a configuration file, tolerating a missing one.
pub fn load_config(path: &Path) -> Result<Option<ServiceConfig>, ConfigError> {
    let data = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(None);
        },
        Err(err) => return Err(err.into()),
    };

    let parsed: ServiceConfig = serde_json::from_str(&data)?;
    Ok(Some(parsed.clamped()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let config = ServiceConfig::default();

        assert!(!config.enable);
        assert_eq!(config.port, 6000);
        assert!(config.show_attributes);
        assert_eq!(config.sentinel, "\u{1F5F5}");
        assert_eq!(config.sentinel.len(), 4);
        assert!(!config.close_after_response);
        assert_eq!(config.macro_interkey_frames, 1);
        assert_eq!(config.inter_token_frame_delay, 1);
        assert_eq!(config.debug_segment, 0);
        assert_eq!(config.debug_offset, 0);
        assert_eq!(config.debug_length, 0);
        assert!(config.auth_token.is_empty());
    }

    #[test]
    fn clamping_enforces_documented_ranges() {
        let config = ServiceConfig {
            port: 80,
            macro_interkey_frames: 100,
            inter_token_frame_delay: 75,
            debug_length: 100_000,
            ..ServiceConfig::default()
        }
        .clamped();

        assert_eq!(config.port, 6000);
        assert_eq!(config.macro_interkey_frames, 60);
        assert_eq!(config.inter_token_frame_delay, 60);
        assert_eq!(config.debug_length, 4096);
    }

    #[test]
    fn debug_address_combines_segment_and_offset() {
        let config = ServiceConfig {
            debug_segment: 0x0900,
            debug_offset: 0x0000,
            ..ServiceConfig::default()
        };
        assert_eq!(config.debug_address(), 0x9000);

        let config = ServiceConfig {
            debug_segment: 0xC000,
            debug_offset: 0x1234,
            ..ServiceConfig::default()
        };
        assert_eq!(config.debug_address(), 0xC1234);
    }

    #[test]
    fn env_references_expand_in_the_auth_token() {
        std::env::set_var("DOSTAP_TEST_TOKEN", "sesame");

        let config = ServiceConfig {
            auth_token: "pre-${DOSTAP_TEST_TOKEN}".to_string(),
            ..ServiceConfig::default()
        };
        assert_eq!(config.resolved_auth_token(), "pre-sesame");

        std::env::remove_var("DOSTAP_TEST_TOKEN");
    }

    #[test]
    fn unset_variables_expand_to_nothing() {
        assert_eq!(expand_env("a${DOSTAP_DOES_NOT_EXIST}b"), "ab");
        assert_eq!(expand_env("plain"), "plain");
        assert_eq!(expand_env("open${brace"), "open${brace");
    }

    #[test]
    fn loader_round_trips_a_config_file() {
        let path = std::env::temp_dir().join(format!(
            "dostap-config-{}.json",
            std::process::id()
        ));
        fs::write(
            &path,
            r#"{
                "enable": true,
                "port": 6123,
                "show_attributes": false,
                "sentinel": "@",
                "close_after_response": true,
                "debug_segment": 49152,
                "debug_offset": 4660,
                "debug_length": 64
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap().unwrap();
        fs::remove_file(&path).ok();

        assert!(config.enable);
        assert_eq!(config.port, 6123);
        assert!(!config.show_attributes);
        assert_eq!(config.sentinel, "@");
        assert!(config.close_after_response);
        assert_eq!(config.debug_segment, 0xc000);
        assert_eq!(config.debug_offset, 0x1234);
        assert_eq!(config.debug_length, 64);
        // Unlisted keys keep their defaults.
        assert_eq!(config.macro_interkey_frames, 1);
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let path = std::env::temp_dir().join("dostap-missing-config.json");
        fs::remove_file(&path).ok();
        assert!(load_config(&path).unwrap().is_none());
    }
}
