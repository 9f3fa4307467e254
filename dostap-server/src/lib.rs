//! A line-protocol control plane for DOS emulators: scrape the text plane
//! as ANSI frames, inject scripted keyboard macros paced against the
//! presentation clock, and read or write guest memory over localhost TCP.
//!
//! Everything runs cooperatively on the emulator's main loop thread; the
//! host calls [`Controller::poll`] once per tick and nothing ever blocks.

mod config;
mod controller;
mod dispatch;
mod error;
mod fake;
mod keyboard;
mod keys;
mod memory;
mod net;
mod plan;
mod protocol;
mod queue;
mod server;

pub use config::{load_config, ConfigError, ServiceConfig};
pub use controller::{Controller, ControllerBuilder, ExitHook, SnapshotProvider};
pub use dispatch::{
    CommandDispatcher, DispatchStats, ExitHandler, KeysDownProvider,
};
pub use error::ServiceError;
pub use fake::FakeBackend;
pub use keyboard::{KeySink, KeyboardProcessor};
pub use keys::{
    canonical_spelling, char_to_key, display_name, parse_key_name, CharKey,
    KeyCode,
};
pub use memory::{
    combine_segment_offset, peek_region, poke_region, MemoryBus, MemoryError,
};
pub use net::MioBackend;
pub use plan::{plan_type_command, TypeAction, TypeCommandPlan};
pub use protocol::{ClientHandle, CommandOrigin, CommandResponse};
pub use queue::{
    CloseHandle, CompletionCallback, FrameProvider, KeyboardHandler,
    QueuedTypeActionSink, SendHandle,
};
pub use server::{
    BackendEvent, ClientCloseCallback, NetworkBackend, TextModeServer,
};

pub use dostap_surface as surface;
