//! Snapshot capture and ANSI encoding for an emulated text-mode video plane.

mod cell;
mod cp437;
mod encode;
mod palette;
mod snapshot;
mod video;

pub use cell::{CursorState, TextCell};
pub use cp437::glyph_to_char;
pub use encode::{build_ansi_frame, EncodingOptions, DEFAULT_SENTINEL};
pub use palette::{Rgb, DOS_PALETTE};
pub use snapshot::{capture_snapshot, Snapshot, SnapshotError};
pub use video::{CursorRegisters, VideoMode, VideoTextState};
