/// Video controller mode discriminant, reduced to what the capture path
/// needs to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoMode {
    Text,
    Graphics,
}

/// Cursor registers as exposed by the video controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorRegisters {
    pub enabled: bool,
    /// Byte address of the cursor within video memory.
    pub address: u32,
    /// Whether the hardware blink gate applies to the cursor.
    pub blink_enabled: bool,
    /// Current phase of the blink oscillator.
    pub blink_phase_on: bool,
}

/// Read-only view of the emulator's video controller state.
///
/// The emulator owns all of this; the capture path only ever reads through
/// it. Zero values for `char_height`, `row_stride` and `byte_panning_shift`
/// select the hardware defaults.
pub struct VideoTextState<'a> {
    pub mode: VideoMode,
    /// The video memory plane, or `None` when nothing is mapped.
    pub memory: Option<&'a [u8]>,
    /// Wrap size of the video memory in bytes; 0 defers to `linear_mask`.
    pub vmem_wrap: u32,
    /// Mask applied to linear addresses when `vmem_wrap` is unset.
    pub linear_mask: u32,
    /// Character columns (CRTC horizontal display blocks).
    pub columns: u32,
    /// Total scan lines of the active display area.
    pub scan_lines_total: u32,
    /// Scan lines per character row.
    pub char_height: u32,
    /// Bytes added per character row.
    pub row_stride: u32,
    /// Display start in words, as latched by the CRTC.
    pub display_start_word: u32,
    /// Multiplier converting the start word into a byte address.
    pub byte_panning_shift: u32,
    pub cursor: CursorRegisters,
}

impl<'a> VideoTextState<'a> {
    /// A blank 80x25 text-mode view over the provided memory plane, useful
    /// as a starting point for emulator integrations.
    pub fn text_80x25(memory: &'a [u8]) -> Self {
        Self {
            mode: VideoMode::Text,
            memory: Some(memory),
            vmem_wrap: memory.len() as u32,
            linear_mask: (memory.len() as u32).saturating_sub(1),
            columns: 80,
            scan_lines_total: 25 * 16,
            char_height: 16,
            row_stride: 160,
            display_start_word: 0,
            byte_panning_shift: 2,
            cursor: CursorRegisters::default(),
        }
    }
}
